use std::collections::HashMap;
use std::time::{Duration, Instant};

use engine_logging::engine_debug;
use harvester_core::RateLimitState;

use crate::clock;

/// Endpoint classes that share one call-spacing budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointClass {
    /// Vendor allow-list and proxy issuance, plus the egress address lookup
    /// that precedes them.
    ControlPlane,
    /// The API being harvested.
    TargetApi,
}

/// Enforces a minimum spacing between successive calls of each class.
///
/// Owned by the single harvest task; every call site borrows it mutably, so
/// check-then-stamp cannot interleave.
#[derive(Debug, Default)]
pub struct RateLimiter {
    classes: HashMap<EndpointClass, RateLimitState>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_class(mut self, class: EndpointClass, min_interval: Duration) -> Self {
        self.classes.insert(class, RateLimitState::new(min_interval));
        self
    }

    /// Suspends until `min_interval` has passed since the last recorded call
    /// of `class`. Classes without a configured interval never wait.
    pub async fn wait_until_ready(&self, class: EndpointClass) {
        let Some(state) = self.classes.get(&class) else {
            return;
        };
        let remaining = state.remaining_at(clock::now());
        if !remaining.is_zero() {
            engine_debug!("{:?} rate limit: waiting {:?}", class, remaining);
            tokio::time::sleep(remaining).await;
        }
    }

    pub fn record_call(&mut self, class: EndpointClass) {
        if let Some(state) = self.classes.get_mut(&class) {
            state.record_call_at(clock::now());
        }
    }

    /// Waits for `class` to be ready and stamps the call in one step.
    pub async fn acquire(&mut self, class: EndpointClass) {
        self.wait_until_ready(class).await;
        self.record_call(class);
    }

    pub fn last_call(&self, class: EndpointClass) -> Option<Instant> {
        self.classes.get(&class).and_then(RateLimitState::last_call)
    }

    pub fn min_interval(&self, class: EndpointClass) -> Option<Duration> {
        self.classes.get(&class).map(RateLimitState::min_interval)
    }
}
