use std::time::{Duration, Instant};

/// When an identity lease should be replaced, and how many failed
/// replacements are tolerated in a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationPolicy {
    /// Soft lease age after which a new lease is acquired.
    pub interval: Duration,
    /// Optional cap on worker queries issued under one lease.
    pub max_queries: Option<u64>,
    /// Consecutive failed acquisitions that trip the rotation breaker.
    pub failure_limit: u32,
    /// Hard age after which the vendor's proxy can no longer be relied on.
    pub lease_ttl: Duration,
    /// Treat a rate-limited query as a signal that the identity is burned.
    pub rotate_on_rate_limit: bool,
}

/// Tracks the age and use of the current lease against a [`RotationPolicy`].
#[derive(Debug, Clone)]
pub struct RotationSchedule {
    policy: RotationPolicy,
    lease_started: Option<Instant>,
    queries_on_lease: u64,
    forced: bool,
    consecutive_failures: u32,
}

impl RotationSchedule {
    pub fn new(policy: RotationPolicy) -> Self {
        Self {
            policy,
            lease_started: None,
            queries_on_lease: 0,
            forced: false,
            consecutive_failures: 0,
        }
    }

    pub fn is_due_at(&self, now: Instant) -> bool {
        let Some(started) = self.lease_started else {
            return true;
        };
        if self.forced {
            return true;
        }
        if now.saturating_duration_since(started) >= self.policy.interval {
            return true;
        }
        self.policy
            .max_queries
            .is_some_and(|max| self.queries_on_lease >= max)
    }

    /// A lease past its TTL must not be used even if rotation failed.
    pub fn lease_usable_at(&self, now: Instant) -> bool {
        self.lease_started
            .is_some_and(|started| now.saturating_duration_since(started) < self.policy.lease_ttl)
    }

    pub fn lease_started_at(&mut self, now: Instant) {
        self.lease_started = Some(now);
        self.queries_on_lease = 0;
        self.forced = false;
        self.consecutive_failures = 0;
    }

    pub fn lease_released(&mut self) {
        self.lease_started = None;
        self.queries_on_lease = 0;
        self.forced = false;
    }

    pub fn record_query(&mut self) {
        self.queries_on_lease = self.queries_on_lease.saturating_add(1);
    }

    pub fn record_rate_limited(&mut self) {
        if self.policy.rotate_on_rate_limit {
            self.forced = true;
        }
    }

    /// Returns `true` once the rotation breaker has tripped.
    pub fn record_failure(&mut self) -> bool {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.consecutive_failures >= self.policy.failure_limit
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn lease_age_at(&self, now: Instant) -> Option<Duration> {
        self.lease_started.map(|started| now.saturating_duration_since(started))
    }
}
