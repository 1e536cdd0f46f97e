//! The budget-bounded, resumable harvest loop.
//!
//! ```text
//! SCANNING -> CHECK_BUDGET -> CHECK_ROTATION -> [ROTATING] -> PROCESSING -> RECORD -> SCANNING
//!                  |                                 |
//!                  v                                 v
//!      STOPPED_BUDGET / STOPPED_BREAKER    STOPPED_BREAKER / STOPPED_REJECTED
//! ```
//!
//! Every exit path, including cancellation, funnels through
//! [`HarvestLoop::run`]'s finalization: leases are released and progress is
//! flushed exactly once.

use engine_logging::{
    engine_debug, engine_error, engine_info, engine_transition, engine_warn, format_elapsed,
};
use harvester_core::{
    BreakerTrip, Budget, BudgetVerdict, LoopState, Outcome, RotationSchedule, RunSummary,
    StopReason,
};
use tokio_util::sync::CancellationToken;

use crate::address::AddressLookup;
use crate::clock;
use crate::config::LoopSettings;
use crate::control_plane::ControlPlane;
use crate::error::HarvestError;
use crate::lease::{IdentityLeaseManager, LeaseError};
use crate::progress::{ProgressStore, ResumeMode};
use crate::rate_limit::{EndpointClass, RateLimiter};
use crate::worker::Worker;

/// How a run ended, with its counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub stop: StopReason,
    pub final_state: LoopState,
    pub summary: RunSummary,
}

impl RunReport {
    pub fn is_fatal(&self) -> bool {
        self.stop.is_fatal()
    }

    /// Fatal stops become errors; clean stops yield the summary.
    pub fn into_result(self) -> Result<RunSummary, HarvestError> {
        match self.stop {
            StopReason::CircuitOpen(trip) => Err(HarvestError::CircuitOpen(trip)),
            StopReason::VendorRejected(message) => Err(HarvestError::VendorRejection(message)),
            StopReason::Exhausted | StopReason::Budget(_) | StopReason::Cancelled => {
                Ok(self.summary)
            }
        }
    }
}

/// Per-run mutable state, created fresh by every [`HarvestLoop::run`].
struct RunState {
    budget: Budget,
    schedule: RotationSchedule,
    summary: RunSummary,
    state: LoopState,
    since_flush: usize,
}

impl RunState {
    fn enter(&mut self, next: LoopState, key: &str) {
        engine_transition!(self.state, next, "key={}", key);
        self.state = next;
    }

    fn budget_stop(&self) -> Option<StopReason> {
        match self.budget.check_at(clock::now()) {
            BudgetVerdict::Continue => None,
            BudgetVerdict::Exhausted(limit) => Some(StopReason::Budget(limit)),
            BudgetVerdict::BreakerTripped {
                consecutive_failures,
            } => Some(StopReason::CircuitOpen(BreakerTrip::ConsecutiveFailures {
                count: consecutive_failures,
            })),
        }
    }
}

/// Walks the input keys one at a time under budget, pacing, and rotation
/// constraints.
pub struct HarvestLoop<W, C, A> {
    settings: LoopSettings,
    worker: W,
    leases: IdentityLeaseManager<C, A>,
    limiter: RateLimiter,
    store: ProgressStore,
    cancel: CancellationToken,
}

impl<W, C, A> HarvestLoop<W, C, A>
where
    W: Worker,
    C: ControlPlane,
    A: AddressLookup,
{
    pub fn new(
        settings: LoopSettings,
        worker: W,
        leases: IdentityLeaseManager<C, A>,
        store: ProgressStore,
    ) -> Self {
        let limiter = RateLimiter::new()
            .with_class(EndpointClass::ControlPlane, settings.control_plane_min_interval)
            .with_class(EndpointClass::TargetApi, settings.target_min_interval);
        Self {
            settings,
            worker,
            leases,
            limiter,
            store,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn store(&self) -> &ProgressStore {
        &self.store
    }

    pub fn leases(&self) -> &IdentityLeaseManager<C, A> {
        &self.leases
    }

    /// Processes `keys` until the input is consumed, a budget is spent, a
    /// breaker trips, the vendor rejects the caller, or the run is cancelled.
    ///
    /// Returns `Err` only when the final flush fails; every other ending is a
    /// [`RunReport`].
    pub async fn run(&mut self, keys: &[String]) -> Result<RunReport, HarvestError> {
        let started = clock::now();
        let mut run = RunState {
            budget: Budget::started_at(self.settings.budget, started),
            schedule: RotationSchedule::new(self.settings.rotation),
            summary: RunSummary::default(),
            state: LoopState::Scanning,
            since_flush: 0,
        };

        let stop = self.drive(keys, &mut run).await;

        let terminal = stop.terminal_state();
        engine_transition!(run.state, terminal, "{}", stop);
        run.state = terminal;

        self.leases.release_all(&mut self.limiter).await;
        run.schedule.lease_released();
        run.summary.elapsed = clock::now().saturating_duration_since(started);

        let flushed = self.store.flush(&self.settings.output_path);

        if stop.is_fatal() {
            engine_error!("Run stopped: {}", stop);
        } else {
            engine_info!("Run stopped: {}", stop);
        }
        engine_info!(
            "Summary: {} checkpoint={:?} total_elapsed={}",
            run.summary,
            self.store.checkpoint(),
            format_elapsed(run.summary.elapsed)
        );

        flushed?;
        Ok(RunReport {
            stop,
            final_state: run.state,
            summary: run.summary,
        })
    }

    async fn drive(&mut self, keys: &[String], run: &mut RunState) -> StopReason {
        let mut index = match self.settings.resume_mode {
            ResumeMode::Checkpoint => self.store.resume_index(keys),
            ResumeMode::Refresh => 0,
        };
        engine_info!(
            "Starting at index {} of {} ({:?} mode)",
            index,
            keys.len(),
            self.settings.resume_mode
        );

        while index < keys.len() {
            if self.cancel.is_cancelled() {
                return StopReason::Cancelled;
            }

            let key = keys[index].as_str();
            run.enter(LoopState::Scanning, key);
            let mut item = self.store.item(key);
            if !item.needs_query() {
                engine_debug!("Skipping fresh key {}", key);
                run.summary.skipped += 1;
                index += 1;
                continue;
            }

            run.enter(LoopState::CheckBudget, key);
            if let Some(stop) = run.budget_stop() {
                return stop;
            }

            run.enter(LoopState::CheckRotation, key);
            if run.schedule.is_due_at(clock::now()) {
                run.enter(LoopState::Rotating, key);
                match self.rotate(run).await {
                    Ok(true) => {}
                    // No usable identity; retry this key next iteration.
                    Ok(false) => continue,
                    Err(stop) => return stop,
                }
                // Rotation may have waited out most of the time budget.
                if let Some(stop) = run.budget_stop() {
                    return stop;
                }
            }

            let Some(identity) = self.leases.current().cloned() else {
                run.schedule.lease_released();
                continue;
            };

            run.enter(LoopState::Processing, key);
            self.limiter.wait_until_ready(EndpointClass::TargetApi).await;
            // The pacing wait may run past the time budget.
            if let Some(stop) = run.budget_stop() {
                return stop;
            }
            self.limiter.record_call(EndpointClass::TargetApi);
            run.budget.record_attempt();
            run.schedule.record_query();
            let outcome = self.worker.query(key, &identity).await;
            let kind = outcome.kind();
            run.summary.record_outcome(kind);

            match &outcome {
                Outcome::Success(_) | Outcome::EmptyResult => {
                    run.budget.record_success();
                    engine_info!("[{}/{}] {} -> {}", index + 1, keys.len(), key, kind);
                }
                Outcome::RateLimited { status } => {
                    run.budget.record_failure();
                    run.schedule.record_rate_limited();
                    engine_warn!(
                        "[{}/{}] {} rate limited (status {}), failure streak {}",
                        index + 1,
                        keys.len(),
                        key,
                        status,
                        run.budget.consecutive_failures()
                    );
                }
                Outcome::TransientError(message) => {
                    run.budget.record_failure();
                    engine_warn!(
                        "[{}/{}] {} failed: {}, failure streak {}",
                        index + 1,
                        keys.len(),
                        key,
                        message,
                        run.budget.consecutive_failures()
                    );
                }
            }

            run.enter(LoopState::Record, key);
            if item.apply(&outcome) {
                self.store.record_item(&item);
                run.since_flush += 1;
                self.maybe_checkpoint(run);
            }

            index += 1;
            if index < keys.len() && !self.settings.inter_item_delay.is_zero() {
                tokio::select! {
                    _ = self.cancel.cancelled() => return StopReason::Cancelled,
                    _ = tokio::time::sleep(self.settings.inter_item_delay) => {}
                }
            }
        }

        StopReason::Exhausted
    }

    /// `Ok(true)`: a usable identity is in place. `Ok(false)`: rotation failed
    /// and the current lease cannot be used. `Err`: the run must stop.
    async fn rotate(&mut self, run: &mut RunState) -> Result<bool, StopReason> {
        match self.leases.acquire_lease(&mut self.limiter).await {
            Ok(identity) => {
                run.schedule.lease_started_at(identity.lease_start);
                run.summary.rotations += 1;
                engine_info!(
                    "Lease #{} active: {} via {}",
                    run.summary.rotations,
                    identity.public_address,
                    identity.proxy
                );
                Ok(true)
            }
            Err(LeaseError::Rejected(message)) => {
                engine_error!("Vendor rejected lease: {}", message);
                Err(StopReason::VendorRejected(message))
            }
            Err(LeaseError::Failed(err)) => {
                run.summary.rotation_failures += 1;
                let tripped = run.schedule.record_failure();
                engine_warn!(
                    "Rotation failed ({} in a row): {}",
                    run.schedule.consecutive_failures(),
                    err
                );
                if tripped {
                    return Err(StopReason::CircuitOpen(BreakerTrip::RotationFailures {
                        count: run.schedule.consecutive_failures(),
                    }));
                }
                let usable =
                    self.leases.current().is_some() && run.schedule.lease_usable_at(clock::now());
                if usable {
                    engine_info!("Continuing on the current lease until the next rotation attempt");
                }
                Ok(usable)
            }
        }
    }

    fn maybe_checkpoint(&mut self, run: &mut RunState) {
        let every = self.settings.checkpoint_every;
        if every == 0 || run.since_flush < every {
            return;
        }
        match self.store.flush(&self.settings.output_path) {
            Ok(()) => run.since_flush = 0,
            // The final flush retries; progress stays in memory.
            Err(err) => engine_warn!("Checkpoint flush failed: {}", err),
        }
    }
}
