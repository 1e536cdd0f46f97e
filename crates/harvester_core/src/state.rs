use std::fmt;
use std::time::Duration;

use crate::budget::BudgetLimit;
use crate::outcome::OutcomeKind;

/// States of the harvest control loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Scanning,
    CheckBudget,
    CheckRotation,
    Rotating,
    Processing,
    Record,
    StoppedBudget,
    StoppedBreaker,
    StoppedExhausted,
    StoppedCancelled,
    StoppedRejected,
}

impl LoopState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            LoopState::StoppedBudget
                | LoopState::StoppedBreaker
                | LoopState::StoppedExhausted
                | LoopState::StoppedCancelled
                | LoopState::StoppedRejected
        )
    }
}

/// Which breaker opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerTrip {
    ConsecutiveFailures { count: u32 },
    RotationFailures { count: u32 },
}

impl fmt::Display for BreakerTrip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BreakerTrip::ConsecutiveFailures { count } => {
                write!(f, "{count} consecutive query failures")
            }
            BreakerTrip::RotationFailures { count } => {
                write!(f, "{count} consecutive failed identity rotations")
            }
        }
    }
}

/// Why a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// Every input item was visited.
    Exhausted,
    Budget(BudgetLimit),
    CircuitOpen(BreakerTrip),
    VendorRejected(String),
    Cancelled,
}

impl StopReason {
    pub fn terminal_state(&self) -> LoopState {
        match self {
            StopReason::Exhausted => LoopState::StoppedExhausted,
            StopReason::Budget(_) => LoopState::StoppedBudget,
            StopReason::CircuitOpen(_) => LoopState::StoppedBreaker,
            StopReason::VendorRejected(_) => LoopState::StoppedRejected,
            StopReason::Cancelled => LoopState::StoppedCancelled,
        }
    }

    /// Fatal stops make the process exit non-zero.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            StopReason::CircuitOpen(_) | StopReason::VendorRejected(_)
        )
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Exhausted => write!(f, "input exhausted"),
            StopReason::Budget(BudgetLimit::Elapsed) => write!(f, "time budget spent"),
            StopReason::Budget(BudgetLimit::Queries) => write!(f, "query budget spent"),
            StopReason::CircuitOpen(trip) => write!(f, "circuit open: {trip}"),
            StopReason::VendorRejected(message) => write!(f, "vendor rejection: {message}"),
            StopReason::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Counters reported at the end of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Worker queries issued.
    pub processed: u64,
    /// Items passed over because they were already fresh.
    pub skipped: u64,
    pub succeeded: u64,
    pub empty: u64,
    pub rate_limited: u64,
    pub transient: u64,
    pub rotations: u64,
    pub rotation_failures: u64,
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn record_outcome(&mut self, kind: OutcomeKind) {
        self.processed += 1;
        match kind {
            OutcomeKind::Success => self.succeeded += 1,
            OutcomeKind::EmptyResult => self.empty += 1,
            OutcomeKind::RateLimited => self.rate_limited += 1,
            OutcomeKind::TransientError => self.transient += 1,
        }
    }

    pub fn failed(&self) -> u64 {
        self.rate_limited + self.transient
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "processed={} skipped={} succeeded={} empty={} failed={} (rate_limited={} transient={}) rotations={} rotation_failures={} elapsed={:.1}s",
            self.processed,
            self.skipped,
            self.succeeded,
            self.empty,
            self.failed(),
            self.rate_limited,
            self.transient,
            self.rotations,
            self.rotation_failures,
            self.elapsed.as_secs_f64(),
        )
    }
}
