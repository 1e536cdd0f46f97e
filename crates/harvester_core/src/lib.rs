//! Harvester core: pure budget, pacing, rotation, and outcome state.
//!
//! Nothing in this crate performs I/O. Every time-dependent query has an
//! `_at(now)` form so callers (and tests) decide what "now" means.
mod budget;
mod item;
mod outcome;
mod rate_limit;
mod rotation;
mod state;

pub use budget::{Budget, BudgetLimit, BudgetLimits, BudgetVerdict};
pub use item::{ItemState, WorkItem};
pub use outcome::{classify_response, is_empty_payload, Outcome, OutcomeKind};
pub use rate_limit::RateLimitState;
pub use rotation::{RotationPolicy, RotationSchedule};
pub use state::{BreakerTrip, LoopState, RunSummary, StopReason};
