use std::time::Instant;

/// Current time as seen by tokio's clock, so paused-time tests drive every
/// budget, lease, and pacing decision consistently.
pub fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}
