use std::time::{Duration, Instant};

/// Last-call bookkeeping for one rate-limited endpoint class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitState {
    last_call: Option<Instant>,
    min_interval: Duration,
}

impl RateLimitState {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            last_call: None,
            min_interval,
        }
    }

    /// Time still to wait before the next call may go out. Zero when ready.
    pub fn remaining_at(&self, now: Instant) -> Duration {
        match self.last_call {
            Some(last) => self
                .min_interval
                .saturating_sub(now.saturating_duration_since(last)),
            None => Duration::ZERO,
        }
    }

    pub fn record_call_at(&mut self, now: Instant) {
        self.last_call = Some(now);
    }

    pub fn last_call(&self) -> Option<Instant> {
        self.last_call
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_call_is_immediate() {
        let state = RateLimitState::new(Duration::from_secs(35));
        assert_eq!(state.remaining_at(Instant::now()), Duration::ZERO);
    }

    #[test]
    fn remaining_shrinks_with_elapsed_time() {
        let t0 = Instant::now();
        let mut state = RateLimitState::new(Duration::from_secs(35));
        state.record_call_at(t0);

        assert_eq!(state.remaining_at(t0), Duration::from_secs(35));
        assert_eq!(
            state.remaining_at(t0 + Duration::from_secs(20)),
            Duration::from_secs(15)
        );
        assert_eq!(
            state.remaining_at(t0 + Duration::from_secs(60)),
            Duration::ZERO
        );
    }
}
