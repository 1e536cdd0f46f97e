use std::time::{Duration, Instant};

/// Configured thresholds for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BudgetLimits {
    pub elapsed_limit: Duration,
    pub query_limit: u64,
    pub failure_limit: u32,
}

/// Which controlled stop condition was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetLimit {
    Elapsed,
    Queries,
}

/// Answer to "may I continue?".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetVerdict {
    Continue,
    /// Time or query budget spent. A clean stop, not a failure.
    Exhausted(BudgetLimit),
    /// Consecutive-failure threshold reached.
    BreakerTripped { consecutive_failures: u32 },
}

/// Time, query, and consecutive-failure accounting for a single run.
///
/// State only moves forward: the query count never decreases and the failure
/// streak is cleared only by [`Budget::record_success`].
#[derive(Debug, Clone)]
pub struct Budget {
    limits: BudgetLimits,
    started_at: Instant,
    query_count: u64,
    consecutive_failures: u32,
}

impl Budget {
    pub fn start(limits: BudgetLimits) -> Self {
        Self::started_at(limits, Instant::now())
    }

    pub fn started_at(limits: BudgetLimits, started_at: Instant) -> Self {
        Self {
            limits,
            started_at,
            query_count: 0,
            consecutive_failures: 0,
        }
    }

    pub fn should_continue(&self) -> bool {
        self.should_continue_at(Instant::now())
    }

    pub fn should_continue_at(&self, now: Instant) -> bool {
        self.check_at(now) == BudgetVerdict::Continue
    }

    /// The breaker is reported ahead of the budget limits so a run that trips
    /// on its last permitted query still ends as a failure.
    pub fn check_at(&self, now: Instant) -> BudgetVerdict {
        if self.consecutive_failures >= self.limits.failure_limit {
            return BudgetVerdict::BreakerTripped {
                consecutive_failures: self.consecutive_failures,
            };
        }
        if self.elapsed_at(now) > self.limits.elapsed_limit {
            return BudgetVerdict::Exhausted(BudgetLimit::Elapsed);
        }
        if self.query_count >= self.limits.query_limit {
            return BudgetVerdict::Exhausted(BudgetLimit::Queries);
        }
        BudgetVerdict::Continue
    }

    pub fn record_attempt(&mut self) {
        self.query_count = self.query_count.saturating_add(1);
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
    }

    pub fn record_failure(&mut self) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
    }

    pub fn elapsed_at(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.started_at)
    }

    pub fn query_count(&self) -> u64 {
        self.query_count
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn limits(&self) -> &BudgetLimits {
        &self.limits
    }
}
