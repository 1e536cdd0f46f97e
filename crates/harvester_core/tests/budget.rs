use std::sync::Once;
use std::time::{Duration, Instant};

use harvester_core::{Budget, BudgetLimit, BudgetLimits, BudgetVerdict};

fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(engine_logging::initialize_for_tests);
}

fn limits(failure_limit: u32) -> BudgetLimits {
    BudgetLimits {
        elapsed_limit: Duration::from_secs(60),
        query_limit: 1_000_000,
        failure_limit,
    }
}

#[test]
fn trips_on_nth_consecutive_failure() {
    init_logging();
    let t0 = Instant::now();
    let mut budget = Budget::started_at(limits(3), t0);

    for _ in 0..2 {
        budget.record_attempt();
        budget.record_failure();
        assert!(budget.should_continue_at(t0));
    }
    budget.record_attempt();
    budget.record_failure();
    assert_eq!(
        budget.check_at(t0),
        BudgetVerdict::BreakerTripped {
            consecutive_failures: 3
        }
    );
    assert!(!budget.should_continue_at(t0));
}

#[test]
fn alternating_outcomes_never_trip() {
    init_logging();
    let t0 = Instant::now();
    let mut budget = Budget::started_at(limits(2), t0);

    for _ in 0..500 {
        budget.record_attempt();
        budget.record_failure();
        assert!(budget.should_continue_at(t0));
        budget.record_attempt();
        budget.record_success();
        assert!(budget.should_continue_at(t0));
    }
    assert_eq!(budget.consecutive_failures(), 0);
    assert_eq!(budget.query_count(), 1000);
}

#[test]
fn query_limit_is_reached_not_exceeded() {
    init_logging();
    let t0 = Instant::now();
    let mut budget = Budget::started_at(
        BudgetLimits {
            elapsed_limit: Duration::from_secs(60),
            query_limit: 3,
            failure_limit: 10,
        },
        t0,
    );

    for _ in 0..3 {
        assert!(budget.should_continue_at(t0));
        budget.record_attempt();
        budget.record_success();
    }
    assert_eq!(
        budget.check_at(t0),
        BudgetVerdict::Exhausted(BudgetLimit::Queries)
    );
}

#[test]
fn elapsed_limit_is_exclusive() {
    init_logging();
    let t0 = Instant::now();
    let budget = Budget::started_at(limits(10), t0);

    assert!(budget.should_continue_at(t0 + Duration::from_secs(60)));
    assert_eq!(
        budget.check_at(t0 + Duration::from_secs(61)),
        BudgetVerdict::Exhausted(BudgetLimit::Elapsed)
    );
}

#[test]
fn breaker_outranks_spent_budget() {
    init_logging();
    let t0 = Instant::now();
    let mut budget = Budget::started_at(
        BudgetLimits {
            elapsed_limit: Duration::from_secs(60),
            query_limit: 1,
            failure_limit: 1,
        },
        t0,
    );
    budget.record_attempt();
    budget.record_failure();

    assert_eq!(
        budget.check_at(t0),
        BudgetVerdict::BreakerTripped {
            consecutive_failures: 1
        }
    );
}

#[test]
fn fresh_budget_continues_against_wall_clock() {
    init_logging();
    let mut budget = Budget::start(limits(1));
    assert!(budget.should_continue());
    budget.record_attempt();
    budget.record_failure();
    assert!(!budget.should_continue());
}
