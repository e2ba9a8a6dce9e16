//! Decision model: next status for a task after one attempt.
//!
//! Deciders are pure functions of `(current retries, outcome)`. Applying the
//! decision to the store is the scheduler's job.

use serde::{Deserialize, Serialize};

use super::{Outcome, TaskStatus};

/// Retry count and status a task moves to after one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub retries: u32,
    pub status: TaskStatus,
}

pub trait Decider: Send + Sync {
    fn decide(&self, retries: u32, outcome: &Outcome) -> Decision;
}

/// Default retry bound.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Bounded retry policy.
///
/// Both failure branches bump `retries` by one, but they compare against the
/// bound differently:
/// - batch failure: `retries > max_retries` fails the task
///   (`max_retries + 1` attempts in total);
/// - null output: `retries >= max_retries` fails the task
///   (`max_retries` attempts in total).
///
/// A success keeps `retries` as is, including retries spent on earlier batch
/// failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_retries: u32,
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES)
    }
}

impl Decider for RetryPolicy {
    fn decide(&self, retries: u32, outcome: &Outcome) -> Decision {
        match outcome {
            Outcome::Answered(_) => Decision {
                retries,
                status: TaskStatus::Completed,
            },
            Outcome::BatchFailed(_) => {
                let retries = retries.saturating_add(1);
                let status = if retries > self.max_retries {
                    TaskStatus::Failed
                } else {
                    TaskStatus::Pending
                };
                Decision { retries, status }
            }
            Outcome::NoAnswer => {
                let retries = retries.saturating_add(1);
                let status = if retries >= self.max_retries {
                    TaskStatus::Failed
                } else {
                    TaskStatus::Pending
                };
                Decision { retries, status }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::EngineError;
    use rstest::rstest;
    use serde_json::json;

    fn batch_failed() -> Outcome {
        Outcome::BatchFailed(EngineError::failed("boom"))
    }

    #[rstest]
    #[case(0, 1, TaskStatus::Pending)]
    #[case(1, 2, TaskStatus::Pending)]
    #[case(2, 3, TaskStatus::Pending)]
    #[case(3, 4, TaskStatus::Failed)]
    fn batch_failure_uses_strictly_greater(
        #[case] current: u32,
        #[case] retries: u32,
        #[case] status: TaskStatus,
    ) {
        let decision = RetryPolicy::default().decide(current, &batch_failed());
        assert_eq!(decision, Decision { retries, status });
    }

    #[rstest]
    #[case(0, 1, TaskStatus::Pending)]
    #[case(1, 2, TaskStatus::Pending)]
    #[case(2, 3, TaskStatus::Failed)]
    fn null_output_uses_greater_or_equal(
        #[case] current: u32,
        #[case] retries: u32,
        #[case] status: TaskStatus,
    ) {
        let decision = RetryPolicy::default().decide(current, &Outcome::NoAnswer);
        assert_eq!(decision, Decision { retries, status });
    }

    #[rstest]
    #[case(0)]
    #[case(2)]
    fn answer_completes_without_touching_retries(#[case] current: u32) {
        let decision = RetryPolicy::default().decide(current, &Outcome::Answered(json!("ok")));
        assert_eq!(
            decision,
            Decision {
                retries: current,
                status: TaskStatus::Completed
            }
        );
    }

    #[test]
    fn zero_bound_fails_null_output_immediately() {
        let policy = RetryPolicy::new(0);
        assert_eq!(policy.decide(0, &Outcome::NoAnswer).status, TaskStatus::Failed);
        assert_eq!(policy.decide(0, &batch_failed()).status, TaskStatus::Failed);
    }

    #[test]
    fn repeated_failures_never_exceed_bound_plus_one() {
        let policy = RetryPolicy::default();
        let mut retries = 0;
        loop {
            let decision = policy.decide(retries, &batch_failed());
            retries = decision.retries;
            if decision.status == TaskStatus::Failed {
                break;
            }
        }
        assert_eq!(retries, policy.max_retries + 1);
    }
}
