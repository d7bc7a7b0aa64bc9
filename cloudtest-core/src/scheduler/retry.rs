// Copyright (c) The CloudTest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Component F: the retry/retest policy engine.
//!
//! Pure decision logic, deliberately free of channel/lock plumbing so it
//! can be unit tested directly (`spec.md` §4.F). Grounded in
//! `original_source/pkg/commands/execution.go`'s rerun-request handling
//! and `pkg/config/config.go`'s `RetestConfig`.

use regex::RegexSet;

use crate::config::RetestConfig;
use crate::task::TaskStatus;

/// What the dispatcher should do with a task after an attempt finishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-queue the task; does not count against the instance's retest budget.
    RetryClusterCrashed,
    /// Re-queue the task; counts against the instance's retest budget.
    Rerun,
    /// Terminal: task failed, retries exhausted.
    Fail,
    /// Terminal: task skipped, retries exhausted and `fail-result: skip`.
    Skip { message: String },
}

/// Scans `output` against `retest.pattern` (post-run, never streaming, per
/// the Design Note in `spec.md` §9) and decides the task's fate.
pub struct RetryPolicy<'a> {
    config: &'a RetestConfig,
    patterns: Option<RegexSet>,
}

impl<'a> RetryPolicy<'a> {
    pub fn new(config: &'a RetestConfig) -> Self {
        let patterns = if config.pattern.is_empty() {
            None
        } else {
            RegexSet::new(&config.pattern).ok()
        };
        Self { config, patterns }
    }

    fn matches_retest_pattern(&self, output: &str) -> bool {
        self.patterns
            .as_ref()
            .is_some_and(|set| set.is_match(output))
    }

    /// Decides what happens after a task's attempt comes back Failed.
    /// `attempt_count` is the number of attempts recorded *including* the
    /// one that just finished. `concurrency_retry` is the execution's own
    /// `test-retry-count`, used instead of `retest.count` when non-zero
    /// (the two are mutually exclusive per validation, `spec.md` §9).
    pub fn decide(&self, output: &str, attempt_count: u32, concurrency_retry: u32, last_error: &str) -> RetryDecision {
        let restart_count = if concurrency_retry > 0 {
            concurrency_retry
        } else {
            self.config.restart_count
        };

        if !self.matches_retest_pattern(output) {
            return RetryDecision::Fail;
        }

        if attempt_count <= restart_count {
            return RetryDecision::Rerun;
        }

        if self.config.fails_to_skip() {
            return RetryDecision::Skip {
                message: format!(
                    "Test retry count {restart_count} exceed: err: {last_error}"
                ),
            };
        }

        RetryDecision::Fail
    }

    /// Terminal task status implied by a non-retryable decision, used when
    /// the dispatcher needs a `TaskStatus` rather than a `RetryDecision`.
    pub fn terminal_status(decision: &RetryDecision) -> Option<TaskStatus> {
        match decision {
            RetryDecision::Fail => Some(TaskStatus::Failed),
            RetryDecision::Skip { .. } => Some(TaskStatus::Skipped),
            RetryDecision::RetryClusterCrashed | RetryDecision::Rerun => None,
        }
    }
}

/// Per-cluster-instance retest accounting: when `retest_count` reaches
/// `allowed_retests`, the instance must be destroyed and rebuilt before
/// serving more tasks (`spec.md` §4.F).
#[derive(Debug, Default, Clone, Copy)]
pub struct InstanceRetestCounter {
    pub retest_count: u32,
}

impl InstanceRetestCounter {
    pub fn record_rerun(&mut self) {
        self.retest_count += 1;
    }

    pub fn exceeds(&self, allowed_retests: u32) -> bool {
        allowed_retests > 0 && self.retest_count >= allowed_retests
    }

    pub fn reset(&mut self) {
        self.retest_count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(pattern: &[&str], restart_count: u32, fail_result: &str) -> RetestConfig {
        RetestConfig {
            pattern: pattern.iter().map(|s| s.to_string()).collect(),
            restart_count,
            warmup_timeout: None,
            allowed_retests: 0,
            fail_result: fail_result.to_string(),
        }
    }

    #[test]
    fn no_pattern_match_fails_immediately() {
        let cfg = config(&["#RETEST#"], 2, "");
        let policy = RetryPolicy::new(&cfg);
        assert_eq!(policy.decide("plain failure", 1, 0, "boom"), RetryDecision::Fail);
    }

    #[test]
    fn pattern_match_within_budget_reruns() {
        let cfg = config(&["#RETEST#"], 2, "");
        let policy = RetryPolicy::new(&cfg);
        assert_eq!(policy.decide("output #RETEST# here", 1, 0, "boom"), RetryDecision::Rerun);
        assert_eq!(policy.decide("output #RETEST# here", 2, 0, "boom"), RetryDecision::Rerun);
    }

    #[test]
    fn pattern_match_past_budget_fails_by_default() {
        let cfg = config(&["#RETEST#"], 2, "");
        let policy = RetryPolicy::new(&cfg);
        assert_eq!(policy.decide("output #RETEST# here", 3, 0, "boom"), RetryDecision::Fail);
    }

    #[test]
    fn pattern_match_past_budget_skips_when_configured() {
        let cfg = config(&["#RETEST#"], 2, "skip");
        let policy = RetryPolicy::new(&cfg);
        let decision = policy.decide("output #RETEST# here", 3, 0, "boom");
        assert!(matches!(decision, RetryDecision::Skip { .. }));
    }

    #[test]
    fn concurrency_retry_overrides_restart_count() {
        let cfg = config(&["#RETEST#"], 0, "");
        let policy = RetryPolicy::new(&cfg);
        assert_eq!(policy.decide("#RETEST#", 1, 1, "boom"), RetryDecision::Rerun);
        assert_eq!(policy.decide("#RETEST#", 2, 1, "boom"), RetryDecision::Fail);
    }

    #[test]
    fn instance_retest_counter_tracks_exceeded_budget() {
        let mut counter = InstanceRetestCounter::default();
        assert!(!counter.exceeds(1));
        counter.record_rerun();
        assert!(counter.exceeds(1));
        counter.reset();
        assert!(!counter.exceeds(1));
    }
}
