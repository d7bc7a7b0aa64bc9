// Copyright (c) The CloudTest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Component C: the unit of work scheduled onto a cluster-instance tuple.
//!
//! A [`Task`] holds only metadata plus a pointer to its [`ExecutionConfig`];
//! execution and its side effects live in the `runner` collaborator.
//! Grounded in `original_source/pkg/model/tests.go` (`TestEntry`,
//! `TestEntryExecution`, `Status`).

use camino::Utf8PathBuf;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::cluster::instance::ClusterInstanceId;
use crate::config::ExecutionConfig;

/// Unique key for a task: execution name ⊕ test name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskKey {
    pub execution: String,
    pub test_name: String,
}

impl TaskKey {
    pub fn new(execution: impl Into<String>, test_name: impl Into<String>) -> Self {
        Self {
            execution: execution.into(),
            test_name: test_name.into(),
        }
    }
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.execution, self.test_name)
    }
}

/// Status of a task, per `spec.md` §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Added,
    Scheduled,
    Running,
    Success,
    Failed,
    Timeout,
    Skipped,
    SkippedNoClusters,
    RerunRequested,
}

impl TaskStatus {
    /// A terminal status is one from which the task will never transition
    /// again; it belongs in the completed set (invariant 1 in `spec.md` §3/§8).
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Success
                | TaskStatus::Failed
                | TaskStatus::Timeout
                | TaskStatus::Skipped
                | TaskStatus::SkippedNoClusters
        )
    }

    pub fn is_failure(self) -> bool {
        matches!(self, TaskStatus::Failed | TaskStatus::Timeout)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Added => "Added",
            TaskStatus::Scheduled => "Scheduled",
            TaskStatus::Running => "Running",
            TaskStatus::Success => "Success",
            TaskStatus::Failed => "Failed",
            TaskStatus::Timeout => "Timeout",
            TaskStatus::Skipped => "Skipped",
            TaskStatus::SkippedNoClusters => "SkippedNoClusters",
            TaskStatus::RerunRequested => "RerunRequested",
        };
        f.write_str(s)
    }
}

/// A single terminal attempt at running a task.
#[derive(Debug, Clone)]
pub struct Attempt {
    pub output_file: Utf8PathBuf,
    pub retry_index: u32,
    pub status: TaskStatus,
    pub output: String,
    pub duration: Duration,
    pub cluster_instances: Vec<ClusterInstanceId>,
    /// Wall-clock time the attempt finished, for the JUnit `timestamp`
    /// attribute (`spec.md` §4.H doesn't name this field explicitly;
    /// `quick_junit::TestCase::set_timestamp` expects one, so attempts
    /// record it rather than leaving the report's timestamp unset).
    pub finished_at: chrono::DateTime<chrono::Utc>,
}

/// One test (or suite) to execute once on a selected instance tuple.
#[derive(Debug, Clone)]
pub struct Task {
    pub key: TaskKey,
    pub execution: Arc<ExecutionConfig>,
    /// The cluster-instance tuple currently assigned; empty when queued.
    pub assigned: Vec<ClusterInstanceId>,
    pub status: TaskStatus,
    pub attempts: Vec<Attempt>,
    pub duration: Duration,
    pub skip_message: Option<String>,
    pub artifact_directories: Vec<Utf8PathBuf>,
}

impl Task {
    pub fn new(key: TaskKey, execution: Arc<ExecutionConfig>) -> Self {
        Self {
            key,
            execution,
            assigned: Vec::new(),
            status: TaskStatus::Added,
            attempts: Vec::new(),
            duration: Duration::ZERO,
            skip_message: None,
            artifact_directories: Vec::new(),
        }
    }

    /// Total attempts recorded so far (invariant 3 in `spec.md` §8: bounded
    /// by `RestartCount + 1` per task).
    pub fn attempt_count(&self) -> usize {
        self.attempts.len()
    }

    pub fn last_attempt(&self) -> Option<&Attempt> {
        self.attempts.last()
    }

    pub fn record_attempt(&mut self, attempt: Attempt) {
        self.duration += attempt.duration;
        self.attempts.push(attempt);
    }

    pub fn requeue(&mut self) {
        self.assigned.clear();
        self.status = TaskStatus::RerunRequested;
    }

    pub fn finish(&mut self, status: TaskStatus, skip_message: Option<String>) {
        debug_assert!(status.is_terminal());
        self.status = status;
        self.skip_message = skip_message;
        self.assigned.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn execution() -> Arc<ExecutionConfig> {
        Arc::new(ExecutionConfig {
            name: "simple".to_string(),
            ..Default::default()
        })
    }

    #[test]
    fn new_task_is_added_and_unassigned() {
        let task = Task::new(TaskKey::new("simple", "TestPass"), execution());
        assert_eq!(task.status, TaskStatus::Added);
        assert!(task.assigned.is_empty());
        assert_eq!(task.attempt_count(), 0);
    }

    #[test]
    fn finish_clears_assignment_and_sets_terminal_status() {
        let mut task = Task::new(TaskKey::new("simple", "TestPass"), execution());
        task.assigned = vec![ClusterInstanceId::new("a_provider", 0)];
        task.finish(TaskStatus::Success, None);
        assert!(task.assigned.is_empty());
        assert!(task.status.is_terminal());
    }

    #[test]
    fn display_key_joins_execution_and_test() {
        let key = TaskKey::new("simple", "TestPass");
        assert_eq!(key.to_string(), "simple/TestPass");
    }
}
