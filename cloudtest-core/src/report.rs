// Copyright (c) The CloudTest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Component H: builds the final JUnit report from the finished task list.
//!
//! `quick-junit` models exactly two levels of nesting (`Report` →
//! `TestSuite` → `TestCase`); the four-level hierarchy in `spec.md` §4.H
//! (root → execution → cluster-group → test) is collapsed by folding the
//! cluster-group level into `TestCase::classname`, the same flattening
//! `original_source/pkg/reporting/junit.go`'s `TestCase.Cluster` attribute
//! already performs (a JUnit `TestCase` has no room for its own children,
//! so the original stores the cluster id as metadata on the leaf rather
//! than as an intermediate node). Grounded in the teacher's
//! `reporter/aggregator/junit.rs` for the `quick-junit` usage pattern
//! (`TestSuite::add_test_case`, `TestCaseStatus::non_success`).

use std::time::Duration;

use quick_junit::{NonSuccessKind, Report, TestCase, TestCaseStatus, TestSuite};

use crate::task::{Attempt, Task, TaskStatus};

/// Builds a `quick_junit::Report` named `name` from the final task list,
/// one `TestSuite` per execution.
pub fn build_report(name: &str, tasks: &[Task]) -> Report {
    let mut report = Report::new(name);
    let mut suites: indexmap::IndexMap<String, TestSuite> = indexmap::IndexMap::new();

    for task in tasks {
        let suite = suites
            .entry(task.key.execution.clone())
            .or_insert_with(|| TestSuite::new(task.key.execution.clone()));
        suite.add_test_case(test_case_for(task));
    }

    for (_, suite) in suites {
        report.add_test_suite(suite);
    }
    report
}

fn test_case_for(task: &Task) -> TestCase {
    let status = test_case_status(task);
    let mut case = TestCase::new(task.key.test_name.clone(), status);
    case.set_time(task.duration);

    if let Some(classname) = classname_for(task) {
        case.set_classname(classname);
    }

    if let Some(last) = task.last_attempt() {
        case.set_system_out(last.output.clone());
        case.set_timestamp(last.finished_at);
    }

    for attempt in task.attempts.iter().rev().skip(1) {
        case.extra.insert(
            "rerun".into(),
            quick_junit::XmlString::new(rerun_description(attempt)),
        );
    }

    case
}

fn classname_for(task: &Task) -> Option<String> {
    let instances: Vec<String> = task
        .last_attempt()
        .map(|attempt| attempt.cluster_instances.iter().map(|id| id.to_string()).collect())
        .unwrap_or_default();
    if instances.is_empty() {
        None
    } else {
        Some(instances.join(","))
    }
}

fn rerun_description(attempt: &Attempt) -> String {
    format!(
        "attempt {} ({}): {}",
        attempt.retry_index,
        attempt.status,
        attempt.output.lines().last().unwrap_or("")
    )
}

fn test_case_status(task: &Task) -> TestCaseStatus {
    match task.status {
        TaskStatus::Success => TestCaseStatus::success(),
        TaskStatus::Failed => non_success(NonSuccessKind::Failure, task, "the last attempt exited non-zero"),
        TaskStatus::Timeout => non_success(NonSuccessKind::Failure, task, "the task exceeded its timeout"),
        TaskStatus::Skipped | TaskStatus::SkippedNoClusters => {
            let mut status = TestCaseStatus::skipped();
            status.set_message(task.skip_message.clone().unwrap_or_default());
            status
        }
        TaskStatus::Added | TaskStatus::Scheduled | TaskStatus::Running | TaskStatus::RerunRequested => {
            non_success(NonSuccessKind::Error, task, "the run terminated before this task finished")
        }
    }
}

fn non_success(kind: NonSuccessKind, task: &Task, fallback: &str) -> TestCaseStatus {
    let mut status = TestCaseStatus::non_success(kind);
    let message = task
        .last_attempt()
        .map(|attempt| last_line(&attempt.output))
        .unwrap_or_else(|| fallback.to_string());
    status.set_message(message);
    if let Some(attempt) = task.last_attempt() {
        status.set_description(attempt.output.clone());
    }
    status
}

fn last_line(output: &str) -> String {
    output
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .unwrap_or("(no output)")
        .to_string()
}

/// Renders `report` as XML text. Serialization itself is out of scope for
/// this crate's own logic (`spec.md` §1 lists "The JUnit XML serializer"
/// as a collaborator boundary) — `quick_junit::Report::to_string` is the
/// library doing that work.
pub fn render(report: &Report) -> Result<String, quick_junit::Error> {
    report.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::ClusterInstanceId;
    use crate::config::ExecutionConfig;
    use crate::task::TaskKey;
    use camino::Utf8PathBuf;
    use std::sync::Arc;

    fn execution(name: &str) -> Arc<ExecutionConfig> {
        Arc::new(ExecutionConfig {
            name: name.to_string(),
            ..Default::default()
        })
    }

    #[test]
    fn successful_task_reports_success_status() {
        let mut task = Task::new(TaskKey::new("simple", "TestPass"), execution("simple"));
        task.record_attempt(Attempt {
            output_file: Utf8PathBuf::from("/tmp/out.log"),
            retry_index: 0,
            status: TaskStatus::Success,
            output: "ok\n".to_string(),
            duration: Duration::from_secs(1),
            cluster_instances: vec![ClusterInstanceId::new("a_provider", 0)],
            finished_at: chrono::Utc::now(),
        });
        task.finish(TaskStatus::Success, None);

        let report = build_report("cloudtest", &[task]);
        assert_eq!(report.test_suites.len(), 1);
        let suite = &report.test_suites[0];
        assert_eq!(suite.test_cases.len(), 1);
        assert!(suite.test_cases[0].status.is_success());
        assert_eq!(suite.test_cases[0].classname.as_deref(), Some("a_provider-0"));
    }

    #[test]
    fn failed_task_carries_last_line_as_message() {
        let mut task = Task::new(TaskKey::new("simple", "TestFail"), execution("simple"));
        task.record_attempt(Attempt {
            output_file: Utf8PathBuf::from("/tmp/out.log"),
            retry_index: 0,
            status: TaskStatus::Failed,
            output: "line one\nboom: assertion failed\n".to_string(),
            duration: Duration::from_millis(500),
            cluster_instances: vec![],
            finished_at: chrono::Utc::now(),
        });
        task.finish(TaskStatus::Failed, None);

        let report = build_report("cloudtest", &[task]);
        let case = &report.test_suites[0].test_cases[0];
        assert!(!case.status.is_success());
    }

    #[test]
    fn skipped_task_carries_skip_message() {
        let mut task = Task::new(TaskKey::new("simple", "TestSkip"), execution("simple"));
        task.finish(TaskStatus::Skipped, Some("retry count 2 exceed".to_string()));

        let report = build_report("cloudtest", &[task]);
        let case = &report.test_suites[0].test_cases[0];
        assert!(matches!(case.status, TestCaseStatus::Skipped { .. }));
    }
}
