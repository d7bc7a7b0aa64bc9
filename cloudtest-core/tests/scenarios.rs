// Copyright (c) The CloudTest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end scheduler runs against `ShellClusterProvider`/`ShellTestRunner`
//! with trivial inline shell scripts (`echo`/`exit N`/`sleep N`), exercising
//! the dispatcher's termination conditions and retry/skip paths the way a
//! real CloudTest run would hit them.

use std::sync::Arc;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use cloudtest_core::config::Config;
use cloudtest_core::errors::{FatalReason, RunError};
use cloudtest_core::exec_manager::FsExecutionManager;
use cloudtest_core::orchestrator::build_dispatcher;
use cloudtest_core::task::{Task, TaskStatus};

fn artifacts_root(label: &str) -> Utf8PathBuf {
    let dir = std::env::temp_dir().join(format!("cloudtest-scenario-{label}-{}", uuid::Uuid::new_v4()));
    Utf8PathBuf::from_path_buf(dir).expect("temp dir must be utf8")
}

async fn run_config(label: &str, yaml: &str) -> Result<Vec<Task>, RunError> {
    let config = Config::from_yaml(yaml, Utf8Path::new("cloudtest.yaml")).expect("config parses");
    let config = Arc::new(config);
    let exec_manager = Arc::new(FsExecutionManager::new(artifacts_root(label)).expect("exec manager initializes"));
    let dispatcher = build_dispatcher(config, exec_manager, 42)
        .await
        .expect("dispatcher assembles");
    dispatcher.run().await
}

fn task<'a>(tasks: &'a [Task], execution: &str, test_name: &str) -> &'a Task {
    tasks
        .iter()
        .find(|t| t.key.execution == execution && t.key.test_name == test_name)
        .unwrap_or_else(|| panic!("no task {execution}/{test_name} in final task list"))
}

/// Two providers, one of which never comes up; a task bound to the healthy
/// one still completes while the task bound to the crashed one is skipped,
/// never affecting the other execution's outcome.
#[tokio::test]
async fn crashed_provider_does_not_block_tasks_on_a_healthy_one() {
    let yaml = r#"
version: "1.0"
root: ./.cloudtest
providers:
  - name: a_provider
    instances: 1
    scripts:
      start: "echo starting a"
      stop: "echo stopping a"
  - name: b_provider
    instances: 1
    scripts:
      start: "exit 2"
      stop: "echo stopping b"
executions:
  - name: on-a
    cluster-selector: [a_provider]
    source:
      tests: [TestOnA]
    run: "echo pass"
  - name: on-b
    cluster-selector: [b_provider]
    source:
      tests: [TestOnB]
    run: "echo pass"
"#;
    let tasks = run_config("two-providers", yaml).await.expect("run completes without a fatal reason");
    assert_eq!(tasks.len(), 2);

    let on_a = task(&tasks, "on-a", "TestOnA");
    assert_eq!(on_a.status, TaskStatus::Success);

    let on_b = task(&tasks, "on-b", "TestOnB");
    assert_eq!(on_b.status, TaskStatus::SkippedNoClusters);
    assert_eq!(on_b.skip_message.as_deref(), Some("1 of 1 required cluster(s) unavailable"));
}

/// A single execution spanning two providers only runs once both have a
/// ready instance, and the tuple recorded on the attempt covers both.
#[tokio::test]
async fn execution_spanning_two_providers_assigns_both_atomically() {
    let yaml = r#"
version: "1.0"
root: ./.cloudtest
providers:
  - name: a_provider
    instances: 1
    scripts:
      start: "echo starting a"
      stop: "echo stopping a"
  - name: b_provider
    instances: 1
    scripts:
      start: "echo starting b"
      stop: "echo stopping b"
executions:
  - name: paired
    cluster-count: 2
    source:
      tests: [TestPaired]
    run: "echo ok"
"#;
    let tasks = run_config("paired-providers", yaml).await.expect("run completes");
    let paired = task(&tasks, "paired", "TestPaired");
    assert_eq!(paired.status, TaskStatus::Success);
    let attempt = paired.last_attempt().expect("one attempt recorded");
    let providers: Vec<&str> = attempt.cluster_instances.iter().map(|id| id.provider.as_str()).collect();
    assert!(providers.contains(&"a_provider"));
    assert!(providers.contains(&"b_provider"));
}

/// Five always-failing tests against a `failed-tests-limit` of two must stop
/// the run fatally as soon as the third failure lands, never finishing the
/// remaining tasks.
#[tokio::test]
async fn failed_tests_limit_terminates_the_run_fatally() {
    let yaml = r#"
version: "1.0"
root: ./.cloudtest
failed-tests-limit: 2
providers:
  - name: a_provider
    instances: 1
    scripts:
      start: "echo starting"
      stop: "echo stopping"
executions:
  - name: fails
    source:
      tests: [T1, T2, T3, T4, T5]
    run: "exit 1"
"#;
    let result = run_config("failed-tests-limit", yaml).await;
    assert!(matches!(
        result,
        Err(RunError::Fatal(FatalReason::FailedTestsLimitReached { limit: 2 }))
    ));
}

/// A test whose output always matches the retest pattern reruns up to the
/// configured count, then is skipped rather than failed once exhausted
/// (`fail-result: skip`).
#[tokio::test]
async fn retest_pattern_reruns_then_skips_once_exhausted() {
    let yaml = r#"
version: "1.0"
root: ./.cloudtest
providers:
  - name: a_provider
    instances: 1
    scripts:
      start: "echo starting"
      stop: "echo stopping"
executions:
  - name: flaky
    source:
      tests: [TestFlaky]
    run: "echo RETEST_ME\nexit 1"
retest:
  pattern: [RETEST_ME]
  count: 2
  fail-result: skip
"#;
    let tasks = run_config("retest-skip", yaml).await.expect("run completes");
    let flaky = task(&tasks, "flaky", "TestFlaky");
    assert_eq!(flaky.status, TaskStatus::Skipped);
    assert_eq!(flaky.attempt_count(), 3);
    let message = flaky.skip_message.as_deref().unwrap_or_default();
    assert!(message.contains("retry count 2 exceed"), "unexpected message: {message}");
}

/// Once a cluster instance's retest budget (`allowed-retests`) is exceeded it
/// is torn down; when the provider's own `retry` budget is already spent the
/// instance never comes back, and the requeued task lands `SkippedNoClusters`.
#[tokio::test]
async fn exceeding_allowed_retests_destroys_the_instance_and_skips_the_task() {
    let yaml = r#"
version: "1.0"
root: ./.cloudtest
providers:
  - name: a_provider
    instances: 1
    retry: 1
    scripts:
      start: "echo starting"
      stop: "echo stopping"
executions:
  - name: flaky2
    source:
      tests: [TestFlaky2]
    run: "echo RETEST_ME\nexit 1"
retest:
  pattern: [RETEST_ME]
  count: 5
  allowed-retests: 1
  warmup-time: 0s
"#;
    let tasks = run_config("allowed-retests", yaml).await.expect("run completes");
    let flaky = task(&tasks, "flaky2", "TestFlaky2");
    assert_eq!(flaky.status, TaskStatus::SkippedNoClusters);
    let message = flaky.skip_message.as_deref().unwrap_or_default();
    assert!(message.contains("unavailable"), "unexpected message: {message}");
}

/// A test that outlasts the configured global timeout is recorded as `Timeout`
/// and the run stops with `FatalReason::GlobalTimeout`.
#[tokio::test]
async fn global_timeout_cuts_the_run_short() {
    let yaml = r#"
version: "1.0"
root: ./.cloudtest
timeout: 1s
providers:
  - name: a_provider
    instances: 1
    scripts:
      start: "echo starting"
      stop: "echo stopping"
executions:
  - name: slow
    source:
      tests: [TestSlow]
    run: "sleep 3"
"#;
    let result = run_config("global-timeout", yaml).await;
    assert!(matches!(
        result,
        Err(RunError::Fatal(FatalReason::GlobalTimeout { seconds: 1 }))
    ));
}

/// Some tasks fail but `failed-tests-limit` is never configured (or never
/// reached): every task still reaches a terminal state, but the run itself
/// must report the failures rather than exiting as if it were a clean pass.
#[tokio::test]
async fn some_failures_without_a_limit_still_fail_the_run() {
    let yaml = r#"
version: "1.0"
root: ./.cloudtest
providers:
  - name: a_provider
    instances: 1
    scripts:
      start: "echo starting"
      stop: "echo stopping"
executions:
  - name: pass
    source:
      tests: [TestPass]
    run: "echo pass"
  - name: fail
    source:
      tests: [TestFail]
    run: "exit 1"
"#;
    let result = run_config("mixed-pass-fail", yaml).await;
    assert!(matches!(
        result,
        Err(RunError::Fatal(FatalReason::FailedTests { count: 1 }))
    ));
}

/// A failing health check tears the whole run down immediately, independent
/// of whether any task has finished yet.
#[tokio::test]
async fn failing_health_check_terminates_the_run() {
    let yaml = r#"
version: "1.0"
root: ./.cloudtest
providers:
  - name: a_provider
    instances: 1
    scripts:
      start: "echo starting"
      stop: "echo stopping"
executions:
  - name: slow
    source:
      tests: [TestUnderHealthCheck]
    run: "sleep 5"
health-check:
  - interval: 150ms
    run: "exit 1"
    message: "cluster dependency is down"
"#;
    let result = run_config("health-check", yaml).await;
    match result {
        Err(RunError::Fatal(FatalReason::HealthCheckFailed { reason })) => {
            assert_eq!(reason, "cluster dependency is down");
        }
        other => panic!("expected a health-check fatal reason, got {other:?}"),
    }
}
