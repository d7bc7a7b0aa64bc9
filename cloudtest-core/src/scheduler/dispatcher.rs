// Copyright (c) The CloudTest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Component E: the event loop. Single owner of all scheduler state; every
//! other worker communicates only by posting [`OperationEvent`]s.
//!
//! Grounded in the teacher's `runner::dispatcher` (`tokio::select!` over a
//! tick interval, a global timeout sleep and the event channel) and
//! `spec.md` §4.E/§5 ("message-passing instead of a mutex" per the Design
//! Note in §9).

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use camino::Utf8PathBuf;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cluster::{run_destroy_sequence, run_start_sequence, ClusterInstanceId, ClusterPool};
use crate::config::Config;
use crate::errors::{ConfigError, FatalReason, RunError};
use crate::exec_manager::ExecutionManager;
use crate::hooks::{HookKind, HookRunner};
use crate::report::build_report;
use crate::runner::TestRunner;
use crate::scheduler::events::OperationEvent;
use crate::scheduler::health;
use crate::scheduler::queue::{Assignment, TaskQueue};
use crate::scheduler::retry::{InstanceRetestCounter, RetryDecision, RetryPolicy};
use crate::task::{Attempt, Task, TaskKey, TaskStatus};

/// Channel depth for the operation event stream. `spec.md` §5 requires "a
/// buffer of at least 1"; CloudTest uses a larger bounded buffer so bursts
/// of `TaskCompleted` events from a wide assignment pass never make a
/// worker block mid-critical-section.
pub const EVENT_CHANNEL_DEPTH: usize = 64;

const DEFAULT_PROVIDER_TIMEOUT: Duration = Duration::from_secs(600);
const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(600);
const DEFAULT_HOOK_TIMEOUT: Duration = Duration::from_secs(120);

/// Everything the event loop needs that isn't its own mutable state: how to
/// run tasks and where the clusters live.
pub struct DispatcherDeps {
    pub pool: ClusterPool,
    pub runner: Arc<dyn TestRunner>,
    pub exec_manager: Arc<dyn ExecutionManager>,
    pub hook_runner: Arc<HookRunner>,
}

/// Drives the scheduler for one configuration document and task set to
/// completion, returning the final task list (success path) or a
/// [`FatalReason`] (one of the termination conditions in `spec.md` §4.E).
pub struct Dispatcher {
    config: Arc<Config>,
    tasks: BTreeMap<TaskKey, Task>,
    queue: TaskQueue,
    pool: Arc<Mutex<ClusterPool>>,
    runner: Arc<dyn TestRunner>,
    #[allow(dead_code)]
    exec_manager: Arc<dyn ExecutionManager>,
    retest_counters: BTreeMap<ClusterInstanceId, InstanceRetestCounter>,
    success_counters: BTreeMap<ClusterInstanceId, u32>,
    provider_names: Vec<String>,
    events_tx: Sender<OperationEvent>,
    events_rx: Receiver<OperationEvent>,
    started: Instant,
    completed: usize,
    failures: usize,
    cancel: CancellationToken,
    /// Instances with an in-flight `Start` spawned, to avoid starting the
    /// same slot twice concurrently.
    starting: HashSet<ClusterInstanceId>,
    /// Instances currently being torn down and (possibly) recreated, either
    /// because their retest budget was exceeded or because
    /// `tests-per-cluster-instance` was reached (`spec.md` §4.D/§4.F).
    recycling: HashSet<ClusterInstanceId>,
    hooks: Arc<HookRunner>,
    /// `(execution, sorted cluster-tuple)` pairs whose `before` hook has
    /// already fired, so it runs at most once per pair.
    before_fired: HashSet<String>,
    /// Execution names whose `after` hook has already fired.
    after_fired: HashSet<String>,
}

impl Dispatcher {
    pub fn new(config: Arc<Config>, tasks: Vec<Task>, deps: DispatcherDeps, seed: u64) -> Result<Self, ConfigError> {
        config.validate_failed_tests_limit(tasks.len())?;

        let provider_names: Vec<String> = config.providers.iter().map(|p| p.name.clone()).collect();
        let keys: Vec<TaskKey> = tasks.iter().map(|t| t.key.clone()).collect();
        let queue = TaskQueue::new(keys, config.shuffle_enabled, seed);
        let tasks = tasks.into_iter().map(|t| (t.key.clone(), t)).collect();
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_DEPTH);

        Ok(Self {
            config,
            tasks,
            queue,
            pool: Arc::new(Mutex::new(deps.pool)),
            runner: deps.runner,
            exec_manager: deps.exec_manager,
            retest_counters: BTreeMap::new(),
            success_counters: BTreeMap::new(),
            provider_names,
            events_tx,
            events_rx,
            started: Instant::now(),
            completed: 0,
            failures: 0,
            cancel: CancellationToken::new(),
            starting: HashSet::new(),
            recycling: HashSet::new(),
            hooks: deps.hook_runner,
            before_fired: HashSet::new(),
            after_fired: HashSet::new(),
        })
    }

    /// Runs the scheduler to completion.
    pub async fn run(mut self) -> Result<Vec<Task>, RunError> {
        let health_handles = health::spawn_all(
            self.config.health_check.clone(),
            self.events_tx.clone(),
            self.cancel.clone(),
        );

        let total = self.tasks.len();
        let global_timeout = self.config.timeout.unwrap_or(Duration::MAX);
        let global_deadline = std::pin::pin!(tokio::time::sleep(global_timeout));
        let mut global_deadline = global_deadline;
        let mut stats_tick = tokio::time::interval(self.config.statistics.interval);
        stats_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        self.assign_pass().await;

        let fatal = loop {
            if self.completed >= total {
                break None;
            }

            enum InternalEvent {
                GlobalTimeout,
                Stats,
                Op(OperationEvent),
            }

            let internal_event = tokio::select! {
                _ = &mut global_deadline, if global_timeout != Duration::MAX => InternalEvent::GlobalTimeout,
                _ = stats_tick.tick(), if self.config.statistics.enabled => InternalEvent::Stats,
                _ = tokio::signal::ctrl_c() => InternalEvent::Op(OperationEvent::Signal),
                Some(event) = self.events_rx.recv() => InternalEvent::Op(event),
                else => break None,
            };

            let event = match internal_event {
                InternalEvent::GlobalTimeout => break Some(self.handle_global_timeout(global_timeout)),
                InternalEvent::Stats => OperationEvent::StatsTick,
                InternalEvent::Op(event) => event,
            };

            if let Some(reason) = self.handle_event(event).await {
                break Some(reason);
            }

            self.assign_pass().await;

            if self.queue.is_starved(&self.tasks, &*self.pool.lock().await, &self.provider_names) {
                self.skip_starved_tasks().await;
            }
        };

        self.cancel.cancel();
        for handle in health_handles {
            let _ = handle.await;
        }
        self.shutdown_clusters().await;

        let fatal = fatal.or_else(|| {
            (self.failures > 0).then_some(FatalReason::FailedTests { count: self.failures })
        });

        if let Some(reason) = fatal {
            return Err(RunError::Fatal(reason));
        }

        Ok(self.tasks.into_values().collect())
    }

    fn handle_global_timeout(&mut self, global_timeout: Duration) -> FatalReason {
        let seconds = global_timeout.as_secs();
        for task in self.tasks.values_mut() {
            if !task.status.is_terminal() {
                task.finish(TaskStatus::Timeout, None);
            }
        }
        warn!(seconds, "global timeout elapsed");
        FatalReason::GlobalTimeout { seconds }
    }

    /// Applies one received event's state transition, returning `Some` if
    /// the event loop must terminate fatally (`spec.md` §4.E termination
    /// conditions 3 and 4).
    async fn handle_event(&mut self, event: OperationEvent) -> Option<FatalReason> {
        match event {
            OperationEvent::TaskCompleted {
                task: key,
                status,
                output,
                output_file,
                duration,
            } => {
                self.on_task_completed(key, status, output, output_file, duration).await;
            }
            OperationEvent::ClusterStarted { instance, kubeconfig } => {
                self.starting.remove(&instance);
                let mut pool = self.pool.lock().await;
                if let Some(inst) = pool.find_mut(&instance) {
                    inst.kubeconfig = kubeconfig;
                    inst.state = crate::cluster::ClusterInstanceState::Ready;
                }
                drop(pool);
                info!(%instance, "cluster instance ready");
                let _ = self.events_tx.send(OperationEvent::StatsTick).await;
            }
            OperationEvent::ClusterCrashed { instance, reason } => {
                self.starting.remove(&instance);
                warn!(%instance, %reason, "cluster instance crashed");
                self.requeue_tasks_on_instance(&instance);

                let mut pool = self.pool.lock().await;
                if let Some(inst) = pool.find_mut(&instance) {
                    let retry_count = inst.provider_config().retry_count;
                    if inst.start_count < retry_count.max(1) {
                        inst.state = crate::cluster::ClusterInstanceState::New;
                    }
                }
            }
            OperationEvent::ClusterRecycled { instance } => {
                self.recycling.remove(&instance);
            }
            OperationEvent::StatsTick => {
                info!(
                    completed = self.completed,
                    total = self.tasks.len(),
                    pending = self.queue.len(),
                    "statistics tick"
                );
            }
            OperationEvent::Signal => {
                let running = self
                    .tasks
                    .values_mut()
                    .filter(|task| !task.status.is_terminal())
                    .map(|task| task.finish(TaskStatus::Timeout, None))
                    .count();
                return Some(FatalReason::Interrupted { running });
            }
            OperationEvent::HealthCheckFailed { message } => {
                return Some(FatalReason::HealthCheckFailed { reason: message });
            }
        }

        let limit = self.config.failed_tests_limit;
        if limit > 0 && self.failures > limit {
            return Some(FatalReason::FailedTestsLimitReached { limit });
        }
        None
    }

    async fn on_task_completed(
        &mut self,
        key: TaskKey,
        status: TaskStatus,
        output: String,
        output_file: Utf8PathBuf,
        duration: Duration,
    ) {
        let Some(task) = self.tasks.get_mut(&key) else {
            return;
        };
        let assigned = task.assigned.clone();
        let execution = Arc::clone(&task.execution);

        task.record_attempt(Attempt {
            output_file,
            retry_index: task.attempt_count() as u32,
            status,
            output: output.clone(),
            duration,
            cluster_instances: assigned.clone(),
            finished_at: chrono::Utc::now(),
        });

        {
            let mut pool = self.pool.lock().await;
            let providers: Vec<String> = assigned.iter().map(|id| id.provider.clone()).collect();
            pool.release_tuple(&providers, &assigned);
        }

        if status == TaskStatus::Timeout {
            task.finish(TaskStatus::Timeout, None);
            self.completed += 1;
            self.failures += 1;
            self.fire_on_fail(&execution, &assigned).await;
            self.maybe_fire_after(&execution, &assigned).await;
            return;
        }

        if status == TaskStatus::Success {
            task.finish(TaskStatus::Success, None);
            self.completed += 1;
            self.bump_success_counters(&assigned).await;
            self.maybe_fire_after(&execution, &assigned).await;
            return;
        }

        let attempt_count = task.attempt_count() as u32;
        let retest_config = self.config.retest.clone();
        let policy = RetryPolicy::new(&retest_config);
        let last_error = output.lines().last().unwrap_or("").to_string();
        let decision = policy.decide(&output, attempt_count, execution.concurrency_retry, &last_error);

        self.fire_on_fail(&execution, &assigned).await;

        let Some(task) = self.tasks.get_mut(&key) else {
            return;
        };

        match decision {
            RetryDecision::Rerun => {
                info!(task = %key, "Re schedule task {key}, reason: rerun-request");
                task.requeue();
                self.queue.push_back(key.clone());
                self.bump_retest_counters(&assigned, &retest_config).await;
            }
            RetryDecision::RetryClusterCrashed => {
                info!(task = %key, "Re schedule task {key}, reason: cluster-crashed");
                task.requeue();
                self.queue.push_back(key.clone());
            }
            RetryDecision::Fail => {
                task.finish(TaskStatus::Failed, None);
                self.completed += 1;
                self.failures += 1;
                self.maybe_fire_after(&execution, &assigned).await;
            }
            RetryDecision::Skip { message } => {
                warn!(task = %key, %message, "Test {key} retry count exceeded");
                task.finish(TaskStatus::Skipped, Some(message));
                self.completed += 1;
                self.maybe_fire_after(&execution, &assigned).await;
            }
        }
    }

    /// Runs an execution's `on-fail` hook for a non-success attempt,
    /// synchronously and before the retry decision is made, per the
    /// supplementary-features note in `SPEC_FULL.md`.
    async fn fire_on_fail(&self, execution: &crate::config::ExecutionConfig, assigned: &[ClusterInstanceId]) {
        let Some(script) = &execution.on_fail else {
            return;
        };
        let env = build_hook_env(&self.pool, assigned).await;
        self.hooks
            .run_with_timeout(&execution.name, HookKind::OnFail, script, env, DEFAULT_HOOK_TIMEOUT)
            .await;
    }

    /// Runs an execution's `after` hook once its whole task supply has
    /// reached a terminal state.
    async fn maybe_fire_after(&mut self, execution: &crate::config::ExecutionConfig, assigned: &[ClusterInstanceId]) {
        if self.after_fired.contains(&execution.name) {
            return;
        }
        let remaining = self
            .tasks
            .values()
            .filter(|t| t.execution.name == execution.name && !t.status.is_terminal())
            .count();
        if remaining != 0 {
            return;
        }
        self.after_fired.insert(execution.name.clone());

        let Some(script) = &execution.after else {
            return;
        };
        let env = build_hook_env(&self.pool, assigned).await;
        self.hooks
            .run_with_timeout(&execution.name, HookKind::After, script, env, DEFAULT_HOOK_TIMEOUT)
            .await;
    }

    async fn bump_success_counters(&mut self, instances: &[ClusterInstanceId]) {
        let threshold = self.config.tests_per_cluster_instance;
        if threshold == 0 {
            return;
        }
        for id in instances {
            let count = self.success_counters.entry(id.clone()).or_insert(0);
            *count += 1;
            if *count >= threshold as u32 {
                *count = 0;
                self.recycle_instance(id.clone(), Duration::ZERO);
            }
        }
    }

    async fn bump_retest_counters(&mut self, instances: &[ClusterInstanceId], retest: &crate::config::RetestConfig) {
        for id in instances {
            let counter = self.retest_counters.entry(id.clone()).or_default();
            counter.record_rerun();
            if counter.exceeds(retest.allowed_retests) {
                counter.reset();
                let warmup = retest.warmup_timeout.unwrap_or(Duration::ZERO);
                self.recycle_instance(id.clone(), warmup);
            }
        }
    }

    /// Forces `id` through `Destroy` and, budget permitting, back through
    /// `Start`, without holding the scheduler lock across the I/O (§5).
    /// Used both by the retest-exceeded path (§4.F) and
    /// `tests-per-cluster-instance` (§4.D point 5).
    fn recycle_instance(&mut self, id: ClusterInstanceId, warmup: Duration) {
        if !self.recycling.insert(id.clone()) {
            return;
        }

        let pool = Arc::clone(&self.pool);
        let events_tx = self.events_tx.clone();

        tokio::spawn(async move {
            let handles = {
                let mut pool = pool.lock().await;
                let Some(instance) = pool.find_mut(&id) else {
                    return;
                };
                instance.state = crate::cluster::ClusterInstanceState::Stopping;
                let handles = instance.handles();
                let kubeconfig = instance.kubeconfig.clone();
                let destroy_timeout = instance.provider_config().timeout.unwrap_or(DEFAULT_PROVIDER_TIMEOUT);
                (handles, kubeconfig, destroy_timeout)
            };
            let ((provider, install_registry, validation_factory), kubeconfig, destroy_timeout) = handles;

            if !warmup.is_zero() {
                tokio::time::sleep(warmup).await;
            }

            let destroy_result = run_destroy_sequence(&provider, &id, kubeconfig.as_ref(), destroy_timeout).await;

            let retry_count;
            let start_count;
            {
                let mut pool = pool.lock().await;
                let Some(instance) = pool.find_mut(&id) else {
                    return;
                };
                instance.state = match destroy_result {
                    Ok(()) => crate::cluster::ClusterInstanceState::Stopped,
                    Err(_) => crate::cluster::ClusterInstanceState::Crashed,
                };
                retry_count = instance.provider_config().retry_count.max(1);
                start_count = instance.start_count;
            }

            if destroy_result.is_ok() && start_count < retry_count {
                let start_timeout = provider.config().timeout.unwrap_or(DEFAULT_PROVIDER_TIMEOUT);
                {
                    let mut pool = pool.lock().await;
                    if let Some(instance) = pool.find_mut(&id) {
                        instance.state = crate::cluster::ClusterInstanceState::Starting;
                        instance.start_count += 1;
                    }
                }
                let deadline = Instant::now() + start_timeout;
                let outcome = run_start_sequence(&provider, &install_registry, &validation_factory, &id, deadline).await;
                let event = match outcome {
                    Ok(kubeconfig) => OperationEvent::ClusterStarted { instance: id.clone(), kubeconfig },
                    Err(err) => OperationEvent::ClusterCrashed { instance: id.clone(), reason: err.to_string() },
                };
                let _ = events_tx.send(event).await;
            }

            let _ = events_tx.send(OperationEvent::ClusterRecycled { instance: id }).await;
        });
    }

    fn requeue_tasks_on_instance(&mut self, instance: &ClusterInstanceId) {
        let affected: Vec<TaskKey> = self
            .tasks
            .iter()
            .filter(|(_, task)| !task.status.is_terminal() && task.assigned.contains(instance))
            .map(|(key, _)| key.clone())
            .collect();

        for key in affected {
            if let Some(task) = self.tasks.get_mut(&key) {
                task.requeue();
            }
            self.queue.push_back(key);
        }
    }

    async fn skip_starved_tasks(&mut self) {
        let pool = self.pool.lock().await;
        let skipped = self.queue.drain_as_skipped();
        for key in skipped {
            let Some(task) = self.tasks.get_mut(&key) else {
                continue;
            };
            let required = TaskQueue::required_providers(task, &self.provider_names);
            let total = required.len();
            let unavailable = required
                .iter()
                .filter(|name| pool.groups.get(*name).map(|g| g.is_exhausted()).unwrap_or(true))
                .count();
            task.finish(
                TaskStatus::SkippedNoClusters,
                Some(format!("{unavailable} of {total} required cluster(s) unavailable")),
            );
            self.completed += 1;
        }
    }

    /// Spawns `Start` for every `New` instance among the providers required
    /// by currently pending tasks, honoring lazy-start (§4.A) without
    /// holding the scheduler lock across the script execution (§5).
    async fn ensure_clusters_starting(&mut self) {
        let candidates: Vec<ClusterInstanceId> = {
            let required: Vec<String> = self
                .tasks
                .values()
                .filter(|t| !t.status.is_terminal())
                .flat_map(|t| TaskQueue::required_providers(t, &self.provider_names))
                .collect();
            if required.is_empty() {
                Vec::new()
            } else {
                let pool = self.pool.lock().await;
                pool.new_instances_among(&required)
            }
        };

        for id in candidates {
            if !self.starting.insert(id.clone()) {
                continue;
            }

            let handles = {
                let mut pool = self.pool.lock().await;
                let Some(instance) = pool.find_mut(&id) else {
                    self.starting.remove(&id);
                    continue;
                };
                instance.state = crate::cluster::ClusterInstanceState::Starting;
                instance.start_count += 1;
                let timeout = instance.provider_config().timeout.unwrap_or(DEFAULT_PROVIDER_TIMEOUT);
                (instance.handles(), timeout)
            };
            let ((provider, install_registry, validation_factory), timeout) = handles;
            let events_tx = self.events_tx.clone();
            let deadline = Instant::now() + timeout;
            let start_id = id.clone();

            tokio::spawn(async move {
                let outcome = run_start_sequence(&provider, &install_registry, &validation_factory, &start_id, deadline).await;
                let event = match outcome {
                    Ok(kubeconfig) => OperationEvent::ClusterStarted { instance: start_id, kubeconfig },
                    Err(err) => OperationEvent::ClusterCrashed { instance: start_id, reason: err.to_string() },
                };
                let _ = events_tx.send(event).await;
            });
        }
    }

    /// Best-effort teardown of every instance still alive once the run is
    /// over, mirroring `ClusterGroup::shouldShutdownIdle` (§4.B) applied to
    /// the whole pool rather than one group at a time.
    async fn shutdown_clusters(&mut self) {
        let mut pool = self.pool.lock().await;
        let ids: Vec<ClusterInstanceId> = pool
            .groups
            .values()
            .flat_map(|g| g.instance_ids().cloned())
            .collect();
        for id in ids {
            let Some(instance) = pool.find_mut(&id) else { continue };
            if matches!(
                instance.state,
                crate::cluster::ClusterInstanceState::Stopped | crate::cluster::ClusterInstanceState::New
            ) {
                continue;
            }
            let timeout = instance.provider_config().timeout.unwrap_or(DEFAULT_PROVIDER_TIMEOUT);
            let _ = instance.destroy(timeout, false).await;
        }
    }

    async fn assign_pass(&mut self) {
        self.ensure_clusters_starting().await;

        let assignments: Vec<Assignment> = {
            let mut pool = self.pool.lock().await;
            self.queue.assign_pass(&self.tasks, &mut pool, &self.provider_names)
        };

        for assignment in assignments {
            let Some(task) = self.tasks.get_mut(&assignment.key) else {
                continue;
            };
            task.assigned = assignment.instances.clone();
            task.status = TaskStatus::Running;

            let execution = Arc::clone(&task.execution);
            let runner = Arc::clone(&self.runner);
            let events_tx = self.events_tx.clone();
            let key = assignment.key.clone();
            let script = execution.run.clone();
            let timeout = execution.timeout.unwrap_or(DEFAULT_TASK_TIMEOUT);
            let cluster_env = resolve_cluster_kubeconfigs(&self.pool, &assignment.instances).await;
            let env = crate::runner::ShellTestRunner::build_env(&cluster_env, &execution.cluster_env, &execution.env);
            let test_name = key.test_name.clone();

            if let Some(before_script) = execution.before.clone() {
                let mut tuple_ids: Vec<String> = assignment.instances.iter().map(|id| id.to_string()).collect();
                tuple_ids.sort();
                let before_key = format!("{}|{}", execution.name, tuple_ids.join(","));
                if self.before_fired.insert(before_key) {
                    let pool = Arc::clone(&self.pool);
                    let hooks = Arc::clone(&self.hooks);
                    let hook_env = build_hook_env(&pool, &assignment.instances).await;
                    hooks
                        .run_with_timeout(&execution.name, HookKind::Before, &before_script, hook_env, DEFAULT_HOOK_TIMEOUT)
                        .await;
                }
            }

            tokio::spawn(async move {
                let outcome = runner.run(&test_name, &script, &env, timeout).await;
                let event = match outcome {
                    Ok(outcome) => OperationEvent::TaskCompleted {
                        task: key,
                        status: if outcome.success { TaskStatus::Success } else { TaskStatus::Failed },
                        output: outcome.output,
                        output_file: outcome.output_file,
                        duration: outcome.duration,
                    },
                    Err(_) => OperationEvent::TaskCompleted {
                        task: key,
                        status: TaskStatus::Timeout,
                        output: String::new(),
                        output_file: Utf8PathBuf::new(),
                        duration: timeout,
                    },
                };
                let _ = events_tx.send(event).await;
            });
        }
    }
}

/// Renders the final JUnit report for a completed run, per `spec.md` §4.H.
pub fn finalize_report(name: &str, tasks: &[Task]) -> quick_junit::Report {
    build_report(name, tasks)
}

/// Looks up each instance's provisioned kubeconfig path, pairing it with
/// the instance id in assignment order. Holds the pool lock only for the
/// lookup itself, never across I/O.
async fn resolve_cluster_kubeconfigs(
    pool: &Mutex<ClusterPool>,
    instances: &[ClusterInstanceId],
) -> Vec<(ClusterInstanceId, Option<Utf8PathBuf>)> {
    if instances.is_empty() {
        return Vec::new();
    }
    let pool = pool.lock().await;
    instances
        .iter()
        .map(|id| {
            let kubeconfig = pool
                .groups
                .get(&id.provider)
                .and_then(|group| group.instances.iter().find(|i| &i.id == id))
                .and_then(|instance| instance.kubeconfig.clone());
            (id.clone(), kubeconfig)
        })
        .collect()
}

/// Builds the environment a hook script runs under, mirroring
/// `ShellTestRunner::build_env` (hooks have no execution-level `env`).
async fn build_hook_env(pool: &Mutex<ClusterPool>, instances: &[ClusterInstanceId]) -> BTreeMap<String, String> {
    let cluster_env = resolve_cluster_kubeconfigs(pool, instances).await;
    crate::runner::ShellTestRunner::build_env(&cluster_env, &[], &[])
}
