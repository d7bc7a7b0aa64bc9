// Copyright (c) The CloudTest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Component D: the task queue and assignment algorithm.
//!
//! Grounded in `original_source/pkg/commands/execution.go`'s main
//! scheduling loop. Pure over a `ClusterPool` snapshot plus a task list so
//! it can be driven deterministically in tests; the dispatcher (Component
//! E) is the only caller in production, invoked after every event that
//! "leaves state clean" (`spec.md` §4.D).

use std::collections::VecDeque;

use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::cluster::{ClusterInstanceId, ClusterPool};
use crate::task::{Task, TaskKey, TaskStatus};

/// A task ready to run: its key and the cluster tuple selected for it.
pub struct Assignment {
    pub key: TaskKey,
    pub instances: Vec<ClusterInstanceId>,
    pub provider_names: Vec<String>,
}

/// The pending work queue plus the logic to pick the next runnable task.
pub struct TaskQueue {
    pending: VecDeque<TaskKey>,
}

impl TaskQueue {
    pub fn new(mut keys: Vec<TaskKey>, shuffle: bool, seed: u64) -> Self {
        if shuffle {
            let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
            keys.shuffle(&mut rng);
        }
        Self {
            pending: keys.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn push_back(&mut self, key: TaskKey) {
        self.pending.push_back(key);
    }

    /// Resolves the provider names a task must be assigned across: its
    /// explicit `cluster-selector`, or the first `cluster-count` provider
    /// names in `all_providers` when the selector is empty (`spec.md` §4.D).
    pub fn required_providers(task: &Task, all_providers: &[String]) -> Vec<String> {
        if !task.execution.cluster_selector.is_empty() {
            return task.execution.cluster_selector.clone();
        }
        let count = task.execution.cluster_count.max(1);
        all_providers.iter().take(count).cloned().collect()
    }

    /// One assignment pass: pops assignable tasks from the front of the
    /// queue in order, leaving tasks that could not be assigned (because a
    /// required group has no ready instance) at the back, preserving
    /// relative order among the skipped (§4.D steps 1-4).
    pub fn assign_pass(
        &mut self,
        tasks: &std::collections::BTreeMap<TaskKey, Task>,
        pool: &mut ClusterPool,
        all_providers: &[String],
    ) -> Vec<Assignment> {
        let mut assignments = Vec::new();
        let mut requeue = VecDeque::new();

        while let Some(key) = self.pending.pop_front() {
            let Some(task) = tasks.get(&key) else {
                continue;
            };
            let provider_names = Self::required_providers(task, all_providers);
            match pool.select_tuple(&provider_names) {
                Some(instances) => assignments.push(Assignment {
                    key,
                    instances,
                    provider_names,
                }),
                None => requeue.push_back(key),
            }
        }

        self.pending = requeue;
        assignments
    }

    /// Starvation guard (`spec.md` §4.D): true when every provider a
    /// pending task could ever use has no instance left in a non-terminal
    /// state, meaning no future assignment pass can help.
    pub fn is_starved(&self, tasks: &std::collections::BTreeMap<TaskKey, Task>, pool: &ClusterPool, all_providers: &[String]) -> bool {
        if self.pending.is_empty() {
            return false;
        }
        self.pending.iter().all(|key| {
            let Some(task) = tasks.get(key) else {
                return true;
            };
            let provider_names = Self::required_providers(task, all_providers);
            provider_names.iter().any(|name| {
                pool.groups
                    .get(name)
                    .map(|group| group.is_exhausted())
                    .unwrap_or(true)
            })
        })
    }

    /// Marks every currently pending task `SkippedNoClusters`, draining the
    /// queue. Returns the keys affected so the caller can update `tasks`.
    pub fn drain_as_skipped(&mut self) -> Vec<TaskKey> {
        self.pending.drain(..).collect()
    }
}

pub const SKIPPED_NO_CLUSTERS_STATUS: TaskStatus = TaskStatus::SkippedNoClusters;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{ClusterGroup, ClusterInstance, InstallRegistry};
    use crate::cluster::provider::{ClusterProvider, ScriptOutput, ScriptPhase};
    use crate::cluster::validator::DefaultValidationFactory;
    use crate::config::{ClusterProviderConfig, ExecutionConfig};
    use crate::errors::ClusterError;
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::time::Duration;

    struct NoopProvider(ClusterProviderConfig);

    #[async_trait]
    impl ClusterProvider for NoopProvider {
        fn name(&self) -> &str {
            "a_provider"
        }
        fn config(&self) -> &ClusterProviderConfig {
            &self.0
        }
        async fn run_script(
            &self,
            _phase: ScriptPhase,
            _instance_id: &str,
            _env: &BTreeMap<String, String>,
            _timeout: Duration,
        ) -> Result<Option<ScriptOutput>, ClusterError> {
            Ok(None)
        }
    }

    fn ready_instance(provider: &str, index: usize) -> ClusterInstance {
        let provider_arc: Arc<dyn ClusterProvider> = Arc::new(NoopProvider(ClusterProviderConfig::default()));
        let mut instance = ClusterInstance::new(
            ClusterInstanceId::new(provider, index),
            provider_arc,
            Arc::new(InstallRegistry::new()),
            Arc::new(DefaultValidationFactory { probe: None }),
        );
        instance.state = crate::cluster::ClusterInstanceState::Ready;
        instance
    }

    fn task(name: &str, selector: Vec<String>) -> Task {
        Task::new(
            TaskKey::new("simple", name),
            Arc::new(ExecutionConfig {
                name: "simple".to_string(),
                cluster_selector: selector,
                ..Default::default()
            }),
        )
    }

    #[test]
    fn assign_pass_skips_tasks_without_ready_instance() {
        let mut pool = ClusterPool::new();
        pool.insert(ClusterGroup::new("a_provider", vec![ready_instance("a_provider", 0)], Duration::ZERO));

        let t1 = task("TestA", vec!["a_provider".to_string()]);
        let t2 = task("TestB", vec!["a_provider".to_string()]);
        let mut tasks = BTreeMap::new();
        tasks.insert(t1.key.clone(), t1.clone());
        tasks.insert(t2.key.clone(), t2.clone());

        let mut queue = TaskQueue::new(vec![t1.key.clone(), t2.key.clone()], false, 0);
        let assignments = queue.assign_pass(&tasks, &mut pool, &["a_provider".to_string()]);
        assert_eq!(assignments.len(), 1);
        assert_eq!(assignments[0].key, t1.key);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn required_providers_falls_back_to_cluster_count() {
        let t = task("TestA", vec![]);
        let providers = vec!["a_provider".to_string(), "b_provider".to_string()];
        assert_eq!(TaskQueue::required_providers(&t, &providers), vec!["a_provider".to_string()]);
    }

    #[test]
    fn starvation_guard_detects_exhausted_providers() {
        let mut pool = ClusterPool::new();
        let mut instance = ready_instance("a_provider", 0);
        instance.state = crate::cluster::ClusterInstanceState::Crashed;
        pool.insert(ClusterGroup::new("a_provider", vec![instance], Duration::ZERO));

        let t1 = task("TestA", vec!["a_provider".to_string()]);
        let mut tasks = BTreeMap::new();
        tasks.insert(t1.key.clone(), t1.clone());
        let queue = TaskQueue::new(vec![t1.key.clone()], false, 0);
        assert!(queue.is_starved(&tasks, &pool, &["a_provider".to_string()]));
    }
}
