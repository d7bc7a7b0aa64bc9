// Copyright (c) The CloudTest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Component B: a pool of instances belonging to one provider, plus the
//! cross-provider selection used to assign a cluster tuple to a task.
//!
//! Grounded in `original_source/pkg/model/cluster.go`'s `ClusterGroup` (the
//! set of instances sharing a `ClusterConfig`) and `pkg/commands/execution.go`'s
//! instance-selection loop (`selectReady`, here named [`select_ready`]).

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::cluster::instance::{ClusterInstance, ClusterInstanceId, ClusterInstanceState};

/// All instances provisioned for one provider, plus the shared cooldown gate
/// applied between tasks on the same instance (`test-delay`, §4.B).
pub struct ClusterGroup {
    pub provider_name: String,
    pub instances: Vec<ClusterInstance>,
    test_delay: Duration,
    last_released: BTreeMap<ClusterInstanceId, Instant>,
}

impl ClusterGroup {
    pub fn new(provider_name: impl Into<String>, instances: Vec<ClusterInstance>, test_delay: Duration) -> Self {
        Self {
            provider_name: provider_name.into(),
            instances,
            test_delay,
            last_released: BTreeMap::new(),
        }
    }

    /// Returns an instance in `Ready` state that has cleared its cooldown
    /// window, or `None` if every instance is busy, crashed or still
    /// cooling down. Never blocks (§4.B: `selectReady` is a non-blocking
    /// poll; waiting happens one layer up, in the dispatcher).
    pub fn select_ready(&mut self) -> Option<&mut ClusterInstance> {
        let now = Instant::now();
        let last_released = &self.last_released;
        let test_delay = self.test_delay;
        self.instances.iter_mut().find(|instance| {
            if !instance.is_ready() {
                return false;
            }
            match last_released.get(&instance.id) {
                Some(released_at) => now.duration_since(*released_at) >= test_delay,
                None => true,
            }
        })
    }

    /// Counts instances currently `Ready` and past cooldown, without
    /// mutably borrowing any one of them.
    pub fn ready_count(&self) -> usize {
        let now = Instant::now();
        self.instances
            .iter()
            .filter(|instance| {
                instance.is_ready()
                    && match self.last_released.get(&instance.id) {
                        Some(released_at) => now.duration_since(*released_at) >= self.test_delay,
                        None => true,
                    }
            })
            .count()
    }

    /// Marks `instance_id` busy, called when a task is assigned to it.
    pub fn on_task_assigned(&mut self, instance_id: &ClusterInstanceId) {
        if let Some(instance) = self.instances.iter_mut().find(|i| &i.id == instance_id) {
            instance.mark_busy();
        }
    }

    /// Marks `instance_id` idle again and starts its cooldown window,
    /// called when a task assigned to it finishes (success or failure).
    pub fn on_task_finished(&mut self, instance_id: &ClusterInstanceId) {
        if let Some(instance) = self.instances.iter_mut().find(|i| &i.id == instance_id) {
            instance.mark_idle();
            self.last_released.insert(instance_id.clone(), Instant::now());
        }
    }

    /// Whether every instance in this group has reached a terminal (non
    /// recoverable) state, meaning the provider can no longer serve tasks.
    pub fn is_exhausted(&self) -> bool {
        !self.instances.is_empty()
            && self
                .instances
                .iter()
                .all(|i| matches!(i.state, ClusterInstanceState::Crashed | ClusterInstanceState::Stopped))
    }

    pub fn instance_ids(&self) -> impl Iterator<Item = &ClusterInstanceId> {
        self.instances.iter().map(|i| &i.id)
    }

    pub fn find_mut(&mut self, id: &ClusterInstanceId) -> Option<&mut ClusterInstance> {
        self.instances.iter_mut().find(|i| &i.id == id)
    }

    /// Ids of every instance still in `New` state, i.e. never attempted to
    /// start (§4.A: `Start` is invoked lazily on first demand).
    pub fn new_instance_ids(&self) -> Vec<ClusterInstanceId> {
        self.instances
            .iter()
            .filter(|i| i.is_new())
            .map(|i| i.id.clone())
            .collect()
    }
}

/// All cluster groups for a run, keyed by provider name.
#[derive(Default)]
pub struct ClusterPool {
    pub groups: BTreeMap<String, ClusterGroup>,
}

impl ClusterPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, group: ClusterGroup) {
        self.groups.insert(group.provider_name.clone(), group);
    }

    /// Selects a ready instance tuple: one instance from each of
    /// `provider_names`, or `None` if any named provider has no ready
    /// instance right now (§4.D assignment algorithm, all-or-nothing).
    pub fn select_tuple(&mut self, provider_names: &[String]) -> Option<Vec<ClusterInstanceId>> {
        for name in provider_names {
            let group = self.groups.get_mut(name)?;
            if group.select_ready().is_none() {
                return None;
            }
        }
        let mut tuple = Vec::with_capacity(provider_names.len());
        for name in provider_names {
            let group = self.groups.get_mut(name).expect("checked above");
            let instance = group.select_ready().expect("checked above");
            tuple.push(instance.id.clone());
        }
        for (name, id) in provider_names.iter().zip(tuple.iter()) {
            self.groups.get_mut(name).expect("checked above").on_task_assigned(id);
        }
        Some(tuple)
    }

    pub fn release_tuple(&mut self, provider_names: &[String], tuple: &[ClusterInstanceId]) {
        for (name, id) in provider_names.iter().zip(tuple.iter()) {
            if let Some(group) = self.groups.get_mut(name) {
                group.on_task_finished(id);
            }
        }
    }

    pub fn all_exhausted(&self) -> bool {
        !self.groups.is_empty() && self.groups.values().all(|g| g.is_exhausted())
    }

    pub fn find_mut(&mut self, id: &ClusterInstanceId) -> Option<&mut ClusterInstance> {
        self.groups.get_mut(&id.provider)?.find_mut(id)
    }

    /// Every instance still `New` among `provider_names`, the candidates
    /// for a lazy `Start` (§4.A).
    pub fn new_instances_among(&self, provider_names: &[String]) -> Vec<ClusterInstanceId> {
        provider_names
            .iter()
            .filter_map(|name| self.groups.get(name))
            .flat_map(|group| group.new_instance_ids())
            .collect()
    }
}

pub type ClusterGroups = Arc<tokio::sync::Mutex<ClusterPool>>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::instance::InstallRegistry;
    use crate::cluster::provider::{ClusterProvider, ScriptOutput, ScriptPhase};
    use crate::cluster::validator::DefaultValidationFactory;
    use crate::config::ClusterProviderConfig;
    use crate::errors::ClusterError;
    use async_trait::async_trait;

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
        instance.state = ClusterInstanceState::Ready;
        instance
    }

    #[test]
    fn select_ready_skips_busy_instances() {
        let mut group = ClusterGroup::new("a_provider", vec![ready_instance("a_provider", 0)], Duration::ZERO);
        group.instances[0].mark_busy();
        assert!(group.select_ready().is_none());
    }

    #[test]
    fn select_ready_respects_cooldown() {
        let mut group = ClusterGroup::new("a_provider", vec![ready_instance("a_provider", 0)], Duration::from_secs(60));
        let id = group.instances[0].id.clone();
        group.on_task_assigned(&id);
        group.on_task_finished(&id);
        assert!(group.select_ready().is_none());
    }

    #[test]
    fn pool_select_tuple_is_all_or_nothing() {
        let mut pool = ClusterPool::new();
        pool.insert(ClusterGroup::new("a_provider", vec![ready_instance("a_provider", 0)], Duration::ZERO));
        pool.insert(ClusterGroup::new("b_provider", vec![], Duration::ZERO));

        let tuple = pool.select_tuple(&["a_provider".to_string(), "b_provider".to_string()]);
        assert!(tuple.is_none());
        assert!(pool.groups["a_provider"].instances[0].is_ready());
    }

    #[test]
    fn pool_select_and_release_round_trip() {
        let mut pool = ClusterPool::new();
        pool.insert(ClusterGroup::new("a_provider", vec![ready_instance("a_provider", 0)], Duration::ZERO));
        let providers = vec!["a_provider".to_string()];
        let tuple = pool.select_tuple(&providers).unwrap();
        assert!(!pool.groups["a_provider"].instances[0].is_ready());
        pool.release_tuple(&providers, &tuple);
        assert!(pool.groups["a_provider"].instances[0].is_ready());
    }
}
