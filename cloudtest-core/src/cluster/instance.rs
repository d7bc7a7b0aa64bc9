// Copyright (c) The CloudTest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Component A: the cluster instance state machine.
//!
//! Grounded in `original_source/pkg/model/cluster.go`
//! (`ClusterInstance`, states `CLUSTER_ADDED`/`CLUSTER_STARTING`/
//! `CLUSTER_BUSY`/`CLUSTER_CRASHED`/`CLUSTER_STOPPING`/`CLUSTER_STOPPED`)
//! and `original_source/pkg/shell/shell_manager.go` for the phase ordering
//! `install -> setup -> start -> config -> prepare` on start, and
//! `stop -> cleanup` on destroy.

use std::collections::BTreeMap;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use camino::Utf8PathBuf;
use tokio::sync::Mutex;

use crate::cluster::provider::{ClusterProvider, ScriptPhase};
use crate::cluster::validator::ValidationFactory;
use crate::errors::ClusterError;

/// Identifies one instance slot of a provider: the provider name plus its
/// index within the configured instance count (`ClusterProviderConfig::instance_count`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClusterInstanceId {
    pub provider: String,
    pub index: usize,
}

impl ClusterInstanceId {
    pub fn new(provider: impl Into<String>, index: usize) -> Self {
        Self {
            provider: provider.into(),
            index,
        }
    }
}

impl fmt::Display for ClusterInstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.provider, self.index)
    }
}

/// The lifecycle state of a cluster instance, per `spec.md` §4.A.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterInstanceState {
    New,
    Starting,
    Started,
    Ready,
    Busy,
    Crashed,
    Stopping,
    Stopped,
}

impl fmt::Display for ClusterInstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ClusterInstanceState::New => "New",
            ClusterInstanceState::Starting => "Starting",
            ClusterInstanceState::Started => "Started",
            ClusterInstanceState::Ready => "Ready",
            ClusterInstanceState::Busy => "Busy",
            ClusterInstanceState::Crashed => "Crashed",
            ClusterInstanceState::Stopping => "Stopping",
            ClusterInstanceState::Stopped => "Stopped",
        };
        f.write_str(s)
    }
}

/// Process-wide guard so each provider's `install` script runs at most once,
/// no matter how many instances of that provider are started concurrently.
/// Keyed on provider name, per the Design Notes in `spec.md` §9.
#[derive(Default)]
pub struct InstallRegistry {
    done: Mutex<HashSet<String>>,
}

impl InstallRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `install` for `provider` exactly once across the registry's
    /// lifetime; concurrent callers for the same provider serialize on the
    /// first caller's attempt rather than racing duplicate installs.
    pub async fn install_once(
        &self,
        provider: &dyn ClusterProvider,
        timeout: Duration,
    ) -> Result<(), ClusterError> {
        let mut done = self.done.lock().await;
        if done.contains(provider.name()) {
            return Ok(());
        }
        provider
            .run_script(ScriptPhase::Install, provider.name(), &BTreeMap::new(), timeout)
            .await?;
        done.insert(provider.name().to_string());
        Ok(())
    }
}

fn instance_env(id: &ClusterInstanceId, kubeconfig: Option<&Utf8PathBuf>) -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();
    env.insert("CLUSTER_NAME".to_string(), id.to_string());
    if let Some(kubeconfig) = kubeconfig {
        env.insert("KUBECONFIG".to_string(), kubeconfig.to_string());
    }
    env
}

/// Runs `install -> setup -> start -> config -> prepare` for one instance
/// slot and returns the kubeconfig path extracted from the `config` phase,
/// if any. Stateless over the instance itself (takes only the `Arc`
/// handles an instance owns) so the dispatcher can run it detached, off the
/// scheduler lock, per the "no lock held across I/O" rule in `spec.md` §5.
pub async fn run_start_sequence(
    provider: &Arc<dyn ClusterProvider>,
    install_registry: &Arc<InstallRegistry>,
    validation_factory: &Arc<dyn ValidationFactory>,
    id: &ClusterInstanceId,
    deadline: Instant,
) -> Result<Option<Utf8PathBuf>, ClusterError> {
    let remaining = |deadline: Instant| deadline.saturating_duration_since(Instant::now());

    install_registry
        .install_once(provider.as_ref(), remaining(deadline))
        .await?;

    let mut kubeconfig = None;
    for phase in [ScriptPhase::Setup, ScriptPhase::Start, ScriptPhase::Config] {
        let env = instance_env(id, kubeconfig.as_ref());
        match provider
            .run_script(phase, &id.to_string(), &env, remaining(deadline))
            .await?
        {
            Some(output) if phase == ScriptPhase::Config => {
                kubeconfig = output.kubeconfig;
            }
            _ => {}
        }
    }

    let node_count = provider.config().node_count.max(1);
    let validator = validation_factory.create_validator(provider.name(), node_count, kubeconfig.as_ref());
    validator.wait_valid(deadline).await?;

    let env = instance_env(id, kubeconfig.as_ref());
    provider
        .run_script(ScriptPhase::Prepare, &id.to_string(), &env, remaining(deadline))
        .await?;

    Ok(kubeconfig)
}

/// Runs `stop -> cleanup` for one instance slot. Stateless for the same
/// reason as [`run_start_sequence`].
pub async fn run_destroy_sequence(
    provider: &Arc<dyn ClusterProvider>,
    id: &ClusterInstanceId,
    kubeconfig: Option<&Utf8PathBuf>,
    timeout: Duration,
) -> Result<(), ClusterError> {
    let env = instance_env(id, kubeconfig);
    provider.run_script(ScriptPhase::Stop, &id.to_string(), &env, timeout).await?;
    provider.run_script(ScriptPhase::Cleanup, &id.to_string(), &env, timeout).await?;
    Ok(())
}

/// One running (or attempting-to-run) instance of a cluster provider.
pub struct ClusterInstance {
    pub id: ClusterInstanceId,
    pub state: ClusterInstanceState,
    pub kubeconfig: Option<Utf8PathBuf>,
    /// Total `Start` attempts made for this slot so far, bounding
    /// `ClusterProviderConfig::retry_count` (`spec.md` §3).
    pub start_count: u32,
    provider: Arc<dyn ClusterProvider>,
    install_registry: Arc<InstallRegistry>,
    validation_factory: Arc<dyn ValidationFactory>,
}

impl ClusterInstance {
    pub fn new(
        id: ClusterInstanceId,
        provider: Arc<dyn ClusterProvider>,
        install_registry: Arc<InstallRegistry>,
        validation_factory: Arc<dyn ValidationFactory>,
    ) -> Self {
        Self {
            id,
            state: ClusterInstanceState::New,
            kubeconfig: None,
            start_count: 0,
            provider,
            install_registry,
            validation_factory,
        }
    }

    /// Clones of the `Arc` handles needed to run this instance's start/stop
    /// sequence detached from the scheduler lock.
    pub(crate) fn handles(&self) -> (Arc<dyn ClusterProvider>, Arc<InstallRegistry>, Arc<dyn ValidationFactory>) {
        (
            Arc::clone(&self.provider),
            Arc::clone(&self.install_registry),
            Arc::clone(&self.validation_factory),
        )
    }

    pub fn provider_config(&self) -> &crate::config::ClusterProviderConfig {
        self.provider.config()
    }

    /// Drives the instance from `New` through `install -> setup -> start ->
    /// config -> prepare` to `Ready`, or `Crashed` on any script or
    /// validation failure (§4.A). `deadline` bounds the whole sequence.
    pub async fn start(&mut self, deadline: Instant) -> Result<(), ClusterError> {
        debug_assert_eq!(self.state, ClusterInstanceState::New);
        self.state = ClusterInstanceState::Starting;
        self.start_count += 1;

        match run_start_sequence(&self.provider, &self.install_registry, &self.validation_factory, &self.id, deadline).await {
            Ok(kubeconfig) => {
                self.kubeconfig = kubeconfig;
                self.state = ClusterInstanceState::Ready;
                Ok(())
            }
            Err(err) => {
                self.state = ClusterInstanceState::Crashed;
                Err(err)
            }
        }
    }

    /// Tears the instance down via `stop -> cleanup` (§4.A). A `Starting`
    /// instance is destroyed as a no-op (it never produced side effects
    /// worth cleaning up); a `Stopping` instance forces straight to
    /// `Crashed` rather than re-entering `stop` (resolved Open Question,
    /// `spec.md` §9).
    pub async fn destroy(&mut self, timeout: Duration, keep_failed: bool) -> Result<(), ClusterError> {
        match self.state {
            ClusterInstanceState::New | ClusterInstanceState::Starting => {
                self.state = ClusterInstanceState::Stopped;
                return Ok(());
            }
            ClusterInstanceState::Stopping => {
                self.state = ClusterInstanceState::Crashed;
                return Ok(());
            }
            ClusterInstanceState::Stopped | ClusterInstanceState::Crashed => return Ok(()),
            ClusterInstanceState::Started | ClusterInstanceState::Ready | ClusterInstanceState::Busy => {}
        }

        if keep_failed && self.state == ClusterInstanceState::Crashed {
            return Ok(());
        }

        self.state = ClusterInstanceState::Stopping;
        match run_destroy_sequence(&self.provider, &self.id, self.kubeconfig.as_ref(), timeout).await {
            Ok(()) => {
                self.state = ClusterInstanceState::Stopped;
                Ok(())
            }
            Err(err) => {
                self.state = ClusterInstanceState::Crashed;
                Err(err)
            }
        }
    }

    pub fn mark_busy(&mut self) {
        debug_assert_eq!(self.state, ClusterInstanceState::Ready);
        self.state = ClusterInstanceState::Busy;
    }

    pub fn mark_idle(&mut self) {
        debug_assert_eq!(self.state, ClusterInstanceState::Busy);
        self.state = ClusterInstanceState::Ready;
    }

    pub fn is_ready(&self) -> bool {
        self.state == ClusterInstanceState::Ready
    }

    pub fn is_new(&self) -> bool {
        self.state == ClusterInstanceState::New
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_formats_as_provider_dash_index() {
        let id = ClusterInstanceId::new("a_provider", 2);
        assert_eq!(id.to_string(), "a_provider-2");
    }

    #[test]
    fn busy_idle_round_trip() {
        let provider_config = crate::config::ClusterProviderConfig::default();
        let provider: Arc<dyn ClusterProvider> = Arc::new(TestProvider(provider_config));
        let mut instance = ClusterInstance::new(
            ClusterInstanceId::new("a_provider", 0),
            provider,
            Arc::new(InstallRegistry::new()),
            Arc::new(crate::cluster::validator::DefaultValidationFactory { probe: None }),
        );
        instance.state = ClusterInstanceState::Ready;
        instance.mark_busy();
        assert_eq!(instance.state, ClusterInstanceState::Busy);
        instance.mark_idle();
        assert_eq!(instance.state, ClusterInstanceState::Ready);
    }

    struct TestProvider(crate::config::ClusterProviderConfig);

    #[async_trait::async_trait]
    impl ClusterProvider for TestProvider {
        fn name(&self) -> &str {
            "a_provider"
        }
        fn config(&self) -> &crate::config::ClusterProviderConfig {
            &self.0
        }
        async fn run_script(
            &self,
            _phase: ScriptPhase,
            _instance_id: &str,
            _env: &BTreeMap<String, String>,
            _timeout: Duration,
        ) -> Result<Option<crate::cluster::provider::ScriptOutput>, ClusterError> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn destroy_of_starting_instance_is_a_no_op() {
        let provider_config = crate::config::ClusterProviderConfig::default();
        let provider: Arc<dyn ClusterProvider> = Arc::new(TestProvider(provider_config));
        let mut instance = ClusterInstance::new(
            ClusterInstanceId::new("a_provider", 0),
            provider,
            Arc::new(InstallRegistry::new()),
            Arc::new(crate::cluster::validator::DefaultValidationFactory { probe: None }),
        );
        instance.state = ClusterInstanceState::Starting;
        instance.destroy(Duration::from_secs(1), false).await.unwrap();
        assert_eq!(instance.state, ClusterInstanceState::Stopped);
    }

    #[tokio::test]
    async fn destroy_of_stopping_instance_forces_crashed() {
        let provider_config = crate::config::ClusterProviderConfig::default();
        let provider: Arc<dyn ClusterProvider> = Arc::new(TestProvider(provider_config));
        let mut instance = ClusterInstance::new(
            ClusterInstanceId::new("a_provider", 0),
            provider,
            Arc::new(InstallRegistry::new()),
            Arc::new(crate::cluster::validator::DefaultValidationFactory { probe: None }),
        );
        instance.state = ClusterInstanceState::Stopping;
        instance.destroy(Duration::from_secs(1), false).await.unwrap();
        assert_eq!(instance.state, ClusterInstanceState::Crashed);
    }
}
