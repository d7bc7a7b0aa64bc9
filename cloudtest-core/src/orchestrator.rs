// Copyright (c) The CloudTest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Assembles a [`Config`] document into a runnable [`Dispatcher`]: builds
//! the [`ClusterPool`] from `providers`, discovers and filters tests from
//! `executions` into the task list, and wires up the collaborators
//! (`ExecutionManager`, `TestRunner`, `HookRunner`) the dispatcher needs.
//!
//! Not itself a named component in `spec.md` §2 — it is the "main"-level
//! wiring every CLI entrypoint needs, grounded in the overall shape of
//! `original_source/pkg/commands/run.go`'s setup sequence (build cluster
//! pool, discover tests, build scheduler, run).

use std::sync::Arc;

use regex::RegexSet;
use thiserror::Error;

use crate::cluster::{
    ClusterGroup, ClusterInstance, ClusterInstanceId, ClusterPool, DefaultValidationFactory, InstallRegistry,
    ShellClusterProvider, ValidationFactory,
};
use crate::config::Config;
use crate::discovery::{ExternalListDiscovery, TestDiscovery};
use crate::errors::{ClusterError, ConfigError};
use crate::exec_manager::ExecutionManager;
use crate::hooks::HookRunner;
use crate::runner::{ShellTestRunner, TestRunner};
use crate::scheduler::dispatcher::{Dispatcher, DispatcherDeps};
use crate::task::{Task, TaskKey};

/// Anything that can go wrong assembling a [`Dispatcher`] from a [`Config`]
/// before the scheduler itself ever runs.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to discover tests for execution `{execution}`")]
    Discovery {
        execution: String,
        #[source]
        source: ClusterError,
    },

    #[error("failed to initialize artifact storage at `{path}`")]
    Artifacts {
        path: camino::Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Builds the [`ClusterPool`] described by `config.providers`, sharing one
/// [`InstallRegistry`] (`spec.md` §9: `install` runs once per provider
/// process-wide) and one [`ValidationFactory`] across every instance.
pub fn build_pool(config: &Config, exec_manager: Arc<dyn ExecutionManager>) -> ClusterPool {
    let install_registry = Arc::new(InstallRegistry::new());
    let validation_factory: Arc<dyn ValidationFactory> = Arc::new(DefaultValidationFactory { probe: None });

    let mut pool = ClusterPool::new();
    for provider_config in &config.providers {
        if !provider_config.enabled && provider_config.instances == 0 {
            continue;
        }
        let provider_config_arc = Arc::new(provider_config.clone());
        let provider = Arc::new(ShellClusterProvider::new(
            Arc::clone(&provider_config_arc),
            Arc::clone(&exec_manager),
        ));

        let count = provider_config.instances.max(1);
        let instances: Vec<ClusterInstance> = (0..count)
            .map(|index| {
                ClusterInstance::new(
                    ClusterInstanceId::new(provider_config.name.clone(), index),
                    provider.clone() as Arc<dyn crate::cluster::ClusterProvider>,
                    Arc::clone(&install_registry),
                    Arc::clone(&validation_factory),
                )
            })
            .collect();

        let test_delay = provider_config.test_delay.unwrap_or(std::time::Duration::ZERO);
        pool.insert(ClusterGroup::new(provider_config.name.clone(), instances, test_delay));
    }
    pool
}

/// Discovers and filters the tasks described by `config.executions`:
/// resolves each execution's `source` into test names via [`TestDiscovery`],
/// then keeps only names matching both the execution-level and global
/// `only-run` patterns (`spec.md` §6), their intersection per the
/// supplementary-features note in `SPEC_FULL.md`.
pub async fn build_tasks(config: &Config) -> Result<Vec<Task>, BuildError> {
    let global_only_run =
        RegexSet::new(&config.only_run).map_err(|source| ConfigError::InvalidOnlyRunPattern { source })?;

    let mut tasks = Vec::new();
    for execution in &config.executions {
        let discovery = ExternalListDiscovery { list_command: None };
        let names = discovery
            .discover(&execution.source)
            .await
            .map_err(|source| BuildError::Discovery {
                execution: execution.name.clone(),
                source,
            })?;

        let exec_only_run =
            RegexSet::new(&execution.only_run).map_err(|source| ConfigError::InvalidOnlyRunPattern { source })?;
        let execution_arc = Arc::new(execution.clone());

        for name in names {
            if !passes_only_run(&name, &global_only_run) || !passes_only_run(&name, &exec_only_run) {
                continue;
            }
            tasks.push(Task::new(TaskKey::new(execution.name.clone(), name), Arc::clone(&execution_arc)));
        }
    }
    Ok(tasks)
}

fn passes_only_run(test_name: &str, patterns: &RegexSet) -> bool {
    patterns.is_empty() || patterns.is_match(test_name)
}

/// Full assembly: config in, ready-to-run [`Dispatcher`] out. `artifacts_root`
/// is the [`ExecutionManager`]'s filesystem root (`spec.md` §6 does not name
/// this path explicitly; it is derived from `config.root` by the CLI).
pub async fn build_dispatcher(
    config: Arc<Config>,
    exec_manager: Arc<dyn ExecutionManager>,
    seed: u64,
) -> Result<Dispatcher, BuildError> {
    let pool = build_pool(&config, Arc::clone(&exec_manager));
    let tasks = build_tasks(&config).await?;
    let runner: Arc<dyn TestRunner> = Arc::new(ShellTestRunner::new("tasks", Arc::clone(&exec_manager)));
    let hook_runner = Arc::new(HookRunner::new(Arc::clone(&exec_manager)));

    let deps = DispatcherDeps {
        pool,
        runner,
        exec_manager,
        hook_runner,
    };

    Dispatcher::new(config, tasks, deps, seed).map_err(BuildError::from)
}
