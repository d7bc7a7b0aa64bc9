// Copyright (c) The CloudTest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The declarative configuration document: cluster providers, executions,
//! health checks, retest policy and reporting options.
//!
//! Grounded in `original_source/pkg/config/config.go`. YAML parsing itself
//! uses `serde_yaml`; `Imports` glob expansion is a collaborator boundary
//! (`spec.md` §1) and is rejected rather than silently ignored.

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::errors::ConfigError;

/// Top-level CloudTest configuration document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub version: String,
    /// A provider-stored-configuration root, relative to the config file.
    pub root: Utf8PathBuf,
    #[serde(with = "humantime_serde::option", default)]
    pub timeout: Option<Duration>,
    #[serde(rename = "shuffle-enabled")]
    pub shuffle_enabled: bool,
    #[serde(rename = "only-run")]
    pub only_run: Vec<String>,
    #[serde(rename = "failed-tests-limit")]
    pub failed_tests_limit: usize,
    #[serde(rename = "min-suite-size")]
    pub min_suite_size: usize,
    #[serde(rename = "tests-per-cluster-instance")]
    pub tests_per_cluster_instance: usize,
    pub providers: Vec<ClusterProviderConfig>,
    pub executions: Vec<ExecutionConfig>,
    #[serde(rename = "health-check")]
    pub health_check: Vec<HealthCheckConfig>,
    pub retest: RetestConfig,
    pub reporting: ReportingConfig,
    pub statistics: StatisticsConfig,
    #[serde(alias = "import")]
    pub imports: Vec<String>,
}

impl Config {
    /// Parses a configuration document from YAML text.
    pub fn from_yaml(text: &str, path: &Utf8Path) -> Result<Self, ConfigError> {
        let config: Config =
            serde_yaml::from_str(text).map_err(|source| ConfigError::Parse {
                path: path.to_owned(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates a configuration document from disk.
    pub fn load(path: &Utf8Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_owned(),
            source,
        })?;
        Self::from_yaml(&text, path)
    }

    /// Structural validation that does not require test discovery to have
    /// run yet (the `FailedTestsLimit` vs. task-count check happens once the
    /// task set is known, in `scheduler::dispatcher`).
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.imports.is_empty() {
            return Err(ConfigError::ImportsUnsupported);
        }

        let provider_names: Vec<&str> =
            self.providers.iter().map(|p| p.name.as_str()).collect();

        for execution in &self.executions {
            let selector_len = execution.cluster_selector.len();
            let required = execution.cluster_count.max(1);
            if selector_len > 0 && required > selector_len {
                return Err(ConfigError::ClusterCountExceedsSelector {
                    execution: execution.name.clone(),
                    cluster_count: required,
                    selector_len,
                });
            }
            for name in &execution.cluster_selector {
                if !provider_names.contains(&name.as_str()) {
                    return Err(ConfigError::UnknownClusterProvider {
                        execution: execution.name.clone(),
                        provider: name.clone(),
                    });
                }
            }
            if execution.concurrency_retry > 0 && self.retest.restart_count > 0 {
                return Err(ConfigError::AmbiguousRetryMechanism {
                    execution: execution.name.clone(),
                });
            }
        }

        for provider in &self.providers {
            for required in ["start", "stop"] {
                if !provider.scripts.contains_key(required) {
                    return Err(ConfigError::MissingScript {
                        provider: provider.name.clone(),
                        script: required.to_string(),
                    });
                }
            }
        }

        Ok(())
    }

    /// Validates that the failed-tests limit is consistent with the
    /// discovered task count. Must run after discovery, per `spec.md` §4.E.
    pub fn validate_failed_tests_limit(&self, task_count: usize) -> Result<(), ConfigError> {
        if self.failed_tests_limit > 0 && self.failed_tests_limit > task_count {
            return Err(ConfigError::FailedTestsLimitExceedsTaskCount);
        }
        Ok(())
    }
}

/// A machine-pool provider: how to provision, validate and tear down `N`
/// cluster instances.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterProviderConfig {
    pub name: String,
    pub kind: String,
    pub instances: usize,
    #[serde(with = "humantime_serde::option", default)]
    pub timeout: Option<Duration>,
    #[serde(rename = "retry")]
    pub retry_count: u32,
    #[serde(rename = "node-count")]
    pub node_count: usize,
    #[serde(rename = "stop-delay", with = "humantime_serde::option", default)]
    pub stop_delay: Option<Duration>,
    pub enabled: bool,
    pub parameters: BTreeMap<String, String>,
    /// Script phases: `install`, `setup`, `start`, `config`, `prepare`,
    /// `stop`, `cleanup`. Each value is a shell script, possibly
    /// multi-line; lines are executed in order (§4.A).
    pub scripts: BTreeMap<String, String>,
    pub env: Vec<String>,
    #[serde(rename = "env-check")]
    pub env_check: Vec<String>,
    #[serde(rename = "test-delay", with = "humantime_serde::option", default)]
    pub test_delay: Option<Duration>,
    /// Mirrors `original_source`'s `NoMaskParameters`-style knob exposed as
    /// a per-provider `InstanceOptions`; default is to mask.
    #[serde(rename = "no-mask-parameters")]
    pub no_mask_parameters: bool,
}

/// A subset of tests selected by tag or explicit name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionSource {
    pub tags: Vec<String>,
    pub tests: Vec<String>,
}

/// The kind of runner used to execute an execution's tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionKind {
    Gotest,
    Shell,
    Suite,
}

impl Default for ExecutionKind {
    fn default() -> Self {
        ExecutionKind::Shell
    }
}

/// A declarative unit binding a set of tests to cluster-selection rules and
/// a runner kind.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    pub name: String,
    pub kind: ExecutionKind,
    pub source: ExecutionSource,
    pub before: Option<String>,
    pub after: Option<String>,
    #[serde(rename = "on-fail")]
    pub on_fail: Option<String>,
    #[serde(rename = "root")]
    pub package_root: Utf8PathBuf,
    #[serde(with = "humantime_serde::option", default)]
    pub timeout: Option<Duration>,
    #[serde(rename = "extra-options")]
    pub extra_options: Vec<String>,
    #[serde(rename = "cluster-count")]
    pub cluster_count: usize,
    #[serde(rename = "cluster-env")]
    pub cluster_env: Vec<String>,
    #[serde(rename = "cluster-selector")]
    pub cluster_selector: Vec<String>,
    pub env: Vec<String>,
    pub run: String,
    #[serde(rename = "only-run")]
    pub only_run: Vec<String>,
    #[serde(rename = "test-retry-count")]
    pub concurrency_retry: u32,
}

/// Retry/retest policy, applied process-wide (§4.F).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RetestConfig {
    pub pattern: Vec<String>,
    #[serde(rename = "count")]
    pub restart_count: u32,
    #[serde(rename = "warmup-time", with = "humantime_serde::option", default)]
    pub warmup_timeout: Option<Duration>,
    #[serde(rename = "allowed-retests")]
    pub allowed_retests: u32,
    #[serde(rename = "fail-result")]
    pub fail_result: String,
}

impl RetestConfig {
    pub fn fails_to_skip(&self) -> bool {
        self.fail_result.eq_ignore_ascii_case("skip")
    }
}

/// A user-defined probe run on a timer; a failure tears down the whole run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    pub run: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportingConfig {
    #[serde(rename = "junit-report")]
    pub junit_report: Utf8PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatisticsConfig {
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    pub enabled: bool,
}

impl Default for StatisticsConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            enabled: true,
        }
    }
}
