// Copyright (c) The CloudTest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `TestRunner`: executes one task's `run` script against its assigned
//! cluster-instance tuple and captures combined output.
//!
//! Grounded in `original_source/pkg/runners/shelltest_runner.go`: each
//! line of the script is run in turn through a shell, environment is the
//! cluster instances' kubeconfig/env plus `ARTIFACTS_DIR`, and output is
//! captured to a writer (here, through [`ExecutionManager`]) rather than
//! parsed — go-test JSON demultiplexing is out of scope (`spec.md` §1).

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use camino::Utf8PathBuf;

use crate::cluster::ClusterInstanceId;
use crate::errors::ClusterError;
use crate::exec_manager::ExecutionManager;

/// The outcome of running one task attempt.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub success: bool,
    pub output: String,
    pub output_file: Utf8PathBuf,
    pub duration: Duration,
}

#[async_trait]
pub trait TestRunner: Send + Sync {
    /// Runs `script` for `test_name`, with `env` merged on top of the
    /// runner's own process environment, bounded by `timeout`.
    async fn run(
        &self,
        test_name: &str,
        script: &str,
        env: &BTreeMap<String, String>,
        timeout: Duration,
    ) -> Result<RunOutcome, ClusterError>;
}

/// Runs a task's script via `duct`, one line at a time, stopping at the
/// first failing line — mirroring `shellTestRunner.runCmd`.
pub struct ShellTestRunner {
    category: String,
    exec_manager: Arc<dyn ExecutionManager>,
}

impl ShellTestRunner {
    pub fn new(category: impl Into<String>, exec_manager: Arc<dyn ExecutionManager>) -> Self {
        Self {
            category: category.into(),
            exec_manager,
        }
    }

    /// Builds the environment for a test run: cluster tuple env plus any
    /// execution-level `env` entries, matching `envMgr.GetProcessedEnv()`.
    ///
    /// A single assigned instance exports its kubeconfig as plain
    /// `KUBECONFIG`; a multi-cluster task exports each instance's
    /// kubeconfig under the name at the matching position in
    /// `cluster_env_names` (the execution's `cluster-env` list), falling
    /// back to `KUBECONFIG_<PROVIDER>` for any position left unnamed
    /// (`spec.md` §6, "`KUBECONFIG`, `ARTIFACTS_DIR`, `<cluster-env[i]>`
    /// for multi-cluster tasks").
    pub fn build_env(
        cluster_env: &[(ClusterInstanceId, Option<Utf8PathBuf>)],
        cluster_env_names: &[String],
        execution_env: &[String],
    ) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        if cluster_env.len() == 1 {
            if let Some(kubeconfig) = &cluster_env[0].1 {
                env.insert("KUBECONFIG".to_string(), kubeconfig.to_string());
            }
        } else {
            for (i, (id, kubeconfig)) in cluster_env.iter().enumerate() {
                let Some(kubeconfig) = kubeconfig else { continue };
                let name = cluster_env_names
                    .get(i)
                    .cloned()
                    .unwrap_or_else(|| format!("KUBECONFIG_{}", id.provider.to_uppercase()));
                env.insert(name, kubeconfig.to_string());
            }
        }
        for entry in execution_env {
            if let Some((key, value)) = entry.split_once('=') {
                env.insert(key.to_string(), value.to_string());
            }
        }
        env
    }
}

#[async_trait]
impl TestRunner for ShellTestRunner {
    async fn run(
        &self,
        test_name: &str,
        script: &str,
        env: &BTreeMap<String, String>,
        timeout: Duration,
    ) -> Result<RunOutcome, ClusterError> {
        let artifacts_dir = self
            .exec_manager
            .add_folder(&self.category, test_name)
            .map_err(|source| ClusterError::Spawn {
                provider: self.category.clone(),
                phase: "artifacts".to_string(),
                source,
            })?;

        let script = script.to_string();
        let env = env.clone();
        let category = self.category.clone();
        let test_name_owned = test_name.to_string();
        let started = Instant::now();

        let run = tokio::task::spawn_blocking(move || -> Result<(bool, String), ClusterError> {
            let mut combined = String::new();
            for line in script.lines() {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                combined.push_str(&format!(">>>>>>Running: {line}:<<<<<<\n"));

                let mut expr = duct::cmd!("sh", "-c", line);
                for (key, value) in &env {
                    expr = expr.env(key, value);
                }
                expr = expr.env("ARTIFACTS_DIR", artifacts_dir.as_str());

                let output = expr
                    .stdout_capture()
                    .stderr_capture()
                    .unchecked()
                    .run()
                    .map_err(|source| ClusterError::Spawn {
                        provider: category.clone(),
                        phase: "run".to_string(),
                        source,
                    })?;

                combined.push_str(&String::from_utf8_lossy(&output.stdout));
                combined.push_str(&String::from_utf8_lossy(&output.stderr));

                if !output.status.success() {
                    combined.push_str(&format!("error running command: exit status {:?}\n", output.status.code()));
                    return Ok((false, combined));
                }
            }
            Ok((true, combined))
        });

        let (success, output) = tokio::time::timeout(timeout, run)
            .await
            .map_err(|_| ClusterError::StartTimedOut {
                provider: self.category.clone(),
            })?
            .expect("run task panicked")?;

        let output_file = self
            .exec_manager
            .add_log(&self.category, &format!("{test_name_owned}-run"), &output)
            .map_err(|source| ClusterError::Spawn {
                provider: self.category.clone(),
                phase: "run".to_string(),
                source,
            })?;

        Ok(RunOutcome {
            success,
            output,
            output_file,
            duration: started.elapsed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec_manager::FsExecutionManager;

    fn tempdir() -> Utf8PathBuf {
        let dir = std::env::temp_dir().join(format!("cloudtest-runner-test-{}", uuid::Uuid::new_v4()));
        Utf8PathBuf::from_path_buf(dir).unwrap()
    }

    #[tokio::test]
    async fn successful_script_reports_success() {
        let exec_manager: Arc<dyn ExecutionManager> = Arc::new(FsExecutionManager::new(tempdir()).unwrap());
        let runner = ShellTestRunner::new("simple", exec_manager);
        let outcome = runner
            .run("TestPass", "echo hello", &BTreeMap::new(), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(outcome.success);
        assert!(outcome.output.contains("hello"));
    }

    #[tokio::test]
    async fn failing_line_stops_script_and_reports_failure() {
        let exec_manager: Arc<dyn ExecutionManager> = Arc::new(FsExecutionManager::new(tempdir()).unwrap());
        let runner = ShellTestRunner::new("simple", exec_manager);
        let outcome = runner
            .run("TestFail", "exit 1\necho unreachable", &BTreeMap::new(), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(!outcome.success);
        assert!(!outcome.output.contains("unreachable"));
    }
}
