// Copyright (c) The CloudTest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `ClusterProvider`: how one provider runs its script phases.
//!
//! `spec.md` §1 scopes the Packet/Equinix hardware provider out, noting it
//! "uses the same `ClusterProvider` interface as the trivial `shell`
//! provider — no extra scheduler behavior". Only the shell provider is
//! implemented here; grounded in `original_source/pkg/shell/shell_manager.go`
//! and `original_source/pkg/config/config.go` (`ClusterProviderConfig.Scripts`).

use async_trait::async_trait;
use camino::Utf8PathBuf;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::ClusterProviderConfig;
use crate::errors::ClusterError;
use crate::exec_manager::ExecutionManager;

/// A phase of a cluster instance's lifecycle, each mapped to an optional
/// script in `ClusterProviderConfig::scripts` (§4.A).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ScriptPhase {
    Install,
    Setup,
    Start,
    Config,
    Prepare,
    Stop,
    Cleanup,
}

impl ScriptPhase {
    pub fn key(self) -> &'static str {
        match self {
            ScriptPhase::Install => "install",
            ScriptPhase::Setup => "setup",
            ScriptPhase::Start => "start",
            ScriptPhase::Config => "config",
            ScriptPhase::Prepare => "prepare",
            ScriptPhase::Stop => "stop",
            ScriptPhase::Cleanup => "cleanup",
        }
    }
}

/// The result of running a script phase: its combined stdout+stderr, plus
/// the kubeconfig path if this phase produced one (the `config` phase).
#[derive(Debug, Clone, Default)]
pub struct ScriptOutput {
    pub combined: String,
    pub kubeconfig: Option<Utf8PathBuf>,
}

/// Runs the script phases for one cluster provider.
#[async_trait]
pub trait ClusterProvider: Send + Sync {
    fn name(&self) -> &str;
    fn config(&self) -> &ClusterProviderConfig;

    /// Runs `phase` for instance slot `instance_id`, substituting `env`.
    /// Returns `Ok(None)` if no script is configured for this phase (every
    /// phase except `start`/`stop` is optional, per §4.A).
    async fn run_script(
        &self,
        phase: ScriptPhase,
        instance_id: &str,
        env: &BTreeMap<String, String>,
        timeout: Duration,
    ) -> Result<Option<ScriptOutput>, ClusterError>;
}

/// Replaces `${NAME}` placeholders in `command` with values from `env`,
/// leaving unknown placeholders untouched. A deliberately minimal stand-in
/// for the out-of-scope shell variable-substitution engine (`spec.md` §1).
pub fn substitute_vars(command: &str, env: &BTreeMap<String, String>) -> String {
    let mut result = String::with_capacity(command.len());
    let mut rest = command;
    while let Some(start) = rest.find("${") {
        let Some(end_rel) = rest[start..].find('}') else {
            result.push_str(rest);
            return result;
        };
        let end = start + end_rel;
        result.push_str(&rest[..start]);
        let name = &rest[start + 2..end];
        match env.get(name) {
            Some(value) => result.push_str(value),
            None => {
                result.push_str("${");
                result.push_str(name);
                result.push('}');
            }
        }
        rest = &rest[end + 1..];
    }
    result.push_str(rest);
    result
}

/// Masks values from `mask` inside `text`, matching
/// `original_source/pkg/shell/shell_manager.go`'s `PrintEnv`/`PrintArgs`.
pub fn mask_secrets(text: &str, mask: &[String]) -> String {
    let mut masked = text.to_string();
    for value in mask {
        if !value.is_empty() {
            masked = masked.replace(value.as_str(), "****");
        }
    }
    masked
}

/// Runs provider scripts via `duct`, writing combined output through the
/// `ExecutionManager` (§6 `ClusterInstance` collaborator contract).
pub struct ShellClusterProvider {
    config: Arc<ClusterProviderConfig>,
    exec_manager: Arc<dyn ExecutionManager>,
}

impl ShellClusterProvider {
    pub fn new(config: Arc<ClusterProviderConfig>, exec_manager: Arc<dyn ExecutionManager>) -> Self {
        Self {
            config,
            exec_manager,
        }
    }

    fn mask(&self) -> Vec<String> {
        if self.config.no_mask_parameters {
            return Vec::new();
        }
        self.config
            .env_check
            .iter()
            .filter_map(|name| std::env::var(name).ok())
            .collect()
    }
}

#[async_trait]
impl ClusterProvider for ShellClusterProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn config(&self) -> &ClusterProviderConfig {
        &self.config
    }

    async fn run_script(
        &self,
        phase: ScriptPhase,
        instance_id: &str,
        env: &BTreeMap<String, String>,
        timeout: Duration,
    ) -> Result<Option<ScriptOutput>, ClusterError> {
        let Some(script) = self.config.scripts.get(phase.key()).cloned() else {
            return Ok(None);
        };

        let mask = self.mask();
        let config = Arc::clone(&self.config);
        let exec_manager = Arc::clone(&self.exec_manager);
        let env = env.clone();
        let instance_id = instance_id.to_string();
        let phase_key = phase.key().to_string();

        let combined = tokio::task::spawn_blocking(move || -> Result<String, ClusterError> {
            let mut combined = String::new();
            for line in script.lines() {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let expanded = substitute_vars(line, &env);
                combined.push_str(&format!("{phase_key}: {}\n", mask_secrets(&expanded, &mask)));

                let mut expr = duct::cmd!("sh", "-c", &expanded);
                for (key, value) in &env {
                    expr = expr.env(key, value);
                }
                let output = expr
                    .stdout_capture()
                    .stderr_capture()
                    .unchecked()
                    .run()
                    .map_err(|source| ClusterError::Spawn {
                        provider: config.name.clone(),
                        phase: phase_key.clone(),
                        source,
                    })?;

                combined.push_str(&String::from_utf8_lossy(&output.stdout));
                let stderr = String::from_utf8_lossy(&output.stderr);
                combined.push_str(&stderr);

                if !output.status.success() {
                    let last_line = stderr
                        .lines()
                        .last()
                        .unwrap_or("(no stderr output)")
                        .to_string();
                    let _ = exec_manager.add_log(&instance_id, &phase_key, &combined);
                    return Err(ClusterError::ScriptFailed {
                        provider: config.name.clone(),
                        phase: phase_key,
                        detail: last_line,
                    });
                }
            }
            let _ = exec_manager.add_log(&instance_id, &phase_key, &combined);
            Ok(combined)
        });

        let combined = tokio::time::timeout(timeout, combined)
            .await
            .map_err(|_| ClusterError::StartTimedOut {
                provider: self.config.name.clone(),
            })?
            .expect("script execution task panicked")?;

        let kubeconfig = if phase == ScriptPhase::Config {
            combined
                .lines()
                .last()
                .map(|s| Utf8PathBuf::from(s.trim()))
                .filter(|p| !p.as_str().is_empty())
        } else {
            None
        };

        Ok(Some(ScriptOutput {
            combined,
            kubeconfig,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitute_replaces_known_vars() {
        let mut env = BTreeMap::new();
        env.insert("KUBECONFIG".to_string(), "/tmp/kc".to_string());
        assert_eq!(
            substitute_vars("kubectl --kubeconfig=${KUBECONFIG} get nodes", &env),
            "kubectl --kubeconfig=/tmp/kc get nodes"
        );
    }

    #[test]
    fn substitute_leaves_unknown_vars() {
        let env = BTreeMap::new();
        assert_eq!(substitute_vars("echo ${UNKNOWN}", &env), "echo ${UNKNOWN}");
    }

    #[test]
    fn mask_replaces_secret_values() {
        let masked = mask_secrets("token=abc123 done", &["abc123".to_string()]);
        assert_eq!(masked, "token=**** done");
    }
}
