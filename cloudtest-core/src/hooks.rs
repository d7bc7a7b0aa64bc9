// Copyright (c) The CloudTest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Execution hooks: `before`/`after`/`on-fail` scripts attached to an
//! `ExecutionConfig`, run against the cluster tuple a task is (or was)
//! assigned to.
//!
//! Not part of `spec.md`'s component table; carried over from
//! `original_source/pkg/config/config.go`'s `Execution.Before`/`.After`/
//! `.OnFail` fields per the supplementary-features note in
//! `SPEC_FULL.md`. Grounded in `cloudtest_core::runner::ShellTestRunner`
//! for the duct-based execution pattern, reused here rather than
//! duplicated.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::errors::ClusterError;
use crate::exec_manager::ExecutionManager;

/// Which hook point is firing, used only to label log output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookKind {
    Before,
    After,
    OnFail,
}

impl HookKind {
    fn label(self) -> &'static str {
        match self {
            HookKind::Before => "before",
            HookKind::After => "after",
            HookKind::OnFail => "on-fail",
        }
    }
}

/// Runs `before`/`after`/`on-fail` scripts. Failures are logged but never
/// propagated as task or run failures: a hook is a side effect attached to
/// an execution, not a gate on it (`original_source` likewise only logs
/// the error from these callbacks rather than aborting the run).
pub struct HookRunner {
    exec_manager: Arc<dyn ExecutionManager>,
}

impl HookRunner {
    pub fn new(exec_manager: Arc<dyn ExecutionManager>) -> Self {
        Self { exec_manager }
    }

    /// Runs `script` under `env`, logging combined output through
    /// `category`/`{kind}` via the execution manager. Best-effort: errors
    /// are logged with `tracing::warn!` and swallowed.
    pub async fn run(&self, category: &str, kind: HookKind, script: &str, env: BTreeMap<String, String>) {
        if script.trim().is_empty() {
            return;
        }

        let category = category.to_string();
        let script = script.to_string();
        let exec_manager = Arc::clone(&self.exec_manager);
        let label = kind.label();

        let outcome = tokio::task::spawn_blocking(move || -> Result<String, ClusterError> {
            let mut expr = duct::cmd!("sh", "-c", &script);
            for (key, value) in &env {
                expr = expr.env(key, value);
            }
            let output = expr
                .stdout_capture()
                .stderr_capture()
                .unchecked()
                .run()
                .map_err(|source| ClusterError::Spawn {
                    provider: category.clone(),
                    phase: label.to_string(),
                    source,
                })?;

            let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
            combined.push_str(&String::from_utf8_lossy(&output.stderr));
            let _ = exec_manager.add_log(&category, label, &combined);

            if !output.status.success() {
                return Err(ClusterError::ScriptFailed {
                    provider: category,
                    phase: label.to_string(),
                    detail: combined.lines().last().unwrap_or("(no output)").to_string(),
                });
            }
            Ok(combined)
        })
        .await;

        match outcome {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => warn!(hook = label, error = %err, "execution hook failed"),
            Err(join_err) => warn!(hook = label, error = %join_err, "execution hook task panicked"),
        }
    }

    /// Convenience for callers that only need a bounded wait (hooks do not
    /// honor an execution's `timeout` in `original_source`, but a run-away
    /// `before`/`after` script must not wedge the dispatcher forever).
    pub async fn run_with_timeout(
        &self,
        category: &str,
        kind: HookKind,
        script: &str,
        env: BTreeMap<String, String>,
        timeout: Duration,
    ) {
        if tokio::time::timeout(timeout, self.run(category, kind, script, env))
            .await
            .is_err()
        {
            warn!(hook = kind.label(), category, "execution hook timed out");
        }
    }
}
