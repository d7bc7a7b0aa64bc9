// Copyright (c) The CloudTest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `TestDiscovery`: resolves an [`ExecutionSource`] into the concrete list
//! of test names to schedule as tasks.
//!
//! The original's Go-AST suite walker (`original_source/pkg/suites/lookup`)
//! is out of scope (`spec.md` §1); [`ExternalListDiscovery`] stands in for
//! it at the collaborator boundary, grounded in `getTests` in
//! `original_source/pkg/model/tests.go`, which likewise shells out to
//! `go test -list` and splits its output on newlines.

use async_trait::async_trait;

use crate::config::ExecutionSource;
use crate::errors::ClusterError;

#[async_trait]
pub trait TestDiscovery: Send + Sync {
    /// Resolves `source` into an ordered, deduplicated list of test names.
    async fn discover(&self, source: &ExecutionSource) -> Result<Vec<String>, ClusterError>;
}

/// Discovery over an explicit, already-known list of test names — the
/// degenerate case where `source.tests` names every test directly.
pub struct StaticTestDiscovery;

#[async_trait]
impl TestDiscovery for StaticTestDiscovery {
    async fn discover(&self, source: &ExecutionSource) -> Result<Vec<String>, ClusterError> {
        Ok(dedup(source.tests.iter().cloned()))
    }
}

/// Discovery by running a configurable "list tests" command and splitting
/// its stdout on newlines, standing in for `gotest --list`/AST suite
/// expansion. `source.tags` are passed to the command as positional
/// arguments; `source.tests`, if non-empty, is used verbatim instead of
/// invoking the command at all.
pub struct ExternalListDiscovery {
    pub list_command: Option<String>,
}

#[async_trait]
impl TestDiscovery for ExternalListDiscovery {
    async fn discover(&self, source: &ExecutionSource) -> Result<Vec<String>, ClusterError> {
        if !source.tests.is_empty() {
            return Ok(dedup(source.tests.iter().cloned()));
        }
        let Some(command) = &self.list_command else {
            return Ok(Vec::new());
        };
        let command = command.clone();
        let tags = source.tags.clone();
        let output = tokio::task::spawn_blocking(move || {
            let mut expr = duct::cmd!("sh", "-c", &command);
            for tag in &tags {
                expr = expr.env("CLOUDTEST_TAG", tag);
            }
            expr.stdout_capture().stderr_capture().unchecked().run()
        })
        .await
        .expect("discovery task panicked")
        .map_err(|source| ClusterError::Spawn {
            provider: "discovery".to_string(),
            phase: "list".to_string(),
            source,
        })?;

        let names = String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string);
        Ok(dedup(names))
    }
}

fn dedup(names: impl Iterator<Item = String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    names.filter(|name| seen.insert(name.clone())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_discovery_dedups_explicit_tests() {
        let source = ExecutionSource {
            tags: vec![],
            tests: vec!["TestA".to_string(), "TestA".to_string(), "TestB".to_string()],
        };
        let tests = StaticTestDiscovery.discover(&source).await.unwrap();
        assert_eq!(tests, vec!["TestA".to_string(), "TestB".to_string()]);
    }

    #[tokio::test]
    async fn external_discovery_runs_list_command() {
        let discovery = ExternalListDiscovery {
            list_command: Some("printf 'TestA\\nTestB\\nTestA\\n'".to_string()),
        };
        let source = ExecutionSource::default();
        let tests = discovery.discover(&source).await.unwrap();
        assert_eq!(tests, vec!["TestA".to_string(), "TestB".to_string()]);
    }

    #[tokio::test]
    async fn external_discovery_prefers_explicit_tests() {
        let discovery = ExternalListDiscovery {
            list_command: Some("printf 'Ignored\\n'".to_string()),
        };
        let source = ExecutionSource {
            tags: vec![],
            tests: vec!["TestA".to_string()],
        };
        let tests = discovery.discover(&source).await.unwrap();
        assert_eq!(tests, vec!["TestA".to_string()]);
    }
}
