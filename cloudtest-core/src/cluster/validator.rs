// Copyright (c) The CloudTest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `Validator`/`ValidationFactory`: polls a cluster instance until it
//! reports the configured node count as reachable.
//!
//! Out of scope per `spec.md` §6 (`ValidationFactory.CreateValidator`,
//! `Validator.{Validate,WaitValid}` are collaborator contracts); the real
//! implementation talks to a Kubernetes API, which is itself out of scope.
//! `CommandValidator` is the simplest implementation that satisfies the
//! contract: it re-runs a user-suppliable probe script (defaulting to `true`)
//! until it exits zero or the deadline passes, exactly as `selectReady`
//! never blocks but `WaitValid` does (§4.B, §5).

use async_trait::async_trait;
use camino::Utf8PathBuf;
use std::time::{Duration, Instant};

use crate::errors::ClusterError;

#[async_trait]
pub trait Validator: Send + Sync {
    /// A single, non-blocking readiness check.
    async fn validate(&self) -> Result<bool, ClusterError>;

    /// Polls `validate` until it returns `Ok(true)` or `deadline` elapses.
    async fn wait_valid(&self, deadline: Instant) -> Result<(), ClusterError> {
        loop {
            if self.validate().await? {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(ClusterError::StartTimedOut {
                    provider: self.provider_name().to_string(),
                });
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }

    fn provider_name(&self) -> &str;
}

/// Builds a [`Validator`] for a freshly-provisioned instance.
pub trait ValidationFactory: Send + Sync {
    fn create_validator(
        &self,
        provider_name: &str,
        node_count: usize,
        kubeconfig: Option<&Utf8PathBuf>,
    ) -> Box<dyn Validator>;
}

/// A validator that always reports ready immediately. Used when a provider
/// has no `prepare`/readiness probe configured (`node_count == 0`).
pub struct AlwaysReadyValidator {
    provider_name: String,
}

#[async_trait]
impl Validator for AlwaysReadyValidator {
    async fn validate(&self) -> Result<bool, ClusterError> {
        Ok(true)
    }

    fn provider_name(&self) -> &str {
        &self.provider_name
    }
}

/// Re-runs `probe` until it exits zero.
pub struct CommandValidator {
    provider_name: String,
    probe: Option<String>,
    node_count: usize,
}

#[async_trait]
impl Validator for CommandValidator {
    async fn validate(&self) -> Result<bool, ClusterError> {
        let Some(probe) = &self.probe else {
            return Ok(true);
        };
        let probe = probe.clone();
        let node_count = self.node_count;
        let status = tokio::task::spawn_blocking(move || {
            duct::cmd!("sh", "-c", &probe)
                .env("CLOUDTEST_NODE_COUNT", node_count.to_string())
                .stdout_capture()
                .stderr_capture()
                .unchecked()
                .run()
        })
        .await
        .expect("validator probe task panicked");

        match status {
            Ok(output) => Ok(output.status.success()),
            Err(source) => Err(ClusterError::Spawn {
                provider: self.provider_name.clone(),
                phase: "prepare".to_string(),
                source,
            }),
        }
    }

    fn provider_name(&self) -> &str {
        &self.provider_name
    }
}

/// Default `ValidationFactory`: builds a [`CommandValidator`] when a probe
/// script is configured, otherwise an [`AlwaysReadyValidator`].
pub struct DefaultValidationFactory {
    pub probe: Option<String>,
}

impl ValidationFactory for DefaultValidationFactory {
    fn create_validator(
        &self,
        provider_name: &str,
        node_count: usize,
        _kubeconfig: Option<&Utf8PathBuf>,
    ) -> Box<dyn Validator> {
        match &self.probe {
            Some(probe) => Box::new(CommandValidator {
                provider_name: provider_name.to_string(),
                probe: Some(probe.clone()),
                node_count,
            }),
            None => Box::new(AlwaysReadyValidator {
                provider_name: provider_name.to_string(),
            }),
        }
    }
}
