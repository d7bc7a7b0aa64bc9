// Copyright (c) The CloudTest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Component G: the health check supervisor.
//!
//! One detached `tokio::task` per configured check, each posting at most
//! one `HealthCheckFailed` event for its own lifetime — "only the first
//! failure... triggers the event" (`spec.md` §4.G).

use tokio::sync::mpsc::Sender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::HealthCheckConfig;
use crate::scheduler::events::OperationEvent;

/// Spawns a supervisor task for every configured health check. Returns
/// their join handles so the caller can await shutdown.
pub fn spawn_all(
    checks: Vec<HealthCheckConfig>,
    events: Sender<OperationEvent>,
    cancel: CancellationToken,
) -> Vec<tokio::task::JoinHandle<()>> {
    checks
        .into_iter()
        .map(|check| {
            let events = events.clone();
            let cancel = cancel.clone();
            tokio::spawn(run_check(check, events, cancel))
        })
        .collect()
}

async fn run_check(check: HealthCheckConfig, events: Sender<OperationEvent>, cancel: CancellationToken) {
    let mut fired = false;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(check.interval) => {}
        }

        if fired {
            continue;
        }

        let run = check.run.clone();
        let probe = tokio::task::spawn_blocking(move || {
            duct::cmd!("sh", "-c", &run)
                .stdout_capture()
                .stderr_capture()
                .unchecked()
                .run()
        });

        let result = tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(check.interval) => {
                warn!(run = %check.run, "health check timed out");
                None
            }
            outcome = probe => Some(outcome),
        };

        let Some(outcome) = result else {
            continue;
        };

        let healthy = match outcome {
            Ok(output) => output.status.success(),
            Err(_) => false,
        };

        if !healthy {
            fired = true;
            let message = if check.message.is_empty() {
                format!("health check `{}` failed", check.run)
            } else {
                check.message.clone()
            };
            if events
                .send(OperationEvent::HealthCheckFailed { message })
                .await
                .is_err()
            {
                return;
            }
        } else {
            debug!(run = %check.run, "health check ok");
        }
    }
}
