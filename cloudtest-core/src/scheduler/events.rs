// Copyright (c) The CloudTest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `OperationEvent`: the tagged union flowing through the dispatcher's one
//! serialization channel (`spec.md` §3, §5).

use std::time::Duration;

use crate::cluster::ClusterInstanceId;
use crate::task::{TaskKey, TaskStatus};

#[derive(Debug, Clone)]
pub enum OperationEvent {
    TaskCompleted {
        task: TaskKey,
        status: TaskStatus,
        output: String,
        output_file: camino::Utf8PathBuf,
        duration: Duration,
    },
    ClusterStarted {
        instance: ClusterInstanceId,
        kubeconfig: Option<camino::Utf8PathBuf>,
    },
    ClusterCrashed {
        instance: ClusterInstanceId,
        reason: String,
    },
    /// A forced destroy-and-maybe-restart cycle (§4.D point 5, §4.F) has
    /// finished; carries no state transition of its own, it only releases
    /// the dispatcher's de-duplication guard for `instance`.
    ClusterRecycled {
        instance: ClusterInstanceId,
    },
    StatsTick,
    Signal,
    HealthCheckFailed {
        message: String,
    },
}
