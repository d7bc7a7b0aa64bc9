// Copyright (c) The CloudTest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Cluster lifecycle: provisioning, pooling and readiness validation.

pub mod group;
pub mod instance;
pub mod provider;
pub mod validator;

pub use group::{ClusterGroup, ClusterGroups, ClusterPool};
pub use instance::{
    run_destroy_sequence, run_start_sequence, ClusterInstance, ClusterInstanceId, ClusterInstanceState,
    InstallRegistry,
};
pub use provider::{ClusterProvider, ScriptOutput, ScriptPhase, ShellClusterProvider};
pub use validator::{DefaultValidationFactory, ValidationFactory, Validator};
