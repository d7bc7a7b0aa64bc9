// Copyright (c) The CloudTest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types produced by CloudTest.

use camino::Utf8PathBuf;
use thiserror::Error;

/// An error encountered while loading or validating a configuration document.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file `{path}`")]
    Read {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config at `{path}`")]
    Parse {
        path: Utf8PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("`imports` globs are not supported by this build of cloudtest")]
    ImportsUnsupported,

    #[error(
        "execution `{execution}` requires {cluster_count} cluster(s) but only {selector_len} were named in cluster-selector"
    )]
    ClusterCountExceedsSelector {
        execution: String,
        cluster_count: usize,
        selector_len: usize,
    },

    #[error(
        "execution `{execution}` sets both test-retry-count and retest.count; their precedence is ambiguous, set only one"
    )]
    AmbiguousRetryMechanism { execution: String },

    #[error("number of tests is less than the failed tests limit")]
    FailedTestsLimitExceedsTaskCount,

    #[error("execution `{execution}` references unknown cluster provider `{provider}`")]
    UnknownClusterProvider { execution: String, provider: String },

    #[error("provider `{provider}` is missing required script `{script}`")]
    MissingScript { provider: String, script: String },

    #[error("invalid only-run pattern(s): {source}")]
    InvalidOnlyRunPattern {
        #[source]
        source: regex::Error,
    },
}

/// An error encountered while driving a cluster instance through its lifecycle.
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("script `{phase}` for provider `{provider}` exited with a non-zero status: {detail}")]
    ScriptFailed {
        provider: String,
        phase: String,
        detail: String,
    },

    #[error("failed to spawn script `{phase}` for provider `{provider}`")]
    Spawn {
        provider: String,
        phase: String,
        #[source]
        source: std::io::Error,
    },

    #[error("timed out waiting for provider `{provider}` to become ready")]
    StartTimedOut { provider: String },

    #[error("cluster instance `{instance}` is not in a state that allows this operation (state: {state})")]
    InvalidState { instance: String, state: String },

    #[error("missing required environment variable `{name}` for provider `{provider}`")]
    MissingEnv { provider: String, name: String },
}

/// The terminal, fatal reason the event loop stopped. Maps 1:1 to the stderr
/// strings documented in `spec.md` §6.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FatalReason {
    #[error("global timeout elapsed: {seconds} seconds")]
    GlobalTimeout { seconds: u64 },

    #[error("there is failed tests {count}")]
    FailedTests { count: usize },

    #[error("Allowed limit for failed tests is reached: {limit}")]
    FailedTestsLimitReached { limit: usize },

    #[error("Failed to create cluster instance. Error {reason}")]
    ClusterCreationFailed { reason: String },

    #[error("{reason}")]
    HealthCheckFailed { reason: String },

    #[error("interrupted by signal, {running} running task(s) marked as timed out")]
    Interrupted { running: usize },
}

/// Top-level error returned from running the scheduler to completion.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("{0}")]
    Fatal(#[from] FatalReason),
}
