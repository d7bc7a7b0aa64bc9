// Copyright (c) The CloudTest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::sync::Arc;

use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};
use cloudtest_core::config::Config;
use cloudtest_core::errors::{FatalReason, RunError};
use cloudtest_core::exec_manager::FsExecutionManager;
use cloudtest_core::orchestrator::build_dispatcher;
use cloudtest_core::report::{build_report, render};
use color_eyre::eyre::{Result, WrapErr};
use tracing_subscriber::EnvFilter;

/// Distributed test orchestrator: provisions cluster providers and runs
/// executions against them.
#[derive(Debug, Parser)]
#[command(name = "cloudtest", about, version)]
pub struct CloudTestApp {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the scheduler over a configuration file to completion.
    Run {
        /// Path to the cloudtest configuration YAML document.
        #[arg(long)]
        config: Utf8PathBuf,

        /// Extra arguments appended to every execution's extra-options,
        /// e.g. `cloudtest run --config cloudtest.yaml --cli-args -v -run Foo`.
        #[arg(long = "cli-args", num_args = 0.., allow_hyphen_values = true)]
        cli_args: Vec<String>,
    },
    /// Load and validate a configuration file without running anything.
    Validate {
        /// Path to the cloudtest configuration YAML document.
        #[arg(long)]
        config: Utf8PathBuf,
    },
}

impl CloudTestApp {
    /// Runs the requested subcommand, returning the process exit code.
    pub fn exec(self) -> Result<i32> {
        init_tracing();
        match self.command {
            Command::Run { config, cli_args } => exec_run(&config, cli_args),
            Command::Validate { config } => exec_validate(&config),
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

fn exec_validate(config_path: &Utf8PathBuf) -> Result<i32> {
    match Config::load(config_path) {
        Ok(_) => {
            println!("{config_path}: configuration is valid");
            Ok(0)
        }
        Err(error) => {
            eprintln!("{config_path}: {error}");
            Ok(1)
        }
    }
}

fn exec_run(config_path: &Utf8PathBuf, cli_args: Vec<String>) -> Result<i32> {
    let mut config = Config::load(config_path).wrap_err("failed to load configuration")?;
    if !cli_args.is_empty() {
        for execution in &mut config.executions {
            execution.extra_options.extend(cli_args.iter().cloned());
        }
    }

    let artifacts_root = resolve_root(config_path, &config.root);
    let report_path = resolve_root(config_path, &config.reporting.junit_report);
    let config = Arc::new(config);

    let exec_manager =
        Arc::new(FsExecutionManager::new(artifacts_root).wrap_err("failed to initialize artifact storage")?);

    let runtime = tokio::runtime::Runtime::new().wrap_err("failed to start async runtime")?;
    runtime.block_on(async move {
        let seed = rand::random();
        let dispatcher = build_dispatcher(Arc::clone(&config), exec_manager, seed)
            .await
            .wrap_err("failed to assemble scheduler")?;

        match dispatcher.run().await {
            Ok(tasks) => {
                let report = build_report(&config.version, &tasks);
                let xml = render(&report).wrap_err("failed to render JUnit report")?;
                if let Some(parent) = report_path.parent() {
                    std::fs::create_dir_all(parent).wrap_err("failed to create report directory")?;
                }
                std::fs::write(&report_path, xml).wrap_err("failed to write JUnit report")?;
                Ok(0)
            }
            Err(RunError::Fatal(reason)) => {
                eprintln!("{reason}");
                Ok(exit_code_for(&reason))
            }
            Err(RunError::Config(error)) => {
                eprintln!("{error}");
                Ok(1)
            }
        }
    })
}

fn exit_code_for(reason: &FatalReason) -> i32 {
    match reason {
        FatalReason::GlobalTimeout { .. } => 2,
        FatalReason::FailedTests { .. } => 3,
        FatalReason::FailedTestsLimitReached { .. } => 4,
        FatalReason::ClusterCreationFailed { .. } => 5,
        FatalReason::HealthCheckFailed { .. } => 6,
        FatalReason::Interrupted { .. } => 130,
    }
}

/// Resolves a config-relative path against the directory containing the
/// config file itself, matching how `root`/`junit-report` are described as
/// relative paths in the configuration document.
fn resolve_root(config_path: &Utf8PathBuf, relative: &Utf8PathBuf) -> Utf8PathBuf {
    if relative.is_absolute() {
        return relative.clone();
    }
    match config_path.parent() {
        Some(parent) => parent.join(relative),
        None => relative.clone(),
    }
}
