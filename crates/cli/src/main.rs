//! kind-ps
//!
//! Finds the host PIDs of processes running in containers of a kind cluster.

mod config;
mod output;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use kind_ps_lib::{Pipeline, StructuredLogger};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Find host PIDs for processes in kind clusters
#[derive(Parser)]
#[command(name = "kind-ps")]
#[command(author, version, about = "Find host PIDs for processes in Kind cluster", long_about = None)]
pub struct Cli {
    /// Filter for kind node (docker container) names
    pub docker_filter: String,

    /// Optional filter for pod names
    #[arg(default_value = "")]
    pub pod_filter: String,

    /// Output format
    #[arg(long, short, value_enum, default_value_t = output::OutputFormat::Tabular)]
    pub output: output::OutputFormat,

    /// Activate debug logging
    #[arg(long)]
    pub debug: bool,

    /// Log line format on stderr
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Configuration file (toml, yaml or json); KIND_PS_* variables override it
    #[arg(long, env = "KIND_PS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Host procfs mount point
    #[arg(long)]
    pub proc_root: Option<PathBuf>,

    /// Host cgroup v2 mount point
    #[arg(long)]
    pub cgroup_root: Option<PathBuf>,

    /// Timeout for each docker/crictl invocation in seconds
    #[arg(long)]
    pub timeout: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

fn init_tracing(debug: bool, format: LogFormat) {
    let default_level = if debug { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        LogFormat::Text => registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug, cli.log_format);

    let mut pipeline_config = config::load(cli.config.as_deref())?;
    if let Some(proc_root) = cli.proc_root {
        pipeline_config.proc_root = proc_root;
    }
    if let Some(cgroup_root) = cli.cgroup_root {
        pipeline_config.cgroup_root = cgroup_root;
    }
    if let Some(timeout) = cli.timeout {
        pipeline_config.command_timeout_secs = timeout;
    }

    let pipeline = Pipeline::new(&pipeline_config, StructuredLogger::default());
    let groups = pipeline
        .list_processes(&cli.docker_filter, &cli.pod_filter)
        .await
        .with_context(|| {
            format!(
                "Failed to list processes for kind nodes matching {:?}",
                cli.docker_filter
            )
        })?;

    tracing::debug!(groups = groups.len(), format = ?cli.output, "Rendering process groups");
    output::print_groups(&groups, cli.output)
}
