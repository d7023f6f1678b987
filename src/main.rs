//! code-runner daemon
//!
//! HTTP service that runs untrusted snippets inside throwaway Docker
//! containers. Configuration comes from `--config`, `CODE_RUNNER_CONFIG`
//! and `CODE_RUNNER_*` overrides.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use code_runner_daemon::{backend::DockerBackend, config::Config, http};

#[derive(Parser, Debug)]
#[command(name = "code-runner-daemon")]
#[command(about = "HTTP service for sandboxed code execution in Docker containers")]
struct Args {
    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address to listen on (overrides configuration)
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut config = Config::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }
    config.validate().context("Invalid configuration")?;

    info!(
        bind = %config.bind_addr,
        workspace_root = %config.workspace_root.display(),
        timeout_ms = config.timeout_ms,
        memory_mb = config.limits.memory_mb,
        cpu_percent = config.limits.cpu_percent,
        max_concurrent = ?config.max_concurrent_executions,
        "Loaded configuration"
    );

    let backend = DockerBackend::connect().context("Failed to connect to Docker")?;

    // Requests fail individually with a 500 until the daemon comes back.
    match backend.ping().await {
        Ok(()) => info!("Docker is accessible."),
        Err(e) => warn!(error = %format!("{e:#}"), "Docker is not accessible"),
    }

    http::serve(config, backend).await
}
