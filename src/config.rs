//! Daemon configuration.
//!
//! Built-in defaults, optionally replaced by JSON from `--config <file>` or
//! the `CODE_RUNNER_CONFIG` environment variable, then adjusted by individual
//! `CODE_RUNNER_*` overrides. Unset fields keep their defaults.
//!
//! Only the ceilings are configurable. The rest of the isolation boundary
//! (no network, no capabilities, `no-new-privileges`) is fixed in the backend.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::debug;

/// Environment variable holding inline JSON configuration.
pub const CONFIG_ENV: &str = "CODE_RUNNER_CONFIG";

/// Top-level configuration for the daemon.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP listen address.
    pub bind_addr: SocketAddr,

    /// Parent directory for per-request workspaces.
    pub workspace_root: PathBuf,

    /// Wall-clock budget per execution, measured from environment start.
    pub timeout_ms: u64,

    /// Resource ceilings applied to every environment.
    pub limits: ResourceLimits,

    /// Per-stream cap on captured output; the rest is drained and dropped.
    pub max_output_bytes: usize,

    /// Upper bound on simultaneously running environments. `None` admits
    /// every request immediately.
    pub max_concurrent_executions: Option<usize>,

    /// Maximum accepted request body.
    pub max_body_bytes: usize,
}

/// Resource ceilings for one execution environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ResourceLimits {
    /// Memory ceiling in megabytes. Swap is disabled on top of it.
    pub memory_mb: u64,

    /// Share of one CPU, in percent.
    pub cpu_percent: u8,

    /// Maximum number of processes/threads.
    pub pids_limit: i64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            workspace_root: std::env::temp_dir().join("code-runner"),
            timeout_ms: default_timeout_ms(),
            limits: ResourceLimits::default(),
            max_output_bytes: 1024 * 1024,
            max_concurrent_executions: None,
            max_body_bytes: 256 * 1024,
        }
    }
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            memory_mb: 256,
            cpu_percent: 50,
            pids_limit: 64,
        }
    }
}

impl ResourceLimits {
    /// Memory ceiling in bytes.
    pub fn memory_bytes(&self) -> i64 {
        i64::try_from(self.memory_mb.saturating_mul(1024 * 1024)).unwrap_or(i64::MAX)
    }

    /// CFS quota for the given scheduling period (both in microseconds).
    pub fn cpu_quota(&self, period_us: i64) -> i64 {
        period_us * i64::from(self.cpu_percent) / 100
    }
}

impl Config {
    /// Load configuration from an optional file, falling back to the
    /// `CODE_RUNNER_CONFIG` environment variable, then apply env overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::from_env()?,
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Parse inline JSON from `CODE_RUNNER_CONFIG`, or use defaults when unset.
    pub fn from_env() -> Result<Self> {
        match std::env::var(CONFIG_ENV) {
            Ok(json) => Self::from_json(&json).with_context(|| format!("Failed to parse {CONFIG_ENV}")),
            Err(_) => {
                debug!("{CONFIG_ENV} not set, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Read a JSON configuration file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_json(&json).with_context(|| format!("Failed to parse {}", path.display()))
    }

    /// Create a config from a JSON string.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).context("Invalid configuration JSON")?;
        Ok(config)
    }

    /// Apply `CODE_RUNNER_*` overrides from `lookup`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(bind) = lookup("CODE_RUNNER_BIND") {
            self.bind_addr = bind
                .parse()
                .with_context(|| format!("Invalid CODE_RUNNER_BIND: {bind}"))?;
        }
        if let Some(root) = lookup("CODE_RUNNER_WORKSPACE_ROOT") {
            self.workspace_root = PathBuf::from(root);
        }
        if let Some(ms) = lookup("CODE_RUNNER_TIMEOUT_MS") {
            self.timeout_ms = ms
                .parse()
                .with_context(|| format!("Invalid CODE_RUNNER_TIMEOUT_MS: {ms}"))?;
        }
        if let Some(max) = lookup("CODE_RUNNER_MAX_CONCURRENT") {
            let max: usize = max
                .parse()
                .with_context(|| format!("Invalid CODE_RUNNER_MAX_CONCURRENT: {max}"))?;
            // 0 means unbounded
            self.max_concurrent_executions = (max > 0).then_some(max);
        }
        Ok(())
    }

    /// Reject settings that would disable a bound.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.timeout_ms > 0, "timeout_ms must be greater than 0");
        // The root becomes a bind-mount source, which Docker only accepts as an absolute path.
        anyhow::ensure!(
            self.workspace_root.is_absolute(),
            "workspace_root must be an absolute path, got {}",
            self.workspace_root.display()
        );
        anyhow::ensure!(self.limits.memory_mb > 0, "limits.memory_mb must be greater than 0");
        anyhow::ensure!(
            (1..=100).contains(&self.limits.cpu_percent),
            "limits.cpu_percent must be within 1..=100, got {}",
            self.limits.cpu_percent
        );
        anyhow::ensure!(self.limits.pids_limit > 0, "limits.pids_limit must be greater than 0");
        anyhow::ensure!(self.max_output_bytes > 0, "max_output_bytes must be greater than 0");
        anyhow::ensure!(
            self.max_concurrent_executions != Some(0),
            "max_concurrent_executions must be greater than 0 when set"
        );
        Ok(())
    }

    /// Execution timeout as a `Duration`.
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

const fn default_timeout_ms() -> u64 {
    5000
}
