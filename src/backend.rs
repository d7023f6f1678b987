//! Isolation backend trait and implementations.
//!
//! A backend exposes the lifecycle primitives of one execution environment
//! (create, attach, start, wait, kill, remove). Sequencing, the timeout race
//! and teardown live in [`crate::engine`], so every backend gets the same
//! failure semantics.

mod docker;
#[cfg(test)]
pub(crate) mod fake;

pub use docker::DockerBackend;

use std::path::PathBuf;

use anyhow::Result;
use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::config::ResourceLimits;
use crate::language::{LanguageSpec, CONTAINER_WORKDIR};
use crate::workspace::Workspace;

/// One chunk of program output, tagged with the stream it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputChunk {
    Stdout(Vec<u8>),
    Stderr(Vec<u8>),
}

/// Live output of a started environment. Ends when the program exits.
pub type OutputStream = BoxStream<'static, Result<OutputChunk>>;

/// Everything needed to provision one environment.
#[derive(Debug, Clone)]
pub struct EnvironmentSpec {
    /// Environment name, derived from the workspace id.
    pub name: String,
    pub image: String,
    pub command: Vec<String>,
    /// Host directory mounted read/write as the working directory.
    pub host_dir: PathBuf,
    pub workdir: &'static str,
    pub limits: ResourceLimits,
}

impl EnvironmentSpec {
    pub fn new(workspace: &Workspace, language: &LanguageSpec, limits: ResourceLimits) -> Self {
        Self {
            name: format!("code-runner-{}", workspace.id()),
            image: language.image.to_string(),
            command: language.command(),
            host_dir: workspace.path().to_path_buf(),
            workdir: CONTAINER_WORKDIR,
            limits,
        }
    }
}

/// Trait for isolation backends.
///
/// Implementations must apply the full isolation boundary on `create`:
/// no network, all capabilities dropped, and the memory, CPU and pids
/// ceilings from [`EnvironmentSpec::limits`].
#[async_trait]
pub trait IsolationBackend: Send + Sync {
    /// Provision a stopped environment and return its identifier.
    async fn create(&self, spec: &EnvironmentSpec) -> Result<String>;

    /// Attach to stdout/stderr. Called before `start` so no output is lost.
    async fn attach(&self, id: &str) -> Result<OutputStream>;

    /// Start the program.
    async fn start(&self, id: &str) -> Result<()>;

    /// Wait for the program to exit and return its exit status.
    async fn wait(&self, id: &str) -> Result<i64>;

    /// Forcibly terminate without a grace period.
    async fn kill(&self, id: &str) -> Result<()>;

    /// Remove the environment. Removing one that is already gone succeeds.
    async fn remove(&self, id: &str) -> Result<()>;
}
