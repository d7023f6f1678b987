//! Execution engine.
//!
//! Drives one environment through `Created -> Starting -> Running` and then
//! races program exit against the wall-clock timer. Exactly one of
//! `Completed`, `Killed(Timeout)` or `Killed(Error)` is reached, and the
//! environment is removed on every path before `run` returns.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::stream::StreamExt;
use tracing::{debug, error, instrument, warn};

use crate::backend::{EnvironmentSpec, IsolationBackend, OutputChunk, OutputStream};
use crate::config::ResourceLimits;
use crate::error::{ExecError, Result};
use crate::language::LanguageSpec;
use crate::workspace::Workspace;

/// Lifecycle of one execution environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionState {
    Created,
    Starting,
    Running,
    Completed,
    Killed(KillReason),
}

/// Why an environment was torn down before a normal exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillReason {
    Timeout,
    Error,
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => f.write_str("created"),
            Self::Starting => f.write_str("starting"),
            Self::Running => f.write_str("running"),
            Self::Completed => f.write_str("completed"),
            Self::Killed(KillReason::Timeout) => f.write_str("killed(timeout)"),
            Self::Killed(KillReason::Error) => f.write_str("killed(error)"),
        }
    }
}

/// Terminal outcome of a run that did not fail on infrastructure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// Program exited on its own; a non-zero exit code is still a completion.
    Completed {
        stdout: Vec<u8>,
        stderr: Vec<u8>,
        exit_code: i64,
    },
    /// Timer fired first and the environment was killed.
    TimedOut,
}

#[derive(Debug, Default)]
struct Captured {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    truncated: bool,
}

/// Runs workspaces inside isolated environments under fixed bounds.
pub struct ExecutionEngine<B> {
    backend: Arc<B>,
    limits: ResourceLimits,
    timeout: Duration,
    max_output_bytes: usize,
}

impl<B> fmt::Debug for ExecutionEngine<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionEngine")
            .field("limits", &self.limits)
            .field("timeout", &self.timeout)
            .field("max_output_bytes", &self.max_output_bytes)
            .finish_non_exhaustive()
    }
}

impl<B: IsolationBackend> ExecutionEngine<B> {
    pub fn new(
        backend: Arc<B>,
        limits: ResourceLimits,
        timeout: Duration,
        max_output_bytes: usize,
    ) -> Self {
        Self {
            backend,
            limits,
            timeout,
            max_output_bytes,
        }
    }

    /// Run the populated `workspace` with `language`'s image and invocation.
    #[instrument(skip_all, fields(workspace = %workspace.id(), image = %language.image))]
    pub async fn run(&self, workspace: &Workspace, language: &LanguageSpec) -> Result<Termination> {
        let spec = EnvironmentSpec::new(workspace, language, self.limits);

        let id = self
            .backend
            .create(&spec)
            .await
            .map_err(|e| ExecError::infrastructure("provisioning", &e))?;

        let mut state = ExecutionState::Created;
        debug!(container = %id, %state, "Environment provisioned");

        let outcome = self.drive(&id, &mut state).await;
        if outcome.is_err() {
            transition(&id, &mut state, ExecutionState::Killed(KillReason::Error));
        }

        // Teardown runs whatever the outcome, including after a timeout kill.
        if let Err(e) = self.backend.remove(&id).await {
            error!(container = %id, error = %format!("{e:#}"), "Failed to remove environment");
        }

        if let Err(e) = &outcome {
            error!(container = %id, error = %e, "Execution failed");
        }
        outcome
    }

    async fn drive(&self, id: &str, state: &mut ExecutionState) -> Result<Termination> {
        // Attach first so output written right after start is not lost;
        // nothing is read from the stream until the program has started.
        let output = self
            .backend
            .attach(id)
            .await
            .map_err(|e| ExecError::infrastructure("attaching", &e))?;

        transition(id, state, ExecutionState::Starting);
        self.backend
            .start(id)
            .await
            .map_err(|e| ExecError::infrastructure("starting", &e))?;
        let started = Instant::now();
        transition(id, state, ExecutionState::Running);

        let finished = async {
            let (captured, status) =
                tokio::join!(collect(output, self.max_output_bytes), self.backend.wait(id));
            let captured = captured.map_err(|e| ExecError::infrastructure("collecting output", &e))?;
            let exit_code = status.map_err(|e| ExecError::infrastructure("waiting", &e))?;
            Ok::<_, ExecError>((captured, exit_code))
        };

        tokio::select! {
            finished = finished => {
                let (captured, exit_code) = finished?;
                if captured.truncated {
                    warn!(container = %id, limit = self.max_output_bytes, "Output truncated");
                }
                transition(id, state, ExecutionState::Completed);
                debug!(container = %id, exit_code, elapsed = ?started.elapsed(), "Program exited");
                Ok(Termination::Completed {
                    stdout: captured.stdout,
                    stderr: captured.stderr,
                    exit_code,
                })
            }
            () = tokio::time::sleep(self.timeout) => {
                warn!(container = %id, timeout = ?self.timeout, "Execution timed out, killing environment");
                // A failed kill is covered by the forced removal that follows.
                if let Err(e) = self.backend.kill(id).await {
                    warn!(container = %id, error = %format!("{e:#}"), "Kill failed");
                }
                transition(id, state, ExecutionState::Killed(KillReason::Timeout));
                Ok(Termination::TimedOut)
            }
        }
    }
}

fn transition(id: &str, state: &mut ExecutionState, next: ExecutionState) {
    debug!(container = %id, from = %state, to = %next, "Execution state");
    *state = next;
}

/// Read the output stream to its end, keeping at most `limit` bytes per
/// stream. The rest is drained so the program never blocks on a full pipe.
async fn collect(mut output: OutputStream, limit: usize) -> anyhow::Result<Captured> {
    let mut captured = Captured::default();
    while let Some(chunk) = output.next().await {
        let (buf, bytes) = match chunk? {
            OutputChunk::Stdout(bytes) => (&mut captured.stdout, bytes),
            OutputChunk::Stderr(bytes) => (&mut captured.stderr, bytes),
        };
        let room = limit.saturating_sub(buf.len());
        if bytes.len() > room {
            captured.truncated = true;
        }
        buf.extend_from_slice(&bytes[..bytes.len().min(room)]);
    }
    Ok(captured)
}
