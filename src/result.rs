//! Response shapes.
//!
//! Every terminal state of an execution maps to exactly one body: a
//! completed run passes its output through, a timeout gets the fixed
//! message with no exit status, and any error becomes `{ "error": ... }`.

use serde::Serialize;

use crate::engine::Termination;
use crate::error::ExecError;

/// Fixed stderr text reported when the wall-clock budget runs out.
pub const TIMEOUT_MESSAGE: &str = "Error: Execution timed out.";

/// Outcome of one execution as returned to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the program never reached an exit (timeout).
    pub exit_code: Option<i64>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub timed_out: bool,
}

impl ExecutionResult {
    /// The response for a run killed by the timer. Partial output is dropped.
    pub fn timed_out() -> Self {
        Self {
            stdout: String::new(),
            stderr: TIMEOUT_MESSAGE.to_string(),
            exit_code: None,
            timed_out: true,
        }
    }
}

impl From<Termination> for ExecutionResult {
    fn from(termination: Termination) -> Self {
        match termination {
            Termination::Completed {
                stdout,
                stderr,
                exit_code,
            } => Self {
                stdout: String::from_utf8_lossy(&stdout).into_owned(),
                stderr: String::from_utf8_lossy(&stderr).into_owned(),
                exit_code: Some(exit_code),
                timed_out: false,
            },
            Termination::TimedOut => Self::timed_out(),
        }
    }
}

/// Error body for validation and infrastructure failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

impl From<&ExecError> for ErrorBody {
    fn from(err: &ExecError) -> Self {
        Self {
            error: err.public_message(),
        }
    }
}
