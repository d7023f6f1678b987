//! Error taxonomy for one execution request.
//!
//! Client faults (missing fields, unsupported language) map to 4xx, host
//! faults (workspace I/O, container runtime) map to 5xx. A program's own
//! non-zero exit or stderr output is not an error at this layer.

use std::path::PathBuf;

use axum::http::StatusCode;
use thiserror::Error;

/// Result alias for the execution pipeline.
pub type Result<T> = std::result::Result<T, ExecError>;

/// Everything that can stop a request from producing an `ExecutionResult`.
#[derive(Error, Debug)]
pub enum ExecError {
    /// Required request field is absent or empty.
    #[error("Language and code are required.")]
    MissingField(&'static str),

    /// Request body could not be understood. `status` is the 4xx the
    /// extractor chose (400 bad JSON, 413 too large, 415 wrong content type).
    #[error("Invalid request: {message}")]
    Validation { status: StatusCode, message: String },

    /// Language identifier has no registry entry.
    #[error("Unsupported language: {0}")]
    UnsupportedLanguage(String),

    /// Scratch directory could not be allocated.
    #[error("Failed to create workspace {}: {source}", path.display())]
    WorkspaceCreation {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Source or stdin could not be written into the workspace.
    #[error("Failed to write {}: {source}", path.display())]
    WorkspaceWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Container could not be provisioned, started, attached to or awaited.
    #[error("Execution environment failed while {stage}: {message}")]
    Infrastructure { stage: &'static str, message: String },
}

impl ExecError {
    /// Wrap a runtime failure, keeping the full context chain in the message.
    pub fn infrastructure(stage: &'static str, err: &anyhow::Error) -> Self {
        Self::Infrastructure {
            stage,
            message: format!("{err:#}"),
        }
    }

    /// HTTP status for this error.
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::MissingField(_) | Self::UnsupportedLanguage(_) => StatusCode::BAD_REQUEST,
            Self::Validation { status, .. } => *status,
            Self::WorkspaceCreation { .. }
            | Self::WorkspaceWrite { .. }
            | Self::Infrastructure { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to return to the caller.
    ///
    /// Host faults collapse to one generic message so paths and daemon
    /// errors never leave the process.
    pub fn public_message(&self) -> String {
        match self {
            Self::MissingField(_) | Self::Validation { .. } => self.to_string(),
            Self::UnsupportedLanguage(_) => "Unsupported language.".to_string(),
            Self::WorkspaceCreation { .. }
            | Self::WorkspaceWrite { .. }
            | Self::Infrastructure { .. } => "Execution error.".to_string(),
        }
    }

    /// Whether the fault lies with the caller.
    pub fn is_client_error(&self) -> bool {
        self.status().is_client_error()
    }
}
