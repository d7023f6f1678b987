//! Request gateway.
//!
//! Validates an execute request, then owns the workspace and environment
//! for the request's whole lifetime: create, populate, run, assemble,
//! destroy. Validation happens before any side effect, so a rejected
//! request never touches the filesystem or the container runtime.
//!
//! The lifecycle runs on its own task. If the caller goes away mid-run the
//! task still reaches teardown instead of being dropped at an await point.

use std::fmt;
use std::sync::Arc;

use serde::Deserialize;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, instrument};

use crate::backend::IsolationBackend;
use crate::config::Config;
use crate::engine::ExecutionEngine;
use crate::error::{ExecError, Result};
use crate::language::{Language, LanguageSpec};
use crate::result::ExecutionResult;
use crate::workspace::WorkspaceManager;

/// Inbound payload, as sent by the editor.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExecuteRequest {
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub stdin: Option<String>,
}

/// A request that passed validation.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub language: &'static LanguageSpec,
    pub source_code: String,
    pub stdin: String,
}

impl ExecuteRequest {
    /// Check required fields and resolve the language.
    pub fn validate(self) -> Result<ExecutionRequest> {
        let language = self
            .language
            .filter(|l| !l.trim().is_empty())
            .ok_or(ExecError::MissingField("language"))?;
        let source_code = self
            .code
            .filter(|c| !c.is_empty())
            .ok_or(ExecError::MissingField("code"))?;

        Ok(ExecutionRequest {
            language: Language::lookup(&language)?,
            source_code,
            stdin: self.stdin.unwrap_or_default(),
        })
    }
}

/// Front door for executions; cheap to clone.
pub struct ExecutionService<B> {
    engine: Arc<ExecutionEngine<B>>,
    workspaces: WorkspaceManager,
    admission: Option<Arc<Semaphore>>,
}

impl<B> Clone for ExecutionService<B> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
            workspaces: self.workspaces.clone(),
            admission: self.admission.clone(),
        }
    }
}

impl<B> fmt::Debug for ExecutionService<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionService")
            .field("engine", &self.engine)
            .field("workspaces", &self.workspaces)
            .field("admission", &self.admission.as_ref().map(|s| s.available_permits()))
            .finish()
    }
}

impl<B: IsolationBackend + 'static> ExecutionService<B> {
    /// Create a new execution service.
    pub fn new(config: &Config, backend: B) -> Self {
        let engine = ExecutionEngine::new(
            Arc::new(backend),
            config.limits,
            config.timeout(),
            config.max_output_bytes,
        );
        Self {
            engine: Arc::new(engine),
            workspaces: WorkspaceManager::new(&config.workspace_root),
            admission: config
                .max_concurrent_executions
                .map(|n| Arc::new(Semaphore::new(n))),
        }
    }

    /// Validate and run one request to completion.
    pub async fn execute(&self, request: ExecuteRequest) -> Result<ExecutionResult> {
        let request = request.validate()?;

        info!(
            language = %request.language.language,
            code_len = request.source_code.len(),
            stdin_len = request.stdin.len(),
            "Executing code"
        );

        let service = self.clone();
        let result = tokio::spawn(async move { service.run_to_completion(request).await })
            .await
            .map_err(|e| {
                error!(error = %e, "Execution task aborted");
                ExecError::Infrastructure {
                    stage: "joining",
                    message: e.to_string(),
                }
            })??;

        debug!(exit_code = ?result.exit_code, timed_out = result.timed_out, "Execution finished");
        Ok(result)
    }

    #[instrument(skip_all, fields(language = %request.language.language))]
    async fn run_to_completion(&self, request: ExecutionRequest) -> Result<ExecutionResult> {
        let _permit = match &self.admission {
            Some(semaphore) => Some(Arc::clone(semaphore).acquire_owned().await.map_err(|e| {
                ExecError::Infrastructure {
                    stage: "admitting",
                    message: e.to_string(),
                }
            })?),
            None => None,
        };

        let mut workspace = self.workspaces.create().await?;

        // Destroy runs on every path below, success or failure.
        let outcome = match self
            .workspaces
            .populate(
                &mut workspace,
                request.language.source_file,
                &request.source_code,
                &request.stdin,
            )
            .await
        {
            Ok(()) => self.engine.run(&workspace, request.language).await,
            Err(e) => Err(e),
        };
        self.workspaces.destroy(workspace).await;

        outcome.map(ExecutionResult::from)
    }
}
