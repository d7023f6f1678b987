//! HTTP server implementation using axum.
//!
//! Exposes the execution service as a JSON endpoint:
//! `POST /api/execution/execute` (alias `POST /execute`) with
//! `{ language, code, stdin }`, answering `{ stdout, stderr, exitCode }` or
//! `{ error }`.

use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, MethodRouter};
use axum::{Json, Router};
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::backend::IsolationBackend;
use crate::config::Config;
use crate::error::ExecError;
use crate::result::{ErrorBody, ExecutionResult};
use crate::service::{ExecuteRequest, ExecutionService};

/// Primary execute route.
pub const EXECUTE_PATH: &str = "/api/execution/execute";

impl IntoResponse for ExecError {
    fn into_response(self) -> Response {
        (self.status(), Json(ErrorBody::from(&self))).into_response()
    }
}

/// Build the application router.
pub fn router<B: IsolationBackend + 'static>(
    service: ExecutionService<B>,
    max_body_bytes: usize,
) -> Router {
    Router::new()
        .route(EXECUTE_PATH, execute_route::<B>())
        .route("/execute", execute_route::<B>())
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}

fn execute_route<B: IsolationBackend + 'static>() -> MethodRouter<ExecutionService<B>> {
    post(execute::<B>).fallback(method_not_allowed)
}

async fn execute<B: IsolationBackend + 'static>(
    State(service): State<ExecutionService<B>>,
    payload: Result<Json<ExecuteRequest>, JsonRejection>,
) -> Result<Json<ExecutionResult>, ExecError> {
    let Json(request) = payload.map_err(|rejection| {
        warn!(status = %rejection.status(), error = %rejection.body_text(), "Rejected request body");
        ExecError::Validation {
            status: rejection.status(),
            message: rejection.body_text(),
        }
    })?;

    match service.execute(request).await {
        Ok(result) => Ok(Json(result)),
        Err(e) if e.is_client_error() => {
            warn!(error = %e, "Invalid execution request");
            Err(e)
        }
        Err(e) => {
            error!(error = %e, "Execution failed");
            Err(e)
        }
    }
}

async fn method_not_allowed() -> impl IntoResponse {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        Json(json!({ "error": "Method not allowed" })),
    )
}

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Serve the execution service over HTTP until Ctrl-C.
pub async fn serve<B: IsolationBackend + 'static>(config: Config, backend: B) -> anyhow::Result<()> {
    let service = ExecutionService::new(&config, backend);
    let app = router(service, config.max_body_bytes);

    let listener = TcpListener::bind(config.bind_addr)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind {}: {e}", config.bind_addr))?;

    info!(addr = %config.bind_addr, "Starting HTTP server");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| anyhow::anyhow!("HTTP server error: {e}"))?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}
