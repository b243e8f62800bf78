//! Direct HTTP execution endpoint for the "run custom code" feature.
//! Bypasses the queue and verdict evaluation: one execution against one
//! input, returning the raw result.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::executor::CodeExecutor;

#[derive(Debug, Deserialize)]
pub struct RunRequest {
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub input: String,
}

fn default_language() -> String {
    "cpp".to_string()
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RunResponse {
    pub success: bool,
    pub output: String,
    pub error: String,
}

impl RunResponse {
    fn failure(error: String) -> Self {
        Self {
            success: false,
            output: String::new(),
            error,
        }
    }
}

pub fn router(executor: Arc<dyn CodeExecutor>) -> Router {
    Router::new()
        .route("/api/run", post(run_code))
        .with_state(executor)
}

async fn run_code(
    State(executor): State<Arc<dyn CodeExecutor>>,
    Json(request): Json<RunRequest>,
) -> (StatusCode, Json<RunResponse>) {
    if request.code.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(RunResponse::failure("Code body cannot be empty.".to_string())),
        );
    }

    match executor
        .execute_code(&request.language, &request.code, &request.input)
        .await
    {
        Ok(outcome) => match outcome.status.error_message() {
            Some(error) => (StatusCode::OK, Json(RunResponse::failure(error))),
            None => (
                StatusCode::OK,
                Json(RunResponse {
                    success: true,
                    output: outcome.stdout.replace("\r\n", "\n"),
                    error: String::new(),
                }),
            ),
        },
        Err(e) => (StatusCode::OK, Json(RunResponse::failure(e.to_string()))),
    }
}

/// Serve the run endpoint until the shutdown token fires
pub async fn serve(
    executor: Arc<dyn CodeExecutor>,
    port: u16,
    shutdown: CancellationToken,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("Failed to bind port {}", port))?;

    info!("Run endpoint listening on port {}", port);

    axum::serve(listener, router(executor))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .context("HTTP server error")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_request_defaults() {
        let request: RunRequest = serde_json::from_str(r#"{"code": "x"}"#).unwrap();
        assert_eq!(request.language, "cpp");
        assert_eq!(request.input, "");
    }

    #[test]
    fn test_run_response_wire_shape() {
        let json = serde_json::to_string(&RunResponse::failure("Time Limit Exceeded".into())).unwrap();
        assert_eq!(
            json,
            r#"{"success":false,"output":"","error":"Time Limit Exceeded"}"#
        );
    }
}
