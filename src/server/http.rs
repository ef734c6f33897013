//! HTTP surface for the query engine.
//!
//! Three endpoints, matching the frontend's polling contract:
//!
//! - `POST /query` – validate and enqueue a question, return the job id.
//! - `GET /query/{job_id}` – poll a job snapshot.
//! - `GET /health` – readiness of indices and the LLM client.
//!
//! Typed errors map to status codes only here; the core never sees HTTP.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::engine::QueryEngine;
use crate::error::QueryError;
use crate::server::jobs::JobStore;

/// Question length bounds enforced synchronously at submit.
const MIN_QUESTION_CHARS: usize = 3;
/// Upper question length bound.
const MAX_QUESTION_CHARS: usize = 500;

/// Shared state behind the router.
#[derive(Clone)]
pub struct AppState {
    /// Job registry.
    pub jobs: Arc<JobStore>,
    /// The query engine, fully initialized at startup.
    pub engine: Arc<QueryEngine>,
    /// Per-job deadline applied by the worker.
    pub job_deadline: Duration,
}

/// Builds the HTTP router over the shared state.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/query", post(submit_query))
        .route("/query/{job_id}", get(job_status))
        .route("/health", get(health))
        .with_state(state)
}

/// Serves the router until ctrl-c.
///
/// # Errors
///
/// Returns the underlying I/O error if the server fails.
pub async fn serve(listener: tokio::net::TcpListener, state: AppState) -> std::io::Result<()> {
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
}

/// Error adapter: typed core errors to status codes at the boundary.
#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl From<QueryError> for ApiError {
    fn from(error: QueryError) -> Self {
        let status = match &error {
            QueryError::Validation { .. } => StatusCode::BAD_REQUEST,
            QueryError::JobNotFound { .. } => StatusCode::NOT_FOUND,
            QueryError::TooManyJobs { .. } => StatusCode::TOO_MANY_REQUESTS,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: error.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

/// Request body for `POST /query`.
#[derive(Debug, Deserialize)]
struct SubmitRequest {
    /// The natural-language question.
    question: String,
    /// Optional client hint for answer length; accepted for wire
    /// compatibility.
    #[serde(default)]
    max_length: Option<u32>,
}

/// Response body for `POST /query`.
#[derive(Debug, Serialize)]
struct SubmitResponse {
    job_id: String,
    status: &'static str,
    message: &'static str,
}

/// Response body for `GET /query/{job_id}`.
#[derive(Debug, Serialize)]
struct StatusResponse {
    job_id: String,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    answer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    elapsed: f64,
}

async fn submit_query(
    State(state): State<AppState>,
    Json(request): Json<SubmitRequest>,
) -> Result<Json<SubmitResponse>, ApiError> {
    let question = request.question.trim().to_string();
    let chars = question.chars().count();
    if !(MIN_QUESTION_CHARS..=MAX_QUESTION_CHARS).contains(&chars) {
        return Err(QueryError::Validation {
            message: format!(
                "question must be {MIN_QUESTION_CHARS}-{MAX_QUESTION_CHARS} characters, got {chars}"
            ),
        }
        .into());
    }

    debug!(chars, max_length = ?request.max_length, "submit request");
    let job_id = state
        .jobs
        .submit(Arc::clone(&state.engine), question, state.job_deadline)?;

    Ok(Json(SubmitResponse {
        job_id,
        status: "pending",
        message: "question accepted; poll /query/{job_id} for the answer",
    }))
}

async fn job_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<StatusResponse>, ApiError> {
    let record = state
        .jobs
        .status(&job_id)
        .ok_or(QueryError::JobNotFound { job_id })?;

    Ok(Json(StatusResponse {
        job_id: record.job_id.clone(),
        status: record.status.as_str(),
        answer: record.answer.clone(),
        error: record.error.clone(),
        elapsed: record.elapsed_secs(),
    }))
}

async fn health() -> Json<serde_json::Value> {
    // Reaching a running server implies indices loaded and the LLM
    // client initialized; both are hard preconditions of startup.
    Json(json!({ "status": "ok" }))
}
