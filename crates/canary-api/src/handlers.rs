//! REST API handlers.
//!
//! Each handler calls into the `CanaryEngine` and wraps the result in the
//! `{success, data, error}` envelope.

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use canary_rollout::{DeploymentRequest, RolloutError, RolloutResult};
use canary_state::RollbackTrigger;
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::ApiState;

const DEFAULT_METRICS_LIMIT: usize = 20;

/// Response wrapper for consistent API format.
#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

fn status_for(err: &RolloutError) -> StatusCode {
    match err {
        RolloutError::InvalidConfig(_) => StatusCode::BAD_REQUEST,
        RolloutError::NotFound(_) => StatusCode::NOT_FOUND,
        RolloutError::Conflict(_) => StatusCode::CONFLICT,
        RolloutError::Traffic(_) => StatusCode::BAD_GATEWAY,
        RolloutError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn respond<T: Serialize>(result: RolloutResult<T>) -> Response {
    respond_with(StatusCode::OK, result)
}

fn respond_with<T: Serialize>(status: StatusCode, result: RolloutResult<T>) -> Response {
    match result {
        Ok(data) => (status, ApiResponse::ok(data)).into_response(),
        Err(e) => {
            let code = status_for(&e);
            if code.is_server_error() {
                error!(error = %e, "request failed");
            }
            error_response(&e.to_string(), code).into_response()
        }
    }
}

// ── Deployments ────────────────────────────────────────────────

/// GET /api/v1/deployments
pub async fn list_deployments(State(state): State<ApiState>) -> Response {
    respond(state.engine.list())
}

/// POST /api/v1/deployments
pub async fn create_deployment(
    State(state): State<ApiState>,
    Json(req): Json<DeploymentRequest>,
) -> Response {
    respond_with(StatusCode::CREATED, state.engine.progression().create(req))
}

/// GET /api/v1/deployments/{id}
pub async fn get_deployment(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    respond(state.engine.get(&id))
}

/// DELETE /api/v1/deployments/{id}
pub async fn delete_deployment(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    respond(state.engine.delete(&id).await.map(|()| "deleted"))
}

/// GET /api/v1/deployments/{id}/steps
pub async fn list_steps(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    respond(state.engine.get(&id).map(|view| view.steps))
}

/// Query for the metrics endpoint.
#[derive(Debug, Deserialize)]
pub struct MetricsQuery {
    pub limit: Option<usize>,
}

/// GET /api/v1/deployments/{id}/metrics?limit=N
pub async fn list_metrics(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Query(query): Query<MetricsQuery>,
) -> Response {
    let limit = query.limit.unwrap_or(DEFAULT_METRICS_LIMIT);
    respond(state.engine.metrics(&id, limit))
}

/// GET /api/v1/deployments/{id}/rollbacks
pub async fn list_rollbacks(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    respond(state.engine.rollback_history(&id))
}

// ── Lifecycle ──────────────────────────────────────────────────

/// POST /api/v1/deployments/{id}/start
pub async fn start_deployment(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    respond(state.engine.progression().start(&id).await)
}

/// POST /api/v1/deployments/{id}/progress
pub async fn progress_deployment(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Response {
    respond(state.engine.progression().progress(&id).await)
}

/// POST /api/v1/deployments/{id}/promote
pub async fn promote_deployment(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Response {
    respond(state.engine.progression().promote(&id).await)
}

/// POST /api/v1/deployments/{id}/pause
pub async fn pause_deployment(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    respond(state.engine.progression().pause(&id).await)
}

/// POST /api/v1/deployments/{id}/resume
pub async fn resume_deployment(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    respond(state.engine.progression().resume(&id).await)
}

/// Body for cancel; may be omitted.
#[derive(Debug, Default, Deserialize)]
pub struct CancelRequest {
    pub reason: Option<String>,
}

/// POST /api/v1/deployments/{id}/cancel
pub async fn cancel_deployment(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Response {
    let req = if body.is_empty() {
        CancelRequest::default()
    } else {
        match serde_json::from_slice::<CancelRequest>(&body) {
            Ok(req) => req,
            Err(e) => {
                return error_response(&format!("invalid cancel body: {e}"), StatusCode::BAD_REQUEST)
                    .into_response();
            }
        }
    };
    respond(
        state
            .engine
            .progression()
            .cancel(&id, req.reason.as_deref())
            .await,
    )
}

// ── Rollbacks ──────────────────────────────────────────────────

/// Manual rollback request body.
#[derive(Debug, Deserialize)]
pub struct RollbackRequest {
    pub reason: String,
    pub initiated_by: Option<String>,
}

/// POST /api/v1/deployments/{id}/rollback
pub async fn initiate_rollback(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(req): Json<RollbackRequest>,
) -> Response {
    let result = state
        .engine
        .rollbacks()
        .initiate(
            &id,
            &req.reason,
            RollbackTrigger::Manual,
            req.initiated_by.as_deref(),
        )
        .await;
    respond_with(StatusCode::CREATED, result)
}

/// GET /api/v1/rollbacks/{id}
pub async fn get_rollback(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    respond(state.engine.rollbacks().get(&id))
}

/// Rollback completion body.
#[derive(Debug, Deserialize)]
pub struct CompleteRollbackRequest {
    pub success: bool,
    pub error_message: Option<String>,
}

/// POST /api/v1/rollbacks/{id}/complete
pub async fn complete_rollback(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(req): Json<CompleteRollbackRequest>,
) -> Response {
    respond(
        state
            .engine
            .rollbacks()
            .complete(&id, req.success, req.error_message.as_deref())
            .await,
    )
}

/// POST /api/v1/rollbacks/{id}/execute
pub async fn execute_rollback(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    respond(state.engine.rollbacks().execute(&id).await)
}
