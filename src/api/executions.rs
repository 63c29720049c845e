/// Run triggering and execution inspection endpoints
///
/// Runs are asynchronous: triggering returns a job id immediately and the
/// outcome is read back by job id.

use crate::api::{ApiError, AppState};
use crate::runtime::Execution;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

/// Default number of executions returned by the listing endpoint
pub const DEFAULT_LIST_LIMIT: usize = 50;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<usize>,
}

/// Create run and execution routes
pub fn create_execution_routes() -> Router<AppState> {
    Router::new()
        .route("/api/workflows/{id}/execute", post(execute_workflow))
        .route("/api/workflows/{id}/executions", get(list_executions))
        .route("/api/executions/{job_id}", get(get_execution))
        .route("/api/executions/{job_id}/cancel", post(cancel_execution))
}

/// Trigger a workflow run
///
/// POST /api/workflows/{id}/execute
/// Body: { "triggerData": { ... } } (optional)
/// Returns: 202 { "jobId": "..." }
async fn execute_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: String,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    tracing::info!("📥 Run requested for workflow: {}", id);

    // Parse JSON body manually so an empty body means "no trigger data"
    let trigger = if body.trim().is_empty() {
        Value::Null
    } else {
        let payload: Value = serde_json::from_str(&body).map_err(|e| {
            tracing::warn!("❌ Invalid JSON payload for workflow {}: {}", id, e);
            ApiError::bad_request(format!("invalid JSON body: {e}"))
        })?;
        match payload {
            Value::Object(mut map) => map.remove("triggerData").unwrap_or(Value::Null),
            Value::Null => Value::Null,
            _ => return Err(ApiError::bad_request("request body must be a JSON object")),
        }
    };

    let job_id = state.engine.run_workflow(&id, trigger).await?;

    Ok((StatusCode::ACCEPTED, Json(json!({ "jobId": job_id }))))
}

/// Get a job's execution record
///
/// GET /api/executions/{job_id}
async fn get_execution(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<Execution>, ApiError> {
    match state.engine.get_execution(&job_id).await? {
        Some(execution) => Ok(Json(execution)),
        None => Err(ApiError::not_found(format!("execution not found: {job_id}"))),
    }
}

/// Cancel a running job
///
/// POST /api/executions/{job_id}/cancel
/// Returns: { "cancelled": true|false }
async fn cancel_execution(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if state.engine.get_execution(&job_id).await?.is_none() {
        return Err(ApiError::not_found(format!("execution not found: {job_id}")));
    }
    let cancelled = state.engine.cancel(&job_id).await;
    Ok(Json(json!({ "cancelled": cancelled })))
}

/// List a workflow's executions, newest first
///
/// GET /api/workflows/{id}/executions?limit=N
async fn list_executions(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Value>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT);
    let executions = state.engine.list_executions(&id, limit).await?;
    Ok(Json(json!({ "executions": executions })))
}
