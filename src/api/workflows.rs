/// Definition management REST API endpoints
///
/// Thin upserts for workflows and action definitions, plus credential intake.
/// Credential payloads are encrypted before they reach storage and are never
/// echoed back.

use crate::api::{ApiError, AppState};
use crate::workflow::types::{ActionDefinition, Credential, Workflow};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{delete, post, put},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Credential types accepted on intake
pub const CREDENTIAL_TYPES: [&str; 4] = ["api_key", "oauth2", "basic_auth", "custom"];

/// Response for create/update operations
#[derive(Debug, Serialize)]
pub struct UpsertResponse {
    pub id: String,
    pub message: String,
}

/// Request body for workflow upserts
#[derive(Debug, Deserialize)]
pub struct UpsertWorkflowRequest {
    pub workflow: Workflow,
}

/// Request body for action definition upserts
#[derive(Debug, Deserialize)]
pub struct UpsertActionRequest {
    pub action: ActionDefinition,
}

/// Request body for credential creation
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCredentialRequest {
    pub id: String,
    #[serde(rename = "type")]
    pub credential_type: String,
    /// Plain fields; encrypted before storage
    pub data: Map<String, Value>,
    #[serde(default)]
    pub node_types: Vec<String>,
}

/// Create definition management routes
pub fn create_workflow_routes() -> Router<AppState> {
    Router::new()
        .route("/api/workflows/{id}", put(upsert_workflow))
        .route("/api/actions/{id}", put(upsert_action))
        .route("/api/credentials", post(create_credential))
        .route("/api/credentials/{id}", delete(deactivate_credential))
}

/// Create or replace a workflow
///
/// PUT /api/workflows/{id}
/// Body: { "workflow": { "id": "...", "nodes": [...], "edges": [...], "active": true } }
async fn upsert_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<UpsertWorkflowRequest>,
) -> Result<Json<UpsertResponse>, ApiError> {
    let mut workflow = payload.workflow;

    // Ensure the workflow ID matches the URL parameter
    workflow.id = id;

    state.store.save_workflow(&workflow).await?;
    tracing::info!("💾 Saved workflow: {} ({} nodes)", workflow.id, workflow.nodes.len());

    Ok(Json(UpsertResponse {
        message: format!("Workflow '{}' saved", workflow.id),
        id: workflow.id,
    }))
}

/// Create or replace an action definition
///
/// PUT /api/actions/{id}
/// Body: { "action": { "id": "...", "name": "...", "apiConfig": { ... } } }
async fn upsert_action(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<UpsertActionRequest>,
) -> Result<Json<UpsertResponse>, ApiError> {
    let mut action = payload.action;
    action.id = id;

    state.store.save_action(&action).await?;
    tracing::info!("💾 Saved action definition: {}", action.id);

    Ok(Json(UpsertResponse {
        message: format!("Action definition '{}' saved", action.id),
        id: action.id,
    }))
}

/// Store a new credential, encrypting its payload
///
/// POST /api/credentials
/// Body: { "id": "...", "type": "api_key", "data": { ... }, "nodeTypes": [...] }
async fn create_credential(
    State(state): State<AppState>,
    Json(payload): Json<CreateCredentialRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    if payload.id.trim().is_empty() {
        return Err(ApiError::bad_request("credential id must not be empty"));
    }
    if !CREDENTIAL_TYPES.contains(&payload.credential_type.as_str()) {
        return Err(ApiError::bad_request(format!(
            "unsupported credential type '{}'",
            payload.credential_type
        )));
    }

    let encrypted_data = state.vault.encrypt(&payload.data).map_err(|e| {
        tracing::error!("Failed to encrypt credential {}: {}", payload.id, e);
        ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "failed to encrypt credential")
    })?;

    let credential = Credential {
        id: payload.id,
        credential_type: payload.credential_type,
        encrypted_data,
        node_types: payload.node_types,
        is_active: true,
    };
    state.store.save_credential(&credential).await?;
    tracing::info!("🔐 Stored credential: {} ({})", credential.id, credential.credential_type);

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "id": credential.id,
            "type": credential.credential_type,
            "nodeTypes": credential.node_types,
            "isActive": credential.is_active,
        })),
    ))
}

/// Soft-delete a credential
///
/// DELETE /api/credentials/{id}
async fn deactivate_credential(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if !state.store.deactivate_credential(&id).await? {
        return Err(ApiError::not_found(format!("credential not found: {id}")));
    }
    tracing::info!("🗑️ Deactivated credential: {}", id);
    Ok(Json(json!({ "id": id, "isActive": false })))
}
