/// HTTP API Layer
///
/// This module provides the REST API endpoints for the execution engine:
/// - Run triggering, job inspection, cancellation and execution listing
/// - Upserts of workflows and action definitions
/// - Credential creation (encrypted at rest) and soft deletion

use crate::runtime::{CredentialVault, EngineError, ExecutionEngine};
use crate::workflow::{StoreError, WorkflowStore};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use std::sync::Arc;

// Run triggering and execution inspection endpoints
pub mod executions;

// Workflow, action definition and credential endpoints
pub mod workflows;

// Re-export router builders
pub use executions::create_execution_routes;
pub use workflows::create_workflow_routes;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    /// Execution engine for running workflows
    pub engine: ExecutionEngine,
    /// Persistence for definitions and credentials
    pub store: Arc<dyn WorkflowStore>,
    /// Vault used to encrypt incoming credential payloads
    pub vault: Arc<CredentialVault>,
}

/// Error response: a status code plus a JSON `{ "error": ... }` body
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        let status = match &err {
            EngineError::WorkflowNotFound(_) => StatusCode::NOT_FOUND,
            EngineError::WorkflowInactive(_) => StatusCode::CONFLICT,
            EngineError::InvalidPayload => StatusCode::BAD_REQUEST,
            EngineError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.to_string())
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        tracing::error!("Storage error: {}", err);
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}
