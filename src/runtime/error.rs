/// Error taxonomy of the execution engine
///
/// - [`GraphError`] fails a whole run before anything is dispatched
/// - [`BuildError`] and [`DispatchError`] fail a single node
/// - [`EngineError`] is returned to callers of the engine's entry points

use crate::runtime::vault::VaultError;
use crate::workflow::storage::StoreError;
use thiserror::Error;

/// Structural problems with a workflow's node/edge graph
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("duplicate node id: {0}")]
    DuplicateNode(String),

    #[error("edge {from} -> {to} references unknown node '{missing}'")]
    DanglingEdge {
        from: String,
        to: String,
        missing: String,
    },

    #[error("self-edge on node '{0}'")]
    SelfEdge(String),

    #[error("workflow graph contains a cycle through node '{0}'")]
    Cycle(String),
}

/// Failures while turning a node into a concrete outbound request
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error("action definition '{0}' not found")]
    ActionNotFound(String),

    #[error("action definition '{0}' has no HTTP method configured")]
    MissingMethod(String),

    #[error("invalid HTTP method '{0}'")]
    InvalidMethod(String),

    #[error("action definition '{0}' has no URL configured")]
    MissingUrl(String),

    #[error("resolved URL '{url}' is invalid: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("invalid header '{0}'")]
    InvalidHeader(String),

    #[error("required input '{0}' is missing")]
    MissingInput(String),

    #[error("action '{0}' requires a credential but none is configured")]
    CredentialMissing(String),

    #[error("credential '{0}' is inactive")]
    CredentialInactive(String),

    #[error("credential '{credential_id}' could not be decrypted: {source}")]
    Decryption {
        credential_id: String,
        #[source]
        source: VaultError,
    },
}

/// Transport-level failures of an outbound call
///
/// A non-2xx response is not a dispatch error; it is returned as node output.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("request timed out after {0} ms")]
    Timeout(u64),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request failed: {0}")]
    Transport(String),

    #[error("upstream responded with status {0}")]
    ErrorStatus(u16),
}

/// Errors returned by the engine's public entry points
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("workflow not found: {0}")]
    WorkflowNotFound(String),

    #[error("workflow is inactive: {0}")]
    WorkflowInactive(String),

    #[error("trigger payload must be a JSON object")]
    InvalidPayload,

    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}
