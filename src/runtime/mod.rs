/// Runtime Execution Engine
///
/// This module provides the petgraph-based DAG execution engine for workflows.
/// It handles:
/// - Template resolution of `{{input.*}}` and `{{$json.*}}` placeholders
/// - Credential encryption at rest and transient decryption
/// - Request building and single-attempt HTTP dispatch
/// - Dependency-ordered, bounded-parallel node scheduling
/// - Per-run execution records

// Placeholder resolution
pub mod template;

// AES-256-CBC credential vault
pub mod vault;

// Error taxonomy
pub mod error;

// Workflow DAG construction and validation
pub mod graph;

// Outbound request composition
pub mod request;

// HTTP dispatch
pub mod dispatcher;

// Per-node preparation and dispatch
pub mod executor;

// Execution records and run finalization
pub mod recorder;

// Core execution engine using petgraph for DAG processing
pub mod engine;

// Re-export main types
pub use dispatcher::{Dispatch, HttpDispatcher};
pub use engine::ExecutionEngine;
pub use error::{BuildError, DispatchError, EngineError, GraphError};
pub use executor::{NodeExecutor, RunContext};
pub use recorder::{Execution, NodeResult, NodeStatus, RunStatus};
pub use vault::{CredentialVault, VaultError, VaultKey};
