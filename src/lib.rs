/// Relay: workflow execution engine
///
/// This library runs directed graphs of HTTP-backed action nodes: it resolves
/// templated inputs, orders nodes by dependency, injects decrypted credentials
/// into outbound calls and records per-node and overall outcomes.

// Core configuration and setup
pub mod config;

// Workflow management layer - handles definitions and persistence
pub mod workflow;

// Runtime execution engine - petgraph DAG execution and node orchestration
pub mod runtime;

// HTTP API layer - run triggering, execution inspection and definition upserts
pub mod api;

// Server setup and initialization
pub mod server;

// Re-export commonly used types for external consumers
pub use runtime::{Execution, ExecutionEngine, NodeResult, NodeStatus, RunStatus};
pub use server::start_server;
pub use workflow::{ActionDefinition, Credential, Edge, Node, Workflow};
