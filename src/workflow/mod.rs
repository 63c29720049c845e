/// Workflow Management Layer
///
/// This module handles workflow definitions and their persistence:
/// - Type definitions (Workflow, Node, Edge, ActionDefinition, Credential)
/// - The `WorkflowStore` seam with SQLite and in-memory implementations

// Core workflow type definitions
pub mod types;

// SQLite persistence layer and the store trait
pub mod storage;

// In-process store for embedding and tests
pub mod memory;

// Re-export commonly used types
pub use memory::MemoryStore;
pub use storage::{SqliteStore, StoreError, WorkflowStore};
pub use types::{
    ActionDefinition, ApiConfig, Credential, CredentialBinding, Edge, FieldType, InputField, Node, Position,
    Workflow,
};
