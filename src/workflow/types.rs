/// Core workflow type definitions
///
/// Defines workflows, nodes, edges, action definitions and credentials as the
/// engine reads them from storage. All types are plain data: JSON in, JSON out.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// A complete workflow definition containing nodes and their connections
///
/// Workflows are stored as JSON and compiled into petgraph DAGs for every run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    /// Unique workflow identifier (e.g., "wf-onboarding")
    pub id: String,
    /// Human-readable workflow name
    #[serde(default)]
    pub name: String,
    /// Nodes in this workflow; order carries no meaning
    #[serde(default)]
    pub nodes: Vec<Node>,
    /// Edges connecting nodes
    #[serde(default)]
    pub edges: Vec<Edge>,
    /// Inactive workflows refuse new runs
    #[serde(default = "default_active")]
    pub active: bool,
    /// Number of runs started for this workflow
    #[serde(default)]
    pub execution_count: u64,
}

fn default_active() -> bool {
    true
}

impl Workflow {
    /// Look up a node by id
    pub fn node(&self, node_id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == node_id)
    }
}

/// A single configured step in the workflow DAG
///
/// Instantiates an action definition with concrete input values. Input values
/// may themselves contain `{{...}}` placeholders.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    /// Unique node identifier within the workflow (e.g., "n1", "send-slack")
    pub id: String,
    /// Action definition this node instantiates
    pub action_definition_id: String,
    /// Field key -> raw value
    #[serde(default)]
    pub inputs: Map<String, Value>,
    /// Editor position; ignored by the engine
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
}

/// Canvas coordinates of a node
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// Connection between two nodes in the workflow DAG
///
/// Edges define dependency and data-flow direction. Multiple identical edges are
/// allowed; an edge from a node to itself is rejected during validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    /// Source node ID
    pub source: String,
    /// Target node ID
    pub target: String,
}

/// Reusable template describing how a node type builds and sends its outbound call
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub category: String,
    /// Ordered input field descriptors
    #[serde(default)]
    pub input_schema: Vec<InputField>,
    pub api_config: ApiConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logo: Option<String>,
}

/// One typed field of an action's input form
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputField {
    pub key: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

/// Supported input field types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Text,
    Textarea,
    Number,
    Boolean,
    Select,
    Multiselect,
}

/// Outbound HTTP call template of an action definition
///
/// `method` and `url` are optional in storage so that a half-configured action
/// fails the node that uses it at build time instead of failing to load.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiConfig {
    #[serde(default)]
    pub method: Option<String>,
    /// URL template, e.g. "https://api.example.com/users/{{input.userId}}"
    #[serde(default)]
    pub url: Option<String>,
    /// Header name -> value template
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Body template; an empty object forwards the merged inputs as-is
    #[serde(default)]
    pub body: Value,
    /// Credential requirement and header mapping
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<CredentialBinding>,
    /// Treat non-2xx responses as node failures
    #[serde(default)]
    pub fail_on_error_status: bool,
}

/// How a credential is attached to an action's requests
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialBinding {
    /// A missing or inactive credential fails the node when set
    #[serde(default)]
    pub required: bool,
    /// Only credentials of this type qualify
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub credential_type: Option<String>,
    /// Decrypted field key -> header name. Empty means field keys are header names.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

/// Encrypted secret scoped to a set of action definitions or categories
///
/// Credentials are never hard-deleted; `is_active = false` retires them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    pub id: String,
    #[serde(rename = "type")]
    pub credential_type: String,
    /// `<ivHex>:<ciphertextHex>`
    pub encrypted_data: String,
    /// Action definition ids or categories this credential is scoped to
    #[serde(default)]
    pub node_types: Vec<String>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

impl Credential {
    /// Whether this credential is scoped to the given action, by id or category
    pub fn applies_to(&self, action: &ActionDefinition) -> bool {
        self.node_types
            .iter()
            .any(|t| t == &action.id || (!action.category.is_empty() && t == &action.category))
    }
}
