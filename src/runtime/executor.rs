/// Node execution: request preparation and dispatch
///
/// Preparation is synchronous: look up the action definition from the run
/// snapshot, pick a credential, decrypt it transiently and build the request.
/// The decrypted fields are dropped before this returns. Dispatch is the only
/// suspension point of a node.

use crate::runtime::dispatcher::Dispatch;
use crate::runtime::error::BuildError;
use crate::runtime::request::{self, OutboundRequest};
use crate::runtime::vault::CredentialVault;
use crate::workflow::types::{ActionDefinition, Credential, Node};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Everything a run reads from storage, captured once when the run starts
///
/// Later edits to action definitions or credentials never affect a run that is
/// already in flight.
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    /// Trigger payload, the `input` namespace
    pub user_inputs: Map<String, Value>,
    /// Action definitions referenced by the workflow, by id
    pub actions: HashMap<String, ActionDefinition>,
    /// Credentials in scope of each action, by action id
    pub credentials: HashMap<String, Vec<Credential>>,
}

/// Executes single nodes on behalf of the scheduler
pub struct NodeExecutor {
    vault: Arc<CredentialVault>,
    dispatcher: Arc<dyn Dispatch>,
}

impl fmt::Debug for NodeExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeExecutor").finish_non_exhaustive()
    }
}

impl NodeExecutor {
    pub fn new(vault: Arc<CredentialVault>, dispatcher: Arc<dyn Dispatch>) -> Self {
        Self { vault, dispatcher }
    }

    /// Build the outbound request for a node
    ///
    /// `prior_results` must only hold outputs of the node's ancestors.
    pub fn prepare(
        &self,
        node: &Node,
        context: &RunContext,
        prior_results: &Map<String, Value>,
    ) -> Result<OutboundRequest, BuildError> {
        let action = context
            .actions
            .get(&node.action_definition_id)
            .ok_or_else(|| BuildError::ActionNotFound(node.action_definition_id.clone()))?;

        let candidates = context
            .credentials
            .get(&action.id)
            .map(Vec::as_slice)
            .unwrap_or_default();
        let credential = request::select_credential(action, candidates)?;

        let secrets = credential
            .map(|c| {
                tracing::debug!("🔑 Decrypting credential '{}' for node '{}'", c.id, node.id);
                self.vault
                    .decrypt(&c.encrypted_data)
                    .map_err(|source| BuildError::Decryption {
                        credential_id: c.id.clone(),
                        source,
                    })
            })
            .transpose()?;

        request::build(
            action,
            &node.inputs,
            &context.user_inputs,
            prior_results,
            secrets.as_ref(),
        )
    }

    /// Handle to the dispatcher for spawned tasks
    pub fn dispatcher(&self) -> Arc<dyn Dispatch> {
        Arc::clone(&self.dispatcher)
    }
}
