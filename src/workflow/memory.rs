/// In-process store over `tokio::sync::RwLock` maps
///
/// Used when embedding the engine without a database, and by tests. Execution
/// persistence can be switched off to exercise the persistence-failure path.

use crate::runtime::recorder::Execution;
use crate::workflow::storage::{StoreError, WorkflowStore};
use crate::workflow::types::{ActionDefinition, Credential, Workflow};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

#[derive(Debug, Default)]
pub struct MemoryStore {
    workflows: RwLock<HashMap<String, Workflow>>,
    actions: RwLock<HashMap<String, ActionDefinition>>,
    credentials: RwLock<BTreeMap<String, Credential>>,
    executions: RwLock<Vec<Execution>>,
    fail_persistence: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `save_execution` fail (or succeed again)
    pub fn fail_persistence(&self, fail: bool) {
        self.fail_persistence.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl WorkflowStore for MemoryStore {
    async fn get_workflow(&self, id: &str) -> Result<Option<Workflow>, StoreError> {
        Ok(self.workflows.read().await.get(id).cloned())
    }

    async fn save_workflow(&self, workflow: &Workflow) -> Result<(), StoreError> {
        let mut workflows = self.workflows.write().await;
        let mut workflow = workflow.clone();
        if let Some(existing) = workflows.get(&workflow.id) {
            workflow.execution_count = existing.execution_count;
        }
        workflows.insert(workflow.id.clone(), workflow);
        Ok(())
    }

    async fn get_action(&self, id: &str) -> Result<Option<ActionDefinition>, StoreError> {
        Ok(self.actions.read().await.get(id).cloned())
    }

    async fn save_action(&self, action: &ActionDefinition) -> Result<(), StoreError> {
        self.actions
            .write()
            .await
            .insert(action.id.clone(), action.clone());
        Ok(())
    }

    async fn credentials_for(&self, action: &ActionDefinition) -> Result<Vec<Credential>, StoreError> {
        Ok(self
            .credentials
            .read()
            .await
            .values()
            .filter(|c| c.applies_to(action))
            .cloned()
            .collect())
    }

    async fn save_credential(&self, credential: &Credential) -> Result<(), StoreError> {
        self.credentials
            .write()
            .await
            .insert(credential.id.clone(), credential.clone());
        Ok(())
    }

    async fn deactivate_credential(&self, id: &str) -> Result<bool, StoreError> {
        match self.credentials.write().await.get_mut(id) {
            Some(credential) => {
                credential.is_active = false;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn increment_execution_count(&self, workflow_id: &str) -> Result<u64, StoreError> {
        let mut workflows = self.workflows.write().await;
        let workflow = workflows
            .get_mut(workflow_id)
            .ok_or_else(|| StoreError::WorkflowNotFound(workflow_id.to_string()))?;
        workflow.execution_count += 1;
        Ok(workflow.execution_count)
    }

    async fn save_execution(&self, execution: &Execution) -> Result<(), StoreError> {
        if self.fail_persistence.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("execution persistence disabled".to_string()));
        }
        let mut executions = self.executions.write().await;
        match executions.iter_mut().find(|e| e.job_id == execution.job_id) {
            Some(existing) => *existing = execution.clone(),
            None => executions.push(execution.clone()),
        }
        Ok(())
    }

    async fn get_execution(&self, job_id: &str) -> Result<Option<Execution>, StoreError> {
        Ok(self
            .executions
            .read()
            .await
            .iter()
            .find(|e| e.job_id == job_id)
            .cloned())
    }

    async fn list_executions(&self, workflow_id: &str, limit: usize) -> Result<Vec<Execution>, StoreError> {
        let mut executions: Vec<Execution> = self
            .executions
            .read()
            .await
            .iter()
            .rev()
            .filter(|e| e.workflow_id == workflow_id)
            .cloned()
            .collect();
        // stable sort keeps insertion order (newest first) for equal timestamps
        executions.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        executions.truncate(limit);
        Ok(executions)
    }
}
