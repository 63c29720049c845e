/// SQLite persistence layer for workflows, action definitions, credentials and executions
///
/// Entities are stored as JSON for flexibility, next to the columns the engine
/// queries on. The [`WorkflowStore`] trait is the seam the engine depends on;
/// [`SqliteStore`] is the production implementation.

use crate::runtime::recorder::Execution;
use crate::workflow::types::{ActionDefinition, Credential, Workflow};
use async_trait::async_trait;
use chrono::SecondsFormat;
use sqlx::{sqlite::SqlitePool, Row};
use thiserror::Error;

/// Errors raised by a storage backend
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("workflow not found: {0}")]
    WorkflowNotFound(String),

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Lookups and writes the execution engine needs from persistence
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    async fn get_workflow(&self, id: &str) -> Result<Option<Workflow>, StoreError>;

    /// Create or replace a workflow definition; the stored execution count is kept
    async fn save_workflow(&self, workflow: &Workflow) -> Result<(), StoreError>;

    async fn get_action(&self, id: &str) -> Result<Option<ActionDefinition>, StoreError>;

    async fn save_action(&self, action: &ActionDefinition) -> Result<(), StoreError>;

    /// Credentials (active or not) scoped to an action by id or category
    async fn credentials_for(&self, action: &ActionDefinition) -> Result<Vec<Credential>, StoreError>;

    async fn save_credential(&self, credential: &Credential) -> Result<(), StoreError>;

    /// Soft delete; returns false when the credential does not exist
    async fn deactivate_credential(&self, id: &str) -> Result<bool, StoreError>;

    /// Bump `executionCount` and return the new value
    async fn increment_execution_count(&self, workflow_id: &str) -> Result<u64, StoreError>;

    async fn save_execution(&self, execution: &Execution) -> Result<(), StoreError>;

    async fn get_execution(&self, job_id: &str) -> Result<Option<Execution>, StoreError>;

    /// Executions of a workflow, newest first
    async fn list_executions(&self, workflow_id: &str, limit: usize) -> Result<Vec<Execution>, StoreError>;
}

/// SQLite-backed store
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Initialize the schema
    ///
    /// Safe to call multiple times (uses IF NOT EXISTS).
    pub async fn init_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS workflows (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                definition JSON NOT NULL,
                execution_count INTEGER NOT NULL DEFAULT 0,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS action_definitions (
                id TEXT PRIMARY KEY,
                category TEXT NOT NULL,
                definition JSON NOT NULL,
                updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS credentials (
                id TEXT PRIMARY KEY,
                credential_type TEXT NOT NULL,
                encrypted_data TEXT NOT NULL,
                node_types JSON NOT NULL,
                is_active BOOLEAN NOT NULL DEFAULT 1,
                updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS executions (
                job_id TEXT PRIMARY KEY,
                workflow_id TEXT NOT NULL,
                status TEXT NOT NULL,
                started_at TEXT NOT NULL,
                record JSON NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Listing executions per workflow, newest first
        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_executions_workflow
            ON executions(workflow_id, started_at)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl WorkflowStore for SqliteStore {
    async fn get_workflow(&self, id: &str) -> Result<Option<Workflow>, StoreError> {
        let row = sqlx::query("SELECT definition, execution_count FROM workflows WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let definition_json: String = row.get("definition");
                let mut workflow: Workflow = serde_json::from_str(&definition_json)?;
                let count: i64 = row.get("execution_count");
                workflow.execution_count = count.max(0) as u64;
                Ok(Some(workflow))
            }
            None => Ok(None),
        }
    }

    async fn save_workflow(&self, workflow: &Workflow) -> Result<(), StoreError> {
        let definition_json = serde_json::to_string(workflow)?;

        sqlx::query(
            r#"
            INSERT INTO workflows (id, name, definition, execution_count, updated_at)
            VALUES (?, ?, ?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                definition = excluded.definition,
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(&workflow.id)
        .bind(&workflow.name)
        .bind(&definition_json)
        .bind(workflow.execution_count as i64)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_action(&self, id: &str) -> Result<Option<ActionDefinition>, StoreError> {
        let row = sqlx::query("SELECT definition FROM action_definitions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| {
            let definition_json: String = row.get("definition");
            serde_json::from_str(&definition_json).map_err(StoreError::from)
        })
        .transpose()
    }

    async fn save_action(&self, action: &ActionDefinition) -> Result<(), StoreError> {
        let definition_json = serde_json::to_string(action)?;

        sqlx::query(
            r#"
            INSERT INTO action_definitions (id, category, definition, updated_at)
            VALUES (?, ?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT(id) DO UPDATE SET
                category = excluded.category,
                definition = excluded.definition,
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(&action.id)
        .bind(&action.category)
        .bind(&definition_json)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn credentials_for(&self, action: &ActionDefinition) -> Result<Vec<Credential>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, credential_type, encrypted_data, node_types, is_active FROM credentials ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut credentials = Vec::new();
        for row in rows {
            let node_types_json: String = row.get("node_types");
            let credential = Credential {
                id: row.get("id"),
                credential_type: row.get("credential_type"),
                encrypted_data: row.get("encrypted_data"),
                node_types: serde_json::from_str(&node_types_json)?,
                is_active: row.get("is_active"),
            };
            if credential.applies_to(action) {
                credentials.push(credential);
            }
        }

        Ok(credentials)
    }

    async fn save_credential(&self, credential: &Credential) -> Result<(), StoreError> {
        let node_types_json = serde_json::to_string(&credential.node_types)?;

        sqlx::query(
            r#"
            INSERT INTO credentials (id, credential_type, encrypted_data, node_types, is_active, updated_at)
            VALUES (?, ?, ?, ?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT(id) DO UPDATE SET
                credential_type = excluded.credential_type,
                encrypted_data = excluded.encrypted_data,
                node_types = excluded.node_types,
                is_active = excluded.is_active,
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(&credential.id)
        .bind(&credential.credential_type)
        .bind(&credential.encrypted_data)
        .bind(&node_types_json)
        .bind(credential.is_active)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn deactivate_credential(&self, id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE credentials SET is_active = 0, updated_at = CURRENT_TIMESTAMP WHERE id = ?",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn increment_execution_count(&self, workflow_id: &str) -> Result<u64, StoreError> {
        let row = sqlx::query(
            "UPDATE workflows SET execution_count = execution_count + 1 WHERE id = ? RETURNING execution_count",
        )
        .bind(workflow_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let count: i64 = row.get("execution_count");
                Ok(count.max(0) as u64)
            }
            None => Err(StoreError::WorkflowNotFound(workflow_id.to_string())),
        }
    }

    async fn save_execution(&self, execution: &Execution) -> Result<(), StoreError> {
        let record_json = serde_json::to_string(execution)?;
        let status = serde_json::to_value(execution.status)?;

        sqlx::query(
            r#"
            INSERT INTO executions (job_id, workflow_id, status, started_at, record)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(job_id) DO UPDATE SET
                status = excluded.status,
                record = excluded.record
            "#,
        )
        .bind(&execution.job_id)
        .bind(&execution.workflow_id)
        .bind(status.as_str().unwrap_or_default())
        .bind(execution.started_at.to_rfc3339_opts(SecondsFormat::Micros, true))
        .bind(&record_json)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_execution(&self, job_id: &str) -> Result<Option<Execution>, StoreError> {
        let row = sqlx::query("SELECT record FROM executions WHERE job_id = ?")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| {
            let record_json: String = row.get("record");
            serde_json::from_str(&record_json).map_err(StoreError::from)
        })
        .transpose()
    }

    async fn list_executions(&self, workflow_id: &str, limit: usize) -> Result<Vec<Execution>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT record FROM executions
            WHERE workflow_id = ?
            ORDER BY started_at DESC, rowid DESC
            LIMIT ?
            "#,
        )
        .bind(workflow_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut executions = Vec::with_capacity(rows.len());
        for row in rows {
            let record_json: String = row.get("record");
            executions.push(serde_json::from_str(&record_json)?);
        }

        Ok(executions)
    }
}
