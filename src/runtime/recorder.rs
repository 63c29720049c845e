/// Execution recorder
///
/// Allocates the job id, accumulates per-node outcomes in completion order and
/// finalizes the run. Every change is published to the live-run map so a job can
/// be inspected while it is still in flight.

use crate::runtime::error::GraphError;
use crate::workflow::storage::WorkflowStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Snapshots of runs that are in flight or could not be persisted, keyed by job id
///
/// In-flight snapshots leave the map once their run is stored. Unpersisted
/// ones are kept for inspection up to a fixed bound; the oldest are evicted first.
pub type LiveRuns = Arc<RwLock<HashMap<String, Execution>>>;

/// Upper bound on `persistence_failed` snapshots kept in [`LiveRuns`]
const MAX_UNPERSISTED: usize = 256;

/// Overall status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Succeeded,
    Failed,
    Cancelled,
    /// The run finished but its record could not be stored
    PersistenceFailed,
}

/// Outcome of a single node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Succeeded,
    Failed,
    Skipped,
    Cancelled,
}

/// Recorded outcome of one node within one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeResult {
    pub node_id: String,
    pub status: NodeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    /// Failure message or skip reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl NodeResult {
    pub fn succeeded(node_id: &str, output: Value, started_at: DateTime<Utc>) -> Self {
        Self::new(node_id, NodeStatus::Succeeded, Some(output), None, started_at)
    }

    pub fn failed(node_id: &str, error: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self::new(node_id, NodeStatus::Failed, None, Some(error.into()), started_at)
    }

    /// A node that never started
    pub fn skipped(node_id: &str, reason: impl Into<String>) -> Self {
        Self::new(node_id, NodeStatus::Skipped, None, Some(reason.into()), Utc::now())
    }

    pub fn cancelled(node_id: &str, reason: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self::new(node_id, NodeStatus::Cancelled, None, Some(reason.into()), started_at)
    }

    fn new(
        node_id: &str,
        status: NodeStatus,
        output: Option<Value>,
        error: Option<String>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            node_id: node_id.to_string(),
            status,
            output,
            error,
            started_at,
            finished_at: Utc::now(),
        }
    }
}

/// One invocation of a workflow against a trigger payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Execution {
    pub job_id: String,
    pub workflow_id: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Run-level failure: graph error, timeout or persistence error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Node outcomes in the order they became terminal
    #[serde(default)]
    pub node_results: Vec<NodeResult>,
}

impl Execution {
    pub fn result(&self, node_id: &str) -> Option<&NodeResult> {
        self.node_results.iter().find(|r| r.node_id == node_id)
    }
}

/// How the scheduler stopped driving a run
#[derive(Debug, Clone)]
pub enum RunEnd {
    /// Every node reached a terminal result
    Completed,
    /// Validation failed; nothing was executed
    InvalidGraph(GraphError),
    Cancelled,
    TimedOut(Duration),
}

/// Owns the `Execution` of one run until it is terminal
#[derive(Debug)]
pub struct ExecutionRecorder {
    execution: Execution,
    live: LiveRuns,
}

impl ExecutionRecorder {
    /// Allocate a job id and publish a `running` snapshot
    pub async fn start(workflow_id: &str, live: LiveRuns) -> Self {
        let execution = Execution {
            job_id: uuid::Uuid::new_v4().to_string(),
            workflow_id: workflow_id.to_string(),
            status: RunStatus::Running,
            started_at: Utc::now(),
            finished_at: None,
            error: None,
            node_results: Vec::new(),
        };
        live.write()
            .await
            .insert(execution.job_id.clone(), execution.clone());

        Self { execution, live }
    }

    pub fn job_id(&self) -> &str {
        &self.execution.job_id
    }

    /// Whether a node already has a terminal result
    pub fn has_result(&self, node_id: &str) -> bool {
        self.execution.result(node_id).is_some()
    }

    pub fn status_of(&self, node_id: &str) -> Option<NodeStatus> {
        self.execution.result(node_id).map(|r| r.status)
    }

    /// Output of a node that succeeded
    pub fn output_of(&self, node_id: &str) -> Option<&Value> {
        self.execution
            .result(node_id)
            .filter(|r| r.status == NodeStatus::Succeeded)
            .and_then(|r| r.output.as_ref())
    }

    /// Append a node result; a node is recorded at most once
    pub async fn record(&mut self, result: NodeResult) {
        if self.has_result(&result.node_id) {
            tracing::warn!(
                job_id = %self.execution.job_id,
                node_id = %result.node_id,
                "⚠️ Ignoring duplicate result for node"
            );
            return;
        }
        self.execution.node_results.push(result);
        self.publish().await;
    }

    /// Finalize the run and hand it to the store
    ///
    /// A persistence failure keeps the snapshot (with status
    /// `persistence_failed`) in the live map so the outcome stays retrievable.
    pub async fn finish(mut self, end: RunEnd, store: &dyn WorkflowStore) -> Execution {
        let (status, error) = match end {
            RunEnd::InvalidGraph(err) => (RunStatus::Failed, Some(err.to_string())),
            RunEnd::Cancelled => (RunStatus::Cancelled, Some("run cancelled".to_string())),
            RunEnd::TimedOut(limit) => (
                RunStatus::Failed,
                Some(format!("run timed out after {} ms", limit.as_millis())),
            ),
            RunEnd::Completed => {
                let any_failed = self
                    .execution
                    .node_results
                    .iter()
                    .any(|r| r.status == NodeStatus::Failed);
                let status = if any_failed { RunStatus::Failed } else { RunStatus::Succeeded };
                (status, None)
            }
        };
        self.execution.status = status;
        self.execution.error = error;
        self.execution.finished_at = Some(Utc::now());

        match store.save_execution(&self.execution).await {
            Ok(()) => {
                self.live.write().await.remove(&self.execution.job_id);
            }
            Err(e) => {
                tracing::error!(
                    job_id = %self.execution.job_id,
                    "💥 Failed to persist execution: {}",
                    e
                );
                self.execution.status = RunStatus::PersistenceFailed;
                self.execution.error = Some(format!("failed to persist execution: {e}"));
                let mut live = self.live.write().await;
                live.insert(self.execution.job_id.clone(), self.execution.clone());
                evict_unpersisted(&mut live, MAX_UNPERSISTED);
            }
        }

        self.execution
    }

    async fn publish(&self) {
        self.live
            .write()
            .await
            .insert(self.execution.job_id.clone(), self.execution.clone());
    }
}

/// Drop the oldest `persistence_failed` snapshots beyond `keep`
fn evict_unpersisted(live: &mut HashMap<String, Execution>, keep: usize) {
    let mut unpersisted: Vec<(DateTime<Utc>, String)> = live
        .values()
        .filter(|e| e.status == RunStatus::PersistenceFailed)
        .map(|e| (e.finished_at.unwrap_or(e.started_at), e.job_id.clone()))
        .collect();
    if unpersisted.len() <= keep {
        return;
    }

    unpersisted.sort();
    let excess = unpersisted.len() - keep;
    for (_, job_id) in unpersisted.into_iter().take(excess) {
        tracing::warn!(job_id = %job_id, "🧹 Evicting unpersisted execution snapshot");
        live.remove(&job_id);
    }
}
