/// Petgraph-based DAG execution engine
///
/// Validates a workflow's graph, then drives its nodes in dependency order:
/// a node starts once every upstream node has a terminal result, independent
/// branches run concurrently up to `max_in_flight`, and a failed node skips its
/// downstream closure while unrelated branches keep going.

use crate::config::EngineConfig;
use crate::runtime::error::{DispatchError, EngineError};
use crate::runtime::executor::{NodeExecutor, RunContext};
use crate::runtime::graph::WorkflowGraph;
use crate::runtime::recorder::{
    Execution, ExecutionRecorder, LiveRuns, NodeResult, NodeStatus, RunEnd,
};
use crate::workflow::storage::WorkflowStore;
use crate::workflow::types::Workflow;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::{self, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Dispatch tasks in flight, keyed by task id: node id and start time
type Running = HashMap<task::Id, (String, DateTime<Utc>)>;

/// Workflow execution engine
///
/// Cheap to clone; clones share the live-run registry.
#[derive(Clone)]
pub struct ExecutionEngine {
    store: Arc<dyn WorkflowStore>,
    executor: Arc<NodeExecutor>,
    config: EngineConfig,
    live: LiveRuns,
    cancellations: Arc<RwLock<HashMap<String, CancellationToken>>>,
}

impl std::fmt::Debug for ExecutionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionEngine")
            .field("executor", &self.executor)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// A run that passed its entry checks and has a job id
struct PreparedRun {
    workflow: Workflow,
    context: RunContext,
    recorder: ExecutionRecorder,
    cancel: CancellationToken,
}

impl ExecutionEngine {
    pub fn new(store: Arc<dyn WorkflowStore>, executor: Arc<NodeExecutor>, config: EngineConfig) -> Self {
        Self {
            store,
            executor,
            config,
            live: Arc::new(RwLock::new(HashMap::new())),
            cancellations: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Start a run in the background and return its job id
    ///
    /// Entry checks (unknown or inactive workflow, malformed payload, storage
    /// failures) are reported here; everything after that is recorded on the job.
    pub async fn run_workflow(&self, workflow_id: &str, trigger: Value) -> Result<String, EngineError> {
        let run = self.prepare_run(workflow_id, trigger).await?;
        let job_id = run.recorder.job_id().to_string();

        let engine = self.clone();
        tokio::spawn(async move {
            engine.drive(run).await;
        });

        Ok(job_id)
    }

    /// Run a workflow to completion and return its final record
    pub async fn execute_workflow(&self, workflow_id: &str, trigger: Value) -> Result<Execution, EngineError> {
        let run = self.prepare_run(workflow_id, trigger).await?;
        Ok(self.drive(run).await)
    }

    /// Current state of a job: the live snapshot while running, else the stored record
    pub async fn get_execution(&self, job_id: &str) -> Result<Option<Execution>, EngineError> {
        if let Some(snapshot) = self.live.read().await.get(job_id) {
            return Ok(Some(snapshot.clone()));
        }
        Ok(self.store.get_execution(job_id).await?)
    }

    /// Executions of a workflow, newest first, including runs still in flight
    pub async fn list_executions(&self, workflow_id: &str, limit: usize) -> Result<Vec<Execution>, EngineError> {
        let mut by_job: BTreeMap<String, Execution> = self
            .store
            .list_executions(workflow_id, limit)
            .await?
            .into_iter()
            .map(|e| (e.job_id.clone(), e))
            .collect();
        for snapshot in self.live.read().await.values() {
            if snapshot.workflow_id == workflow_id {
                by_job.insert(snapshot.job_id.clone(), snapshot.clone());
            }
        }

        let mut executions: Vec<Execution> = by_job.into_values().collect();
        executions.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        executions.truncate(limit);
        Ok(executions)
    }

    /// Request cancellation of a running job
    ///
    /// Returns false when the job is unknown or already terminal.
    pub async fn cancel(&self, job_id: &str) -> bool {
        match self.cancellations.read().await.get(job_id) {
            Some(token) => {
                tracing::info!(job_id = %job_id, "🛑 Cancellation requested");
                token.cancel();
                true
            }
            None => false,
        }
    }

    async fn prepare_run(&self, workflow_id: &str, trigger: Value) -> Result<PreparedRun, EngineError> {
        let user_inputs = match trigger {
            Value::Null => Map::new(),
            Value::Object(map) => map,
            _ => return Err(EngineError::InvalidPayload),
        };

        let workflow = self
            .store
            .get_workflow(workflow_id)
            .await?
            .ok_or_else(|| EngineError::WorkflowNotFound(workflow_id.to_string()))?;
        if !workflow.active {
            tracing::warn!(workflow_id = %workflow_id, "⏸️ Refusing to run inactive workflow");
            return Err(EngineError::WorkflowInactive(workflow_id.to_string()));
        }

        let mut context = RunContext {
            user_inputs,
            ..RunContext::default()
        };
        for node in &workflow.nodes {
            if context.actions.contains_key(&node.action_definition_id) {
                continue;
            }
            if let Some(action) = self.store.get_action(&node.action_definition_id).await? {
                let credentials = self.store.credentials_for(&action).await?;
                context.credentials.insert(action.id.clone(), credentials);
                context.actions.insert(action.id.clone(), action);
            }
        }

        self.store.increment_execution_count(&workflow.id).await?;

        let recorder = ExecutionRecorder::start(&workflow.id, self.live.clone()).await;
        let cancel = CancellationToken::new();
        self.cancellations
            .write()
            .await
            .insert(recorder.job_id().to_string(), cancel.clone());

        tracing::info!(
            job_id = %recorder.job_id(),
            workflow_id = %workflow.id,
            "🚀 Run started ({} nodes, {} edges)",
            workflow.nodes.len(),
            workflow.edges.len()
        );

        Ok(PreparedRun {
            workflow,
            context,
            recorder,
            cancel,
        })
    }

    async fn drive(&self, run: PreparedRun) -> Execution {
        let PreparedRun {
            workflow,
            context,
            mut recorder,
            cancel,
        } = run;
        let run_start = std::time::Instant::now();

        let end = match WorkflowGraph::build(&workflow) {
            Ok(graph) => {
                self.schedule(&workflow, &graph, &context, &mut recorder, &cancel)
                    .await
            }
            Err(err) => {
                tracing::error!(
                    job_id = %recorder.job_id(),
                    workflow_id = %workflow.id,
                    "❌ Workflow graph is invalid: {}",
                    err
                );
                RunEnd::InvalidGraph(err)
            }
        };

        // No cancel may be accepted once the outcome is being persisted
        self.cancellations.write().await.remove(recorder.job_id());
        let execution = recorder.finish(end, self.store.as_ref()).await;

        tracing::info!(
            job_id = %execution.job_id,
            workflow_id = %execution.workflow_id,
            "🏁 Run finished with status {:?} in {:?}",
            execution.status,
            run_start.elapsed()
        );

        execution
    }

    /// Drive every node of a validated graph to a terminal result
    async fn schedule(
        &self,
        workflow: &Workflow,
        graph: &WorkflowGraph,
        context: &RunContext,
        recorder: &mut ExecutionRecorder,
        cancel: &CancellationToken,
    ) -> RunEnd {
        let max_in_flight = self.config.max_in_flight();
        let run_timeout = self.config.run_timeout();
        // A limit too large to represent as an instant means no deadline
        let deadline = run_timeout.and_then(|limit| Instant::now().checked_add(limit));

        let mut pending: Vec<String> = graph.topological_order().to_vec();
        let mut in_flight: JoinSet<Result<Value, DispatchError>> = JoinSet::new();
        let mut running: Running = HashMap::new();

        loop {
            if cancel.is_cancelled() {
                return self
                    .interrupt(RunEnd::Cancelled, &mut pending, &mut running, recorder)
                    .await;
            }

            // Topological order guarantees upstream results are recorded before
            // their dependents are looked at, so one pass settles skip cascades.
            let mut index = 0;
            while index < pending.len() {
                let node_id = pending[index].as_str();
                let upstream = graph.upstream(node_id);
                if !upstream.iter().all(|u| recorder.has_result(u)) {
                    index += 1;
                    continue;
                }

                let blocker = upstream.iter().find_map(|u| match recorder.status_of(u) {
                    Some(NodeStatus::Succeeded) | None => None,
                    Some(status) => Some((u.to_string(), status)),
                });
                if blocker.is_none() && in_flight.len() >= max_in_flight {
                    index += 1;
                    continue;
                }

                let node_id = pending.remove(index);
                if let Some((upstream_id, status)) = blocker {
                    let reason = format!("upstream node '{upstream_id}' {}", status_word(status));
                    tracing::warn!(
                        job_id = %recorder.job_id(),
                        node_id = %node_id,
                        "⏭️ Node skipped: {}",
                        reason
                    );
                    recorder.record(NodeResult::skipped(&node_id, reason)).await;
                    continue;
                }

                self.start_node(workflow, graph, context, recorder, &node_id, &mut in_flight, &mut running)
                    .await;
            }

            if in_flight.is_empty() {
                for node_id in pending.drain(..) {
                    tracing::warn!(
                        job_id = %recorder.job_id(),
                        node_id = %node_id,
                        "⏭️ Node skipped: upstream nodes never finished"
                    );
                    recorder
                        .record(NodeResult::skipped(&node_id, "upstream nodes never finished"))
                        .await;
                }
                return RunEnd::Completed;
            }

            let timeout = async {
                match deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => {
                    return self
                        .interrupt(RunEnd::Cancelled, &mut pending, &mut running, recorder)
                        .await;
                }
                _ = timeout => {
                    let limit = run_timeout.unwrap_or_default();
                    tracing::warn!(job_id = %recorder.job_id(), "⏰ Run timed out after {:?}", limit);
                    return self
                        .interrupt(RunEnd::TimedOut(limit), &mut pending, &mut running, recorder)
                        .await;
                }
                Some(joined) = in_flight.join_next_with_id() => {
                    let (task_id, outcome) = match joined {
                        Ok((task_id, outcome)) => (task_id, outcome),
                        Err(join_err) => {
                            let reason = format!("dispatch task failed: {join_err}");
                            (join_err.id(), Err(DispatchError::Transport(reason)))
                        }
                    };
                    let Some((node_id, started_at)) = running.remove(&task_id) else {
                        tracing::error!(job_id = %recorder.job_id(), "💥 Dispatch task {} has no node", task_id);
                        continue;
                    };
                    let result = match outcome {
                        Ok(output) => {
                            tracing::info!(
                                job_id = %recorder.job_id(),
                                node_id = %node_id,
                                "✅ Node completed"
                            );
                            NodeResult::succeeded(&node_id, output, started_at)
                        }
                        Err(err) => {
                            tracing::error!(
                                job_id = %recorder.job_id(),
                                node_id = %node_id,
                                "❌ Node failed: {}",
                                err
                            );
                            NodeResult::failed(&node_id, err.to_string(), started_at)
                        }
                    };
                    recorder.record(result).await;
                }
            }
        }
    }

    /// Build a node's request and hand it to the dispatcher
    #[allow(clippy::too_many_arguments)]
    async fn start_node(
        &self,
        workflow: &Workflow,
        graph: &WorkflowGraph,
        context: &RunContext,
        recorder: &mut ExecutionRecorder,
        node_id: &str,
        in_flight: &mut JoinSet<Result<Value, DispatchError>>,
        running: &mut Running,
    ) {
        let started_at = Utc::now();
        let Some(node) = workflow.node(node_id) else {
            recorder
                .record(NodeResult::failed(node_id, "node definition missing", started_at))
                .await;
            return;
        };

        // Only ancestors feed a node, so its inputs never depend on branch timing
        let prior_results: Map<String, Value> = graph
            .ancestors(node_id)
            .into_iter()
            .filter_map(|id| recorder.output_of(id).map(|output| (id.to_string(), output.clone())))
            .collect();

        tracing::info!(
            job_id = %recorder.job_id(),
            node_id = %node_id,
            "📍 Node started (action: {})",
            node.action_definition_id
        );

        let request = match self.executor.prepare(node, context, &prior_results) {
            Ok(request) => request,
            Err(err) => {
                tracing::error!(
                    job_id = %recorder.job_id(),
                    node_id = %node_id,
                    "❌ Node request could not be built: {}",
                    err
                );
                recorder
                    .record(NodeResult::failed(node_id, err.to_string(), started_at))
                    .await;
                return;
            }
        };

        let dispatcher = self.executor.dispatcher();
        let handle = in_flight.spawn(async move { dispatcher.execute(request).await });
        running.insert(handle.id(), (node_id.to_string(), started_at));
    }

    /// Stop scheduling: in-flight nodes become `cancelled`, unstarted ones `skipped`
    async fn interrupt(
        &self,
        end: RunEnd,
        pending: &mut Vec<String>,
        running: &mut Running,
        recorder: &mut ExecutionRecorder,
    ) -> RunEnd {
        let reason = match &end {
            RunEnd::TimedOut(_) => "run timed out",
            _ => "run cancelled",
        };

        let mut interrupted: Vec<(String, DateTime<Utc>)> = running.drain().map(|(_, node)| node).collect();
        interrupted.sort();
        for (node_id, started_at) in interrupted {
            recorder
                .record(NodeResult::cancelled(&node_id, reason, started_at))
                .await;
        }
        for node_id in pending.drain(..) {
            recorder.record(NodeResult::skipped(&node_id, reason)).await;
        }

        end
    }
}

fn status_word(status: NodeStatus) -> &'static str {
    match status {
        NodeStatus::Succeeded => "succeeded",
        NodeStatus::Failed => "failed",
        NodeStatus::Skipped => "was skipped",
        NodeStatus::Cancelled => "was cancelled",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::dispatcher::Dispatch;
    use crate::runtime::recorder::RunStatus;
    use crate::runtime::request::OutboundRequest;
    use crate::runtime::vault::{CredentialVault, VaultKey};
    use crate::workflow::memory::MemoryStore;
    use crate::workflow::storage::StoreError;
    use crate::workflow::types::{ActionDefinition, ApiConfig, Credential, CredentialBinding, Edge, Node};
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::Semaphore;

    /// Scripted stand-in for the network, keyed by the last URL segment
    #[derive(Default)]
    struct ScriptedDispatch {
        failures: HashSet<String>,
        panics: HashSet<String>,
        delay: Option<Duration>,
        requests: Mutex<Vec<OutboundRequest>>,
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    impl ScriptedDispatch {
        fn failing(nodes: &[&str]) -> Self {
            Self {
                failures: nodes.iter().map(|s| s.to_string()).collect(),
                ..Self::default()
            }
        }

        fn panicking(nodes: &[&str]) -> Self {
            Self {
                panics: nodes.iter().map(|s| s.to_string()).collect(),
                ..Self::default()
            }
        }

        fn slow(delay: Duration) -> Self {
            Self {
                delay: Some(delay),
                ..Self::default()
            }
        }

        fn request_for(&self, node_id: &str) -> Option<OutboundRequest> {
            self.requests
                .lock()
                .unwrap()
                .iter()
                .find(|r| r.url.ends_with(&format!("/{node_id}")))
                .cloned()
        }
    }

    #[async_trait]
    impl Dispatch for ScriptedDispatch {
        async fn execute(&self, request: OutboundRequest) -> Result<Value, DispatchError> {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            self.requests.lock().unwrap().push(request.clone());

            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.current.fetch_sub(1, Ordering::SeqCst);

            let node_id = request.url.rsplit('/').next().unwrap_or_default().to_string();
            if self.panics.contains(&node_id) {
                panic!("dispatcher crashed on {node_id}");
            }
            if self.failures.contains(&node_id) {
                return Err(DispatchError::Connect(format!("connection refused by {node_id}")));
            }
            Ok(json!({ "status": 200, "ok": true, "body": { "node": node_id, "echo": request.body } }))
        }
    }

    const KEY: [u8; 32] = [11u8; 32];

    fn http_action() -> ActionDefinition {
        ActionDefinition {
            id: "http.call".to_string(),
            name: "HTTP call".to_string(),
            category: "http".to_string(),
            input_schema: vec![],
            api_config: ApiConfig {
                method: Some("POST".to_string()),
                url: Some("https://svc.test/{{input.step}}".to_string()),
                ..ApiConfig::default()
            },
            logo: None,
        }
    }

    fn node(id: &str, inputs: Value) -> Node {
        let mut inputs = match inputs {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        inputs.insert("step".to_string(), json!(id));
        Node {
            id: id.to_string(),
            action_definition_id: "http.call".to_string(),
            inputs,
            position: None,
        }
    }

    fn workflow(nodes: Vec<Node>, edges: &[(&str, &str)]) -> Workflow {
        Workflow {
            id: "wf-test".to_string(),
            name: "test".to_string(),
            nodes,
            edges: edges
                .iter()
                .map(|(s, t)| Edge {
                    source: s.to_string(),
                    target: t.to_string(),
                })
                .collect(),
            active: true,
            execution_count: 0,
        }
    }

    fn simple(ids: &[&str], edges: &[(&str, &str)]) -> Workflow {
        workflow(ids.iter().map(|id| node(id, json!({}))).collect(), edges)
    }

    struct Harness {
        engine: ExecutionEngine,
        store: Arc<MemoryStore>,
        dispatch: Arc<ScriptedDispatch>,
    }

    async fn harness(workflow: Workflow, dispatch: ScriptedDispatch, config: EngineConfig) -> Harness {
        let store = Arc::new(MemoryStore::new());
        store.save_workflow(&workflow).await.unwrap();
        store.save_action(&http_action()).await.unwrap();

        let dispatch = Arc::new(dispatch);
        let executor = Arc::new(NodeExecutor::new(
            Arc::new(CredentialVault::new(VaultKey::from_bytes(KEY))),
            dispatch.clone(),
        ));
        let engine = ExecutionEngine::new(store.clone(), executor, config);
        Harness { engine, store, dispatch }
    }

    fn config() -> EngineConfig {
        EngineConfig {
            dispatch_timeout_ms: 1000,
            max_in_flight: 4,
            run_timeout_ms: None,
        }
    }

    fn status(execution: &Execution, node_id: &str) -> NodeStatus {
        execution.result(node_id).unwrap().status
    }

    async fn wait_for_terminal(engine: &ExecutionEngine, job_id: &str) -> Execution {
        for _ in 0..200 {
            if let Some(execution) = engine.get_execution(job_id).await.unwrap() {
                if execution.status != RunStatus::Running {
                    return execution;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {job_id} did not finish");
    }

    #[tokio::test]
    async fn test_failure_skips_downstream_chain() {
        let h = harness(
            simple(&["a", "b", "c"], &[("a", "b"), ("b", "c")]),
            ScriptedDispatch::failing(&["b"]),
            config(),
        )
        .await;

        let execution = h.engine.execute_workflow("wf-test", json!({})).await.unwrap();

        assert_eq!(execution.status, RunStatus::Failed);
        assert_eq!(status(&execution, "a"), NodeStatus::Succeeded);
        assert_eq!(status(&execution, "b"), NodeStatus::Failed);
        assert_eq!(status(&execution, "c"), NodeStatus::Skipped);
        assert_eq!(
            execution.result("c").unwrap().error.as_deref(),
            Some("upstream node 'b' failed")
        );
        assert!(h.dispatch.request_for("c").is_none());
        let order: Vec<&str> = execution.node_results.iter().map(|r| r.node_id.as_str()).collect();
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_unrelated_branch() {
        let h = harness(
            simple(&["a", "b", "x", "y"], &[("a", "b"), ("x", "y")]),
            ScriptedDispatch::failing(&["a"]),
            config(),
        )
        .await;

        let execution = h.engine.execute_workflow("wf-test", json!({})).await.unwrap();

        assert_eq!(execution.status, RunStatus::Failed);
        assert_eq!(status(&execution, "b"), NodeStatus::Skipped);
        assert_eq!(status(&execution, "x"), NodeStatus::Succeeded);
        assert_eq!(status(&execution, "y"), NodeStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_independent_branches_all_run() {
        let h = harness(simple(&["left", "right", "solo"], &[("left", "right")]), ScriptedDispatch::default(), config()).await;

        let execution = h.engine.execute_workflow("wf-test", json!({})).await.unwrap();

        assert_eq!(execution.status, RunStatus::Succeeded);
        assert_eq!(execution.node_results.len(), 3);
        assert!(execution.node_results.iter().all(|r| r.status == NodeStatus::Succeeded));
        assert!(execution.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_dangling_edge_fails_before_dispatch() {
        let h = harness(simple(&["a"], &[("a", "ghost")]), ScriptedDispatch::default(), config()).await;

        let execution = h.engine.execute_workflow("wf-test", json!({})).await.unwrap();

        assert_eq!(execution.status, RunStatus::Failed);
        assert!(execution.node_results.is_empty());
        assert!(execution.error.unwrap().contains("ghost"));
        assert!(h.dispatch.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cycle_fails_before_dispatch() {
        let h = harness(
            simple(&["a", "b"], &[("a", "b"), ("b", "a")]),
            ScriptedDispatch::default(),
            config(),
        )
        .await;

        let execution = h.engine.execute_workflow("wf-test", json!({})).await.unwrap();

        assert_eq!(execution.status, RunStatus::Failed);
        assert!(execution.node_results.is_empty());
    }

    #[tokio::test]
    async fn test_data_flows_from_trigger_and_upstream() {
        let mut action = http_action();
        action.api_config.body = json!({
            "user": "{{input.user}}",
            "previous": "{{$json.a.body.node}}",
            "unrelated": "{{$json.z.body.node}}"
        });
        let h = harness(simple(&["a", "b", "z"], &[("a", "b")]), ScriptedDispatch::default(), config()).await;
        h.store.save_action(&action).await.unwrap();

        let execution = h
            .engine
            .execute_workflow("wf-test", json!({ "user": "ada" }))
            .await
            .unwrap();
        assert_eq!(execution.status, RunStatus::Succeeded);

        let body = h.dispatch.request_for("b").unwrap().body;
        assert_eq!(body["user"], json!("ada"));
        assert_eq!(body["previous"], json!("a"));
        // z is not an ancestor of b, whatever the timing
        assert_eq!(body["unrelated"], json!("{{$json.z.body.node}}"));
    }

    #[tokio::test]
    async fn test_node_inputs_forward_upstream_values() {
        let h = harness(
            workflow(
                vec![node("a", json!({})), node("b", json!({ "ref": "{{$json.a.body.node}}" }))],
                &[("a", "b")],
            ),
            ScriptedDispatch::default(),
            config(),
        )
        .await;

        h.engine.execute_workflow("wf-test", json!({})).await.unwrap();

        let body = h.dispatch.request_for("b").unwrap().body;
        assert_eq!(body, json!({ "ref": "a", "step": "b" }));
    }

    #[tokio::test]
    async fn test_credentials_are_injected_but_never_recorded() {
        let mut action = http_action();
        action.api_config.credential = Some(CredentialBinding {
            required: true,
            credential_type: Some("api_key".to_string()),
            headers: [("token".to_string(), "Authorization".to_string())].into(),
        });
        let h = harness(simple(&["a"], &[]), ScriptedDispatch::default(), config()).await;
        h.store.save_action(&action).await.unwrap();

        let plain = match json!({ "token": "Bearer top-secret" }) {
            Value::Object(map) => map,
            _ => unreachable!(),
        };
        let encrypted_data = CredentialVault::new(VaultKey::from_bytes(KEY)).encrypt(&plain).unwrap();
        h.store
            .save_credential(&Credential {
                id: "cred-1".to_string(),
                credential_type: "api_key".to_string(),
                encrypted_data,
                node_types: vec!["http".to_string()],
                is_active: true,
            })
            .await
            .unwrap();

        let execution = h.engine.execute_workflow("wf-test", json!({})).await.unwrap();

        assert_eq!(execution.status, RunStatus::Succeeded);
        let request = h.dispatch.request_for("a").unwrap();
        assert_eq!(request.headers["Authorization"], "Bearer top-secret");
        assert!(!serde_json::to_string(&execution).unwrap().contains("top-secret"));
        let stored = h.store.get_execution(&execution.job_id).await.unwrap().unwrap();
        assert!(!serde_json::to_string(&stored).unwrap().contains("top-secret"));
    }

    #[tokio::test]
    async fn test_inactive_required_credential_fails_node() {
        let mut action = http_action();
        action.api_config.credential = Some(CredentialBinding {
            required: true,
            ..CredentialBinding::default()
        });
        let h = harness(simple(&["a", "b"], &[("a", "b")]), ScriptedDispatch::default(), config()).await;
        h.store.save_action(&action).await.unwrap();
        h.store
            .save_credential(&Credential {
                id: "retired".to_string(),
                credential_type: "api_key".to_string(),
                encrypted_data: "00:11".to_string(),
                node_types: vec!["http.call".to_string()],
                is_active: false,
            })
            .await
            .unwrap();

        let execution = h.engine.execute_workflow("wf-test", json!({})).await.unwrap();

        assert_eq!(status(&execution, "a"), NodeStatus::Failed);
        assert!(execution.result("a").unwrap().error.as_ref().unwrap().contains("retired"));
        assert_eq!(status(&execution, "b"), NodeStatus::Skipped);
    }

    #[tokio::test]
    async fn test_persistence_failure_is_reported_on_the_job() {
        let h = harness(simple(&["a"], &[]), ScriptedDispatch::default(), config()).await;
        h.store.fail_persistence(true);

        let job_id = h.engine.run_workflow("wf-test", json!({})).await.unwrap();
        let execution = wait_for_terminal(&h.engine, &job_id).await;

        assert_eq!(execution.status, RunStatus::PersistenceFailed);
        assert_eq!(status(&execution, "a"), NodeStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_cancel_marks_in_flight_and_pending_nodes() {
        let h = harness(
            simple(&["a", "b"], &[("a", "b")]),
            ScriptedDispatch::slow(Duration::from_secs(5)),
            config(),
        )
        .await;

        let job_id = h.engine.run_workflow("wf-test", json!({})).await.unwrap();
        while h.dispatch.current.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(h.engine.cancel(&job_id).await);

        let execution = wait_for_terminal(&h.engine, &job_id).await;
        assert_eq!(execution.status, RunStatus::Cancelled);
        assert_eq!(status(&execution, "a"), NodeStatus::Cancelled);
        assert_eq!(status(&execution, "b"), NodeStatus::Skipped);
        assert!(!h.engine.cancel(&job_id).await);
    }

    #[tokio::test]
    async fn test_run_timeout_stops_scheduling() {
        let h = harness(
            simple(&["a", "b"], &[("a", "b")]),
            ScriptedDispatch::slow(Duration::from_secs(5)),
            EngineConfig {
                run_timeout_ms: Some(50),
                ..config()
            },
        )
        .await;

        let execution = h.engine.execute_workflow("wf-test", json!({})).await.unwrap();

        assert_eq!(execution.status, RunStatus::Failed);
        assert_eq!(execution.error.as_deref(), Some("run timed out after 50 ms"));
        assert_eq!(status(&execution, "a"), NodeStatus::Cancelled);
        assert_eq!(status(&execution, "b"), NodeStatus::Skipped);
    }

    #[tokio::test]
    async fn test_max_in_flight_bounds_concurrency() {
        let h = harness(
            simple(&["n1", "n2", "n3", "n4", "n5", "n6"], &[]),
            ScriptedDispatch::slow(Duration::from_millis(30)),
            EngineConfig {
                max_in_flight: 2,
                ..config()
            },
        )
        .await;

        let execution = h.engine.execute_workflow("wf-test", json!({})).await.unwrap();

        assert_eq!(execution.status, RunStatus::Succeeded);
        assert_eq!(execution.node_results.len(), 6);
        assert!(h.dispatch.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_entry_checks() {
        let h = harness(simple(&["a"], &[]), ScriptedDispatch::default(), config()).await;

        assert!(matches!(
            h.engine.run_workflow("ghost", json!({})).await,
            Err(EngineError::WorkflowNotFound(_))
        ));
        assert!(matches!(
            h.engine.run_workflow("wf-test", json!([1, 2])).await,
            Err(EngineError::InvalidPayload)
        ));

        let mut inactive = simple(&["a"], &[]);
        inactive.active = false;
        h.store.save_workflow(&inactive).await.unwrap();
        assert!(matches!(
            h.engine.run_workflow("wf-test", json!({})).await,
            Err(EngineError::WorkflowInactive(_))
        ));
        assert_eq!(h.store.get_workflow("wf-test").await.unwrap().unwrap().execution_count, 0);
    }

    #[tokio::test]
    async fn test_execution_count_and_listing() {
        let h = harness(simple(&["a"], &[]), ScriptedDispatch::default(), config()).await;

        let first = h.engine.execute_workflow("wf-test", Value::Null).await.unwrap();
        let second = h.engine.execute_workflow("wf-test", json!({})).await.unwrap();

        assert_eq!(h.store.get_workflow("wf-test").await.unwrap().unwrap().execution_count, 2);
        let listed: Vec<String> = h
            .engine
            .list_executions("wf-test", 10)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.job_id)
            .collect();
        assert_eq!(listed, vec![second.job_id.clone(), first.job_id]);
        assert_eq!(h.engine.list_executions("wf-test", 1).await.unwrap().len(), 1);

        let fetched = h.engine.get_execution(&second.job_id).await.unwrap().unwrap();
        assert_eq!(fetched.status, RunStatus::Succeeded);
        assert!(h.engine.get_execution("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_crashed_dispatch_fails_its_node() {
        let h = harness(
            simple(&["a", "b", "x"], &[("a", "b")]),
            ScriptedDispatch::panicking(&["a"]),
            config(),
        )
        .await;

        let execution = h.engine.execute_workflow("wf-test", json!({})).await.unwrap();

        assert_eq!(execution.status, RunStatus::Failed);
        assert_eq!(execution.node_results.len(), 3);
        assert_eq!(status(&execution, "a"), NodeStatus::Failed);
        assert!(execution
            .result("a")
            .unwrap()
            .error
            .as_ref()
            .unwrap()
            .contains("dispatch task failed"));
        assert_eq!(status(&execution, "b"), NodeStatus::Skipped);
        assert_eq!(status(&execution, "x"), NodeStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_unrepresentable_run_timeout_means_no_deadline() {
        let h = harness(
            simple(&["a"], &[]),
            ScriptedDispatch::default(),
            EngineConfig {
                run_timeout_ms: Some(u64::MAX),
                ..config()
            },
        )
        .await;

        let execution = h.engine.execute_workflow("wf-test", json!({})).await.unwrap();
        assert_eq!(execution.status, RunStatus::Succeeded);
    }

    /// Store whose execution writes wait until the test releases them
    struct HeldStore {
        inner: MemoryStore,
        saving: AtomicBool,
        release: Semaphore,
    }

    impl HeldStore {
        fn new() -> Self {
            Self {
                inner: MemoryStore::new(),
                saving: AtomicBool::new(false),
                release: Semaphore::new(0),
            }
        }
    }

    #[async_trait]
    impl WorkflowStore for HeldStore {
        async fn get_workflow(&self, id: &str) -> Result<Option<Workflow>, StoreError> {
            self.inner.get_workflow(id).await
        }

        async fn save_workflow(&self, workflow: &Workflow) -> Result<(), StoreError> {
            self.inner.save_workflow(workflow).await
        }

        async fn get_action(&self, id: &str) -> Result<Option<ActionDefinition>, StoreError> {
            self.inner.get_action(id).await
        }

        async fn save_action(&self, action: &ActionDefinition) -> Result<(), StoreError> {
            self.inner.save_action(action).await
        }

        async fn credentials_for(&self, action: &ActionDefinition) -> Result<Vec<Credential>, StoreError> {
            self.inner.credentials_for(action).await
        }

        async fn save_credential(&self, credential: &Credential) -> Result<(), StoreError> {
            self.inner.save_credential(credential).await
        }

        async fn deactivate_credential(&self, id: &str) -> Result<bool, StoreError> {
            self.inner.deactivate_credential(id).await
        }

        async fn increment_execution_count(&self, workflow_id: &str) -> Result<u64, StoreError> {
            self.inner.increment_execution_count(workflow_id).await
        }

        async fn save_execution(&self, execution: &Execution) -> Result<(), StoreError> {
            self.saving.store(true, Ordering::SeqCst);
            let _permit = self
                .release
                .acquire()
                .await
                .map_err(|e| StoreError::Unavailable(e.to_string()))?;
            self.inner.save_execution(execution).await
        }

        async fn get_execution(&self, job_id: &str) -> Result<Option<Execution>, StoreError> {
            self.inner.get_execution(job_id).await
        }

        async fn list_executions(&self, workflow_id: &str, limit: usize) -> Result<Vec<Execution>, StoreError> {
            self.inner.list_executions(workflow_id, limit).await
        }
    }

    #[tokio::test]
    async fn test_cancel_is_refused_while_outcome_is_persisted() {
        let store = Arc::new(HeldStore::new());
        store.save_workflow(&simple(&["a"], &[])).await.unwrap();
        store.save_action(&http_action()).await.unwrap();
        let executor = Arc::new(NodeExecutor::new(
            Arc::new(CredentialVault::new(VaultKey::from_bytes(KEY))),
            Arc::new(ScriptedDispatch::default()),
        ));
        let engine = ExecutionEngine::new(store.clone(), executor, config());

        let job_id = engine.run_workflow("wf-test", json!({})).await.unwrap();
        while !store.saving.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert!(!engine.cancel(&job_id).await);
        store.release.add_permits(1);

        let execution = wait_for_terminal(&engine, &job_id).await;
        assert_eq!(execution.status, RunStatus::Succeeded);
        let stored = store.get_execution(&job_id).await.unwrap().unwrap();
        assert_eq!(stored.status, RunStatus::Succeeded);
    }
}
