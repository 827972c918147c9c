//! `LiveContext` — the DB-backed `ExecutionContext` for workflows run
//! through the REST API / worker path (spec §4.1: "a live adapter over an
//! in-process reactive store").
//!
//! The authoritative state for the duration of a run is the in-memory
//! `State` bag, exactly like `StandaloneContext` — `ExecutionContext`'s
//! getters/setters are synchronous and cannot await a query. Every write
//! additionally spawns a best-effort background task that mirrors the
//! delta into Postgres (`node_executions`, `variables`) so the API can
//! answer progress/history queries without holding this context open.
//! A failed mirror write is logged, never surfaced to the executor — the
//! run's correctness never depends on the database being reachable.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use db::DbPool;
use nodes::{
    Edge, ExecutableNode, ExecutionContext, ExecutionResult, Node, NodeError, NodeRegistry,
    ResultDelta, VariableStore,
};

#[derive(Default)]
struct State {
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    results: HashMap<String, ExecutionResult>,
    variables: VariableStore,
    executing: bool,
}

pub struct LiveContext {
    state: RwLock<State>,
    registry: Arc<NodeRegistry>,
    pool: DbPool,
    execution_id: Uuid,
    workflow_id: Uuid,
}

impl LiveContext {
    pub fn new(
        pool: DbPool,
        execution_id: Uuid,
        workflow_id: Uuid,
        nodes: Vec<Node>,
        edges: Vec<Edge>,
        variables: VariableStore,
        registry: Arc<NodeRegistry>,
    ) -> Self {
        Self {
            state: RwLock::new(State { nodes, edges, variables, ..Default::default() }),
            registry,
            pool,
            execution_id,
            workflow_id,
        }
    }

    fn mirror_results(&self, delta: &ResultDelta) {
        let pool = self.pool.clone();
        let execution_id = self.execution_id;
        let entries: Vec<(String, ExecutionResult)> =
            delta.iter().map(|(id, r)| (id.clone(), r.clone())).collect();

        tokio::spawn(async move {
            for (node_id, result) in entries {
                let status = if result.success { "succeeded" } else { "failed" };
                let stats = result
                    .stats
                    .as_ref()
                    .map(|s| serde_json::to_value(s).unwrap_or(Value::Null));
                let started_at = Utc::now()
                    - chrono::Duration::milliseconds(result.duration_ms.max(0));

                if let Err(err) = db::repository::executions::insert_node_execution(
                    &pool,
                    execution_id,
                    &node_id,
                    Value::Null,
                    result.output.clone(),
                    status,
                    started_at,
                    stats,
                    None,
                )
                .await
                {
                    warn!(node_id, %err, "failed to mirror node execution result to Postgres");
                }
            }
        });
    }

    fn mirror_variable(&self, workflow_id: Uuid, name: String, value: String, folder: Option<String>) {
        let pool = self.pool.clone();
        let kind = nodes::VariableKind::detect(&value);
        let kind_str = serde_json::to_value(kind)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| "string".to_string());

        tokio::spawn(async move {
            if let Err(err) = db::repository::variables::upsert_variable(
                &pool,
                Some(workflow_id),
                &name,
                &value,
                &kind_str,
                None,
                folder.as_deref(),
            )
            .await
            {
                warn!(name, %err, "failed to mirror variable to Postgres");
            }
        });
    }
}

#[async_trait]
impl ExecutionContext for LiveContext {
    fn node(&self, id: &str) -> Option<Node> {
        self.state.read().unwrap().nodes.iter().find(|n| n.id == id).cloned()
    }

    fn nodes(&self) -> Vec<Node> {
        self.state.read().unwrap().nodes.clone()
    }

    fn edges(&self) -> Vec<Edge> {
        self.state.read().unwrap().edges.clone()
    }

    fn result(&self, id: &str) -> Option<ExecutionResult> {
        self.state.read().unwrap().results.get(id).cloned()
    }

    fn results(&self) -> HashMap<String, ExecutionResult> {
        self.state.read().unwrap().results.clone()
    }

    fn set_results(&self, delta: ResultDelta) {
        {
            let mut state = self.state.write().unwrap();
            for (id, result) in &delta {
                state.results.insert(id.clone(), result.clone());
            }
        }
        self.mirror_results(&delta);
    }

    fn update_node_data(&self, id: &str, patch: Value) {
        let mut state = self.state.write().unwrap();
        let Some(node) = state.nodes.iter_mut().find(|n| n.id == id) else { return };
        match (node.data.as_object_mut(), patch.as_object()) {
            (Some(existing), Some(incoming)) => {
                for (k, v) in incoming {
                    existing.insert(k.clone(), v.clone());
                }
            }
            _ => node.data = patch,
        }
    }

    fn variables(&self) -> VariableStore {
        self.state.read().unwrap().variables.clone()
    }

    fn add_variable(
        &self,
        name: &str,
        value: &str,
        description: Option<String>,
        folder: Option<String>,
    ) {
        {
            let mut state = self.state.write().unwrap();
            state.variables.upsert_global(name, value, description, folder.clone());
        }
        self.mirror_variable(self.workflow_id, name.to_string(), value.to_string(), folder);
    }

    fn update_variable(&self, name: &str, value: &str) {
        let folder = {
            let mut state = self.state.write().unwrap();
            let existing_folder = state.variables.global(name).and_then(|v| v.folder.clone());
            state.variables.upsert_global(name, value, None, existing_folder.clone());
            existing_folder
        };
        self.mirror_variable(self.workflow_id, name.to_string(), value.to_string(), folder);
    }

    fn interpolate(&self, template: &str) -> String {
        let state = self.state.read().unwrap();
        nodes::interpolate::interpolate(template, &state.variables)
    }

    async fn execute_node(&self, id: &str) -> Result<(), NodeError> {
        let Some(node) = self.node(id) else {
            return Err(NodeError::Fatal(format!("no such node '{id}'")));
        };
        let Some(executor) = self.registry.get(&node.kind) else {
            return Err(NodeError::Fatal(format!(
                "no executor registered for kind '{}'",
                node.kind
            )));
        };
        let executor: Arc<dyn ExecutableNode> = executor.clone();
        executor.execute(&node, self).await
    }

    fn is_executing(&self) -> bool {
        self.state.read().unwrap().executing
    }

    fn set_executing(&self, executing: bool) {
        self.state.write().unwrap().executing = executing;
    }
}
