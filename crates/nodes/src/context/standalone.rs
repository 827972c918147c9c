//! `StandaloneContext` — the in-memory `ExecutionContext` used by the
//! headless `Driver` and by every unit test in this workspace.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde_json::Value;

use crate::context::state::ContextState;
use crate::models::{Edge, ExecutionResult, Node, ResultDelta};
use crate::traits::{ExecutableNode, ExecutionContext, NodeRegistry};
use crate::variables::VariableStore;
use crate::NodeError;

/// In-memory `ExecutionContext`, backed by plain maps behind a single
/// lock. Construct once per run.
#[derive(Clone)]
pub struct StandaloneContext {
    state: Arc<RwLock<ContextState>>,
    registry: Arc<NodeRegistry>,
}

impl StandaloneContext {
    pub fn new(nodes: Vec<Node>, edges: Vec<Edge>, variables: VariableStore) -> Self {
        Self::with_registry(nodes, edges, variables, Arc::new(HashMap::new()))
    }

    pub fn with_registry(
        nodes: Vec<Node>,
        edges: Vec<Edge>,
        variables: VariableStore,
        registry: Arc<NodeRegistry>,
    ) -> Self {
        Self {
            state: Arc::new(RwLock::new(ContextState { nodes, edges, variables, ..Default::default() })),
            registry,
        }
    }

    pub fn set_registry(&mut self, registry: Arc<NodeRegistry>) {
        self.registry = registry;
    }
}

#[async_trait]
impl ExecutionContext for StandaloneContext {
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
        self.state.write().unwrap().set_results(delta);
    }

    fn update_node_data(&self, id: &str, patch: Value) {
        self.state.write().unwrap().update_node_data(id, patch);
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
        self.state.write().unwrap().variables.upsert_global(name, value, description, folder);
    }

    fn update_variable(&self, name: &str, value: &str) {
        let mut state = self.state.write().unwrap();
        let existing_folder = state.variables.global(name).and_then(|v| v.folder.clone());
        state.variables.upsert_global(name, value, None, existing_folder);
    }

    fn interpolate(&self, template: &str) -> String {
        let state = self.state.read().unwrap();
        crate::interpolate::interpolate(template, &state.variables)
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

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn node(id: &str, kind: &str) -> Node {
        Node { id: id.into(), kind: kind.into(), label: None, config: Value::Null, data: json!({}) }
    }

    #[test]
    fn update_node_data_merges_shallow() {
        let ctx = StandaloneContext::new(vec![node("a", "note")], vec![], VariableStore::new());
        ctx.update_node_data("a", json!({"queueStatus": "executing"}));
        ctx.update_node_data("a", json!({"lastError": "oops"}));

        let n = ctx.node("a").unwrap();
        assert_eq!(n.data["queueStatus"], "executing");
        assert_eq!(n.data["lastError"], "oops");
    }

    #[test]
    fn set_results_is_delta_merge() {
        let ctx = StandaloneContext::new(vec![], vec![], VariableStore::new());
        let mut delta1 = HashMap::new();
        delta1.insert("a".to_string(), ExecutionResult::ok(json!(1), 5));
        ctx.set_results(delta1);

        let mut delta2 = HashMap::new();
        delta2.insert("b".to_string(), ExecutionResult::ok(json!(2), 5));
        ctx.set_results(delta2);

        assert_eq!(ctx.results().len(), 2);
    }

    #[test]
    fn interpolate_uses_store() {
        let ctx = StandaloneContext::new(vec![], vec![], VariableStore::new());
        ctx.add_variable("name", "Ada", None, None);
        assert_eq!(ctx.interpolate("hi {{name}}"), "hi Ada");
    }
}
