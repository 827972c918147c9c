//! Shared in-memory state bag behind both `ExecutionContext` impls.

use std::collections::HashMap;

use serde_json::Value;

use crate::models::{Edge, ExecutionResult, Node};
use crate::variables::VariableStore;

#[derive(Debug, Default)]
pub(crate) struct ContextState {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    pub results: HashMap<String, ExecutionResult>,
    pub variables: VariableStore,
    pub executing: bool,
}

impl ContextState {
    pub(crate) fn node_index(&self, id: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n.id == id)
    }

    pub(crate) fn update_node_data(&mut self, id: &str, patch: Value) {
        let Some(idx) = self.node_index(id) else { return };
        let node = &mut self.nodes[idx];
        match (node.data.as_object_mut(), patch.as_object()) {
            (Some(existing), Some(incoming)) => {
                for (k, v) in incoming {
                    existing.insert(k.clone(), v.clone());
                }
            }
            _ => node.data = patch,
        }
    }

    pub(crate) fn set_results(&mut self, delta: HashMap<String, ExecutionResult>) {
        for (id, result) in delta {
            self.results.insert(id, result);
        }
    }
}
