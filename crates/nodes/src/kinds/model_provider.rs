//! `modelProvider` — configuration carrier located by `LLMChain` via
//! `groupId` (spec §4.3). Never contacts the network.

use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;

use crate::models::{ExecutionResult, Node};
use crate::traits::{ExecutableNode, ExecutionContext};
use crate::NodeError;

pub struct ModelProviderNode;

/// Validate that `config.provider` and `config.model` are both present,
/// non-empty strings. Shared with `LlmChainNode` so it can fail fast with
/// the same message when the group it locates is misconfigured.
pub fn validate(config: &serde_json::Value) -> Result<(), NodeError> {
    let provider = config.get("provider").and_then(|v| v.as_str()).filter(|s| !s.is_empty());
    if provider.is_none() {
        return Err(NodeError::Fatal("No provider selected".into()));
    }
    let model = config.get("model").and_then(|v| v.as_str()).filter(|s| !s.is_empty());
    if model.is_none() {
        return Err(NodeError::Fatal("No model selected".into()));
    }
    Ok(())
}

#[async_trait]
impl ExecutableNode for ModelProviderNode {
    fn can_execute(&self, kind: &str) -> bool {
        kind == "modelProvider"
    }

    async fn execute(&self, node: &Node, ctx: &dyn ExecutionContext) -> Result<(), NodeError> {
        if node.is_executing() {
            return Ok(());
        }
        ctx.update_node_data(&node.id, json!({"isExecuting": true}));

        let outcome = validate(&node.config);

        ctx.update_node_data(&node.id, json!({"isExecuting": false}));

        let mut delta = HashMap::new();
        match outcome {
            Ok(()) => {
                delta.insert(node.id.clone(), ExecutionResult::ok(node.config.clone(), 0));
                ctx.set_results(delta);
                Ok(())
            }
            Err(err) => {
                delta.insert(node.id.clone(), ExecutionResult::fail(err.to_string(), 0));
                ctx.set_results(delta);
                ctx.update_node_data(&node.id, json!({"lastError": err.to_string()}));
                Err(err)
            }
        }
    }
}
