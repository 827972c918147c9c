//! `note` — documentation only, always succeeds with a null value (spec §4.3).
//!
//! Exists so the planner needn't special-case non-executing nodes.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;

use crate::models::{ExecutionResult, Node};
use crate::traits::{ExecutableNode, ExecutionContext};
use crate::NodeError;

pub struct NoteNode;

#[async_trait]
impl ExecutableNode for NoteNode {
    fn can_execute(&self, kind: &str) -> bool {
        kind == "note"
    }

    async fn execute(&self, node: &Node, ctx: &dyn ExecutionContext) -> Result<(), NodeError> {
        if node.is_executing() {
            return Ok(());
        }
        ctx.update_node_data(&node.id, json!({"isExecuting": true}));

        let mut delta = HashMap::new();
        delta.insert(node.id.clone(), ExecutionResult::ok(Value::Null, 0));
        ctx.set_results(delta);

        ctx.update_node_data(&node.id, json!({"isExecuting": false}));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::StandaloneContext;
    use crate::variables::VariableStore;

    #[tokio::test]
    async fn always_succeeds_with_null() {
        let node = Node { id: "n".into(), kind: "note".into(), label: None, config: Value::Null, data: json!({}) };
        let ctx = StandaloneContext::new(vec![node.clone()], vec![], VariableStore::new());

        NoteNode.execute(&node, &ctx).await.unwrap();

        let result = ctx.result("n").unwrap();
        assert!(result.success);
        assert_eq!(result.output.unwrap(), Value::Null);
    }
}
