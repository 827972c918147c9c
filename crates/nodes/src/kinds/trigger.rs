//! `trigger` — produces no payload, seeds in-degree-0 execution (spec §4.3).

use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;

use crate::models::{ExecutionResult, Node};
use crate::traits::{ExecutableNode, ExecutionContext};
use crate::NodeError;

pub struct TriggerNode;

#[async_trait]
impl ExecutableNode for TriggerNode {
    fn can_execute(&self, kind: &str) -> bool {
        kind == "trigger"
    }

    async fn execute(&self, node: &Node, ctx: &dyn ExecutionContext) -> Result<(), NodeError> {
        if node.is_executing() {
            return Ok(());
        }
        ctx.update_node_data(&node.id, json!({"isExecuting": true}));

        let output = json!({"type": "trigger", "triggered": true});
        let mut delta = HashMap::new();
        delta.insert(node.id.clone(), ExecutionResult::ok(output, 0));
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
    use serde_json::Value;

    #[tokio::test]
    async fn always_succeeds_with_trigger_payload() {
        let node = Node { id: "t".into(), kind: "trigger".into(), label: None, config: Value::Null, data: json!({}) };
        let ctx = StandaloneContext::new(vec![node.clone()], vec![], VariableStore::new());

        TriggerNode.execute(&node, &ctx).await.unwrap();

        let result = ctx.result("t").unwrap();
        assert!(result.success);
        assert_eq!(result.output.unwrap(), json!({"type": "trigger", "triggered": true}));
    }
}
