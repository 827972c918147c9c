//! `MockNode` — a test double for `ExecutableNode`.
//!
//! Useful in unit and integration tests where a real node implementation is
//! either unavailable or irrelevant (the queue/driver scenario tests in
//! particular drive whole DAGs of these).

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

use crate::models::{ExecutionResult, Node};
use crate::traits::{ExecutableNode, ExecutionContext};
use crate::NodeError;

/// Behaviour injected into `MockNode` at construction time.
pub enum MockBehaviour {
    /// Succeed, writing the given JSON value as the result's `output`.
    ReturnValue(Value),
    /// Fail with a `Retryable` error.
    FailRetryable(String),
    /// Fail with a `Fatal` error.
    FailFatal(String),
    /// Fail `times` times with a `Retryable` error, then succeed with `value`.
    FailThenSucceed { times: usize, value: Value },
}

/// A mock node that records every call it receives and writes a
/// programmer-specified `ExecutionResult` through the context, exactly as
/// a real `ExecutableNode` must.
pub struct MockNode {
    /// Kind tag this mock answers to (defaults to `"mock"`).
    pub kind: String,
    pub behaviour: Mutex<MockBehaviour>,
    /// Number of times `execute` has run to completion.
    pub calls: Arc<Mutex<usize>>,
}

impl MockNode {
    pub fn returning(kind: impl Into<String>, value: Value) -> Self {
        Self {
            kind: kind.into(),
            behaviour: Mutex::new(MockBehaviour::ReturnValue(value)),
            calls: Arc::new(Mutex::new(0)),
        }
    }

    pub fn failing_fatal(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            behaviour: Mutex::new(MockBehaviour::FailFatal(msg.into())),
            calls: Arc::new(Mutex::new(0)),
        }
    }

    pub fn failing_retryable(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            behaviour: Mutex::new(MockBehaviour::FailRetryable(msg.into())),
            calls: Arc::new(Mutex::new(0)),
        }
    }

    pub fn fail_then_succeed(kind: impl Into<String>, times: usize, value: Value) -> Self {
        Self {
            kind: kind.into(),
            behaviour: Mutex::new(MockBehaviour::FailThenSucceed { times, value }),
            calls: Arc::new(Mutex::new(0)),
        }
    }

    pub fn call_count(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl ExecutableNode for MockNode {
    fn can_execute(&self, kind: &str) -> bool {
        kind == self.kind
    }

    async fn execute(&self, node: &Node, ctx: &dyn ExecutionContext) -> Result<(), NodeError> {
        if node.is_executing() {
            return Ok(());
        }
        ctx.update_node_data(&node.id, json!({"isExecuting": true}));

        let mut calls = self.calls.lock().unwrap();
        *calls += 1;
        drop(calls);

        let mut behaviour = self.behaviour.lock().unwrap();
        let outcome = match &mut *behaviour {
            MockBehaviour::ReturnValue(v) => Ok(v.clone()),
            MockBehaviour::FailRetryable(msg) => Err(NodeError::Retryable(msg.clone())),
            MockBehaviour::FailFatal(msg) => Err(NodeError::Fatal(msg.clone())),
            MockBehaviour::FailThenSucceed { times, value } => {
                if *times > 0 {
                    *times -= 1;
                    Err(NodeError::Retryable("503 service unavailable".into()))
                } else {
                    Ok(value.clone())
                }
            }
        };
        drop(behaviour);

        ctx.update_node_data(&node.id, json!({"isExecuting": false}));

        match outcome {
            Ok(output) => {
                let mut delta = std::collections::HashMap::new();
                delta.insert(node.id.clone(), ExecutionResult::ok(output, 0));
                ctx.set_results(delta);
                Ok(())
            }
            Err(err) => {
                let mut delta = std::collections::HashMap::new();
                delta.insert(node.id.clone(), ExecutionResult::fail(err.to_string(), 0));
                ctx.set_results(delta);
                Err(err)
            }
        }
    }
}
