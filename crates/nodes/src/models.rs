//! Engine-opaque graph shapes shared by every `ExecutableNode` and by
//! `ExecutionContext` implementations.
//!
//! These mirror `engine::models::{NodeDefinition, Edge}` but live here so
//! the context trait (also in this crate) can speak about them without
//! `nodes` depending on `engine`.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single node in the graph, as seen by an executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    /// Kind tag, e.g. `"trigger"`, `"basicLLMChain"`, `"outputSender"`.
    pub kind: String,
    /// Human label; doubles as the default auto-published variable name.
    pub label: Option<String>,
    /// Kind-specific configuration blob.
    pub config: Value,
    /// Mutable status/output badge data, delta-merged by `update_node_data`.
    pub data: Value,
}

impl Node {
    pub fn is_executing(&self) -> bool {
        self.data
            .get("isExecuting")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

/// Directed edge, source → target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub from: String,
    pub to: String,
}

/// Token/cost accounting plus a completion timestamp for one node run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionStats {
    pub prompt_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,
    pub total_tokens: Option<u64>,
    pub timestamp: DateTime<Utc>,
}

/// The outcome of executing one node, as written through `ctx.set_results`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub duration_ms: i64,
    pub stats: Option<ExecutionStats>,
}

impl ExecutionResult {
    pub fn ok(output: Value, duration_ms: i64) -> Self {
        Self { success: true, output: Some(output), error: None, duration_ms, stats: None }
    }

    pub fn ok_with_stats(output: Value, duration_ms: i64, stats: ExecutionStats) -> Self {
        Self { success: true, output: Some(output), error: None, duration_ms, stats: Some(stats) }
    }

    pub fn fail(error: impl Into<String>, duration_ms: i64) -> Self {
        Self { success: false, output: None, error: Some(error.into()), duration_ms, stats: None }
    }
}

/// Delta to merge into the results map: node id → its result.
pub type ResultDelta = HashMap<String, ExecutionResult>;
