//! The dependency-injection seam (`ExecutionContext`) and the executor
//! contract (`ExecutableNode`) — spec §4.1 and §4.3.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;

use crate::models::{Edge, ExecutionResult, Node, ResultDelta};
use crate::variables::VariableStore;
use crate::NodeError;

/// Removes any hidden dependency on a global store from executors, so the
/// same `ExecutableNode` code runs against a headless, in-memory context
/// or a host-backed one. Holds no copies — every getter reflects the
/// host's current state at call time.
#[async_trait]
pub trait ExecutionContext: Send + Sync {
    fn node(&self, id: &str) -> Option<Node>;
    fn nodes(&self) -> Vec<Node>;
    fn edges(&self) -> Vec<Edge>;

    fn result(&self, id: &str) -> Option<ExecutionResult>;
    fn results(&self) -> HashMap<String, ExecutionResult>;
    /// Delta-merge into the results map — never replaces the whole map.
    fn set_results(&self, delta: ResultDelta);

    /// Shallow-merge `patch` into the node's `data` blob.
    fn update_node_data(&self, id: &str, patch: Value);

    fn variables(&self) -> VariableStore;
    fn add_variable(
        &self,
        name: &str,
        value: &str,
        description: Option<String>,
        folder: Option<String>,
    );
    fn update_variable(&self, name: &str, value: &str);

    /// Replace every `{{name}}` in `template` using the current variable
    /// table (spec §4.2).
    fn interpolate(&self, template: &str) -> String;

    /// Recursive entry point some executors may use; in practice rarely
    /// needed since the queue drives execution.
    async fn execute_node(&self, id: &str) -> Result<(), NodeError>;

    fn is_executing(&self) -> bool;
    fn set_executing(&self, executing: bool);
}

/// Strategy interface for one node kind.
#[async_trait]
pub trait ExecutableNode: Send + Sync {
    /// Whether this implementation handles `kind` (the node's `kind` tag).
    fn can_execute(&self, kind: &str) -> bool;

    /// Execute the node's side effects. Implementations are responsible
    /// for calling `ctx.set_results` with this node's `ExecutionResult`
    /// and `ctx.update_node_data` with a last-known-summary before
    /// returning `Ok(())`. Returning `Err` means no result could even be
    /// produced.
    async fn execute(&self, node: &Node, ctx: &dyn ExecutionContext) -> Result<(), NodeError>;
}

/// Maps `kind` strings to registered executors.
pub type NodeRegistry = HashMap<String, std::sync::Arc<dyn ExecutableNode>>;
