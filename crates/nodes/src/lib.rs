//! `nodes` crate — the `ExecutableNode` trait and built-in node implementations.
//!
//! Every node kind implements [`ExecutableNode`]; the queue crate dispatches
//! execution through this trait object via a registered [`traits::NodeRegistry`].
//! This crate has no dependency on `queue`, `engine`, or `db` — it is the
//! dependency-injection seam (spec §4.1) plus everything that only needs
//! the graph/variables/interpolation to do its job.

pub mod context;
pub mod error;
pub mod interpolate;
pub mod kinds;
pub mod mock;
pub mod models;
pub mod providers;
pub mod retry;
pub mod traits;
pub mod variables;

pub use error::NodeError;
pub use models::{Edge, ExecutionResult, ExecutionStats, Node, ResultDelta};
pub use traits::{ExecutableNode, ExecutionContext, NodeRegistry};
pub use variables::{Variable, VariableKind, VariableStore};
