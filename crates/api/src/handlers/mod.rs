//! HTTP handler modules, one per resource.

pub mod executions;
pub mod variables;
pub mod webhooks;
pub mod workflows;

pub use crate::AppState;
