//! `engine` crate — core domain models, DAG validation, and the execution engine.

pub mod context;
pub mod models;
pub mod error;
pub mod dag;
pub mod driver;
pub mod executor;

pub use models::{Workflow, Trigger, NodeDefinition, Edge};
pub use error::EngineError;
pub use dag::validate_dag;
pub use driver::{run as run_headless, DriverSummary};
pub use executor::{ExecutionSummary, WorkflowExecutor};
