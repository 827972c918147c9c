//! `ExecutionContext` implementation for the DB-backed run path.
//!
//! `nodes::context::StandaloneContext` covers the headless `Driver`; this
//! module is its sibling for runs started through the API/worker, where
//! results and variables also need to reach Postgres.

mod live;

pub use live::LiveContext;
