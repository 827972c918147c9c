//! `api` crate — HTTP REST API layer
//!
//! Exposes:
//!   GET    /api/v1/workflows
//!   POST   /api/v1/workflows
//!   GET    /api/v1/workflows/:id
//!   DELETE /api/v1/workflows/:id
//!   POST   /api/v1/workflows/:id/execute
//!   GET    /api/v1/executions/:id/progress
//!   GET    /api/v1/workflows/:id/variables
//!   GET    /api/v1/variables
//!   PUT    /api/v1/variables
//!   DELETE /api/v1/variables/:name
//!   POST   /webhook/:path

pub mod handlers;

use std::sync::Arc;

use axum::{
    routing::{get, post, delete, put},
    Router,
};
use db::DbPool;
use nodes::NodeRegistry;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Worker-slot cap for a workflow run driven in-process by the API (spec
/// §4.6 step 2's default, not the headless worker's own `--max-workers`).
const API_MAX_WORKERS: usize = 4;

#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    /// The built-in `ExecutableNode` registry, wired to real HTTP
    /// dispatchers — shared across every `POST .../execute` call so each
    /// request doesn't pay to rebuild a `reqwest::Client`.
    pub registry: Arc<NodeRegistry>,
    pub max_workers: usize,
}

pub async fn serve(bind: &str, pool: DbPool) -> Result<(), std::io::Error> {
    let registry = Arc::new(nodes::kinds::default_registry(
        Arc::new(nodes::providers::HttpProviderDispatcher::new()),
        Arc::new(nodes::kinds::HttpReportDispatcher::new()),
    ));
    let state = AppState { pool, registry, max_workers: API_MAX_WORKERS };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_router = Router::new()
        .route("/workflows", get(handlers::workflows::list).post(handlers::workflows::create))
        .route("/workflows/:id", get(handlers::workflows::get).delete(handlers::workflows::delete))
        .route("/workflows/:id/execute", post(handlers::executions::execute))
        .route("/executions/:id/progress", get(handlers::executions::progress))
        .route("/workflows/:id/variables", get(handlers::variables::list_for_workflow))
        .route(
            "/variables",
            get(handlers::variables::list_globals).put(handlers::variables::upsert_global),
        )
        .route("/variables/:name", delete(handlers::variables::delete_global));

    let app = Router::new()
        .nest("/api/v1", api_router)
        .route("/webhook/:path", post(handlers::webhooks::handle_webhook))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!("Server listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await
}
