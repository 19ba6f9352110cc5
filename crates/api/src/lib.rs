//! HTTP API server with observability for the catalog read side.
//!
//! Accepts domain events from the bus, serves paged catalog lists, and
//! exposes structured logging (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use projections::{ProjectionHandler, ProjectionRegistry, QueryHandler};
use read_model::ReadModelStore;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::Config;

/// Store shared by every handler, chosen at startup.
pub type SharedStore = Arc<dyn ReadModelStore>;

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub store: SharedStore,
    pub projections: ProjectionHandler<SharedStore>,
    pub queries: QueryHandler<SharedStore>,
    pub projection_timeout: Duration,
}

/// Wires the handlers around a store.
pub fn create_state(store: SharedStore, config: &Config) -> Arc<AppState> {
    let projections =
        ProjectionHandler::new(Arc::clone(&store), Arc::new(ProjectionRegistry::catalog()))
            .with_max_conflict_retries(config.max_conflict_retries);
    let queries =
        QueryHandler::new(Arc::clone(&store)).with_default_page_size(config.default_page_size);

    Arc::new(AppState {
        store,
        projections,
        queries,
        projection_timeout: config.projection_timeout,
    })
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::scrape))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/events", post(routes::events::ingest))
        .route("/catalog/{kind}", get(routes::catalog::list))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
