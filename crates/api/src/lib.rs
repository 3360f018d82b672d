//! needle server library: application state, router construction, and the
//! background report runner.

pub mod handlers;
pub mod report_runner;

use std::sync::Arc;

use axum::{
    routing::get,
    Router,
};
use needle_domain::{Configuration, ReportSnapshot};
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

/// Shared, single-writer/many-reader state. `configuration` is swapped
/// wholesale by the report runner every reload cycle; `report_snapshot` is
/// published the same way at the end of every evaluation cycle. Handlers
/// only ever take a read guard and clone the `Arc` inside it.
pub struct AppState {
    pub configuration: RwLock<Arc<Configuration>>,
    pub report_snapshot: RwLock<Arc<ReportSnapshot>>,
}

impl AppState {
    pub fn new(configuration: Configuration) -> Self {
        Self {
            configuration: RwLock::new(Arc::new(configuration)),
            report_snapshot: RwLock::new(Arc::new(ReportSnapshot::empty())),
        }
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(handlers::index::index))
        .route("/user", get(handlers::assignment::get_user))
        .route("/experiments", get(handlers::report::get_experiments))
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
