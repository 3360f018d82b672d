//! `GET /experiments` — the read-only report API.

use std::sync::Arc;

use axum::{
    extract::State,
    http::header,
    response::{IntoResponse, Response},
    Json,
};

use crate::AppState;

/// Returns the most recent report snapshot, or an empty one before the
/// first background report cycle has completed.
pub async fn get_experiments(State(state): State<Arc<AppState>>) -> Response {
    let snapshot = state.report_snapshot.read().await.clone();

    (
        [(header::CACHE_CONTROL, "max-age=60")],
        Json((*snapshot).clone()),
    )
        .into_response()
}
