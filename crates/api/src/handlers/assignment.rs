//! `GET /user` — the assignment API.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{NaiveDate, NaiveDateTime, Utc};
use needle_domain::ApiError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct AssignmentQuery {
    #[serde(rename = "user-id")]
    user_id: Option<String>,
    #[serde(rename = "user-signup-date")]
    user_signup_date: Option<String>,
}

#[derive(Debug, Serialize)]
struct DebugExperiment {
    #[serde(rename = "site-area")]
    site_area: String,
    experiment: String,
    branch: String,
}

/// Returns site-wide defaults overridden by whatever branch(es) this user
/// was assigned to, one merge pass per site-area in sorted order.
pub async fn get_user(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AssignmentQuery>,
) -> Result<Response, ApiError> {
    let user_id: i64 = query
        .user_id
        .as_deref()
        .ok_or(ApiError::BadRequest)?
        .parse()
        .map_err(|_| ApiError::BadRequest)?;

    let signup_date_raw = query.user_signup_date.as_deref().ok_or(ApiError::BadRequest)?;
    let signup_date: NaiveDate = signup_date_raw
        .parse::<NaiveDate>()
        .or_else(|_| signup_date_raw.parse::<NaiveDateTime>().map(|dt| dt.date()))
        .map_err(|_| ApiError::BadRequest)?;

    let configuration = state.configuration.read().await.clone();
    let today = Utc::now().date_naive();

    let assignments = needle_domain::assigner::assignments(&configuration, user_id, signup_date, today)?;

    let mut merged: BTreeMap<String, Value> = configuration.defaults.clone();
    let mut debug_experiments = Vec::new();

    for assignment in &assignments {
        for (key, value) in &assignment.branch.parameters {
            merged.insert(key.clone(), value.clone());
        }
        debug_experiments.push(DebugExperiment {
            site_area: assignment.experiment.site_area.clone(),
            experiment: assignment.experiment.name.clone(),
            branch: assignment.branch.name.clone(),
        });
    }

    merged.insert("user-id".to_string(), Value::from(user_id));
    merged.insert(
        "debug-experiments".to_string(),
        serde_json::to_value(&debug_experiments).expect("debug experiments always serialize"),
    );

    Ok((
        [(header::CACHE_CONTROL, "max-age=60")],
        Json(merged),
    )
        .into_response())
}
