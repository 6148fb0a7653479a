//! Storage administration routes.

use axum::{
    Json, Router,
    extract::{Query, State},
    routing::{get, post},
};
use serde::Deserialize;

use crate::api::error::{ApiError, ApiResult};
use crate::api::server::AppState;
use crate::storage::reclaimer::{CleanupReport, MIN_AGE_HOURS_RANGE, StorageStats};

#[derive(Debug, Default, Deserialize)]
pub struct StatsQuery {
    pub min_age_hours: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct CleanupQuery {
    #[serde(default = "default_dry_run")]
    pub dry_run: bool,
    pub min_age_hours: Option<u64>,
}

fn default_dry_run() -> bool {
    true
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/stats", get(storage_stats))
        .route("/cleanup", post(storage_cleanup))
}

fn min_age(state: &AppState, requested: Option<u64>) -> ApiResult<u64> {
    let hours = requested.unwrap_or(state.reclaimer.config().min_age_hours);
    if !MIN_AGE_HOURS_RANGE.contains(&hours) {
        return Err(ApiError::bad_request(format!(
            "min_age_hours must be between {} and {}",
            MIN_AGE_HOURS_RANGE.start(),
            MIN_AGE_HOURS_RANGE.end()
        )));
    }
    Ok(hours)
}

async fn storage_stats(
    State(state): State<AppState>,
    Query(query): Query<StatsQuery>,
) -> ApiResult<Json<StorageStats>> {
    let hours = min_age(&state, query.min_age_hours)?;
    Ok(Json(state.reclaimer.scan(hours).await?))
}

async fn storage_cleanup(
    State(state): State<AppState>,
    Query(query): Query<CleanupQuery>,
) -> ApiResult<Json<CleanupReport>> {
    let hours = min_age(&state, query.min_age_hours)?;
    Ok(Json(state.reclaimer.clean(query.dry_run, hours).await?))
}
