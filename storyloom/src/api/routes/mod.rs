//! API route modules.
//!
//! Organizes routes by resource type.

pub mod generation;
pub mod health;
pub mod logging;
pub mod storage;
pub mod tasks;

use axum::Router;

use crate::api::server::AppState;

/// Create the main API router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .nest("/api/generate", generation::router())
        .nest("/api/tasks", tasks::router())
        .nest("/api/admin/storage", storage::router())
        .nest("/api/admin/logging", logging::router())
        .nest("/api/health", health::router())
        .with_state(state)
}
