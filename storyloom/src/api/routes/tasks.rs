//! Task status routes.

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::get,
};
use serde::Serialize;

use crate::api::error::ApiResult;
use crate::api::server::AppState;
use crate::pipeline::{ExecutionLogEntry, GenerationTask};

#[derive(Debug, Serialize)]
pub struct DeleteTaskResponse {
    pub task_id: String,
    pub deleted: bool,
}

#[derive(Debug, Serialize)]
pub struct ExecutionLogResponse {
    pub task_id: String,
    pub total: usize,
    pub entries: Vec<ExecutionLogEntry>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{task_id}", get(get_task).delete(delete_task))
        .route("/{task_id}/logs", get(get_task_logs))
}

async fn get_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> ApiResult<Json<GenerationTask>> {
    Ok(Json(state.manager.status(&task_id).await?))
}

async fn delete_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> ApiResult<Json<DeleteTaskResponse>> {
    let deleted = state.manager.delete_status(&task_id).await?;
    Ok(Json(DeleteTaskResponse { task_id, deleted }))
}

async fn get_task_logs(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> ApiResult<Json<ExecutionLogResponse>> {
    let entries = state.manager.execution_log(&task_id).await?;
    Ok(Json(ExecutionLogResponse {
        task_id,
        total: entries.len(),
        entries,
    }))
}
