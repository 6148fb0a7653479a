//! Generation routes.
//!
//! Each endpoint validates the parameters, registers a task and returns its
//! id immediately. Clients poll `/api/tasks/{task_id}` for the outcome.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::post,
};
use serde::{Deserialize, Serialize};

use crate::api::error::ApiResult;
use crate::api::server::AppState;
use crate::pipeline::{
    BookParams, BookVideoParams, GenerationRequest, SongParams, StandaloneVideoParams,
};

#[derive(Debug, Default, Deserialize)]
pub struct StartQuery {
    /// Caller-chosen task id. A fresh UUID is used when absent.
    pub task_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AsyncTaskResponse {
    pub task_id: String,
    pub status: &'static str,
    pub message: String,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/book", post(generate_book))
        .route("/song", post(generate_song))
        .route("/book-video", post(generate_book_video))
        .route("/book-video/{artifact_id}", post(generate_book_video_from_artifact))
        .route("/video", post(generate_video))
}

async fn start(
    state: &AppState,
    request: GenerationRequest,
    query: StartQuery,
) -> ApiResult<(StatusCode, Json<AsyncTaskResponse>)> {
    let label = request.label();
    let task_id = state.manager.start(request, query.task_id).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(AsyncTaskResponse {
            task_id,
            status: "pending",
            message: format!("{label} generation started, poll the task for progress"),
        }),
    ))
}

async fn generate_book(
    State(state): State<AppState>,
    Query(query): Query<StartQuery>,
    Json(params): Json<BookParams>,
) -> ApiResult<(StatusCode, Json<AsyncTaskResponse>)> {
    start(&state, GenerationRequest::Book(params), query).await
}

async fn generate_song(
    State(state): State<AppState>,
    Query(query): Query<StartQuery>,
    Json(params): Json<SongParams>,
) -> ApiResult<(StatusCode, Json<AsyncTaskResponse>)> {
    start(&state, GenerationRequest::Song(params), query).await
}

async fn generate_book_video(
    State(state): State<AppState>,
    Query(query): Query<StartQuery>,
    Json(params): Json<BookVideoParams>,
) -> ApiResult<(StatusCode, Json<AsyncTaskResponse>)> {
    start(&state, GenerationRequest::BookVideo(params), query).await
}

async fn generate_book_video_from_artifact(
    State(state): State<AppState>,
    Path(artifact_id): Path<String>,
    Query(query): Query<StartQuery>,
) -> ApiResult<(StatusCode, Json<AsyncTaskResponse>)> {
    let task_id = state
        .manager
        .start_book_video(&artifact_id, query.task_id)
        .await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(AsyncTaskResponse {
            task_id,
            status: "pending",
            message: format!("book_video generation started for artifact {artifact_id}"),
        }),
    ))
}

async fn generate_video(
    State(state): State<AppState>,
    Query(query): Query<StartQuery>,
    Json(params): Json<StandaloneVideoParams>,
) -> ApiResult<(StatusCode, Json<AsyncTaskResponse>)> {
    start(&state, GenerationRequest::Video(params), query).await
}
