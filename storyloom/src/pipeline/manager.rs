//! Generation manager: accepts requests, runs pipelines in the background and
//! owns the terminal transitions of every task.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

use super::context::RunContext;
use super::exec_log::{ExecutionLogEntry, ExecutionLogger, StepRecord};
use super::progress::{
    BOOK_PROGRESS, BOOK_VIDEO_PROGRESS, COMPLETE_PROGRESS, INIT_PROGRESS, ProgressMap,
    ProgressReporter, SAVING_PROGRESS, SONG_PROGRESS, STANDALONE_VIDEO_PROGRESS,
};
use super::registry::{GenerationTask, TaskRegistry, TaskStatus, TaskUpdate};
use super::{
    ArtifactDraft, BookParams, BookVideoParams, Pipelines, SongParams, StandaloneVideoParams,
};
use crate::database::models::{ArtifactDbModel, ArtifactKind, GenerationStep};
use crate::database::repositories::{ArtifactRepository, GenerationLogRepository};
use crate::panic_hook::payload_message;
use crate::{Error, Result};

/// A request for one generation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "params", rename_all = "snake_case")]
pub enum GenerationRequest {
    Book(BookParams),
    Song(SongParams),
    BookVideo(BookVideoParams),
    Video(StandaloneVideoParams),
}

impl GenerationRequest {
    pub fn kind(&self) -> ArtifactKind {
        match self {
            Self::Book(_) => ArtifactKind::PictureBook,
            Self::Song(_) => ArtifactKind::Song,
            Self::BookVideo(_) | Self::Video(_) => ArtifactKind::Video,
        }
    }

    pub fn progress_map(&self) -> ProgressMap {
        match self {
            Self::Book(_) => BOOK_PROGRESS,
            Self::Song(_) => SONG_PROGRESS,
            Self::BookVideo(_) => BOOK_VIDEO_PROGRESS,
            Self::Video(_) => STANDALONE_VIDEO_PROGRESS,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Book(_) => "book",
            Self::Song(_) => "song",
            Self::BookVideo(_) => "book_video",
            Self::Video(_) => "video",
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Book(p) => p.validate(),
            Self::Song(p) => p.validate(),
            Self::BookVideo(p) => p.validate(),
            Self::Video(p) => p.validate(),
        }
    }
}

struct ManagerInner {
    pipelines: Pipelines,
    registry: Arc<dyn TaskRegistry>,
    logs: Arc<dyn GenerationLogRepository>,
    artifacts: Arc<dyn ArtifactRepository>,
}

/// Starts pipeline runs and exposes their status.
///
/// Each run is a detached task that the caller never awaits. A second task
/// supervises it, so a panic inside a pipeline still ends the task as failed.
pub struct GenerationManager {
    inner: Arc<ManagerInner>,
    tracker: TaskTracker,
}

impl GenerationManager {
    pub fn new(
        pipelines: Pipelines,
        registry: Arc<dyn TaskRegistry>,
        logs: Arc<dyn GenerationLogRepository>,
        artifacts: Arc<dyn ArtifactRepository>,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                pipelines,
                registry,
                logs,
                artifacts,
            }),
            tracker: TaskTracker::new(),
        }
    }

    pub fn registry(&self) -> &Arc<dyn TaskRegistry> {
        &self.inner.registry
    }

    /// Validate `request`, seed the registry and launch the run.
    ///
    /// Returns the task id: `task_id` when supplied, a fresh UUID otherwise.
    pub async fn start(
        &self,
        request: GenerationRequest,
        task_id: Option<String>,
    ) -> Result<String> {
        if self.tracker.is_closed() {
            return Err(Error::Other("generation manager is shutting down".to_string()));
        }
        request.validate()?;

        let task_id = task_id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        // Log sequences restart at 1, so an id with a persisted log stays taken.
        if !self.inner.logs.list_for_task(&task_id).await?.is_empty() {
            return Err(Error::already_exists("Task", task_id));
        }
        self.inner.registry.create(&task_id, request.kind()).await?;
        info!(task_id = %task_id, kind = request.label(), "Generation task accepted");

        let logger = Arc::new(ExecutionLogger::new(&task_id, Arc::clone(&self.inner.logs)));
        let progress = ProgressReporter::new(
            &task_id,
            Arc::clone(&self.inner.registry),
            request.progress_map(),
        );
        let ctx = Arc::new(RunContext::new(logger, progress));

        let run = {
            let inner = Arc::clone(&self.inner);
            let ctx = Arc::clone(&ctx);
            self.tracker.spawn(async move { inner.execute(&ctx, request).await })
        };

        let inner = Arc::clone(&self.inner);
        self.tracker.spawn(async move {
            if let Err(join_err) = run.await {
                let reason = if join_err.is_panic() {
                    format!(
                        "pipeline panicked: {}",
                        payload_message(join_err.into_panic().as_ref())
                    )
                } else {
                    "pipeline task was cancelled".to_string()
                };
                error!(task_id = ctx.task_id(), %reason, "Generation task aborted");
                inner.fail(&ctx, Error::Other(reason)).await;
            }
        });

        Ok(task_id)
    }

    /// Animate a saved picture book. Fails before any task is registered when
    /// the artifact is missing or is not a usable picture book.
    pub async fn start_book_video(
        &self,
        artifact_id: &str,
        task_id: Option<String>,
    ) -> Result<String> {
        let artifact = self.inner.artifacts.get(artifact_id).await?;
        let params = BookVideoParams::from_artifact(&artifact)?;
        self.start(GenerationRequest::BookVideo(params), task_id).await
    }

    pub async fn status(&self, task_id: &str) -> Result<GenerationTask> {
        self.inner.registry.get(task_id).await
    }

    /// Forget a task. Deleting an unknown id is not an error.
    pub async fn delete_status(&self, task_id: &str) -> Result<bool> {
        self.inner.registry.delete(task_id).await
    }

    /// Persisted execution log of a task, ordered by sequence.
    pub async fn execution_log(&self, task_id: &str) -> Result<Vec<ExecutionLogEntry>> {
        let rows = self.inner.logs.list_for_task(task_id).await?;
        Ok(rows.into_iter().map(ExecutionLogEntry::from).collect())
    }

    /// Execution log of the run that produced an artifact.
    pub async fn artifact_log(&self, artifact_id: &str) -> Result<Vec<ExecutionLogEntry>> {
        let rows = self.inner.logs.list_for_artifact(artifact_id).await?;
        Ok(rows.into_iter().map(ExecutionLogEntry::from).collect())
    }

    /// Number of runs and supervisors still in flight.
    pub fn active_tasks(&self) -> usize {
        self.tracker.len()
    }

    /// Stop accepting requests and wait for running pipelines to finish.
    pub async fn shutdown(&self) {
        self.tracker.close();
        info!(active = self.tracker.len(), "Waiting for generation tasks to finish");
        self.tracker.wait().await;
    }
}

impl ManagerInner {
    async fn execute(&self, ctx: &RunContext, request: GenerationRequest) {
        let started = Instant::now();
        self.update(ctx.task_id(), TaskUpdate::new().with_status(TaskStatus::Processing))
            .await;
        ctx.progress()
            .checkpoint(INIT_PROGRESS, "init", "Generation started")
            .await;

        let outcome = match self.run_pipeline(ctx, request).await {
            Ok(draft) => self.persist(ctx, draft).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(()) => info!(
                task_id = ctx.task_id(),
                elapsed_secs = started.elapsed().as_secs(),
                "Generation completed"
            ),
            Err(e) => self.fail(ctx, e).await,
        }
    }

    async fn run_pipeline(
        &self,
        ctx: &RunContext,
        request: GenerationRequest,
    ) -> Result<ArtifactDraft> {
        match request {
            GenerationRequest::Book(params) => self.pipelines.book.run(ctx, params).await,
            GenerationRequest::Song(params) => self.pipelines.song.run(ctx, params).await,
            GenerationRequest::BookVideo(params) => {
                self.pipelines.book_video.run(ctx, params).await
            }
            GenerationRequest::Video(params) => self.pipelines.video.run(ctx, params).await,
        }
    }

    /// Save the artifact, re-key the log and mark the task completed.
    async fn persist(&self, ctx: &RunContext, draft: ArtifactDraft) -> Result<()> {
        ctx.enter(GenerationStep::SaveToDb);
        ctx.progress()
            .checkpoint(SAVING_PROGRESS, "saving", "Saving")
            .await;

        let artifact = ArtifactDbModel::new(
            ctx.task_id(),
            draft.kind,
            &draft.title,
            draft.theme_topic.clone(),
            &draft.payload,
            draft.duration_secs,
        )?;
        let artifacts = &self.artifacts;
        let artifact_id = ctx
            .logger()
            .timed(
                GenerationStep::SaveToDb,
                "Artifact saved",
                json!({ "kind": draft.kind, "title": draft.title }),
                artifacts.save(&artifact),
                |id: &String| json!({ "artifact_id": id }),
            )
            .await?;

        ctx.enter(GenerationStep::Complete);
        ctx.logger()
            .record(
                StepRecord::info(GenerationStep::Complete, "Generation complete").with_output(
                    json!({
                        "artifact_id": artifact_id,
                        "title": draft.title,
                        "duration_secs": draft.duration_secs,
                    }),
                ),
            )
            .await;
        if let Err(e) = ctx.logger().attach_artifact(&artifact_id).await {
            warn!(
                task_id = ctx.task_id(),
                artifact_id = %artifact_id,
                error = %e,
                "Failed to attach execution log to artifact"
            );
        }

        let mut result = draft.payload;
        if let Some(map) = result.as_object_mut() {
            map.insert("artifact_id".to_string(), json!(artifact_id));
        }
        let update = TaskUpdate::progress(COMPLETE_PROGRESS, "completed", "Generation complete")
            .with_status(TaskStatus::Completed)
            .with_artifact_id(&artifact_id)
            .with_result(result);
        self.update(ctx.task_id(), update).await;
        Ok(())
    }

    /// Record `err` under the step that was running and end the task as
    /// failed. The task keeps the last progress it reached.
    async fn fail(&self, ctx: &RunContext, err: Error) {
        ctx.logger()
            .failure(ctx.current_step(), "Generation failed", &err)
            .await;
        let mut update = TaskUpdate::new()
            .with_status(TaskStatus::Failed)
            .with_error(err.to_string());
        update.stage = Some("failed".to_string());
        update.message = Some("Generation failed".to_string());
        self.update(ctx.task_id(), update).await;
    }

    async fn update(&self, task_id: &str, update: TaskUpdate) {
        if let Err(e) = self.registry.update(task_id, update).await {
            warn!(task_id, error = %e, "Failed to update task status");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_tagging() {
        let request: GenerationRequest = serde_json::from_value(json!({
            "type": "song",
            "params": {"theme_topic": "rain", "vocal_type": "child_voice"},
        }))
        .unwrap();
        assert_eq!(request.kind(), ArtifactKind::Song);
        assert_eq!(request.label(), "song");
        assert!(request.validate().is_ok());

        let request: GenerationRequest = serde_json::from_value(json!({
            "type": "book_video",
            "params": {"title": "T", "pages": []},
        }))
        .unwrap();
        assert_eq!(request.kind(), ArtifactKind::Video);
        assert!(matches!(request.validate(), Err(Error::Validation(_))));
    }

    #[test]
    fn test_progress_map_per_variant() {
        let book: GenerationRequest = serde_json::from_value(json!({
            "type": "book",
            "params": {"child_name": "Mia", "theme_topic": "teeth"},
        }))
        .unwrap();
        assert_eq!(book.progress_map().bands()[0].stage, "outline");
    }
}
