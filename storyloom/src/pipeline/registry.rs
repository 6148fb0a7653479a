//! Task registry: current status of every generation task.
//!
//! Clients poll it; the single pipeline run that owns a task id writes it.
//! The store sits behind [`TaskRegistry`] so a shared key-value backend can
//! replace the in-process map without touching the pipelines.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::database::models::ArtifactKind;
use crate::{Error, Result};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Snapshot of one generation task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationTask {
    pub task_id: String,
    pub kind: ArtifactKind,
    pub status: TaskStatus,
    /// 0..=100
    pub progress: u8,
    pub stage: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl GenerationTask {
    pub fn pending(task_id: impl Into<String>, kind: ArtifactKind) -> Self {
        let now = Utc::now();
        Self {
            task_id: task_id.into(),
            kind,
            status: TaskStatus::Pending,
            progress: 0,
            stage: "pending".to_string(),
            message: None,
            artifact_id: None,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Merge the fields present in `update`.
    pub fn apply(&mut self, update: TaskUpdate) {
        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(progress) = update.progress {
            self.progress = progress.min(100);
        }
        if let Some(stage) = update.stage {
            self.stage = stage;
        }
        if let Some(message) = update.message {
            self.message = Some(message);
        }
        if let Some(artifact_id) = update.artifact_id {
            self.artifact_id = Some(artifact_id);
        }
        if let Some(result) = update.result {
            self.result = Some(result);
        }
        if let Some(error) = update.error {
            self.error = Some(error);
        }
        self.updated_at = Utc::now();
    }
}

/// Partial update of a task. Absent fields are left unchanged.
#[derive(Debug, Clone, Default)]
pub struct TaskUpdate {
    pub status: Option<TaskStatus>,
    pub progress: Option<u8>,
    pub stage: Option<String>,
    pub message: Option<String>,
    pub artifact_id: Option<String>,
    pub result: Option<Value>,
    pub error: Option<String>,
}

impl TaskUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Progress checkpoint within a running task.
    pub fn progress(progress: u8, stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            progress: Some(progress),
            stage: Some(stage.into()),
            message: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_artifact_id(mut self, artifact_id: impl Into<String>) -> Self {
        self.artifact_id = Some(artifact_id.into());
        self
    }

    pub fn with_result(mut self, result: Value) -> Self {
        self.result = Some(result);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

#[async_trait]
pub trait TaskRegistry: Send + Sync {
    /// Seed a pending entry. Fails if the id is already in use.
    async fn create(&self, task_id: &str, kind: ArtifactKind) -> Result<GenerationTask>;

    async fn update(&self, task_id: &str, update: TaskUpdate) -> Result<GenerationTask>;

    async fn get(&self, task_id: &str) -> Result<GenerationTask>;

    /// Remove an entry. Returns whether it existed; deleting twice is not an error.
    async fn delete(&self, task_id: &str) -> Result<bool>;
}

/// Process-local registry. Entries live until deleted.
#[derive(Default)]
pub struct InMemoryTaskRegistry {
    tasks: DashMap<String, GenerationTask>,
}

impl InMemoryTaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[async_trait]
impl TaskRegistry for InMemoryTaskRegistry {
    async fn create(&self, task_id: &str, kind: ArtifactKind) -> Result<GenerationTask> {
        match self.tasks.entry(task_id.to_string()) {
            Entry::Occupied(_) => Err(Error::already_exists("Task", task_id)),
            Entry::Vacant(slot) => {
                let task = GenerationTask::pending(task_id, kind);
                slot.insert(task.clone());
                Ok(task)
            }
        }
    }

    async fn update(&self, task_id: &str, update: TaskUpdate) -> Result<GenerationTask> {
        let mut task = self
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| Error::not_found("Task", task_id))?;
        task.apply(update);
        Ok(task.clone())
    }

    async fn get(&self, task_id: &str) -> Result<GenerationTask> {
        self.tasks
            .get(task_id)
            .map(|t| t.clone())
            .ok_or_else(|| Error::not_found("Task", task_id))
    }

    async fn delete(&self, task_id: &str) -> Result<bool> {
        Ok(self.tasks.remove(task_id).is_some())
    }
}
