//! Generation log database models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::database::time::now_ms;

/// One persisted pipeline step.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct GenerationLogDbModel {
    pub id: String,
    pub task_id: String,
    /// Filled in once the task's artifact is saved.
    pub artifact_id: Option<String>,
    pub step: String,
    pub level: String,
    /// 1-based, gapless per task.
    pub sequence: i64,
    pub message: String,
    /// JSON blob
    pub input_snapshot: String,
    /// JSON blob
    pub output_snapshot: String,
    pub duration_secs: Option<f64>,
    pub error_message: Option<String>,
    pub error_trace: Option<String>,
    /// JSON blob
    pub extra: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl GenerationLogDbModel {
    pub fn new(
        task_id: impl Into<String>,
        step: GenerationStep,
        level: LogLevel,
        sequence: i64,
        message: impl Into<String>,
    ) -> Self {
        let now = now_ms();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            task_id: task_id.into(),
            artifact_id: None,
            step: step.to_string(),
            level: level.to_string(),
            sequence,
            message: message.into(),
            input_snapshot: "{}".to_string(),
            output_snapshot: "{}".to_string(),
            duration_secs: None,
            error_message: None,
            error_trace: None,
            extra: "{}".to_string(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Severity of a generation log entry.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warning,
    Error,
}

/// Known pipeline steps.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum GenerationStep {
    Init,
    Validate,
    StoryGenerate,
    ImageGenerate,
    AudioSynthesize,
    PromptEnhance,
    PromptAnalyze,
    MusicGenerate,
    TrackDownload,
    MusicTimestamps,
    MusicVideo,
    VideoFirstFrame,
    VideoGenerate,
    SaveToDb,
    Complete,
}
