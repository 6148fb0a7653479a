//! Artifact database models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::Result;
use crate::database::time::now_ms;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    PictureBook,
    Song,
    Video,
}

/// A finished, persisted piece of content.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ArtifactDbModel {
    pub id: String,
    pub task_id: String,
    /// picture_book, song or video
    pub kind: String,
    pub title: String,
    pub theme_topic: Option<String>,
    /// JSON document
    pub payload: String,
    pub duration_secs: f64,
    pub created_at: i64,
}

impl ArtifactDbModel {
    pub fn new(
        task_id: impl Into<String>,
        kind: ArtifactKind,
        title: impl Into<String>,
        theme_topic: Option<String>,
        payload: &serde_json::Value,
        duration_secs: f64,
    ) -> Result<Self> {
        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            task_id: task_id.into(),
            kind: kind.to_string(),
            title: title.into(),
            theme_topic,
            payload: serde_json::to_string(payload)?,
            duration_secs,
            created_at: now_ms(),
        })
    }

    pub fn payload_json(&self) -> Result<serde_json::Value> {
        Ok(serde_json::from_str(&self.payload)?)
    }
}
