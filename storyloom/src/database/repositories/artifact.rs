//! Artifact repository.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::database::models::ArtifactDbModel;
use crate::database::retry::retry_on_sqlite_busy;
use crate::{Error, Result};

#[async_trait]
pub trait ArtifactRepository: Send + Sync {
    /// Persist an artifact and return its id.
    async fn save(&self, artifact: &ArtifactDbModel) -> Result<String>;
    async fn get(&self, id: &str) -> Result<ArtifactDbModel>;
    async fn load_all(&self) -> Result<Vec<ArtifactDbModel>>;
}

pub struct SqlxArtifactRepository {
    pool: SqlitePool,
}

impl SqlxArtifactRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ArtifactRepository for SqlxArtifactRepository {
    async fn save(&self, artifact: &ArtifactDbModel) -> Result<String> {
        retry_on_sqlite_busy("save_artifact", || async {
            sqlx::query(
                r#"
                INSERT INTO artifacts (
                    id, task_id, kind, title, theme_topic, payload, duration_secs, created_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&artifact.id)
            .bind(&artifact.task_id)
            .bind(&artifact.kind)
            .bind(&artifact.title)
            .bind(&artifact.theme_topic)
            .bind(&artifact.payload)
            .bind(artifact.duration_secs)
            .bind(artifact.created_at)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await?;
        Ok(artifact.id.clone())
    }

    async fn get(&self, id: &str) -> Result<ArtifactDbModel> {
        sqlx::query_as::<_, ArtifactDbModel>("SELECT * FROM artifacts WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::not_found("Artifact", id))
    }

    async fn load_all(&self) -> Result<Vec<ArtifactDbModel>> {
        let rows = sqlx::query_as::<_, ArtifactDbModel>(
            "SELECT * FROM artifacts ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
