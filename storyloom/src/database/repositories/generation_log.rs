//! Generation log repository.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::Result;
use crate::database::models::GenerationLogDbModel;
use crate::database::retry::retry_on_sqlite_busy;
use crate::database::time::now_ms;

#[async_trait]
pub trait GenerationLogRepository: Send + Sync {
    async fn insert(&self, entry: &GenerationLogDbModel) -> Result<()>;
    /// Backfill the artifact id on every entry of a task. Returns the number of rows touched.
    async fn attach_artifact(&self, task_id: &str, artifact_id: &str) -> Result<u64>;
    async fn list_for_task(&self, task_id: &str) -> Result<Vec<GenerationLogDbModel>>;
    async fn list_for_artifact(&self, artifact_id: &str) -> Result<Vec<GenerationLogDbModel>>;
}

pub struct SqlxGenerationLogRepository {
    pool: SqlitePool,
}

impl SqlxGenerationLogRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl GenerationLogRepository for SqlxGenerationLogRepository {
    async fn insert(&self, entry: &GenerationLogDbModel) -> Result<()> {
        retry_on_sqlite_busy("insert_generation_log", || async {
            sqlx::query(
                r#"
                INSERT INTO generation_logs (
                    id, task_id, artifact_id, step, level, sequence, message,
                    input_snapshot, output_snapshot, duration_secs,
                    error_message, error_trace, extra, created_at, updated_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&entry.id)
            .bind(&entry.task_id)
            .bind(&entry.artifact_id)
            .bind(&entry.step)
            .bind(&entry.level)
            .bind(entry.sequence)
            .bind(&entry.message)
            .bind(&entry.input_snapshot)
            .bind(&entry.output_snapshot)
            .bind(entry.duration_secs)
            .bind(&entry.error_message)
            .bind(&entry.error_trace)
            .bind(&entry.extra)
            .bind(entry.created_at)
            .bind(entry.updated_at)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await
    }

    async fn attach_artifact(&self, task_id: &str, artifact_id: &str) -> Result<u64> {
        retry_on_sqlite_busy("attach_artifact", || async {
            let result = sqlx::query(
                "UPDATE generation_logs SET artifact_id = ?, updated_at = ? WHERE task_id = ?",
            )
            .bind(artifact_id)
            .bind(now_ms())
            .bind(task_id)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected())
        })
        .await
    }

    async fn list_for_task(&self, task_id: &str) -> Result<Vec<GenerationLogDbModel>> {
        let rows = sqlx::query_as::<_, GenerationLogDbModel>(
            "SELECT * FROM generation_logs WHERE task_id = ? ORDER BY sequence",
        )
        .bind(task_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn list_for_artifact(&self, artifact_id: &str) -> Result<Vec<GenerationLogDbModel>> {
        let rows = sqlx::query_as::<_, GenerationLogDbModel>(
            "SELECT * FROM generation_logs WHERE artifact_id = ? ORDER BY sequence",
        )
        .bind(artifact_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
