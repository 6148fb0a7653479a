//! Integration tests for the persistence layer.
//!
//! These tests use a real SQLite file so the WAL pragmas and the migrations
//! run exactly as they do in production.

use std::sync::Arc;

use bytes::Bytes;
use serde_json::json;
use tempfile::TempDir;

use storyloom::Error;
use storyloom::database::models::{
    ArtifactDbModel, ArtifactKind, GenerationLogDbModel, GenerationStep, LogLevel,
};
use storyloom::database::repositories::{
    ArtifactRepository, GenerationLogRepository, SqlxArtifactRepository,
    SqlxGenerationLogRepository,
};
use storyloom::database::{DbPool, init_pool, run_migrations};
use storyloom::storage::{LocalStorage, ObjectStorage, OrphanReclaimer, ReclaimerConfig};

async fn setup_test_db() -> (TempDir, DbPool) {
    let dir = TempDir::new().expect("temp dir");
    let url = format!("sqlite:{}?mode=rwc", dir.path().join("repo.db").display());
    let pool = init_pool(&url).await.expect("Failed to create test pool");
    run_migrations(&pool).await.expect("Failed to run migrations");
    (dir, pool)
}

#[tokio::test]
async fn test_migrations_create_tables_in_wal_mode() {
    let (_dir, pool) = setup_test_db().await;

    let tables: Vec<(String,)> =
        sqlx::query_as("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .fetch_all(&pool)
            .await
            .expect("Failed to query tables");
    let names: Vec<&str> = tables.iter().map(|t| t.0.as_str()).collect();
    assert!(names.contains(&"generation_logs"), "generation_logs table missing");
    assert!(names.contains(&"artifacts"), "artifacts table missing");

    let (mode,): (String,) = sqlx::query_as("PRAGMA journal_mode")
        .fetch_one(&pool)
        .await
        .expect("Failed to query journal mode");
    assert_eq!(mode.to_lowercase(), "wal");
}

#[tokio::test]
async fn test_log_entries_list_in_sequence_order_and_attach() {
    let (_dir, pool) = setup_test_db().await;
    let repo = SqlxGenerationLogRepository::new(pool);

    for sequence in [3, 1, 2] {
        let entry = GenerationLogDbModel::new(
            "task-1",
            GenerationStep::ImageGenerate,
            LogLevel::Info,
            sequence,
            format!("entry {sequence}"),
        );
        repo.insert(&entry).await.unwrap();
    }
    let other =
        GenerationLogDbModel::new("task-2", GenerationStep::Init, LogLevel::Info, 1, "other");
    repo.insert(&other).await.unwrap();

    let rows = repo.list_for_task("task-1").await.unwrap();
    let sequences: Vec<i64> = rows.iter().map(|r| r.sequence).collect();
    assert_eq!(sequences, vec![1, 2, 3]);
    assert!(rows.iter().all(|r| r.artifact_id.is_none()));

    assert_eq!(repo.attach_artifact("task-1", "artifact-1").await.unwrap(), 3);
    let attached = repo.list_for_artifact("artifact-1").await.unwrap();
    assert_eq!(attached.len(), 3);
    assert!(attached.iter().all(|r| r.task_id == "task-1"));
    assert!(repo.list_for_artifact("missing").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_duplicate_sequence_within_a_task_is_rejected() {
    let (_dir, pool) = setup_test_db().await;
    let repo = SqlxGenerationLogRepository::new(pool);

    let first = GenerationLogDbModel::new("task-1", GenerationStep::Init, LogLevel::Info, 1, "a");
    repo.insert(&first).await.unwrap();

    let clash = GenerationLogDbModel::new("task-1", GenerationStep::Init, LogLevel::Info, 1, "b");
    match repo.insert(&clash).await {
        Err(Error::DatabaseSqlx(e)) => {
            let db_err = e.as_database_error().expect("database error");
            assert!(db_err.is_unique_violation(), "{db_err}");
        }
        other => panic!("expected a unique violation, got {other:?}"),
    }

    // The same sequence number is free in another task.
    let other = GenerationLogDbModel::new("task-2", GenerationStep::Init, LogLevel::Info, 1, "c");
    repo.insert(&other).await.unwrap();

    let rows = repo.list_for_task("task-1").await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].message, "a");
}

#[tokio::test]
async fn test_artifact_save_get_and_load_all() {
    let (_dir, pool) = setup_test_db().await;
    let repo = SqlxArtifactRepository::new(pool);

    let payload = json!({"title": "Rain", "audio_url": "/media/audio/a.mp3"});
    let artifact = ArtifactDbModel::new(
        "task-1",
        ArtifactKind::Song,
        "Rain",
        Some("weather".to_string()),
        &payload,
        90.0,
    )
    .unwrap();
    let id = repo.save(&artifact).await.unwrap();

    let loaded = repo.get(&id).await.unwrap();
    assert_eq!(loaded.kind, "song");
    assert_eq!(loaded.theme_topic.as_deref(), Some("weather"));
    assert_eq!(loaded.payload_json().unwrap(), payload);
    assert_eq!(repo.load_all().await.unwrap().len(), 1);

    assert!(matches!(repo.get("nope").await, Err(Error::NotFound { .. })));
}

#[tokio::test]
async fn test_reclaimer_scan_against_real_database() {
    let (dir, pool) = setup_test_db().await;
    let artifacts = Arc::new(SqlxArtifactRepository::new(pool));
    let storage = Arc::new(LocalStorage::new(dir.path().join("media"), "/media"));

    let referenced = storage
        .put(Bytes::from_static(b"kept"), "audio/mpeg")
        .await
        .unwrap();
    storage
        .put(Bytes::from_static(b"stray"), "image/png")
        .await
        .unwrap();

    let payload = json!({"all_tracks": [{"audio_url": referenced.url}]});
    let artifact =
        ArtifactDbModel::new("task-1", ArtifactKind::Song, "Rain", None, &payload, 1.0).unwrap();
    artifacts.save(&artifact).await.unwrap();

    let reclaimer = OrphanReclaimer::new(storage, artifacts, ReclaimerConfig::default());
    let keys = reclaimer.referenced_keys().await.unwrap();
    assert!(keys.contains(&referenced.key));

    // Both files are fresh, so neither is a candidate yet.
    let stats = reclaimer.scan(1).await.unwrap();
    assert_eq!(stats.total_files, 2);
    assert_eq!(stats.referenced_files, 1);
    assert_eq!(stats.orphan_files, 0);
}
