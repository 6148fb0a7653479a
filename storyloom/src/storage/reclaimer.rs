//! Orphan resource reclaimer.
//!
//! Diffs the files physically present in object storage against the keys
//! referenced by persisted artifacts and deletes the unreferenced remainder.
//! Files younger than the minimum age are never candidates: a running
//! pipeline writes media well before its artifact is saved.

use std::collections::HashSet;
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::{Duration, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{ObjectStorage, StoredFile};
use crate::database::repositories::ArtifactRepository;
use crate::{Error, Result};

/// Payload fields that may hold a stored media URL, at any nesting depth.
pub const URL_FIELDS: [&str; 6] = [
    "image_url",
    "audio_url",
    "video_url",
    "cover_url",
    "provider_cover_url",
    "thumbnail_url",
];

/// Accepted age floors, in hours, for configured and requested runs.
pub const MIN_AGE_HOURS_RANGE: RangeInclusive<u64> = 1..=720;

/// Configuration for the reclaimer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReclaimerConfig {
    /// Files younger than this are never reclaimed.
    #[serde(default = "default_min_age_hours")]
    pub min_age_hours: u64,

    /// Interval between background runs in seconds. 0 disables the timer.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Maximum number of keys listed in a report.
    #[serde(default = "default_report_limit")]
    pub report_limit: usize,

    /// Maximum number of error messages listed in a report.
    #[serde(default = "default_error_limit")]
    pub error_limit: usize,
}

fn default_min_age_hours() -> u64 {
    24
}

fn default_interval_secs() -> u64 {
    86_400
}

fn default_report_limit() -> usize {
    100
}

fn default_error_limit() -> usize {
    20
}

impl Default for ReclaimerConfig {
    fn default() -> Self {
        Self {
            min_age_hours: default_min_age_hours(),
            interval_secs: default_interval_secs(),
            report_limit: default_report_limit(),
            error_limit: default_error_limit(),
        }
    }
}

impl ReclaimerConfig {
    pub fn with_min_age_hours(mut self, hours: u64) -> Self {
        self.min_age_hours = hours;
        self
    }

    pub fn with_interval_secs(mut self, secs: u64) -> Self {
        self.interval_secs = secs;
        self
    }
}

/// Read-only summary of storage usage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageStats {
    pub total_files: usize,
    pub referenced_files: usize,
    pub orphan_files: usize,
    pub orphan_size_bytes: u64,
    pub min_age_hours: u64,
}

/// Outcome of a cleanup run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CleanupReport {
    pub scanned_files: usize,
    pub referenced_files: usize,
    pub orphan_files: usize,
    pub deleted_files: usize,
    /// Bytes freed, or that would be freed in a dry run.
    pub deleted_bytes: u64,
    pub failed_deletions: usize,
    pub dry_run: bool,
    pub duration_secs: f64,
    /// Orphan keys, capped at the configured report limit.
    pub orphan_keys: Vec<String>,
    /// Per-file failures, capped at the configured error limit.
    pub errors: Vec<String>,
}

struct OrphanSet {
    total_files: usize,
    referenced_files: usize,
    orphans: Vec<StoredFile>,
}

pub struct OrphanReclaimer {
    storage: Arc<dyn ObjectStorage>,
    artifacts: Arc<dyn ArtifactRepository>,
    config: ReclaimerConfig,
}

impl OrphanReclaimer {
    pub fn new(
        storage: Arc<dyn ObjectStorage>,
        artifacts: Arc<dyn ArtifactRepository>,
        config: ReclaimerConfig,
    ) -> Self {
        Self {
            storage,
            artifacts,
            config,
        }
    }

    pub fn config(&self) -> &ReclaimerConfig {
        &self.config
    }

    /// Every storage key referenced by a persisted artifact.
    ///
    /// An artifact whose payload cannot be parsed aborts the run: its
    /// references are unknown, so nothing can be proven unreferenced.
    pub async fn referenced_keys(&self) -> Result<HashSet<String>> {
        let mut keys = HashSet::new();
        for artifact in self.artifacts.load_all().await? {
            let payload = artifact.payload_json().map_err(|e| {
                Error::Other(format!(
                    "artifact {} has an unreadable payload, refusing to reclaim: {e}",
                    artifact.id
                ))
            })?;
            collect_referenced_keys(&payload, self.storage.as_ref(), &mut keys);
        }
        Ok(keys)
    }

    async fn find_orphans(&self, min_age_hours: u64) -> Result<OrphanSet> {
        let cutoff = age_cutoff(Utc::now(), min_age_hours)?;
        let referenced = self.referenced_keys().await?;
        let files = self.storage.list().await?;

        let total_files = files.len();
        let orphans = files
            .into_iter()
            .filter(|f| !referenced.contains(&f.key) && f.modified < cutoff)
            .collect();

        Ok(OrphanSet {
            total_files,
            referenced_files: referenced.len(),
            orphans,
        })
    }

    /// Compute storage statistics without touching anything.
    pub async fn scan(&self, min_age_hours: u64) -> Result<StorageStats> {
        let set = self.find_orphans(min_age_hours).await?;
        Ok(StorageStats {
            total_files: set.total_files,
            referenced_files: set.referenced_files,
            orphan_files: set.orphans.len(),
            orphan_size_bytes: set.orphans.iter().map(|f| f.size).sum(),
            min_age_hours,
        })
    }

    /// Delete orphans older than `min_age_hours`, or only report them when `dry_run`.
    ///
    /// Each deletion is independent; a failure is recorded and the batch continues.
    pub async fn clean(&self, dry_run: bool, min_age_hours: u64) -> Result<CleanupReport> {
        let started = Instant::now();
        let set = self.find_orphans(min_age_hours).await?;

        let mut report = CleanupReport {
            scanned_files: set.total_files,
            referenced_files: set.referenced_files,
            orphan_files: set.orphans.len(),
            dry_run,
            orphan_keys: set
                .orphans
                .iter()
                .take(self.config.report_limit)
                .map(|f| f.key.clone())
                .collect(),
            ..Default::default()
        };

        if dry_run {
            report.deleted_bytes = set.orphans.iter().map(|f| f.size).sum();
        } else {
            for file in &set.orphans {
                let failure = match self.storage.delete(&file.key).await {
                    Ok(true) => {
                        report.deleted_files += 1;
                        report.deleted_bytes += file.size;
                        debug!(key = %file.key, size = file.size, "Deleted orphan file");
                        continue;
                    }
                    Ok(false) => format!("Failed to delete: {}", file.key),
                    Err(e) => format!("Error deleting {}: {e}", file.key),
                };
                warn!(key = %file.key, "{failure}");
                report.failed_deletions += 1;
                if report.errors.len() < self.config.error_limit {
                    report.errors.push(failure);
                }
            }
        }

        report.duration_secs = started.elapsed().as_secs_f64();
        info!(
            dry_run,
            min_age_hours,
            scanned = report.scanned_files,
            orphans = report.orphan_files,
            deleted = report.deleted_files,
            failed = report.failed_deletions,
            bytes = report.deleted_bytes,
            "Orphan cleanup finished"
        );
        Ok(report)
    }

    /// Start the periodic cleanup task. Returns `None` when the interval is 0.
    pub fn start_background_task(
        self: &Arc<Self>,
        cancellation_token: CancellationToken,
    ) -> Option<JoinHandle<()>> {
        if self.config.interval_secs == 0 {
            info!("Orphan reclaimer timer disabled");
            return None;
        }

        let reclaimer = Arc::clone(self);
        Some(tokio::spawn(async move {
            let period = Duration::from_secs(reclaimer.config.interval_secs);
            let mut ticker = interval_at(tokio::time::Instant::now() + period, period);

            info!(
                "Orphan reclaimer started (min age: {}h, interval: {}s)",
                reclaimer.config.min_age_hours, reclaimer.config.interval_secs
            );

            loop {
                tokio::select! {
                    _ = cancellation_token.cancelled() => {
                        info!("Orphan reclaimer shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        let min_age_hours = reclaimer.config.min_age_hours;
                        if let Err(e) = reclaimer.clean(false, min_age_hours).await {
                            error!("Orphan cleanup failed: {}", e);
                        }
                    }
                }
            }
        }))
    }
}

/// Modification time a file must predate to be a candidate.
fn age_cutoff(now: DateTime<Utc>, min_age_hours: u64) -> Result<DateTime<Utc>> {
    i64::try_from(min_age_hours)
        .ok()
        .and_then(TimeDelta::try_hours)
        .and_then(|age| now.checked_sub_signed(age))
        .ok_or_else(|| {
            Error::validation(format!("min_age_hours {min_age_hours} is out of range"))
        })
}

/// Walk `payload` and add the storage key of every recognized URL field.
pub fn collect_referenced_keys(
    payload: &Value,
    storage: &dyn ObjectStorage,
    keys: &mut HashSet<String>,
) {
    match payload {
        Value::Object(map) => {
            for (field, value) in map {
                match value {
                    Value::String(url) if URL_FIELDS.contains(&field.as_str()) => {
                        if let Some(key) = storage.key_for_url(url) {
                            keys.insert(key);
                        }
                    }
                    Value::Object(_) | Value::Array(_) => {
                        collect_referenced_keys(value, storage, keys)
                    }
                    _ => {}
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_referenced_keys(item, storage, keys);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::{ArtifactDbModel, ArtifactKind};
    use crate::storage::{LocalStorage, StoredObject};
    use async_trait::async_trait;
    use bytes::Bytes;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::time::SystemTime;
    use tempfile::TempDir;

    #[derive(Default)]
    struct MemoryArtifacts {
        rows: Mutex<Vec<ArtifactDbModel>>,
    }

    #[async_trait]
    impl ArtifactRepository for MemoryArtifacts {
        async fn save(&self, artifact: &ArtifactDbModel) -> Result<String> {
            self.rows.lock().push(artifact.clone());
            Ok(artifact.id.clone())
        }

        async fn get(&self, id: &str) -> Result<ArtifactDbModel> {
            self.rows
                .lock()
                .iter()
                .find(|a| a.id == id)
                .cloned()
                .ok_or_else(|| Error::not_found("Artifact", id))
        }

        async fn load_all(&self) -> Result<Vec<ArtifactDbModel>> {
            Ok(self.rows.lock().clone())
        }
    }

    fn age_file(root: &std::path::Path, key: &str, hours: u64) {
        let when = SystemTime::now() - std::time::Duration::from_secs(hours * 3600);
        let file = std::fs::File::options()
            .write(true)
            .open(root.join(key))
            .unwrap();
        file.set_modified(when).unwrap();
    }

    struct Fixture {
        dir: TempDir,
        storage: Arc<LocalStorage>,
        artifacts: Arc<MemoryArtifacts>,
        reclaimer: OrphanReclaimer,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(LocalStorage::new(dir.path(), "/media"));
        let artifacts = Arc::new(MemoryArtifacts::default());
        let reclaimer = OrphanReclaimer::new(
            storage.clone(),
            artifacts.clone(),
            ReclaimerConfig::default(),
        );
        Fixture {
            dir,
            storage,
            artifacts,
            reclaimer,
        }
    }

    async fn reference(fx: &Fixture, payload: Value) {
        let artifact =
            ArtifactDbModel::new("task", ArtifactKind::PictureBook, "t", None, &payload, 0.0)
                .unwrap();
        fx.artifacts.save(&artifact).await.unwrap();
    }

    #[test]
    fn test_collect_nested_references() {
        let storage = LocalStorage::new("/unused", "https://cdn.example.com/media");
        let payload = json!({
            "title": "Brave Bunny",
            "cover_url": "https://cdn.example.com/media/images/cover.png",
            "pages": [
                { "image_url": "/media/images/p1.png", "audio_url": "audio/p1.mp3" },
                { "image_url": "https://provider.example.com/remote.png" }
            ],
            "all_tracks": [
                {
                    "audio_url": "/media/audio/t1.mp3",
                    "nested": { "video_url": "/media/video/v.mp4" }
                }
            ],
            "clips": [{ "video_url": "/media/video/c1.mp4", "page_num": 1 }],
            "text": "/media/images/not-a-url-field.png"
        });

        let mut keys = HashSet::new();
        collect_referenced_keys(&payload, &storage, &mut keys);

        let mut keys: Vec<_> = keys.into_iter().collect();
        keys.sort();
        assert_eq!(
            keys,
            vec![
                "audio/p1.mp3",
                "audio/t1.mp3",
                "images/cover.png",
                "images/p1.png",
                "video/c1.mp4",
                "video/v.mp4",
            ]
        );
    }

    #[tokio::test]
    async fn test_fresh_unreferenced_file_is_not_orphan() {
        let fx = fixture();
        fx.storage
            .put(Bytes::from_static(b"new"), "image/png")
            .await
            .unwrap();

        let stats = fx.reclaimer.scan(24).await.unwrap();
        assert_eq!(stats.total_files, 1);
        assert_eq!(stats.orphan_files, 0);
    }

    #[tokio::test]
    async fn test_old_unreferenced_file_is_orphan_and_referenced_never() {
        let fx = fixture();
        let orphan = fx
            .storage
            .put(Bytes::from_static(b"orphan"), "image/png")
            .await
            .unwrap();
        let kept = fx
            .storage
            .put(Bytes::from_static(b"kept"), "audio/mpeg")
            .await
            .unwrap();
        age_file(fx.dir.path(), &orphan.key, 48);
        age_file(fx.dir.path(), &kept.key, 24 * 365);
        reference(&fx, json!({ "pages": [{ "audio_url": kept.url }] }))
            .await;

        let stats = fx.reclaimer.scan(24).await.unwrap();
        assert_eq!(stats.total_files, 2);
        assert_eq!(stats.referenced_files, 1);
        assert_eq!(stats.orphan_files, 1);
        assert_eq!(stats.orphan_size_bytes, 6);

        let report = fx.reclaimer.clean(false, 24).await.unwrap();
        assert_eq!(report.orphan_keys, vec![orphan.key.clone()]);
        assert_eq!(report.deleted_files, 1);
        assert_eq!(report.deleted_bytes, 6);
        assert!(!fx.storage.exists(&orphan.key).await.unwrap());
        assert!(fx.storage.exists(&kept.key).await.unwrap());
    }

    #[tokio::test]
    async fn test_dry_run_matches_scan_and_deletes_nothing() {
        let fx = fixture();
        for _ in 0..3 {
            let obj = fx
                .storage
                .put(Bytes::from_static(b"abcd"), "video/mp4")
                .await
                .unwrap();
            age_file(fx.dir.path(), &obj.key, 30);
        }

        let stats = fx.reclaimer.scan(24).await.unwrap();
        let report = fx.reclaimer.clean(true, 24).await.unwrap();

        assert!(report.dry_run);
        assert_eq!(report.orphan_files, stats.orphan_files);
        assert_eq!(report.orphan_keys.len(), 3);
        assert_eq!(report.deleted_files, 0);
        assert_eq!(report.deleted_bytes, stats.orphan_size_bytes);
        assert_eq!(fx.storage.list().await.unwrap().len(), 3);
    }

    #[test]
    fn test_age_cutoff_rejects_out_of_range_hours() {
        let now = Utc::now();
        assert_eq!(age_cutoff(now, 0).unwrap(), now);
        assert_eq!(age_cutoff(now, 24).unwrap(), now - TimeDelta::hours(24));
        assert!(matches!(age_cutoff(now, 1 << 60), Err(Error::Validation(_))));
        assert!(matches!(age_cutoff(now, u64::MAX), Err(Error::Validation(_))));
    }

    #[tokio::test]
    async fn test_huge_min_age_never_reports_fresh_files() {
        let fx = fixture();
        fx.storage
            .put(Bytes::from_static(b"new"), "image/png")
            .await
            .unwrap();

        assert!(matches!(fx.reclaimer.scan(u64::MAX).await, Err(Error::Validation(_))));
        assert!(matches!(fx.reclaimer.scan(1 << 60).await, Err(Error::Validation(_))));
        assert!(matches!(
            fx.reclaimer.clean(false, u64::MAX).await,
            Err(Error::Validation(_))
        ));
        assert_eq!(fx.storage.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unreadable_payload_aborts() {
        let fx = fixture();
        let mut artifact =
            ArtifactDbModel::new("task", ArtifactKind::Song, "t", None, &json!({}), 0.0).unwrap();
        artifact.payload = "{not json".to_string();
        fx.artifacts.save(&artifact).await.unwrap();

        assert!(fx.reclaimer.scan(0).await.is_err());
    }

    /// Storage whose deletes fail for one key.
    struct FlakyStorage {
        inner: LocalStorage,
        broken_key: Mutex<Option<String>>,
    }

    #[async_trait]
    impl ObjectStorage for FlakyStorage {
        async fn put(&self, bytes: Bytes, content_type: &str) -> Result<StoredObject> {
            self.inner.put(bytes, content_type).await
        }

        async fn exists(&self, key: &str) -> Result<bool> {
            self.inner.exists(key).await
        }

        async fn delete(&self, key: &str) -> Result<bool> {
            if self.broken_key.lock().as_deref() == Some(key) {
                return Err(Error::Io(std::io::Error::other("permission denied")));
            }
            self.inner.delete(key).await
        }

        async fn list(&self) -> Result<Vec<StoredFile>> {
            self.inner.list().await
        }

        fn url_for(&self, key: &str) -> String {
            self.inner.url_for(key)
        }

        fn key_for_url(&self, url: &str) -> Option<String> {
            self.inner.key_for_url(url)
        }
    }

    #[tokio::test]
    async fn test_failed_deletion_does_not_abort_batch() {
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(FlakyStorage {
            inner: LocalStorage::new(dir.path(), "/media"),
            broken_key: Mutex::new(None),
        });
        let mut keys = Vec::new();
        for _ in 0..3 {
            let obj = storage
                .put(Bytes::from_static(b"x"), "image/png")
                .await
                .unwrap();
            age_file(dir.path(), &obj.key, 100);
            keys.push(obj.key);
        }
        *storage.broken_key.lock() = Some(keys[1].clone());

        let reclaimer = OrphanReclaimer::new(
            storage.clone(),
            Arc::new(MemoryArtifacts::default()),
            ReclaimerConfig::default(),
        );
        let report = reclaimer.clean(false, 24).await.unwrap();

        assert_eq!(report.orphan_files, 3);
        assert_eq!(report.deleted_files, 2);
        assert_eq!(report.failed_deletions, 1);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].contains(&keys[1]));
        assert!(storage.exists(&keys[1]).await.unwrap());
    }

    #[tokio::test]
    async fn test_report_lists_are_capped() {
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(LocalStorage::new(dir.path(), "/media"));
        for _ in 0..5 {
            let obj = storage
                .put(Bytes::from_static(b"x"), "audio/mpeg")
                .await
                .unwrap();
            age_file(dir.path(), &obj.key, 100);
        }
        let config = ReclaimerConfig {
            report_limit: 2,
            ..Default::default()
        };
        let reclaimer =
            OrphanReclaimer::new(storage, Arc::new(MemoryArtifacts::default()), config);

        let report = reclaimer.clean(true, 1).await.unwrap();
        assert_eq!(report.orphan_files, 5);
        assert_eq!(report.orphan_keys.len(), 2);
    }

    #[test]
    fn test_config_defaults_and_builder() {
        let config = ReclaimerConfig::default();
        assert_eq!(config.min_age_hours, 24);
        assert_eq!(config.report_limit, 100);
        assert_eq!(config.error_limit, 20);

        let config = config.with_min_age_hours(2).with_interval_secs(0);
        assert_eq!(config.min_age_hours, 2);
        assert_eq!(config.interval_secs, 0);
    }

    #[tokio::test]
    async fn test_disabled_timer_spawns_nothing() {
        let fx = fixture();
        let reclaimer = Arc::new(OrphanReclaimer::new(
            fx.storage.clone(),
            fx.artifacts.clone(),
            ReclaimerConfig::default().with_interval_secs(0),
        ));
        assert!(
            reclaimer
                .start_background_task(CancellationToken::new())
                .is_none()
        );
    }
}
