//! Object storage for generated media and reclamation of unreferenced files.

pub mod keys;
pub mod local;
pub mod reclaimer;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Result;

pub use keys::KeyResolver;
pub use local::LocalStorage;
pub use reclaimer::{
    CleanupReport, MIN_AGE_HOURS_RANGE, OrphanReclaimer, ReclaimerConfig, StorageStats,
};

/// An object written to storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredObject {
    pub key: String,
    pub url: String,
    pub size: u64,
}

/// A file found while listing storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredFile {
    pub key: String,
    pub size: u64,
    pub modified: DateTime<Utc>,
}

#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Store `bytes` under a fresh key derived from `content_type`.
    async fn put(&self, bytes: Bytes, content_type: &str) -> Result<StoredObject>;

    async fn exists(&self, key: &str) -> Result<bool>;

    /// Remove an object. Returns `false` when nothing was removed.
    async fn delete(&self, key: &str) -> Result<bool>;

    async fn list(&self) -> Result<Vec<StoredFile>>;

    /// Public URL of a key.
    fn url_for(&self, key: &str) -> String;

    /// Storage key of a URL, or `None` when the URL points elsewhere.
    fn key_for_url(&self, url: &str) -> Option<String>;
}

/// Top-level directory for a MIME type.
pub fn category_for(content_type: &str) -> &'static str {
    let main = content_type.split('/').next().unwrap_or_default();
    match main {
        "image" => "images",
        "audio" => "audio",
        "video" => "video",
        _ => "files",
    }
}

/// File extension for a MIME type.
pub fn extension_for(content_type: &str) -> &'static str {
    match content_type {
        "image/png" => "png",
        "image/jpeg" | "image/jpg" => "jpg",
        "image/webp" => "webp",
        "image/gif" => "gif",
        "audio/mpeg" | "audio/mp3" => "mp3",
        "audio/wav" | "audio/x-wav" => "wav",
        "audio/mp4" | "audio/m4a" => "m4a",
        "audio/ogg" => "ogg",
        "video/mp4" => "mp4",
        "video/webm" => "webm",
        "video/quicktime" => "mov",
        "application/json" => "json",
        _ => "bin",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_for() {
        assert_eq!(category_for("image/png"), "images");
        assert_eq!(category_for("audio/mpeg"), "audio");
        assert_eq!(category_for("video/mp4"), "video");
        assert_eq!(category_for("application/pdf"), "files");
    }

    #[test]
    fn test_extension_for() {
        assert_eq!(extension_for("image/jpeg"), "jpg");
        assert_eq!(extension_for("audio/mpeg"), "mp3");
        assert_eq!(extension_for("something/else"), "bin");
    }
}
