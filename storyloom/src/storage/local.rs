//! Filesystem-backed object storage.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::{KeyResolver, ObjectStorage, StoredFile, StoredObject, category_for, extension_for};
use crate::{Error, Result};

/// Directories that hold stored media. Anything else under the root is ignored.
pub const CATEGORIES: [&str; 4] = ["images", "audio", "video", "files"];

/// Stores objects under `<root>/<category>/<yyyy>/<mm>/<dd>/<uuid>.<ext>`.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
    resolver: KeyResolver,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            resolver: KeyResolver::new(base_url),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a key to a path inside the root, rejecting traversal.
    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let safe = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(Error::validation(format!("invalid storage key: {key}")));
        }
        Ok(self.root.join(relative))
    }

    async fn walk(&self, dir: PathBuf, out: &mut Vec<StoredFile>) -> Result<()> {
        let mut pending = vec![dir];
        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };

            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                let metadata = match entry.metadata().await {
                    Ok(m) => m,
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "Skipping unreadable entry");
                        continue;
                    }
                };

                if metadata.is_dir() {
                    pending.push(path);
                    continue;
                }
                if !metadata.is_file() {
                    continue;
                }

                let Some(key) = self.key_of(&path) else {
                    continue;
                };
                let modified = metadata
                    .modified()
                    .map(DateTime::<Utc>::from)
                    .unwrap_or_else(|_| Utc::now());
                out.push(StoredFile {
                    key,
                    size: metadata.len(),
                    modified,
                });
            }
        }
        Ok(())
    }

    fn key_of(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<&str> = relative
            .components()
            .map(|c| c.as_os_str().to_str())
            .collect::<Option<_>>()?;
        Some(parts.join("/"))
    }
}

#[async_trait]
impl ObjectStorage for LocalStorage {
    async fn put(&self, bytes: Bytes, content_type: &str) -> Result<StoredObject> {
        let key = format!(
            "{}/{}/{}.{}",
            category_for(content_type),
            Utc::now().format("%Y/%m/%d"),
            uuid::Uuid::new_v4(),
            extension_for(content_type)
        );
        let path = self.path_for(&key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &bytes).await?;
        debug!(key = %key, size = bytes.len(), "Stored object");

        Ok(StoredObject {
            url: self.resolver.url_for(&key),
            size: bytes.len() as u64,
            key,
        })
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let path = self.path_for(key)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self) -> Result<Vec<StoredFile>> {
        let mut files = Vec::new();
        for category in CATEGORIES {
            self.walk(self.root.join(category), &mut files).await?;
        }
        Ok(files)
    }

    fn url_for(&self, key: &str) -> String {
        self.resolver.url_for(key)
    }

    fn key_for_url(&self, url: &str) -> Option<String> {
        self.resolver.key_for_url(url)
    }
}
