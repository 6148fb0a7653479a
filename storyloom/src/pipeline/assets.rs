//! Copies provider-hosted media into object storage.

use std::sync::Arc;

use tracing::debug;

use crate::providers::AssetDownloader;
use crate::storage::{ObjectStorage, StoredObject};
use crate::{Error, Result};

/// Downloads remote assets and stores them under fresh keys.
#[derive(Clone)]
pub struct AssetMirror {
    downloader: Arc<dyn AssetDownloader>,
    storage: Arc<dyn ObjectStorage>,
}

impl AssetMirror {
    pub fn new(downloader: Arc<dyn AssetDownloader>, storage: Arc<dyn ObjectStorage>) -> Self {
        Self {
            downloader,
            storage,
        }
    }

    pub fn storage(&self) -> &Arc<dyn ObjectStorage> {
        &self.storage
    }

    /// Store the asset at `url` and return its public URL.
    ///
    /// URLs that already resolve to a stored key are returned unchanged.
    pub async fn mirror(&self, url: &str) -> Result<String> {
        if url.trim().is_empty() {
            return Err(Error::generation("asset url is empty"));
        }
        if let Some(key) = self.storage.key_for_url(url) {
            if self.storage.exists(&key).await? {
                debug!(key = %key, "Asset already in storage");
                return Ok(url.to_string());
            }
        }

        let asset = self.downloader.download(url).await?;
        let StoredObject { key, url, size } = self
            .storage
            .put(asset.bytes, &asset.content_type)
            .await?;
        debug!(key = %key, size, "Mirrored asset into storage");
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{DownloadedAsset, ProviderResult};
    use crate::storage::LocalStorage;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingDownloader {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl AssetDownloader for CountingDownloader {
        async fn download(&self, _url: &str) -> ProviderResult<DownloadedAsset> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(DownloadedAsset {
                bytes: Bytes::from_static(b"ID3"),
                content_type: "audio/mpeg".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn test_mirror_stores_once() {
        let dir = tempfile::tempdir().unwrap();
        let storage: Arc<dyn ObjectStorage> = Arc::new(LocalStorage::new(dir.path(), "/media"));
        let downloader = Arc::new(CountingDownloader::default());
        let mirror = AssetMirror::new(downloader.clone(), storage.clone());

        let url = mirror.mirror("https://cdn.example.com/a.mp3").await.unwrap();
        assert!(url.starts_with("/media/audio/"));
        assert!(url.ends_with(".mp3"));

        let again = mirror.mirror(&url).await.unwrap();
        assert_eq!(again, url);
        assert_eq!(downloader.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_empty_url_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let storage: Arc<dyn ObjectStorage> = Arc::new(LocalStorage::new(dir.path(), "/media"));
        let mirror = AssetMirror::new(Arc::new(CountingDownloader::default()), storage);
        assert!(matches!(mirror.mirror("  ").await, Err(Error::Generation(_))));
    }
}
