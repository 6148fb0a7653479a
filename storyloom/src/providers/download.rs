//! Fetching provider-hosted media so it can be mirrored into our storage.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;

use super::{ProviderError, ProviderResult, RetryPolicy};

#[derive(Debug, Clone)]
pub struct DownloadedAsset {
    pub bytes: Bytes,
    pub content_type: String,
}

#[async_trait]
pub trait AssetDownloader: Send + Sync {
    async fn download(&self, url: &str) -> ProviderResult<DownloadedAsset>;
}

/// Downloads over HTTP with the transient-failure retry policy.
pub struct HttpAssetDownloader {
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl HttpAssetDownloader {
    pub fn new(client: reqwest::Client, retry: RetryPolicy) -> Self {
        Self { client, retry }
    }

    async fn download_once(&self, url: &str) -> ProviderResult<DownloadedAsset> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::from_status(
                status.as_u16(),
                format!("download of {url} failed"),
            ));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
            .filter(|v| !v.is_empty() && v != "application/octet-stream")
            .unwrap_or_else(|| guess_content_type(url).to_string());

        let bytes = response.bytes().await?;
        Ok(DownloadedAsset {
            bytes,
            content_type,
        })
    }
}

#[async_trait]
impl AssetDownloader for HttpAssetDownloader {
    async fn download(&self, url: &str) -> ProviderResult<DownloadedAsset> {
        self.retry.run("download", || self.download_once(url)).await
    }
}

/// Guess a MIME type from the extension of a URL path.
pub fn guess_content_type(url: &str) -> &'static str {
    let path = url::Url::parse(url)
        .map(|u| u.path().to_string())
        .unwrap_or_else(|_| url.split(['?', '#']).next().unwrap_or(url).to_string());

    let ext = path
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "m4a" => "audio/mp4",
        "ogg" => "audio/ogg",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mov" => "video/quicktime",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guess_content_type() {
        assert_eq!(
            guess_content_type("https://cdn.example.com/a/b/cover.JPEG?sig=1"),
            "image/jpeg"
        );
        assert_eq!(guess_content_type("https://cdn.example.com/x.mp3"), "audio/mpeg");
        assert_eq!(guess_content_type("/media/video/clip.mp4"), "video/mp4");
        assert_eq!(
            guess_content_type("https://cdn.example.com/stream"),
            "application/octet-stream"
        );
    }
}
