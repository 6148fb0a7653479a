//! Image, speech, music and video capabilities.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{ExternalJobStatus, ProviderResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedImage {
    pub url: String,
    #[serde(default)]
    pub revised_prompt: Option<String>,
}

#[async_trait]
pub trait ImageGenerator: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(&self, prompt: &str, width: u32, height: u32)
    -> ProviderResult<GeneratedImage>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesizedSpeech {
    pub audio_url: String,
    /// Length of the narration in seconds.
    pub duration: f64,
}

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    fn name(&self) -> &str;

    async fn synthesize(
        &self,
        text: &str,
        voice_id: &str,
        speed: f32,
    ) -> ProviderResult<SynthesizedSpeech>;
}

/// One track returned by a finished music job.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MusicTrack {
    pub id: String,
    pub audio_url: String,
    #[serde(default)]
    pub cover_url: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub duration: f64,
    #[serde(default)]
    pub tags: Option<String>,
    #[serde(default)]
    pub lyrics: Option<String>,
}

/// Snapshot of a music job.
#[derive(Debug, Clone)]
pub struct MusicJobUpdate {
    pub status: ExternalJobStatus,
    pub tracks: Vec<MusicTrack>,
    pub message: Option<String>,
}

/// A lyric word aligned to the audio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimedWord {
    pub word: String,
    pub start: f64,
    pub end: f64,
}

/// Snapshot of a companion music-video job.
#[derive(Debug, Clone)]
pub struct MusicVideoUpdate {
    pub status: ExternalJobStatus,
    pub video_url: Option<String>,
    pub message: Option<String>,
}

/// Music generation with timestamp alignment and optional companion video.
#[async_trait]
pub trait MusicProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Submit a generation job and return the provider job id.
    async fn submit(&self, prompt: &str) -> ProviderResult<String>;

    async fn poll(&self, job_id: &str) -> ProviderResult<MusicJobUpdate>;

    async fn fetch_timestamps(&self, job_id: &str, track_id: &str)
    -> ProviderResult<Vec<TimedWord>>;

    /// Submit a video for an already generated track and return the video job id.
    async fn submit_video(&self, job_id: &str, track_id: &str) -> ProviderResult<String>;

    async fn poll_video(&self, video_job_id: &str) -> ProviderResult<MusicVideoUpdate>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoRequest {
    pub first_frame_url: String,
    pub prompt: String,
    /// Requested clip length in seconds.
    pub duration: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_frame_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub negative_prompt: Option<String>,
}

/// Snapshot of an image-to-video job.
#[derive(Debug, Clone)]
pub struct VideoJobUpdate {
    pub status: ExternalJobStatus,
    pub video_url: Option<String>,
    pub duration: Option<f64>,
    pub message: Option<String>,
}

/// Image-to-video generation, driven through submit and poll.
#[async_trait]
pub trait VideoProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn submit(&self, request: &VideoRequest) -> ProviderResult<String>;

    async fn poll(&self, job_id: &str) -> ProviderResult<VideoJobUpdate>;
}
