//! Shared fixtures: in-process fake providers and a manager wired to a
//! temporary SQLite file and storage root.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tempfile::TempDir;

use storyloom::Result;
use storyloom::database::models::ArtifactKind;
use storyloom::database::repositories::{SqlxArtifactRepository, SqlxGenerationLogRepository};
use storyloom::database::{DbPool, init_pool, run_migrations};
use storyloom::pipeline::{
    GenerationManager, GenerationTask, InMemoryTaskRegistry, PipelineSettings, Pipelines,
    PollConfig, ProviderSet, TaskRegistry, TaskUpdate,
};
use storyloom::providers::{
    AnalysisRequest, AssetDownloader, DownloadedAsset, ExternalJobStatus, FailureKind,
    GeneratedImage, ImageGenerator, MusicJobUpdate, MusicProvider, MusicTrack, MusicVideoUpdate,
    PromptAnalysis, PromptAnalyzer, PromptEnhancer, ProviderError, ProviderResult,
    SpeechSynthesizer, SynthesizedSpeech, TextGenerator, TimedWord, VideoJobUpdate,
    VideoProvider, VideoRequest,
};
use storyloom::storage::{LocalStorage, ObjectStorage};

/// Outline with `pages` pages in the shape the book pipeline expects.
pub fn outline(pages: usize) -> Value {
    let pages: Vec<Value> = (1..=pages)
        .map(|n| {
            json!({
                "page_num": n,
                "text": format!("Page {n} text"),
                "image_prompt": format!("prompt {n}"),
                "interaction": null,
            })
        })
        .collect();
    json!({
        "title": "Mia Brushes Her Teeth",
        "theme_topic": "brushing teeth",
        "educational_goal": "daily hygiene",
        "pages": pages,
    })
}

pub struct FakeText {
    pub pages: usize,
    pub panic: bool,
}

#[async_trait]
impl TextGenerator for FakeText {
    fn name(&self) -> &str {
        "fake-text"
    }

    async fn generate_structured(&self, _prompt: &str, _schema: &Value) -> ProviderResult<Value> {
        if self.panic {
            panic!("text model exploded");
        }
        Ok(outline(self.pages))
    }
}

/// Image generator that fails for prompts listed in `fail_prompts`.
#[derive(Default)]
pub struct FakeImages {
    pub fail_prompts: Vec<String>,
    pub calls: AtomicUsize,
}

#[async_trait]
impl ImageGenerator for FakeImages {
    fn name(&self) -> &str {
        "fake-image"
    }

    async fn generate(
        &self,
        prompt: &str,
        _width: u32,
        _height: u32,
    ) -> ProviderResult<GeneratedImage> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(5)).await;
        if self.fail_prompts.iter().any(|p| p == prompt) {
            return Err(ProviderError::terminal(
                FailureKind::ProviderInternal,
                format!("cannot draw {prompt}"),
            ));
        }
        Ok(GeneratedImage {
            url: format!("https://cdn.example.com/img/{}.png", prompt.replace(' ', "-")),
            revised_prompt: None,
        })
    }
}

/// Speech synthesizer tracking its peak concurrency.
#[derive(Default)]
pub struct FakeSpeech {
    in_flight: AtomicUsize,
    pub peak: AtomicUsize,
}

#[async_trait]
impl SpeechSynthesizer for FakeSpeech {
    fn name(&self) -> &str {
        "fake-tts"
    }

    async fn synthesize(
        &self,
        text: &str,
        _voice_id: &str,
        _speed: f32,
    ) -> ProviderResult<SynthesizedSpeech> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(10)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(SynthesizedSpeech {
            audio_url: format!("https://cdn.example.com/audio/{}.mp3", text.len()),
            duration: 2.5,
        })
    }
}

/// Music provider that reports `pending_polls` queued states before
/// `final_status`.
pub struct FakeMusic {
    pub final_status: &'static str,
    pub pending_polls: usize,
    pub tracks: usize,
    pub video_fails: bool,
    polls: AtomicUsize,
    pub submitted_prompts: Mutex<Vec<String>>,
}

impl FakeMusic {
    pub fn new(final_status: &'static str) -> Self {
        Self {
            final_status,
            pending_polls: 1,
            tracks: 2,
            video_fails: false,
            polls: AtomicUsize::new(0),
            submitted_prompts: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl MusicProvider for FakeMusic {
    fn name(&self) -> &str {
        "fake-music"
    }

    async fn submit(&self, prompt: &str) -> ProviderResult<String> {
        self.submitted_prompts.lock().push(prompt.to_string());
        Ok("music-job-1".to_string())
    }

    async fn poll(&self, _job_id: &str) -> ProviderResult<MusicJobUpdate> {
        let n = self.polls.fetch_add(1, Ordering::SeqCst);
        if n < self.pending_polls {
            return Ok(MusicJobUpdate {
                status: ExternalJobStatus::parse("PENDING"),
                tracks: Vec::new(),
                message: None,
            });
        }
        let status = ExternalJobStatus::parse(self.final_status);
        let tracks = if status == ExternalJobStatus::Succeeded {
            (1..=self.tracks)
                .map(|i| MusicTrack {
                    id: format!("track-{i}"),
                    audio_url: format!("https://cdn.example.com/music/track-{i}.mp3"),
                    cover_url: Some(format!("https://cdn.example.com/music/cover-{i}.jpg")),
                    title: Some(format!("Rain Song {i}")),
                    duration: 90.0,
                    tags: Some("children".to_string()),
                    lyrics: Some("Drip drop".to_string()),
                })
                .collect()
        } else {
            Vec::new()
        };
        Ok(MusicJobUpdate {
            status,
            tracks,
            message: Some(self.final_status.to_string()),
        })
    }

    async fn fetch_timestamps(
        &self,
        _job_id: &str,
        _track_id: &str,
    ) -> ProviderResult<Vec<TimedWord>> {
        Ok(vec![TimedWord {
            word: "Drip".to_string(),
            start: 0.0,
            end: 0.5,
        }])
    }

    async fn submit_video(&self, _job_id: &str, _track_id: &str) -> ProviderResult<String> {
        if self.video_fails {
            return Err(ProviderError::terminal(FailureKind::QuotaExceeded, "no credits"));
        }
        Ok("music-video-1".to_string())
    }

    async fn poll_video(&self, _video_job_id: &str) -> ProviderResult<MusicVideoUpdate> {
        Ok(MusicVideoUpdate {
            status: ExternalJobStatus::Succeeded,
            video_url: Some("https://cdn.example.com/music/video-1.mp4".to_string()),
            message: None,
        })
    }
}

#[derive(Default)]
pub struct FakeVideo {
    pub requests: Mutex<Vec<VideoRequest>>,
}

#[async_trait]
impl VideoProvider for FakeVideo {
    fn name(&self) -> &str {
        "fake-video"
    }

    async fn submit(&self, request: &VideoRequest) -> ProviderResult<String> {
        self.requests.lock().push(request.clone());
        Ok("video-job-1".to_string())
    }

    async fn poll(&self, _job_id: &str) -> ProviderResult<VideoJobUpdate> {
        Ok(VideoJobUpdate {
            status: ExternalJobStatus::Succeeded,
            video_url: Some("https://cdn.example.com/video/clip-1.mp4".to_string()),
            duration: None,
            message: None,
        })
    }
}

pub struct FakeEnhancer {
    pub fail: bool,
}

#[async_trait]
impl PromptEnhancer for FakeEnhancer {
    fn name(&self) -> &str {
        "fake-enhancer"
    }

    async fn enhance(&self, params: &Value) -> ProviderResult<String> {
        if self.fail {
            return Err(ProviderError::Transport("connection reset".to_string()));
        }
        Ok(format!(
            "[Cheerful pop] A song about {}",
            params["theme_topic"].as_str().unwrap_or("nothing")
        ))
    }
}

pub struct FakeAnalyzer;

#[async_trait]
impl PromptAnalyzer for FakeAnalyzer {
    fn name(&self) -> &str {
        "fake-analyzer"
    }

    async fn analyze(&self, request: &AnalysisRequest) -> ProviderResult<PromptAnalysis> {
        Ok(PromptAnalysis {
            title: "Bunny Hops".to_string(),
            theme_topic: "exercise".to_string(),
            theme_category: "habit".to_string(),
            enhanced_prompt: format!("{} in a meadow", request.prompt),
            educational_goal: None,
        })
    }
}

#[derive(Default)]
pub struct FakeDownloader {
    pub downloads: AtomicUsize,
}

#[async_trait]
impl AssetDownloader for FakeDownloader {
    async fn download(&self, url: &str) -> ProviderResult<DownloadedAsset> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        let content_type = if url.ends_with(".mp3") {
            "audio/mpeg"
        } else if url.ends_with(".mp4") {
            "video/mp4"
        } else {
            "image/jpeg"
        };
        Ok(DownloadedAsset {
            bytes: Bytes::from(format!("bytes of {url}")),
            content_type: content_type.to_string(),
        })
    }
}

/// Registry that remembers every progress value written to it.
#[derive(Default)]
pub struct RecordingRegistry {
    inner: InMemoryTaskRegistry,
    progress: Mutex<Vec<u8>>,
}

impl RecordingRegistry {
    /// Progress values in write order with consecutive repeats collapsed.
    pub fn progress_history(&self) -> Vec<u8> {
        let mut history = self.progress.lock().clone();
        history.dedup();
        history
    }
}

#[async_trait]
impl TaskRegistry for RecordingRegistry {
    async fn create(&self, task_id: &str, kind: ArtifactKind) -> Result<GenerationTask> {
        self.inner.create(task_id, kind).await
    }

    async fn update(&self, task_id: &str, update: TaskUpdate) -> Result<GenerationTask> {
        let task = self.inner.update(task_id, update).await?;
        self.progress.lock().push(task.progress);
        Ok(task)
    }

    async fn get(&self, task_id: &str) -> Result<GenerationTask> {
        self.inner.get(task_id).await
    }

    async fn delete(&self, task_id: &str) -> Result<bool> {
        self.inner.delete(task_id).await
    }
}

pub struct Fakes {
    pub text: Arc<FakeText>,
    pub images: Arc<FakeImages>,
    pub speech: Arc<FakeSpeech>,
    pub music: Arc<FakeMusic>,
    pub video: Arc<FakeVideo>,
    pub enhancer: Arc<FakeEnhancer>,
    pub downloader: Arc<FakeDownloader>,
}

impl Default for Fakes {
    fn default() -> Self {
        Self {
            text: Arc::new(FakeText {
                pages: 3,
                panic: false,
            }),
            images: Arc::new(FakeImages::default()),
            speech: Arc::new(FakeSpeech::default()),
            music: Arc::new(FakeMusic::new("SUCCESS")),
            video: Arc::new(FakeVideo::default()),
            enhancer: Arc::new(FakeEnhancer { fail: false }),
            downloader: Arc::new(FakeDownloader::default()),
        }
    }
}

impl Fakes {
    fn provider_set(&self) -> ProviderSet {
        ProviderSet {
            text: self.text.clone(),
            images: self.images.clone(),
            speech: self.speech.clone(),
            music: self.music.clone(),
            video: self.video.clone(),
            enhancer: self.enhancer.clone(),
            analyzer: Arc::new(FakeAnalyzer),
            downloader: self.downloader.clone(),
        }
    }
}

pub fn test_settings() -> PipelineSettings {
    let fast = PollConfig::new(Duration::from_millis(5), Duration::from_secs(5));
    PipelineSettings {
        illustration_concurrency: 2,
        narration_concurrency: 2,
        narration_spacing: Duration::ZERO,
        music_poll: fast,
        music_video_poll: fast,
        video_poll: fast,
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub pool: DbPool,
    pub storage: Arc<LocalStorage>,
    pub registry: Arc<RecordingRegistry>,
    pub artifacts: Arc<SqlxArtifactRepository>,
    pub manager: GenerationManager,
    pub fakes: Fakes,
}

impl Harness {
    pub async fn new(fakes: Fakes) -> Self {
        Self::with_settings(fakes, test_settings()).await
    }

    pub async fn with_settings(fakes: Fakes, settings: PipelineSettings) -> Self {
        let dir = TempDir::new().expect("temp dir");
        let db_url = format!("sqlite:{}?mode=rwc", dir.path().join("test.db").display());
        let pool = init_pool(&db_url).await.expect("pool");
        run_migrations(&pool).await.expect("migrations");

        let storage = Arc::new(LocalStorage::new(dir.path().join("media"), "/media"));
        let registry = Arc::new(RecordingRegistry::default());
        let artifacts = Arc::new(SqlxArtifactRepository::new(pool.clone()));
        let logs = Arc::new(SqlxGenerationLogRepository::new(pool.clone()));

        let object_storage: Arc<dyn ObjectStorage> = storage.clone();
        let pipelines = Pipelines::new(&fakes.provider_set(), object_storage, &settings);
        let manager = GenerationManager::new(pipelines, registry.clone(), logs, artifacts.clone());

        Self {
            dir,
            pool,
            storage,
            registry,
            artifacts,
            manager,
            fakes,
        }
    }

    /// Poll the registry until the task is completed or failed.
    pub async fn wait_terminal(&self, task_id: &str) -> GenerationTask {
        for _ in 0..1000 {
            let task = self.manager.status(task_id).await.expect("task exists");
            if task.status.is_terminal() {
                return task;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("task {task_id} did not finish");
    }
}
