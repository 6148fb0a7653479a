//! Generation pipeline engine.
//!
//! The engine is responsible for:
//! - Sequencing the stages of each content variant (book, song, videos)
//! - Bounding per-provider concurrency with shared fan-out executors
//! - Waiting on slow external jobs with a bounded poller
//! - Mapping stage progress onto a monotonic 0-100 scale in the task registry
//! - Writing a sequence-numbered execution log for every run

pub mod assets;
pub mod book;
pub mod context;
pub mod exec_log;
pub mod fan_out;
pub mod manager;
pub mod poller;
pub mod progress;
pub mod registry;
pub mod song;
pub mod video;

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::database::models::ArtifactKind;
use crate::providers::{
    AssetDownloader, ImageGenerator, MusicProvider, PromptAnalyzer, PromptEnhancer,
    SpeechSynthesizer, TextGenerator, VideoProvider,
};
use crate::storage::ObjectStorage;

pub use assets::AssetMirror;
pub use book::{BookParams, BookPipeline};
pub use context::RunContext;
pub use exec_log::{ExecutionLogEntry, ExecutionLogger, StepRecord};
pub use fan_out::FanOut;
pub use manager::{GenerationManager, GenerationRequest};
pub use poller::{JobState, PollConfig, PollError, poll_until_terminal, submit_and_poll};
pub use progress::{ProgressEvent, ProgressMap, ProgressReporter};
pub use registry::{GenerationTask, InMemoryTaskRegistry, TaskRegistry, TaskStatus, TaskUpdate};
pub use song::{SongParams, SongPipeline};
pub use video::{
    BookVideoParams, BookVideoPipeline, ClipRenderer, StandaloneVideoParams,
    StandaloneVideoPipeline,
};

/// What a pipeline hands back for persistence.
#[derive(Debug, Clone)]
pub struct ArtifactDraft {
    pub kind: ArtifactKind,
    pub title: String,
    pub theme_topic: Option<String>,
    pub payload: Value,
    pub duration_secs: f64,
}

/// The external capabilities the pipelines call.
#[derive(Clone)]
pub struct ProviderSet {
    pub text: Arc<dyn TextGenerator>,
    pub images: Arc<dyn ImageGenerator>,
    pub speech: Arc<dyn SpeechSynthesizer>,
    pub music: Arc<dyn MusicProvider>,
    pub video: Arc<dyn VideoProvider>,
    pub enhancer: Arc<dyn PromptEnhancer>,
    pub analyzer: Arc<dyn PromptAnalyzer>,
    pub downloader: Arc<dyn AssetDownloader>,
}

/// Tunables shared by all pipelines.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub illustration_concurrency: usize,
    pub narration_concurrency: usize,
    /// Pause before each narration call, taken while holding the permit.
    pub narration_spacing: Duration,
    pub music_poll: PollConfig,
    pub music_video_poll: PollConfig,
    pub video_poll: PollConfig,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            illustration_concurrency: 3,
            narration_concurrency: 2,
            narration_spacing: Duration::from_millis(500),
            music_poll: PollConfig::from_secs(5, 300),
            music_video_poll: PollConfig::from_secs(5, 180),
            video_poll: PollConfig::from_secs(10, 600),
        }
    }
}

/// One instance of every pipeline variant. The book pipeline's fan-out
/// executors are created here once, so their limits hold across all runs.
pub struct Pipelines {
    pub book: BookPipeline,
    pub song: SongPipeline,
    pub book_video: BookVideoPipeline,
    pub video: StandaloneVideoPipeline,
}

impl Pipelines {
    pub fn new(
        providers: &ProviderSet,
        storage: Arc<dyn ObjectStorage>,
        settings: &PipelineSettings,
    ) -> Self {
        let assets = AssetMirror::new(Arc::clone(&providers.downloader), storage);
        let clips = ClipRenderer::new(
            Arc::clone(&providers.video),
            assets.clone(),
            settings.video_poll,
        );

        Self {
            book: BookPipeline::new(
                Arc::clone(&providers.text),
                Arc::clone(&providers.images),
                Arc::clone(&providers.speech),
                FanOut::new("illustrations", settings.illustration_concurrency),
                FanOut::new("narration", settings.narration_concurrency),
                settings.narration_spacing,
            ),
            song: SongPipeline::new(
                Arc::clone(&providers.enhancer),
                Arc::clone(&providers.music),
                assets,
                settings.music_poll,
                settings.music_video_poll,
            ),
            book_video: BookVideoPipeline::new(clips.clone()),
            video: StandaloneVideoPipeline::new(
                Arc::clone(&providers.analyzer),
                Arc::clone(&providers.images),
                clips,
            ),
        }
    }
}
