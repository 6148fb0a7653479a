//! External generative capabilities consumed by the pipelines.
//!
//! Each capability is an async trait so pipelines can be driven by the HTTP
//! gateway in production and by in-process fakes in tests.

pub mod download;
pub mod error;
pub mod gateway;
pub mod media;
pub mod prompt;
pub mod retry;
pub mod status;
pub mod text;

pub use download::{AssetDownloader, DownloadedAsset, HttpAssetDownloader};
pub use error::{FailureKind, ProviderError};
pub use gateway::{GatewayConfig, HttpGateway};
pub use media::{
    GeneratedImage, ImageGenerator, MusicJobUpdate, MusicProvider, MusicTrack, MusicVideoUpdate,
    SpeechSynthesizer, SynthesizedSpeech, TimedWord, VideoJobUpdate, VideoProvider, VideoRequest,
};
pub use prompt::{AnalysisRequest, PromptAnalysis, PromptAnalyzer, PromptEnhancer};
pub use retry::RetryPolicy;
pub use status::ExternalJobStatus;
pub use text::TextGenerator;

/// Result type for provider calls.
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;
