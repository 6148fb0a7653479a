//! JSON-over-HTTP adapter implementing every provider capability.
//!
//! The gateway fronts the actual vendors and exposes one uniform API:
//!
//! | Capability | Method | Path |
//! |------------|--------|------|
//! | Structured text | POST | `v1/text/structured` |
//! | Image | POST | `v1/images` |
//! | Speech | POST | `v1/speech` |
//! | Music submit / poll | POST / GET | `v1/music`, `v1/music/{job}` |
//! | Lyric timestamps | GET | `v1/music/{job}/tracks/{track}/timestamps` |
//! | Music video submit | POST | `v1/music/{job}/tracks/{track}/video` |
//! | Music video poll | GET | `v1/music-videos/{job}` |
//! | Video submit / poll | POST / GET | `v1/videos`, `v1/videos/{job}` |
//! | Prompt enhance / analyze | POST | `v1/prompts/enhance`, `v1/prompts/analyze` |

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::RequestBuilder;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::debug;
use url::Url;

use super::{
    AnalysisRequest, ExternalJobStatus, GeneratedImage, ImageGenerator, MusicJobUpdate,
    MusicProvider, MusicTrack, MusicVideoUpdate, PromptAnalysis, PromptAnalyzer, PromptEnhancer,
    ProviderError, ProviderResult, RetryPolicy, SpeechSynthesizer, SynthesizedSpeech,
    TextGenerator, TimedWord, VideoJobUpdate, VideoProvider, VideoRequest,
};
use crate::{Error, Result};

const ERROR_BODY_LIMIT: usize = 512;

pub fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

/// Build the shared HTTP client with a fixed per-call timeout.
pub fn build_http_client(request_timeout: Duration) -> Result<reqwest::Client> {
    install_rustls_provider();

    let mut builder =
        reqwest::Client::builder().user_agent(concat!("storyloom/", env!("CARGO_PKG_VERSION")));
    if request_timeout > Duration::ZERO {
        builder = builder.timeout(request_timeout);
    }
    builder
        .build()
        .map_err(|e| Error::config(format!("failed to build HTTP client: {e}")))
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub retry: RetryPolicy,
}

pub struct HttpGateway {
    client: reqwest::Client,
    base_url: Url,
    api_key: Option<String>,
    retry: RetryPolicy,
}

impl HttpGateway {
    pub fn new(config: GatewayConfig, client: reqwest::Client) -> Result<Self> {
        let mut base = config.base_url.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base)
            .map_err(|e| Error::config(format!("invalid gateway URL {base}: {e}")))?;

        Ok(Self {
            client,
            base_url,
            api_key: config.api_key.filter(|k| !k.is_empty()),
            retry: config.retry,
        })
    }

    /// Append path segments to the base URL, percent-encoding each one.
    fn endpoint(&self, segments: &[&str]) -> ProviderResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ProviderError::Transport(format!("{} cannot be a base", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    async fn send<R: DeserializeOwned>(&self, request: RequestBuilder) -> ProviderResult<R> {
        let response = self.authorize(request).send().await?;
        let status = response.status();
        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            truncate_in_place(&mut body, ERROR_BODY_LIMIT);
            return Err(ProviderError::from_status(status.as_u16(), body));
        }
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| ProviderError::malformed(e.to_string()))
    }

    async fn post_json<B, R>(&self, op: &str, path: &[&str], body: &B) -> ProviderResult<R>
    where
        B: Serialize + Sync,
        R: DeserializeOwned,
    {
        let url = self.endpoint(path)?;
        self.retry
            .run(op, || self.send(self.client.post(url.clone()).json(body)))
            .await
    }

    async fn get_json<R: DeserializeOwned>(&self, op: &str, path: &[&str]) -> ProviderResult<R> {
        let url = self.endpoint(path)?;
        self.retry
            .run(op, || self.send(self.client.get(url.clone())))
            .await
    }
}

fn truncate_in_place(s: &mut String, max_chars: usize) {
    if let Some((idx, _)) = s.char_indices().nth(max_chars) {
        s.truncate(idx);
    }
}

#[derive(serde::Deserialize)]
struct JobCreated {
    job_id: String,
}

#[derive(serde::Deserialize)]
struct StructuredText {
    result: Value,
}

#[derive(serde::Deserialize)]
struct MusicJobBody {
    status: String,
    #[serde(default)]
    tracks: Vec<MusicTrack>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(serde::Deserialize)]
struct TimestampsBody {
    #[serde(default)]
    words: Vec<TimedWord>,
}

#[derive(serde::Deserialize)]
struct VideoJobBody {
    status: String,
    #[serde(default)]
    video_url: Option<String>,
    #[serde(default)]
    duration: Option<f64>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(serde::Deserialize)]
struct EnhancedPrompt {
    prompt: String,
}

const GATEWAY_NAME: &str = "http-gateway";

#[async_trait]
impl TextGenerator for HttpGateway {
    fn name(&self) -> &str {
        GATEWAY_NAME
    }

    async fn generate_structured(&self, prompt: &str, schema: &Value) -> ProviderResult<Value> {
        let body = json!({ "prompt": prompt, "schema": schema });
        let out: StructuredText = self
            .post_json("text.generate_structured", &["v1", "text", "structured"], &body)
            .await?;
        Ok(out.result)
    }
}

#[async_trait]
impl ImageGenerator for HttpGateway {
    fn name(&self) -> &str {
        GATEWAY_NAME
    }

    async fn generate(
        &self,
        prompt: &str,
        width: u32,
        height: u32,
    ) -> ProviderResult<GeneratedImage> {
        let body = json!({ "prompt": prompt, "width": width, "height": height });
        self.post_json("image.generate", &["v1", "images"], &body).await
    }
}

#[async_trait]
impl SpeechSynthesizer for HttpGateway {
    fn name(&self) -> &str {
        GATEWAY_NAME
    }

    async fn synthesize(
        &self,
        text: &str,
        voice_id: &str,
        speed: f32,
    ) -> ProviderResult<SynthesizedSpeech> {
        let body = json!({ "text": text, "voice_id": voice_id, "speed": speed });
        self.post_json("speech.synthesize", &["v1", "speech"], &body).await
    }
}

#[async_trait]
impl MusicProvider for HttpGateway {
    fn name(&self) -> &str {
        GATEWAY_NAME
    }

    async fn submit(&self, prompt: &str) -> ProviderResult<String> {
        let body = json!({ "prompt": prompt });
        let created: JobCreated = self.post_json("music.submit", &["v1", "music"], &body).await?;
        Ok(created.job_id)
    }

    async fn poll(&self, job_id: &str) -> ProviderResult<MusicJobUpdate> {
        let body: MusicJobBody = self.get_json("music.poll", &["v1", "music", job_id]).await?;
        Ok(MusicJobUpdate {
            status: ExternalJobStatus::parse(&body.status),
            tracks: body.tracks,
            message: body.message,
        })
    }

    async fn fetch_timestamps(
        &self,
        job_id: &str,
        track_id: &str,
    ) -> ProviderResult<Vec<TimedWord>> {
        let path = ["v1", "music", job_id, "tracks", track_id, "timestamps"];
        let body: TimestampsBody = self.get_json("music.timestamps", &path).await?;
        Ok(body.words)
    }

    async fn submit_video(&self, job_id: &str, track_id: &str) -> ProviderResult<String> {
        let path = ["v1", "music", job_id, "tracks", track_id, "video"];
        let created: JobCreated = self
            .post_json("music.submit_video", &path, &json!({}))
            .await?;
        Ok(created.job_id)
    }

    async fn poll_video(&self, video_job_id: &str) -> ProviderResult<MusicVideoUpdate> {
        let path = ["v1", "music-videos", video_job_id];
        let body: VideoJobBody = self.get_json("music.poll_video", &path).await?;
        Ok(MusicVideoUpdate {
            status: ExternalJobStatus::parse(&body.status),
            video_url: body.video_url,
            message: body.message,
        })
    }
}

#[async_trait]
impl VideoProvider for HttpGateway {
    fn name(&self) -> &str {
        GATEWAY_NAME
    }

    async fn submit(&self, request: &VideoRequest) -> ProviderResult<String> {
        let created: JobCreated = self.post_json("video.submit", &["v1", "videos"], request).await?;
        Ok(created.job_id)
    }

    async fn poll(&self, job_id: &str) -> ProviderResult<VideoJobUpdate> {
        let body: VideoJobBody = self.get_json("video.poll", &["v1", "videos", job_id]).await?;
        Ok(VideoJobUpdate {
            status: ExternalJobStatus::parse(&body.status),
            video_url: body.video_url,
            duration: body.duration,
            message: body.message,
        })
    }
}

#[async_trait]
impl PromptEnhancer for HttpGateway {
    fn name(&self) -> &str {
        GATEWAY_NAME
    }

    async fn enhance(&self, params: &Value) -> ProviderResult<String> {
        let out: EnhancedPrompt = self
            .post_json("prompt.enhance", &["v1", "prompts", "enhance"], params)
            .await?;
        Ok(out.prompt)
    }
}

#[async_trait]
impl PromptAnalyzer for HttpGateway {
    fn name(&self) -> &str {
        GATEWAY_NAME
    }

    async fn analyze(&self, request: &AnalysisRequest) -> ProviderResult<PromptAnalysis> {
        self.post_json("prompt.analyze", &["v1", "prompts", "analyze"], request)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway(base: &str) -> HttpGateway {
        install_rustls_provider();
        HttpGateway::new(
            GatewayConfig {
                base_url: base.to_string(),
                api_key: Some(String::new()),
                retry: RetryPolicy::none(),
            },
            reqwest::Client::new(),
        )
        .unwrap()
    }

    #[test]
    fn test_endpoint_joins_under_base_path() {
        let gw = gateway("http://localhost:9000/gateway");
        assert_eq!(
            gw.endpoint(&["v1", "music"]).unwrap().as_str(),
            "http://localhost:9000/gateway/v1/music"
        );
        assert!(gw.api_key.is_none());
    }

    #[test]
    fn test_invalid_base_url_is_config_error() {
        install_rustls_provider();
        let result = HttpGateway::new(
            GatewayConfig {
                base_url: "not a url".to_string(),
                api_key: None,
                retry: RetryPolicy::none(),
            },
            reqwest::Client::new(),
        );
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn test_endpoint_escapes_ids() {
        let gw = gateway("http://localhost:9000/");
        assert_eq!(
            gw.endpoint(&["v1", "videos", "a/b c"]).unwrap().as_str(),
            "http://localhost:9000/v1/videos/a%2Fb%20c"
        );
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let mut s = "héllo wörld".to_string();
        truncate_in_place(&mut s, 4);
        assert_eq!(s, "héll");
    }
}
