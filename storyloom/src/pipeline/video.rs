//! Video pipelines: one clip for a whole picture book, or one clip from a
//! free-text prompt.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;

use super::ArtifactDraft;
use super::assets::AssetMirror;
use super::context::RunContext;
use super::exec_log::{StepRecord, truncate_chars};
use super::poller::{JobState, PollConfig, submit_and_poll};
use super::progress::ProgressEvent;
use crate::database::models::{ArtifactDbModel, ArtifactKind, GenerationStep};
use crate::providers::{
    AnalysisRequest, ImageGenerator, PromptAnalysis, PromptAnalyzer, ProviderError,
    VideoJobUpdate, VideoProvider, VideoRequest,
};
use crate::{Error, Result};

/// Character budget of the combined book prompt, before the `...` marker.
pub const BOOK_PROMPT_LIMIT: usize = 500;
pub const BOOK_CLIP_SECS: u32 = 8;
pub const MIN_CLIP_SECS: u32 = 4;
pub const MAX_CLIP_SECS: u32 = 8;

/// A finished clip, mirrored into storage.
#[derive(Debug, Clone, Serialize)]
pub struct RenderedClip {
    pub video_url: String,
    pub duration: f64,
    pub provider_job_id: String,
}

/// Drives one image-to-video job and stores the result.
#[derive(Clone)]
pub struct ClipRenderer {
    video: Arc<dyn VideoProvider>,
    assets: AssetMirror,
    poll: PollConfig,
}

impl ClipRenderer {
    pub fn new(video: Arc<dyn VideoProvider>, assets: AssetMirror, poll: PollConfig) -> Self {
        Self {
            video,
            assets,
            poll,
        }
    }

    pub fn model_name(&self) -> &str {
        self.video.name()
    }

    pub async fn render(&self, ctx: &RunContext, request: VideoRequest) -> Result<RenderedClip> {
        ctx.enter(GenerationStep::VideoGenerate);
        let video = &self.video;
        let requested = f64::from(request.duration);
        let input = json!(request);

        ctx.logger()
            .timed(
                GenerationStep::VideoGenerate,
                "Video clip generated",
                input,
                async {
                    let (provider_job_id, remote_url, duration) = submit_and_poll(
                        "video",
                        self.poll,
                        || video.submit(&request),
                        |job_id| {
                            let job_id = job_id.to_string();
                            async move {
                                let VideoJobUpdate {
                                    status,
                                    video_url,
                                    duration,
                                    message,
                                } = video.poll(&job_id).await?;
                                JobState::from_status(&status, message.as_deref(), || {
                                    let url = video_url.filter(|u| !u.is_empty()).ok_or_else(|| {
                                        ProviderError::malformed("video job finished without a URL")
                                    })?;
                                    Ok((job_id, url, duration.unwrap_or(requested)))
                                })
                            }
                        },
                    )
                    .await?;
                    let video_url = self.assets.mirror(&remote_url).await?;
                    Ok::<_, Error>(RenderedClip {
                        video_url,
                        duration,
                        provider_job_id,
                    })
                },
                |clip: &RenderedClip| json!(clip),
            )
            .await
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BookPageRef {
    #[serde(default)]
    pub page_num: u32,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub image_url: String,
}

/// A picture book payload to animate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BookVideoParams {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub pages: Vec<BookPageRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub child_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme_topic: Option<String>,
}

impl BookVideoParams {
    /// Animate a picture book saved by the book pipeline.
    pub fn from_artifact(artifact: &ArtifactDbModel) -> Result<Self> {
        if artifact.kind != ArtifactKind::PictureBook.as_ref() {
            return Err(Error::validation(format!(
                "artifact {} is a {}, not a picture book",
                artifact.id, artifact.kind
            )));
        }
        let payload = artifact.payload_json()?;
        let mut params: Self = serde_json::from_value(payload.clone())?;
        if params.child_name.is_none() {
            params.child_name = payload["personalization"]["child_name"]
                .as_str()
                .map(str::to_string);
        }
        if params.theme_topic.is_none() {
            params.theme_topic = artifact.theme_topic.clone();
        }
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<()> {
        let first = self
            .pages
            .first()
            .ok_or_else(|| Error::validation("picture book has no pages"))?;
        if first.image_url.trim().is_empty() {
            return Err(Error::validation("first page of the picture book has no image"));
        }
        Ok(())
    }

    fn title(&self) -> &str {
        if self.title.trim().is_empty() {
            "Untitled video"
        } else {
            &self.title
        }
    }

    /// The whole story as a single prompt.
    pub fn combined_prompt(&self) -> String {
        let texts: Vec<&str> = self
            .pages
            .iter()
            .map(|p| p.text.trim())
            .filter(|t| !t.is_empty())
            .collect();
        let prompt = format!(
            "Children's picture book animation: {}. {}",
            self.title(),
            texts.join(" ")
        );
        truncate_chars(prompt.trim_end(), BOOK_PROMPT_LIMIT)
    }

    /// One job per book: first page as the opening frame, last page as the
    /// closing frame when there is more than one page.
    pub fn video_request(&self) -> Result<VideoRequest> {
        self.validate()?;
        let first = &self.pages[0];
        let last_frame_url = if self.pages.len() > 1 {
            self.pages
                .last()
                .map(|p| p.image_url.clone())
                .filter(|u| !u.is_empty())
        } else {
            None
        };
        Ok(VideoRequest {
            first_frame_url: first.image_url.clone(),
            prompt: self.combined_prompt(),
            duration: BOOK_CLIP_SECS,
            last_frame_url,
            negative_prompt: None,
        })
    }
}

pub struct BookVideoPipeline {
    clips: ClipRenderer,
}

impl BookVideoPipeline {
    pub fn new(clips: ClipRenderer) -> Self {
        Self { clips }
    }

    pub async fn run(&self, ctx: &RunContext, params: BookVideoParams) -> Result<ArtifactDraft> {
        ctx.enter(GenerationStep::Validate);
        let request = params.video_request()?;
        ctx.logger()
            .record(
                StepRecord::info(
                    GenerationStep::Init,
                    format!("Starting video for a {}-page book", params.pages.len()),
                )
                .with_input(json!({
                    "title": params.title(),
                    "page_count": params.pages.len(),
                    "first_frame_url": request.first_frame_url,
                    "last_frame_url": request.last_frame_url,
                })),
            )
            .await;

        ctx.report(ProgressEvent::new("video", 0, 1, "Generating video"))
            .await;
        let thumbnail_url = request.first_frame_url.clone();
        let clip = self.clips.render(ctx, request).await?;
        ctx.report(ProgressEvent::new("video", 1, 1, "Video ready"))
            .await;

        let title = params.title().to_string();
        let payload = json!({
            "title": title,
            "video_url": clip.video_url,
            "duration": clip.duration,
            "thumbnail_url": thumbnail_url,
            "clips": [{
                "page_num": 1,
                "video_url": clip.video_url,
                "duration": clip.duration,
            }],
            "provider_job_id": clip.provider_job_id,
            "generated_by": { "video_model": self.clips.model_name() },
        });

        Ok(ArtifactDraft {
            kind: ArtifactKind::Video,
            title,
            theme_topic: params.theme_topic,
            payload,
            duration_secs: clip.duration,
        })
    }
}

fn default_age_months() -> u32 {
    36
}

fn default_true() -> bool {
    true
}

fn default_aspect_ratio() -> String {
    "16:9".to_string()
}

fn default_duration() -> u32 {
    5
}

/// A free-text video request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StandaloneVideoParams {
    pub child_name: String,
    #[serde(default = "default_age_months")]
    pub age_months: u32,
    #[serde(alias = "custom_prompt")]
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_frame_url: Option<String>,
    #[serde(default = "default_true")]
    pub generate_first_frame: bool,
    #[serde(default = "default_aspect_ratio")]
    pub aspect_ratio: String,
    #[serde(default = "default_duration")]
    pub duration: u32,
    #[serde(default = "default_true")]
    pub auto_enhance_prompt: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub negative_prompt: Option<String>,
}

impl StandaloneVideoParams {
    pub fn validate(&self) -> Result<()> {
        if self.prompt.trim().is_empty() {
            return Err(Error::validation("prompt must not be empty"));
        }
        if self.provided_frame().is_none() && !self.generate_first_frame {
            return Err(Error::validation(
                "first_frame_url is required when generate_first_frame is false",
            ));
        }
        Ok(())
    }

    fn provided_frame(&self) -> Option<&str> {
        self.first_frame_url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
    }

    /// Frame size for a generated first frame.
    pub fn frame_size(&self) -> (u32, u32) {
        if self.aspect_ratio == "16:9" {
            (1280, 720)
        } else {
            (1024, 1024)
        }
    }

    pub fn clip_duration(&self) -> u32 {
        self.duration.clamp(MIN_CLIP_SECS, MAX_CLIP_SECS)
    }
}

pub struct StandaloneVideoPipeline {
    analyzer: Arc<dyn PromptAnalyzer>,
    images: Arc<dyn ImageGenerator>,
    clips: ClipRenderer,
}

impl StandaloneVideoPipeline {
    pub fn new(
        analyzer: Arc<dyn PromptAnalyzer>,
        images: Arc<dyn ImageGenerator>,
        clips: ClipRenderer,
    ) -> Self {
        Self {
            analyzer,
            images,
            clips,
        }
    }

    pub async fn run(
        &self,
        ctx: &RunContext,
        params: StandaloneVideoParams,
    ) -> Result<ArtifactDraft> {
        ctx.enter(GenerationStep::Validate);
        params.validate()?;
        ctx.logger()
            .record(
                StepRecord::info(GenerationStep::Init, "Starting video").with_input(json!(params)),
            )
            .await;

        let analysis = self.analyze(ctx, &params).await?;
        let frame_url = self.first_frame(ctx, &params, &analysis).await?;

        ctx.report(ProgressEvent::new("video", 0, 1, "Generating video"))
            .await;
        let prompt = if params.auto_enhance_prompt && !analysis.enhanced_prompt.trim().is_empty() {
            analysis.enhanced_prompt.clone()
        } else {
            params.prompt.clone()
        };
        let request = VideoRequest {
            first_frame_url: frame_url.clone(),
            prompt,
            duration: params.clip_duration(),
            last_frame_url: None,
            negative_prompt: params.negative_prompt.clone(),
        };
        let clip = self.clips.render(ctx, request).await?;
        ctx.report(ProgressEvent::new("video", 1, 1, "Video ready"))
            .await;

        let payload = json!({
            "title": analysis.title,
            "video_url": clip.video_url,
            "thumbnail_url": frame_url,
            "first_frame_url": frame_url,
            "duration": clip.duration,
            "theme_category": analysis.theme_category,
            "theme_topic": analysis.theme_topic,
            "custom_prompt": params.prompt,
            "prompt_enhanced": analysis.enhanced_prompt,
            "educational_goal": analysis.educational_goal,
            "personalization": {
                "child_name": params.child_name,
                "age_months": params.age_months,
            },
            "provider_job_id": clip.provider_job_id,
            "generated_by": {
                "analysis_model": self.analyzer.name(),
                "image_model": self.images.name(),
                "video_model": self.clips.model_name(),
            },
        });

        Ok(ArtifactDraft {
            kind: ArtifactKind::Video,
            title: analysis.title,
            theme_topic: Some(analysis.theme_topic),
            payload,
            duration_secs: clip.duration,
        })
    }

    async fn analyze(
        &self,
        ctx: &RunContext,
        params: &StandaloneVideoParams,
    ) -> Result<PromptAnalysis> {
        ctx.enter(GenerationStep::PromptAnalyze);
        ctx.report(ProgressEvent::new("analysis", 0, 1, "Reading the idea"))
            .await;
        let request = AnalysisRequest {
            prompt: params.prompt.clone(),
            child_name: params.child_name.clone(),
            age_months: params.age_months,
        };
        let analysis = ctx
            .logger()
            .timed(
                GenerationStep::PromptAnalyze,
                "Prompt analyzed",
                json!(request),
                async { self.analyzer.analyze(&request).await.map_err(Error::from) },
                |a: &PromptAnalysis| json!(a),
            )
            .await?;
        ctx.report(ProgressEvent::new("analysis", 1, 1, "Idea understood"))
            .await;
        Ok(analysis)
    }

    async fn first_frame(
        &self,
        ctx: &RunContext,
        params: &StandaloneVideoParams,
        analysis: &PromptAnalysis,
    ) -> Result<String> {
        ctx.enter(GenerationStep::VideoFirstFrame);
        ctx.report(ProgressEvent::new("first_frame", 0, 1, "Preparing the first frame"))
            .await;

        let frame_url = match params.provided_frame() {
            Some(url) => {
                ctx.logger()
                    .record(
                        StepRecord::info(
                            GenerationStep::VideoFirstFrame,
                            "Using provided first frame",
                        )
                        .with_input(json!({ "first_frame_url": url })),
                    )
                    .await;
                url.to_string()
            }
            None if params.generate_first_frame => {
                let (width, height) = params.frame_size();
                let prompt = analysis.enhanced_prompt.as_str();
                ctx.logger()
                    .timed(
                        GenerationStep::VideoFirstFrame,
                        "First frame generated",
                        json!({ "prompt": prompt, "width": width, "height": height }),
                        async {
                            let image = self.images.generate(prompt, width, height).await?;
                            Ok::<_, Error>(image.url)
                        },
                        |url: &String| json!({ "url": url }),
                    )
                    .await?
            }
            None => {
                return Err(Error::validation(
                    "first_frame_url is required when generate_first_frame is false",
                ));
            }
        };

        ctx.report(ProgressEvent::new("first_frame", 1, 1, "First frame ready"))
            .await;
        Ok(frame_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn book(pages: usize) -> BookVideoParams {
        BookVideoParams {
            title: "Mia Brushes".to_string(),
            pages: (1..=pages as u32)
                .map(|n| BookPageRef {
                    page_num: n,
                    text: format!("Page {n} text."),
                    image_url: format!("/media/images/p{n}.png"),
                })
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_book_request_uses_first_and_last_frames() {
        let request = book(3).video_request().unwrap();
        assert_eq!(request.first_frame_url, "/media/images/p1.png");
        assert_eq!(request.last_frame_url.as_deref(), Some("/media/images/p3.png"));
        assert_eq!(request.duration, BOOK_CLIP_SECS);
        assert_eq!(
            request.prompt,
            "Children's picture book animation: Mia Brushes. Page 1 text. Page 2 text. Page 3 text."
        );
    }

    #[test]
    fn test_single_page_has_no_last_frame() {
        let request = book(1).video_request().unwrap();
        assert!(request.last_frame_url.is_none());
    }

    #[test]
    fn test_book_validation() {
        assert!(matches!(book(0).video_request(), Err(Error::Validation(_))));
        let mut params = book(2);
        params.pages[0].image_url.clear();
        assert!(matches!(params.validate(), Err(Error::Validation(_))));
    }

    #[test]
    fn test_prompt_is_capped() {
        let mut params = book(1);
        params.pages[0].text = "word ".repeat(200);
        let prompt = params.combined_prompt();
        assert!(prompt.ends_with("..."));
        assert_eq!(prompt.chars().count(), BOOK_PROMPT_LIMIT + 3);
    }

    #[test]
    fn test_book_params_from_saved_book() {
        let payload = json!({
            "title": "T",
            "pages": [{
                "page_num": 1,
                "text": "a",
                "image_url": "/media/images/a.png",
                "audio_url": "x",
            }],
            "total_duration": 3.0,
            "personalization": {"child_name": "Mia"},
        });
        let artifact = ArtifactDbModel::new(
            "task",
            ArtifactKind::PictureBook,
            "T",
            Some("teeth".to_string()),
            &payload,
            3.0,
        )
        .unwrap();
        let params = BookVideoParams::from_artifact(&artifact).unwrap();
        assert_eq!(params.pages.len(), 1);
        assert_eq!(params.child_name.as_deref(), Some("Mia"));
        assert_eq!(params.theme_topic.as_deref(), Some("teeth"));
    }

    #[test]
    fn test_only_picture_books_can_be_animated() {
        let song = ArtifactDbModel::new("task", ArtifactKind::Song, "S", None, &json!({}), 1.0)
            .unwrap();
        assert!(matches!(BookVideoParams::from_artifact(&song), Err(Error::Validation(_))));

        let empty =
            ArtifactDbModel::new("task", ArtifactKind::PictureBook, "B", None, &json!({}), 0.0)
                .unwrap();
        assert!(matches!(BookVideoParams::from_artifact(&empty), Err(Error::Validation(_))));
    }

    fn standalone() -> StandaloneVideoParams {
        serde_json::from_value(json!({
            "child_name": "Leo",
            "custom_prompt": "a rocket to the moon",
        }))
        .unwrap()
    }

    #[test]
    fn test_standalone_defaults_and_frame_size() {
        let mut params = standalone();
        assert_eq!(params.prompt, "a rocket to the moon");
        assert!(params.generate_first_frame);
        assert_eq!(params.frame_size(), (1280, 720));
        params.aspect_ratio = "1:1".to_string();
        assert_eq!(params.frame_size(), (1024, 1024));
    }

    #[test]
    fn test_clip_duration_clamped() {
        let mut params = standalone();
        params.duration = 1;
        assert_eq!(params.clip_duration(), 4);
        params.duration = 30;
        assert_eq!(params.clip_duration(), 8);
        params.duration = 6;
        assert_eq!(params.clip_duration(), 6);
    }

    #[test]
    fn test_standalone_requires_a_frame_source() {
        let mut params = standalone();
        params.generate_first_frame = false;
        assert!(matches!(params.validate(), Err(Error::Validation(_))));
        params.first_frame_url = Some("/media/images/f.png".to_string());
        assert!(params.validate().is_ok());
    }
}
