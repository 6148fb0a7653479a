//! Illustrated picture book: outline, illustrations, narration, assembly.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::ArtifactDraft;
use super::context::RunContext;
use super::fan_out::FanOut;
use super::progress::ProgressEvent;
use crate::database::models::{ArtifactKind, GenerationStep};
use crate::pipeline::exec_log::StepRecord;
use crate::providers::{
    GeneratedImage, ImageGenerator, SpeechSynthesizer, SynthesizedSpeech, TextGenerator,
};
use crate::{Error, Result};

pub const ILLUSTRATION_WIDTH: u32 = 1024;
pub const ILLUSTRATION_HEIGHT: u32 = 1024;
/// Slightly slower than normal speech for young listeners.
pub const NARRATION_SPEED: f32 = 0.9;
pub const DEFAULT_VOICE_ID: &str = "default";
pub const MAX_PAGES: u8 = 12;

fn default_age_months() -> u32 {
    36
}

fn default_page_count() -> u8 {
    8
}

fn default_category() -> String {
    "cognition".to_string()
}

/// Request parameters for a picture book.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookParams {
    pub child_name: String,
    #[serde(default = "default_age_months")]
    pub age_months: u32,
    pub theme_topic: String,
    #[serde(default = "default_category")]
    pub theme_category: String,
    #[serde(default)]
    pub favorite_characters: Vec<String>,
    #[serde(default)]
    pub voice_id: Option<String>,
    #[serde(default)]
    pub art_style: Option<String>,
    #[serde(default = "default_page_count")]
    pub page_count: u8,
}

impl BookParams {
    pub fn validate(&self) -> Result<()> {
        if self.child_name.trim().is_empty() {
            return Err(Error::validation("child_name must not be empty"));
        }
        if self.theme_topic.trim().is_empty() {
            return Err(Error::validation("theme_topic must not be empty"));
        }
        if !(1..=MAX_PAGES).contains(&self.page_count) {
            return Err(Error::validation(format!(
                "page_count must be between 1 and {MAX_PAGES}, got {}",
                self.page_count
            )));
        }
        Ok(())
    }

    fn voice(&self) -> &str {
        self.voice_id
            .as_deref()
            .filter(|v| !v.is_empty())
            .unwrap_or(DEFAULT_VOICE_ID)
    }
}

#[derive(Debug, Clone, Deserialize)]
struct StoryOutline {
    title: String,
    #[serde(default)]
    theme_topic: Option<String>,
    #[serde(default)]
    educational_goal: Option<String>,
    pages: Vec<OutlinePage>,
}

#[derive(Debug, Clone, Deserialize)]
struct OutlinePage {
    page_num: u32,
    text: String,
    image_prompt: String,
    #[serde(default)]
    interaction: Option<Value>,
}

/// JSON schema the text generator must satisfy.
pub fn outline_schema() -> Value {
    json!({
        "type": "object",
        "required": ["title", "theme_topic", "educational_goal", "pages"],
        "properties": {
            "title": {"type": "string"},
            "theme_topic": {"type": "string"},
            "educational_goal": {"type": "string"},
            "pages": {
                "type": "array",
                "minItems": 1,
                "items": {
                    "type": "object",
                    "required": ["page_num", "text", "image_prompt"],
                    "properties": {
                        "page_num": {"type": "integer", "minimum": 1},
                        "text": {"type": "string"},
                        "image_prompt": {"type": "string"},
                        "interaction": {
                            "type": ["object", "null"],
                            "properties": {
                                "question_type": {"type": "string"},
                                "question": {"type": "string"},
                                "options": {"type": "array"},
                                "correct_answer": {}
                            }
                        }
                    }
                }
            }
        }
    })
}

fn outline_prompt(params: &BookParams) -> String {
    let characters = if params.favorite_characters.is_empty() {
        "a little bunny".to_string()
    } else {
        params.favorite_characters.join(", ")
    };
    let category = if params.theme_category == "habit" {
        "building good habits"
    } else {
        "understanding the world"
    };
    let style = params.art_style.as_deref().unwrap_or("soft 3D storybook");
    format!(
        "Write a picture book for {name}, a child aged {age} months, about \"{topic}\".\n\
         - {name} is the hero; supporting characters: {characters}\n\
         - {pages} pages, one or two short sentences per page\n\
         - Theme category: {category}\n\
         - Include two or three simple interactive questions\n\
         - Give every page a detailed English illustration prompt in a {style} style",
        name = params.child_name,
        age = params.age_months,
        topic = params.theme_topic,
        pages = params.page_count,
    )
}

/// Picture book generation. Illustration and narration limits are shared by
/// every book run in the process.
pub struct BookPipeline {
    text: Arc<dyn TextGenerator>,
    images: Arc<dyn ImageGenerator>,
    speech: Arc<dyn SpeechSynthesizer>,
    illustrations: FanOut,
    narration: FanOut,
    narration_spacing: Duration,
}

impl BookPipeline {
    pub fn new(
        text: Arc<dyn TextGenerator>,
        images: Arc<dyn ImageGenerator>,
        speech: Arc<dyn SpeechSynthesizer>,
        illustrations: FanOut,
        narration: FanOut,
        narration_spacing: Duration,
    ) -> Self {
        Self {
            text,
            images,
            speech,
            illustrations,
            narration,
            narration_spacing,
        }
    }

    pub async fn run(&self, ctx: &RunContext, params: BookParams) -> Result<ArtifactDraft> {
        ctx.enter(GenerationStep::Validate);
        params.validate()?;
        ctx.logger()
            .record(
                StepRecord::info(GenerationStep::Init, "Starting picture book")
                    .with_input(json!(params)),
            )
            .await;

        let outline = self.write_outline(ctx, &params).await?;
        let illustrations = self.illustrate(ctx, &outline).await?;
        let narrations = self.narrate(ctx, &outline, params.voice()).await?;

        Ok(self.assemble(&params, outline, illustrations, narrations))
    }

    async fn write_outline(&self, ctx: &RunContext, params: &BookParams) -> Result<StoryOutline> {
        ctx.enter(GenerationStep::StoryGenerate);
        ctx.report(ProgressEvent::new("outline", 0, 1, "Writing the story"))
            .await;

        let prompt = outline_prompt(params);
        let schema = outline_schema();
        let outline = ctx
            .logger()
            .timed(
                GenerationStep::StoryGenerate,
                "Story outline",
                json!({ "prompt": prompt, "page_count": params.page_count }),
                async {
                    let raw = self.text.generate_structured(&prompt, &schema).await?;
                    parse_outline(raw)
                },
                |o: &StoryOutline| {
                    json!({
                        "title": o.title,
                        "page_count": o.pages.len(),
                        "educational_goal": o.educational_goal,
                    })
                },
            )
            .await?;

        ctx.report(ProgressEvent::new("outline", 1, 1, "Story written"))
            .await;
        Ok(outline)
    }

    async fn illustrate(
        &self,
        ctx: &RunContext,
        outline: &StoryOutline,
    ) -> Result<Vec<GeneratedImage>> {
        ctx.enter(GenerationStep::ImageGenerate);
        let total = outline.pages.len();
        ctx.report(ProgressEvent::new("illustrations", 0, total, "Drawing illustrations"))
            .await;

        let units = outline
            .pages
            .iter()
            .enumerate()
            .map(|(i, page)| {
                let images = Arc::clone(&self.images);
                let logger = ctx.logger_handle();
                let prompt = page.image_prompt.clone();
                async move {
                    let record = StepRecord::info(
                        GenerationStep::ImageGenerate,
                        format!("Illustration {}/{} done", i + 1, total),
                    )
                    .with_input(json!({ "prompt": prompt }))
                    .with_extra(json!({ "page_index": i + 1, "total": total }));
                    logger
                        .timed_record(
                            record,
                            async {
                                images
                                    .generate(&prompt, ILLUSTRATION_WIDTH, ILLUSTRATION_HEIGHT)
                                    .await
                                    .map_err(Error::from)
                            },
                            |img: &GeneratedImage| json!({ "url": img.url }),
                        )
                        .await
                }
            })
            .collect();

        self.illustrations
            .run(units, move |_, done, total| {
                ctx.report(ProgressEvent::new(
                    "illustrations",
                    done,
                    total,
                    format!("Illustration {done}/{total} done"),
                ))
            })
            .await
    }

    async fn narrate(
        &self,
        ctx: &RunContext,
        outline: &StoryOutline,
        voice_id: &str,
    ) -> Result<Vec<SynthesizedSpeech>> {
        ctx.enter(GenerationStep::AudioSynthesize);
        let total = outline.pages.len();
        ctx.report(ProgressEvent::new("narration", 0, total, "Recording narration"))
            .await;

        let units = outline
            .pages
            .iter()
            .enumerate()
            .map(|(i, page)| {
                let speech = Arc::clone(&self.speech);
                let logger = ctx.logger_handle();
                let text = page.text.clone();
                let voice_id = voice_id.to_string();
                let spacing = self.narration_spacing;
                async move {
                    // Runs under the narration permit, spacing out calls to the provider.
                    tokio::time::sleep(spacing).await;
                    let record = StepRecord::info(
                        GenerationStep::AudioSynthesize,
                        format!("Narration {}/{} done", i + 1, total),
                    )
                    .with_input(json!({ "text": text, "voice_id": voice_id }))
                    .with_extra(json!({ "page_index": i + 1, "total": total }));
                    logger
                        .timed_record(
                            record,
                            async {
                                speech
                                    .synthesize(&text, &voice_id, NARRATION_SPEED)
                                    .await
                                    .map_err(Error::from)
                            },
                            |a: &SynthesizedSpeech| {
                                json!({ "audio_url": a.audio_url, "duration": a.duration })
                            },
                        )
                        .await
                }
            })
            .collect();

        self.narration
            .run(units, move |_, done, total| {
                ctx.report(ProgressEvent::new(
                    "narration",
                    done,
                    total,
                    format!("Narration {done}/{total} done"),
                ))
            })
            .await
    }

    fn assemble(
        &self,
        params: &BookParams,
        outline: StoryOutline,
        illustrations: Vec<GeneratedImage>,
        narrations: Vec<SynthesizedSpeech>,
    ) -> ArtifactDraft {
        let mut total_duration = 0.0;
        let pages: Vec<Value> = outline
            .pages
            .into_iter()
            .zip(illustrations)
            .zip(narrations)
            .map(|((page, image), audio)| {
                total_duration += audio.duration;
                json!({
                    "page_num": page.page_num,
                    "text": page.text,
                    "image_url": image.url,
                    "image_prompt": page.image_prompt,
                    "audio_url": audio.audio_url,
                    "audio_duration": audio.duration,
                    "interaction": page.interaction,
                })
            })
            .collect();

        let theme_topic = outline
            .theme_topic
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| params.theme_topic.clone());
        let payload = json!({
            "title": outline.title,
            "theme_topic": theme_topic,
            "educational_goal": outline.educational_goal,
            "pages": pages,
            "total_duration": total_duration,
            "personalization": {
                "child_name": params.child_name,
                "favorite_characters": params.favorite_characters,
            },
            "generated_by": {
                "story_model": self.text.name(),
                "image_model": self.images.name(),
                "tts_model": self.speech.name(),
            },
        });

        ArtifactDraft {
            kind: ArtifactKind::PictureBook,
            title: outline.title,
            theme_topic: Some(theme_topic),
            payload,
            duration_secs: total_duration,
        }
    }
}

fn parse_outline(raw: Value) -> Result<StoryOutline> {
    let outline: StoryOutline = serde_json::from_value(raw)
        .map_err(|e| Error::generation(format!("malformed story outline: {e}")))?;
    if outline.pages.is_empty() {
        return Err(Error::generation("story outline has no pages"));
    }
    if outline.title.trim().is_empty() {
        return Err(Error::generation("story outline has no title"));
    }
    Ok(outline)
}
