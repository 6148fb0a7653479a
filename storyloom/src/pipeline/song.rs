//! Song: prompt enhancement, music job, per-track mirroring, companion video.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::warn;

use super::ArtifactDraft;
use super::assets::AssetMirror;
use super::context::RunContext;
use super::exec_log::StepRecord;
use super::poller::{JobState, PollConfig, submit_and_poll};
use super::progress::ProgressEvent;
use crate::database::models::{ArtifactKind, GenerationStep};
use crate::providers::{
    MusicJobUpdate, MusicProvider, MusicTrack, PromptEnhancer, ProviderError, TimedWord,
};
use crate::{Error, Result};

/// Name recorded as the prompt model when the enhancer was bypassed.
pub const FALLBACK_PROMPT_MODEL: &str = "template";

/// Request parameters for a song. Unknown fields are kept in `extra` and
/// forwarded verbatim to the prompt enhancer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SongParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub child_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age_months: Option<u32>,
    pub theme_topic: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme_category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub music_style: Option<String>,
    #[serde(default, alias = "music_mood", skip_serializing_if = "Option::is_none")]
    pub mood: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tempo: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub favorite_characters: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_lyrics: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SongParams {
    pub fn validate(&self) -> Result<()> {
        if self.theme_topic.trim().is_empty() {
            return Err(Error::validation("theme_topic must not be empty"));
        }
        if let Some(tempo) = self.tempo {
            if !(40..=220).contains(&tempo) {
                return Err(Error::validation(format!(
                    "tempo must be between 40 and 220 BPM, got {tempo}"
                )));
            }
        }
        Ok(())
    }

    /// Non-null request fields, as stored with the artifact.
    pub fn user_selections(&self) -> Value {
        match json!(self) {
            Value::Object(map) => {
                Value::Object(map.into_iter().filter(|(_, v)| !v.is_null()).collect())
            }
            other => other,
        }
    }
}

/// Deterministic prompt used when the enhancer is unavailable.
pub fn fallback_prompt(params: &SongParams) -> String {
    let mood = params.mood.as_deref().unwrap_or("cheerful");
    let style = params.music_style.as_deref().unwrap_or("children's pop");
    let language = match params.language.as_deref() {
        Some("english") | Some("en") => "English lyrics",
        Some("bilingual") => "bilingual Chinese-English lyrics",
        _ => "Chinese lyrics",
    };
    let mut prompt = format!(
        "[{} {}] A {mood} children's song about {}. {language}. Soft female vocal.",
        capitalize(mood),
        style,
        params.theme_topic.trim()
    );
    if let Some(tempo) = params.tempo {
        prompt.push_str(&format!(" Tempo {tempo} BPM."));
    }
    prompt.push_str(" Simple repetitive chorus.");
    prompt
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// One stored track ready for the artifact payload.
#[derive(Debug, Clone, Serialize)]
struct SavedTrack {
    id: String,
    audio_url: String,
    cover_url: String,
    provider_cover_url: String,
    video_url: String,
    title: Option<String>,
    duration: f64,
    tags: Option<String>,
    lyrics: Option<String>,
    timestamped_lyrics: Vec<TimedWord>,
}

pub struct SongPipeline {
    enhancer: Arc<dyn PromptEnhancer>,
    music: Arc<dyn MusicProvider>,
    assets: AssetMirror,
    music_poll: PollConfig,
    video_poll: PollConfig,
}

impl SongPipeline {
    pub fn new(
        enhancer: Arc<dyn PromptEnhancer>,
        music: Arc<dyn MusicProvider>,
        assets: AssetMirror,
        music_poll: PollConfig,
        video_poll: PollConfig,
    ) -> Self {
        Self {
            enhancer,
            music,
            assets,
            music_poll,
            video_poll,
        }
    }

    pub async fn run(&self, ctx: &RunContext, params: SongParams) -> Result<ArtifactDraft> {
        ctx.enter(GenerationStep::Validate);
        params.validate()?;
        ctx.logger()
            .record(
                StepRecord::info(GenerationStep::Init, "Starting song")
                    .with_input(params.user_selections()),
            )
            .await;

        let (prompt, prompt_model) = self.enhance_prompt(ctx, &params).await;
        let (job_id, tracks) = self.compose(ctx, &prompt).await?;

        ctx.enter(GenerationStep::TrackDownload);
        let total = tracks.len();
        let mut saved = Vec::with_capacity(total);
        for (i, track) in tracks.into_iter().enumerate() {
            saved.push(self.save_track(ctx, &job_id, track).await?);
            ctx.report(ProgressEvent::new(
                "tracks",
                i + 1,
                total,
                format!("Track {}/{} saved", i + 1, total),
            ))
            .await;
        }

        if let Some(primary) = saved.first_mut() {
            primary.video_url = self.companion_video(ctx, &job_id, &primary.id).await;
        }

        Ok(self.assemble(&params, prompt, prompt_model, job_id, saved))
    }

    async fn enhance_prompt(&self, ctx: &RunContext, params: &SongParams) -> (String, String) {
        ctx.enter(GenerationStep::PromptEnhance);
        ctx.report(ProgressEvent::new("prompt", 0, 1, "Enhancing the prompt"))
            .await;

        let input = json!(params);
        let started = Instant::now();
        let outcome = self.enhancer.enhance(&input).await;
        let elapsed = started.elapsed();

        let result = match outcome {
            Ok(prompt) if !prompt.trim().is_empty() => {
                ctx.logger()
                    .record(
                        StepRecord::info(GenerationStep::PromptEnhance, "Prompt enhanced")
                            .with_input(input)
                            .with_output(json!({
                                "enhanced": prompt,
                                "length": prompt.chars().count(),
                            }))
                            .with_duration(elapsed),
                    )
                    .await;
                (prompt, self.enhancer.name().to_string())
            }
            outcome => {
                let reason = match outcome {
                    Err(e) => e.to_string(),
                    Ok(_) => "enhancer returned an empty prompt".to_string(),
                };
                warn!(
                    task_id = ctx.task_id(),
                    error = %reason,
                    "Prompt enhancement failed, using template prompt"
                );
                let prompt = fallback_prompt(params);
                ctx.logger()
                    .record(
                        StepRecord::warning(
                            GenerationStep::PromptEnhance,
                            "Prompt enhancement failed, using template prompt",
                        )
                        .with_input(input)
                        .with_output(json!({ "enhanced": prompt }))
                        .with_duration(elapsed)
                        .with_error_message(reason),
                    )
                    .await;
                (prompt, FALLBACK_PROMPT_MODEL.to_string())
            }
        };

        ctx.report(ProgressEvent::new("prompt", 1, 1, "Prompt ready"))
            .await;
        result
    }

    /// Submit the music job and wait for its tracks.
    async fn compose(&self, ctx: &RunContext, prompt: &str) -> Result<(String, Vec<MusicTrack>)> {
        ctx.enter(GenerationStep::MusicGenerate);
        ctx.report(ProgressEvent::new("music", 0, 1, "Composing music"))
            .await;

        let music = &self.music;
        let (job_id, tracks) = ctx
            .logger()
            .timed(
                GenerationStep::MusicGenerate,
                "Music generated",
                json!({ "prompt": prompt }),
                async {
                    let (job_id, tracks) = submit_and_poll(
                        "music",
                        self.music_poll,
                        || music.submit(prompt),
                        |job_id| {
                            let job_id = job_id.to_string();
                            async move {
                                let MusicJobUpdate {
                                    status,
                                    tracks,
                                    message,
                                } = music.poll(&job_id).await?;
                                JobState::from_status(&status, message.as_deref(), || {
                                    Ok((job_id, tracks))
                                })
                            }
                        },
                    )
                    .await?;
                    if tracks.is_empty() {
                        return Err(Error::generation(format!(
                            "music job {job_id} succeeded without tracks"
                        )));
                    }
                    Ok((job_id, tracks))
                },
                |(job_id, tracks): &(String, Vec<MusicTrack>)| {
                    json!({
                        "provider_job_id": job_id,
                        "tracks_count": tracks.len(),
                        "audio_url": tracks.first().map(|t| t.audio_url.as_str()),
                    })
                },
            )
            .await?;

        ctx.report(ProgressEvent::new("music", 1, 1, "Music ready"))
            .await;
        Ok((job_id, tracks))
    }

    /// Store a track's audio, its cover and its word timings.
    ///
    /// Only the audio is required; cover and timings degrade to the provider
    /// URL and an empty list.
    async fn save_track(
        &self,
        ctx: &RunContext,
        job_id: &str,
        track: MusicTrack,
    ) -> Result<SavedTrack> {
        let audio_url = ctx
            .logger()
            .timed(
                GenerationStep::TrackDownload,
                format!("Track {} saved", track.id),
                json!({ "track_id": track.id, "audio_url": track.audio_url }),
                self.assets.mirror(&track.audio_url),
                |url: &String| json!({ "audio_url": url }),
            )
            .await?;

        let provider_cover_url = track.cover_url.clone().unwrap_or_default();
        let cover_url = if provider_cover_url.is_empty() {
            String::new()
        } else {
            match self.assets.mirror(&provider_cover_url).await {
                Ok(url) => url,
                Err(e) => {
                    ctx.logger()
                        .record(
                            StepRecord::warning(
                                GenerationStep::TrackDownload,
                                format!(
                                    "Cover for track {} not mirrored, keeping provider URL",
                                    track.id
                                ),
                            )
                            .with_input(json!({ "cover_url": provider_cover_url }))
                            .with_error_message(e.to_string()),
                        )
                        .await;
                    provider_cover_url.clone()
                }
            }
        };

        let timestamped_lyrics = match self.music.fetch_timestamps(job_id, &track.id).await {
            Ok(words) => {
                ctx.logger()
                    .record(
                        StepRecord::info(
                            GenerationStep::MusicTimestamps,
                            format!("Fetched {} timed words for track {}", words.len(), track.id),
                        )
                        .with_input(json!({ "track_id": track.id })),
                    )
                    .await;
                words
            }
            Err(e) => {
                ctx.logger()
                    .record(
                        StepRecord::warning(
                            GenerationStep::MusicTimestamps,
                            format!("Timed lyrics unavailable for track {}", track.id),
                        )
                        .with_input(json!({ "track_id": track.id }))
                        .with_error_message(e.to_string()),
                    )
                    .await;
                Vec::new()
            }
        };

        Ok(SavedTrack {
            id: track.id,
            audio_url,
            cover_url,
            provider_cover_url,
            video_url: String::new(),
            title: track.title,
            duration: track.duration,
            tags: track.tags,
            lyrics: track.lyrics,
            timestamped_lyrics,
        })
    }

    /// Second submit-and-poll for the primary track. Failures leave the URL empty.
    async fn companion_video(&self, ctx: &RunContext, job_id: &str, track_id: &str) -> String {
        ctx.enter(GenerationStep::MusicVideo);
        ctx.report(ProgressEvent::new("music_video", 0, 1, "Rendering music video"))
            .await;

        let music = &self.music;
        let started = Instant::now();
        let outcome: Result<String> = async {
            let remote = submit_and_poll(
                "music_video",
                self.video_poll,
                || music.submit_video(job_id, track_id),
                |video_job_id| {
                    let video_job_id = video_job_id.to_string();
                    async move {
                        let update = music.poll_video(&video_job_id).await?;
                        JobState::from_status(&update.status, update.message.as_deref(), || {
                            update
                                .video_url
                                .clone()
                                .filter(|u| !u.is_empty())
                                .ok_or_else(|| {
                                    ProviderError::malformed("music video finished without a URL")
                                })
                        })
                    }
                },
            )
            .await?;
            self.assets.mirror(&remote).await
        }
        .await;

        let input = json!({ "provider_job_id": job_id, "track_id": track_id });
        let video_url = match outcome {
            Ok(url) => {
                ctx.logger()
                    .record(
                        StepRecord::info(GenerationStep::MusicVideo, "Music video saved")
                            .with_input(input)
                            .with_output(json!({ "video_url": url }))
                            .with_duration(started.elapsed()),
                    )
                    .await;
                url
            }
            Err(e) => {
                warn!(task_id = ctx.task_id(), error = %e, "Music video skipped");
                ctx.logger()
                    .record(
                        StepRecord::warning(GenerationStep::MusicVideo, "Music video skipped")
                            .with_input(input)
                            .with_duration(started.elapsed())
                            .with_error_message(e.to_string()),
                    )
                    .await;
                String::new()
            }
        };

        ctx.report(ProgressEvent::new("music_video", 1, 1, "Music video done"))
            .await;
        video_url
    }

    fn assemble(
        &self,
        params: &SongParams,
        prompt: String,
        prompt_model: String,
        job_id: String,
        tracks: Vec<SavedTrack>,
    ) -> ArtifactDraft {
        let theme_topic = params.theme_topic.trim().to_string();
        let title = format!("{theme_topic} Song");
        let primary = tracks.first();
        let duration = primary.map_or(0.0, |t| t.duration);

        let payload = json!({
            "title": title,
            "theme_topic": theme_topic,
            "lyrics": {
                "full_text": primary.and_then(|t| t.lyrics.clone()).unwrap_or_default(),
                "timestamped": primary.map(|t| t.timestamped_lyrics.clone()).unwrap_or_default(),
            },
            "audio_url": primary.map(|t| t.audio_url.as_str()).unwrap_or_default(),
            "audio_duration": duration,
            "cover_url": primary.map(|t| t.cover_url.as_str()).unwrap_or_default(),
            "provider_cover_url": primary
                .map(|t| t.provider_cover_url.as_str())
                .unwrap_or_default(),
            "video_url": primary.map(|t| t.video_url.as_str()).unwrap_or_default(),
            "all_tracks": tracks,
            "personalization": {
                "child_name": params.child_name,
                "favorite_characters": params.favorite_characters,
            },
            "user_selections": params.user_selections(),
            "enhanced_prompt": prompt,
            "provider_job_id": job_id,
            "generated_by": {
                "prompt_model": prompt_model,
                "music_model": self.music.name(),
            },
        });

        ArtifactDraft {
            kind: ArtifactKind::Song,
            title,
            theme_topic: Some(theme_topic),
            payload,
            duration_secs: duration,
        }
    }
}
