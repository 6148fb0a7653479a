//! Environment-driven application configuration.
//!
//! Every setting has a default, so an empty environment yields a working
//! local setup. Values that are present but malformed are rejected rather
//! than silently replaced by the default.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::api::server::ApiServerConfig;
use crate::pipeline::{PipelineSettings, PollConfig};
use crate::providers::{GatewayConfig, RetryPolicy};
use crate::storage::reclaimer::{MIN_AGE_HOURS_RANGE, ReclaimerConfig};
use crate::{Error, Result};

/// Default SQLite database.
pub const DEFAULT_DATABASE_URL: &str = "sqlite:storyloom.db?mode=rwc";

/// Top-level configuration of the service binary.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub log_dir: PathBuf,
    pub log_retention_days: i64,
    pub storage_dir: PathBuf,
    pub media_base_url: String,
    pub gateway_url: String,
    pub gateway_api_key: Option<String>,
    pub request_timeout: Duration,
    pub illustration_concurrency: usize,
    pub narration_concurrency: usize,
    pub narration_spacing: Duration,
    pub music_poll: PollConfig,
    pub music_video_poll: PollConfig,
    pub video_poll: PollConfig,
    pub reclaim_min_age_hours: u64,
    pub reclaim_interval_secs: u64,
    pub api: ApiServerConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        let pipeline = PipelineSettings::default();
        let reclaimer = ReclaimerConfig::default();
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            log_dir: PathBuf::from("logs"),
            log_retention_days: 7,
            storage_dir: PathBuf::from("media"),
            media_base_url: "/media".to_string(),
            gateway_url: "http://127.0.0.1:9000".to_string(),
            gateway_api_key: None,
            request_timeout: Duration::from_secs(120),
            illustration_concurrency: pipeline.illustration_concurrency,
            narration_concurrency: pipeline.narration_concurrency,
            narration_spacing: pipeline.narration_spacing,
            music_poll: pipeline.music_poll,
            music_video_poll: pipeline.music_video_poll,
            video_poll: pipeline.video_poll,
            reclaim_min_age_hours: reclaimer.min_age_hours,
            reclaim_interval_secs: reclaimer.interval_secs,
            api: ApiServerConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the process environment.
    ///
    /// Call `dotenvy::dotenv()` first to pick up a `.env` file.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = EnvReader { lookup };
        let defaults = Self::default();

        let music_poll = env.poll(
            "STORYLOOM_MUSIC_POLL_INTERVAL_SECS",
            "STORYLOOM_MUSIC_POLL_TIMEOUT_SECS",
            defaults.music_poll,
        )?;
        let music_video_poll = env.poll(
            "STORYLOOM_MUSIC_VIDEO_POLL_INTERVAL_SECS",
            "STORYLOOM_MUSIC_VIDEO_POLL_TIMEOUT_SECS",
            defaults.music_video_poll,
        )?;
        let video_poll = env.poll(
            "STORYLOOM_VIDEO_POLL_INTERVAL_SECS",
            "STORYLOOM_VIDEO_POLL_TIMEOUT_SECS",
            defaults.video_poll,
        )?;

        let mut api = defaults.api.clone();
        if let Some(bind_address) = env.string("API_BIND_ADDRESS") {
            api.bind_address = bind_address;
        }
        api.port = env.parse("API_PORT", api.port)?;

        let config = Self {
            database_url: env
                .string("DATABASE_URL")
                .unwrap_or(defaults.database_url),
            log_dir: env
                .string("STORYLOOM_LOG_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.log_dir),
            log_retention_days: env
                .parse("STORYLOOM_LOG_RETENTION_DAYS", defaults.log_retention_days)?,
            storage_dir: env
                .string("STORYLOOM_STORAGE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.storage_dir),
            media_base_url: env
                .string("STORYLOOM_MEDIA_BASE_URL")
                .unwrap_or(defaults.media_base_url),
            gateway_url: env
                .string("STORYLOOM_GATEWAY_URL")
                .unwrap_or(defaults.gateway_url),
            gateway_api_key: env.string("STORYLOOM_GATEWAY_API_KEY"),
            request_timeout: Duration::from_secs(env.parse(
                "STORYLOOM_REQUEST_TIMEOUT_SECS",
                defaults.request_timeout.as_secs(),
            )?),
            illustration_concurrency: env.parse(
                "STORYLOOM_ILLUSTRATION_CONCURRENCY",
                defaults.illustration_concurrency,
            )?,
            narration_concurrency: env.parse(
                "STORYLOOM_NARRATION_CONCURRENCY",
                defaults.narration_concurrency,
            )?,
            narration_spacing: Duration::from_millis(env.parse(
                "STORYLOOM_NARRATION_SPACING_MS",
                defaults.narration_spacing.as_millis() as u64,
            )?),
            music_poll,
            music_video_poll,
            video_poll,
            reclaim_min_age_hours: env.parse(
                "STORYLOOM_RECLAIM_MIN_AGE_HOURS",
                defaults.reclaim_min_age_hours,
            )?,
            reclaim_interval_secs: env.parse(
                "STORYLOOM_RECLAIM_INTERVAL_SECS",
                defaults.reclaim_interval_secs,
            )?,
            api,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.illustration_concurrency == 0 {
            return Err(Error::config(
                "STORYLOOM_ILLUSTRATION_CONCURRENCY must be at least 1",
            ));
        }
        if self.narration_concurrency == 0 {
            return Err(Error::config("STORYLOOM_NARRATION_CONCURRENCY must be at least 1"));
        }
        for (name, poll) in [
            ("music", self.music_poll),
            ("music video", self.music_video_poll),
            ("video", self.video_poll),
        ] {
            if poll.timeout.is_zero() {
                return Err(Error::config(format!("{name} poll timeout must be positive")));
            }
        }
        if !MIN_AGE_HOURS_RANGE.contains(&self.reclaim_min_age_hours) {
            return Err(Error::config(format!(
                "STORYLOOM_RECLAIM_MIN_AGE_HOURS must be between {} and {}",
                MIN_AGE_HOURS_RANGE.start(),
                MIN_AGE_HOURS_RANGE.end()
            )));
        }
        if self.log_retention_days < 1 {
            return Err(Error::config("STORYLOOM_LOG_RETENTION_DAYS must be at least 1"));
        }
        Ok(())
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            illustration_concurrency: self.illustration_concurrency,
            narration_concurrency: self.narration_concurrency,
            narration_spacing: self.narration_spacing,
            music_poll: self.music_poll,
            music_video_poll: self.music_video_poll,
            video_poll: self.video_poll,
        }
    }

    pub fn reclaimer_config(&self) -> ReclaimerConfig {
        ReclaimerConfig::default()
            .with_min_age_hours(self.reclaim_min_age_hours)
            .with_interval_secs(self.reclaim_interval_secs)
    }

    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            base_url: self.gateway_url.clone(),
            api_key: self.gateway_api_key.clone(),
            retry: RetryPolicy::default(),
        }
    }
}

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Trimmed value of `key`; blank counts as unset.
    fn string(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T>(&self, key: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.string(key) {
            Some(raw) => raw
                .parse()
                .map_err(|e| Error::config(format!("invalid {key}={raw:?}: {e}"))),
            None => Ok(default),
        }
    }

    fn poll(
        &self,
        interval_key: &str,
        timeout_key: &str,
        default: PollConfig,
    ) -> Result<PollConfig> {
        let interval = self.parse(interval_key, default.interval.as_secs())?;
        let timeout = self.parse(timeout_key, default.timeout.as_secs())?;
        Ok(PollConfig::from_secs(interval, timeout))
    }
}
