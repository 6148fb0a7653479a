//! Submit-then-poll driver for slow external jobs.
//!
//! A provider job is polled on a fixed interval until it reaches a terminal
//! state or the hard timeout elapses. Success yields the payload; a terminal
//! failure and the timeout each surface as a distinct [`PollError`].

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::providers::{ExternalJobStatus, FailureKind, ProviderError};

/// Interval and hard ceiling for one external job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    pub interval: Duration,
    pub timeout: Duration,
}

impl PollConfig {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }

    pub fn from_secs(interval_secs: u64, timeout_secs: u64) -> Self {
        Self::new(
            Duration::from_secs(interval_secs),
            Duration::from_secs(timeout_secs),
        )
    }
}

/// Tri-state result of one status check.
#[derive(Debug, Clone, PartialEq)]
pub enum JobState<T> {
    Pending,
    Succeeded(T),
    Failed { kind: FailureKind, message: String },
}

impl<T> JobState<T> {
    /// Classify a provider status. `on_success` builds the payload for a
    /// succeeded job and may itself reject an unusable result.
    pub fn from_status(
        status: &ExternalJobStatus,
        message: Option<&str>,
        on_success: impl FnOnce() -> Result<T, ProviderError>,
    ) -> Result<Self, ProviderError> {
        if *status == ExternalJobStatus::Succeeded {
            return on_success().map(Self::Succeeded);
        }
        match status.failure_kind() {
            Some(kind) => Ok(Self::Failed {
                kind,
                message: message
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("{status:?}")),
            }),
            None => {
                if let ExternalJobStatus::Unknown(raw) = status {
                    warn!(status = %raw, "Unrecognized provider job status, still waiting");
                }
                Ok(Self::Pending)
            }
        }
    }
}

#[derive(Error, Debug, Clone)]
pub enum PollError {
    #[error("external job {job_id} timed out after {}s", .elapsed.as_secs())]
    Timeout { job_id: String, elapsed: Duration },

    #[error("external job {job_id} failed: {kind}: {message}")]
    Failed {
        job_id: String,
        kind: FailureKind,
        message: String,
    },

    #[error("external job {job_id}: {source}")]
    Provider {
        job_id: String,
        #[source]
        source: ProviderError,
    },
}

impl PollError {
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::Failed { kind, .. } => Some(*kind),
            Self::Provider { source, .. } => source.failure_kind(),
            Self::Timeout { .. } => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Poll `check` until the job is terminal or `config.timeout` elapses.
///
/// A status check that hangs counts against the same deadline.
pub async fn poll_until_terminal<T, F, Fut>(
    job_id: &str,
    config: PollConfig,
    mut check: F,
) -> Result<T, PollError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<JobState<T>, ProviderError>>,
{
    let started = Instant::now();
    let mut attempts = 0u32;

    loop {
        let remaining = config.timeout.saturating_sub(started.elapsed());
        let timed_out = || PollError::Timeout {
            job_id: job_id.to_string(),
            elapsed: started.elapsed(),
        };

        attempts += 1;
        let state = match tokio::time::timeout(remaining, check()).await {
            Ok(result) => result.map_err(|source| PollError::Provider {
                job_id: job_id.to_string(),
                source,
            })?,
            Err(_) => return Err(timed_out()),
        };

        match state {
            JobState::Succeeded(value) => {
                info!(
                    job_id,
                    attempts,
                    elapsed_secs = started.elapsed().as_secs(),
                    "External job succeeded"
                );
                return Ok(value);
            }
            JobState::Failed { kind, message } => {
                warn!(job_id, %kind, %message, "External job failed");
                return Err(PollError::Failed {
                    job_id: job_id.to_string(),
                    kind,
                    message,
                });
            }
            JobState::Pending => {}
        }

        let elapsed = started.elapsed();
        if elapsed >= config.timeout {
            return Err(timed_out());
        }
        debug!(job_id, attempts, "External job still running");
        tokio::time::sleep(config.interval.min(config.timeout - elapsed)).await;
    }
}

/// Submit a job, then poll it to completion.
pub async fn submit_and_poll<T, S, SFut, F, Fut>(
    label: &str,
    config: PollConfig,
    submit: S,
    mut check: F,
) -> Result<T, PollError>
where
    S: FnOnce() -> SFut,
    SFut: Future<Output = Result<String, ProviderError>>,
    F: FnMut(&str) -> Fut,
    Fut: Future<Output = Result<JobState<T>, ProviderError>>,
{
    let job_id = submit().await.map_err(|source| PollError::Provider {
        job_id: format!("<{label} submit>"),
        source,
    })?;
    info!(label, job_id = %job_id, "External job submitted");
    poll_until_terminal(&job_id, config, || check(&job_id)).await
}
