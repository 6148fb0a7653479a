//! Failure taxonomy shared by every provider capability.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a provider refused or abandoned a job.
///
/// These are terminal: retrying the same request will not change the outcome.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    #[strum(to_string = "quota exceeded")]
    QuotaExceeded,
    #[strum(to_string = "content flagged by moderation")]
    ContentFlagged,
    #[strum(to_string = "provider internal error")]
    ProviderInternal,
}

/// Error returned by a single provider call.
#[derive(Error, Debug, Clone)]
pub enum ProviderError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("{kind}: {message}")]
    Terminal { kind: FailureKind, message: String },

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl ProviderError {
    pub fn terminal(kind: FailureKind, message: impl Into<String>) -> Self {
        Self::Terminal {
            kind,
            message: message.into(),
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed(message.into())
    }

    /// Classify an unsuccessful HTTP status.
    ///
    /// 402 and 429 mean the account ran out of budget; they are never retried.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        match status {
            402 | 429 => Self::terminal(FailureKind::QuotaExceeded, message),
            _ => Self::Http {
                status,
                message: message.into(),
            },
        }
    }

    /// Whether a retry of the identical request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::Transport(_) => true,
            Self::Http { status, .. } => *status >= 500 || *status == 408,
            Self::Terminal { .. } | Self::Malformed(_) => false,
        }
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::Terminal { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else if err.is_decode() {
            Self::Malformed(err.to_string())
        } else if let Some(status) = err.status() {
            Self::from_status(status.as_u16(), err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}
