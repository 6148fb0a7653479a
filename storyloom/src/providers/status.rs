//! Normalization of vendor job statuses.

use super::FailureKind;

/// Lifecycle state of a job running at an external provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExternalJobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    ContentFlagged,
    QuotaExceeded,
    /// A status string no mapping knows about. Treated as still in progress;
    /// the poll timeout bounds how long it is tolerated.
    Unknown(String),
}

impl ExternalJobStatus {
    /// Every terminal status. Used to check that the poller resolves each one.
    pub const TERMINAL: [ExternalJobStatus; 4] = [
        Self::Succeeded,
        Self::Failed,
        Self::ContentFlagged,
        Self::QuotaExceeded,
    ];

    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "QUEUED" | "QUEUEING" | "PENDING" | "SUBMITTED" | "PREPARING" => Self::Queued,
            "RUNNING" | "PROCESSING" | "IN_PROGRESS" | "TEXT_SUCCESS" | "FIRST_SUCCESS" => {
                Self::Running
            }
            "SUCCESS" | "SUCCEEDED" | "COMPLETED" | "COMPLETE" => Self::Succeeded,
            "FAIL" | "FAILED" | "ERROR" | "CREATE_TASK_FAILED" | "GENERATE_AUDIO_FAILED"
            | "CALLBACK_EXCEPTION" => Self::Failed,
            "SENSITIVE_WORD_ERROR" | "CONTENT_FLAGGED" | "FLAGGED" | "MODERATED" => {
                Self::ContentFlagged
            }
            "QUOTA_EXCEEDED" | "INSUFFICIENT_BALANCE" | "INSUFFICIENT_CREDITS" => {
                Self::QuotaExceeded
            }
            _ => Self::Unknown(raw.to_string()),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed | Self::ContentFlagged | Self::QuotaExceeded
        )
    }

    /// Failure kind of a terminal failure, `None` otherwise.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::Failed => Some(FailureKind::ProviderInternal),
            Self::ContentFlagged => Some(FailureKind::ContentFlagged),
            Self::QuotaExceeded => Some(FailureKind::QuotaExceeded),
            _ => None,
        }
    }
}
