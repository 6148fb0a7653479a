//! Append-only, sequence-numbered step log for a single task.
//!
//! Every pipeline run owns one [`ExecutionLogger`]. Entries are numbered
//! 1..K in the order they are written and are re-keyed to the artifact id
//! once the artifact is saved.

use std::backtrace::{Backtrace, BacktraceStatus};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use crate::database::models::{GenerationLogDbModel, GenerationStep, LogLevel};
use crate::database::repositories::GenerationLogRepository;
use crate::database::time::ms_to_datetime;
use crate::{Error, Result};

/// Maximum characters kept from a log message.
pub const MESSAGE_LIMIT: usize = 500;
/// Maximum characters kept from any string inside a snapshot.
pub const SNAPSHOT_STRING_LIMIT: usize = 1000;
/// Maximum items kept from any array inside a snapshot.
pub const SNAPSHOT_ARRAY_LIMIT: usize = 50;

const REDACTED: &str = "[redacted]";
const SENSITIVE_KEYS: &[&str] = &[
    "api_key",
    "apikey",
    "token",
    "access_token",
    "secret",
    "password",
    "authorization",
];

/// A step entry before it receives its sequence number.
#[derive(Debug, Clone)]
pub struct StepRecord {
    pub step: GenerationStep,
    pub level: LogLevel,
    pub message: String,
    pub input: Value,
    pub output: Value,
    pub duration: Option<Duration>,
    pub error_message: Option<String>,
    pub error_trace: Option<String>,
    pub extra: Value,
}

impl StepRecord {
    pub fn new(step: GenerationStep, level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            step,
            level,
            message: message.into(),
            input: Value::Object(Map::new()),
            output: Value::Object(Map::new()),
            duration: None,
            error_message: None,
            error_trace: None,
            extra: Value::Object(Map::new()),
        }
    }

    pub fn info(step: GenerationStep, message: impl Into<String>) -> Self {
        Self::new(step, LogLevel::Info, message)
    }

    pub fn warning(step: GenerationStep, message: impl Into<String>) -> Self {
        Self::new(step, LogLevel::Warning, message)
    }

    pub fn debug(step: GenerationStep, message: impl Into<String>) -> Self {
        Self::new(step, LogLevel::Debug, message)
    }

    /// An error entry carrying the error text and its captured trace.
    pub fn failure(step: GenerationStep, message: impl Into<String>, err: &Error) -> Self {
        let mut record = Self::new(step, LogLevel::Error, message);
        record.error_message = Some(err.to_string());
        record.error_trace = Some(capture_trace(err));
        record
    }

    pub fn with_input(mut self, input: Value) -> Self {
        self.input = input;
        self
    }

    pub fn with_output(mut self, output: Value) -> Self {
        self.output = output;
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn with_extra(mut self, extra: Value) -> Self {
        self.extra = extra;
        self
    }

    /// Attach an error message without a trace, for best-effort failures.
    pub fn with_error_message(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }
}

/// A persisted execution log entry as returned to API clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionLogEntry {
    pub id: String,
    pub task_id: String,
    pub artifact_id: Option<String>,
    pub step: String,
    pub level: String,
    pub sequence: i64,
    pub message: String,
    pub input_snapshot: Value,
    pub output_snapshot: Value,
    pub duration_secs: Option<f64>,
    pub error_message: Option<String>,
    pub error_trace: Option<String>,
    pub extra: Value,
    pub created_at: DateTime<Utc>,
}

impl From<GenerationLogDbModel> for ExecutionLogEntry {
    fn from(row: GenerationLogDbModel) -> Self {
        Self {
            input_snapshot: parse_snapshot(&row.input_snapshot),
            output_snapshot: parse_snapshot(&row.output_snapshot),
            extra: parse_snapshot(&row.extra),
            created_at: ms_to_datetime(row.created_at),
            id: row.id,
            task_id: row.task_id,
            artifact_id: row.artifact_id,
            step: row.step,
            level: row.level,
            sequence: row.sequence,
            message: row.message,
            duration_secs: row.duration_secs,
            error_message: row.error_message,
            error_trace: row.error_trace,
        }
    }
}

fn parse_snapshot(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// Single-writer step log for one task.
pub struct ExecutionLogger {
    task_id: String,
    sequence: AtomicI64,
    repo: Arc<dyn GenerationLogRepository>,
}

impl ExecutionLogger {
    pub fn new(task_id: impl Into<String>, repo: Arc<dyn GenerationLogRepository>) -> Self {
        Self {
            task_id: task_id.into(),
            sequence: AtomicI64::new(0),
            repo,
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Number of sequence numbers handed out so far.
    pub fn entries_written(&self) -> i64 {
        self.sequence.load(Ordering::Acquire)
    }

    /// Persist a step entry and return its sequence number.
    ///
    /// A storage failure is reported through `tracing` and never fails the run.
    pub async fn record(&self, record: StepRecord) -> i64 {
        let sequence = self.sequence.fetch_add(1, Ordering::AcqRel) + 1;
        let message = truncate_chars(&record.message, MESSAGE_LIMIT);
        self.mirror(&record, sequence, &message);

        let mut row = GenerationLogDbModel::new(
            &self.task_id,
            record.step,
            record.level,
            sequence,
            message,
        );
        row.input_snapshot = sanitize(record.input).to_string();
        row.output_snapshot = sanitize(record.output).to_string();
        row.extra = sanitize(record.extra).to_string();
        row.duration_secs = record.duration.map(|d| d.as_secs_f64());
        row.error_message = record
            .error_message
            .map(|m| truncate_chars(&m, SNAPSHOT_STRING_LIMIT));
        row.error_trace = record.error_trace;

        if let Err(e) = self.repo.insert(&row).await {
            warn!(
                task_id = %self.task_id,
                sequence,
                step = %record.step,
                error = %e,
                "Failed to persist execution log entry"
            );
        }
        sequence
    }

    pub async fn info(&self, step: GenerationStep, message: impl Into<String>) -> i64 {
        self.record(StepRecord::info(step, message)).await
    }

    pub async fn warning(&self, step: GenerationStep, message: impl Into<String>) -> i64 {
        self.record(StepRecord::warning(step, message)).await
    }

    pub async fn failure(
        &self,
        step: GenerationStep,
        message: impl Into<String>,
        err: &Error,
    ) -> i64 {
        self.record(StepRecord::failure(step, message, err)).await
    }

    /// Run `fut`, then log one entry for it with its duration.
    ///
    /// Success is logged at info with `output(&value)` as the output
    /// snapshot. Failure is logged at error and the error is returned.
    pub async fn timed<T, Fut, O>(
        &self,
        step: GenerationStep,
        message: impl Into<String>,
        input: Value,
        fut: Fut,
        output: O,
    ) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
        O: FnOnce(&T) -> Value,
    {
        let record = StepRecord::info(step, message).with_input(input);
        self.timed_record(record, fut, output).await
    }

    /// [`timed`](Self::timed) starting from a prepared record, so the entry
    /// keeps its `extra` context. On failure the input and extra carry over
    /// to the error entry.
    pub async fn timed_record<T, Fut, O>(
        &self,
        record: StepRecord,
        fut: Fut,
        output: O,
    ) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
        O: FnOnce(&T) -> Value,
    {
        let started = Instant::now();
        match fut.await {
            Ok(value) => {
                let record = record
                    .with_output(output(&value))
                    .with_duration(started.elapsed());
                self.record(record).await;
                Ok(value)
            }
            Err(e) => {
                let message = format!("{} failed", record.message);
                let failed = StepRecord::failure(record.step, message, &e)
                    .with_input(record.input)
                    .with_extra(record.extra)
                    .with_duration(started.elapsed());
                self.record(failed).await;
                Err(e)
            }
        }
    }

    /// Re-key every entry of this task to the produced artifact.
    pub async fn attach_artifact(&self, artifact_id: &str) -> Result<u64> {
        let rows = self.repo.attach_artifact(&self.task_id, artifact_id).await?;
        debug!(task_id = %self.task_id, artifact_id, rows, "Attached execution log to artifact");
        Ok(rows)
    }

    fn mirror(&self, record: &StepRecord, sequence: i64, message: &str) {
        let task_id = self.task_id.as_str();
        let step = record.step.to_string();
        let step = step.as_str();
        match record.level {
            LogLevel::Debug => debug!(task_id, sequence, step, "{message}"),
            LogLevel::Info => info!(task_id, sequence, step, "{message}"),
            LogLevel::Warning => warn!(
                task_id,
                sequence,
                step,
                error = record.error_message.as_deref().unwrap_or_default(),
                "{message}"
            ),
            LogLevel::Error => error!(
                task_id,
                sequence,
                step,
                error = record.error_message.as_deref().unwrap_or_default(),
                "{message}"
            ),
        }
    }
}

/// Error chain, followed by a backtrace when `RUST_BACKTRACE` enables one.
fn capture_trace(err: &Error) -> String {
    let mut trace = err.chain();
    let backtrace = Backtrace::capture();
    if backtrace.status() == BacktraceStatus::Captured {
        trace.push_str("\n\nstack backtrace:\n");
        trace.push_str(&backtrace.to_string());
    }
    trace
}

/// Redact credential-like keys and bound the size of a snapshot.
pub fn sanitize(value: Value) -> Value {
    match value {
        Value::String(s) => Value::String(truncate_chars(&s, SNAPSHOT_STRING_LIMIT)),
        Value::Array(items) => {
            let len = items.len();
            let mut kept: Vec<Value> = items
                .into_iter()
                .take(SNAPSHOT_ARRAY_LIMIT)
                .map(sanitize)
                .collect();
            if len > SNAPSHOT_ARRAY_LIMIT {
                kept.push(Value::String(format!(
                    "... {} more items",
                    len - SNAPSHOT_ARRAY_LIMIT
                )));
            }
            Value::Array(kept)
        }
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, value)| {
                    if is_sensitive(&key) {
                        (key, Value::String(REDACTED.to_string()))
                    } else {
                        (key, sanitize(value))
                    }
                })
                .collect(),
        ),
        other => other,
    }
}

fn is_sensitive(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    SENSITIVE_KEYS.iter().any(|s| key == *s || key.ends_with(&format!("_{s}")))
}

/// Cut `s` to at most `limit` characters, marking the cut with `...`.
pub fn truncate_chars(s: &str, limit: usize) -> String {
    match s.char_indices().nth(limit) {
        None => s.to_string(),
        Some((byte_idx, _)) => format!("{}...", &s[..byte_idx]),
    }
}
