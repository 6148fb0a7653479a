//! Progress events and their mapping to an absolute percentage.
//!
//! Every pipeline variant owns a [`ProgressMap`]: one band of the 0..=100
//! range per stage, in stage order. An event `(stage, current, total)` maps to
//! `start + span * current / total`.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use tracing::{debug, warn};

use super::registry::{TaskRegistry, TaskUpdate};

/// Progress of a freshly started run.
pub const INIT_PROGRESS: u8 = 5;
/// Progress while the artifact is persisted.
pub const SAVING_PROGRESS: u8 = 95;
pub const COMPLETE_PROGRESS: u8 = 100;

/// A unit of work finished (or a stage started, with `current == 0`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    pub stage: &'static str,
    pub current: usize,
    pub total: usize,
    pub message: String,
}

impl ProgressEvent {
    pub fn new(
        stage: &'static str,
        current: usize,
        total: usize,
        message: impl Into<String>,
    ) -> Self {
        Self {
            stage,
            current,
            total,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageBand {
    pub stage: &'static str,
    pub start: u8,
    pub span: u8,
}

impl StageBand {
    pub const fn new(stage: &'static str, start: u8, span: u8) -> Self {
        Self { stage, start, span }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ProgressMap {
    bands: &'static [StageBand],
}

impl ProgressMap {
    pub const fn new(bands: &'static [StageBand]) -> Self {
        Self { bands }
    }

    pub fn bands(&self) -> &'static [StageBand] {
        self.bands
    }

    /// Absolute progress for `event`, or `None` for a stage this map does not know.
    pub fn percent(&self, event: &ProgressEvent) -> Option<u8> {
        let band = self.bands.iter().find(|b| b.stage == event.stage)?;
        let total = event.total.max(1);
        let current = event.current.min(total);
        let offset = band.span as usize * current / total;
        Some(band.start.saturating_add(offset as u8))
    }

    /// Stage code shown to clients, e.g. `illustrations_2` or `outline_done`.
    pub fn stage_code(event: &ProgressEvent) -> String {
        if event.total > 0 && event.current >= event.total {
            format!("{}_done", event.stage)
        } else {
            format!("{}_{}", event.stage, event.current)
        }
    }
}

pub const BOOK_PROGRESS: ProgressMap = ProgressMap::new(&[
    StageBand::new("outline", 10, 10),
    StageBand::new("illustrations", 20, 50),
    StageBand::new("narration", 70, 25),
]);

pub const SONG_PROGRESS: ProgressMap = ProgressMap::new(&[
    StageBand::new("prompt", 10, 20),
    StageBand::new("music", 30, 40),
    StageBand::new("tracks", 70, 15),
    StageBand::new("music_video", 85, 10),
]);

pub const BOOK_VIDEO_PROGRESS: ProgressMap = ProgressMap::new(&[StageBand::new("video", 10, 85)]);

pub const STANDALONE_VIDEO_PROGRESS: ProgressMap = ProgressMap::new(&[
    StageBand::new("analysis", 5, 15),
    StageBand::new("first_frame", 20, 20),
    StageBand::new("video", 40, 55),
]);

/// Writes a task's progress into the registry without ever going backwards.
pub struct ProgressReporter {
    task_id: String,
    registry: Arc<dyn TaskRegistry>,
    map: ProgressMap,
    last: AtomicU8,
}

impl ProgressReporter {
    pub fn new(
        task_id: impl Into<String>,
        registry: Arc<dyn TaskRegistry>,
        map: ProgressMap,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            registry,
            map,
            last: AtomicU8::new(0),
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Highest progress written so far.
    pub fn last(&self) -> u8 {
        self.last.load(Ordering::Acquire)
    }

    pub async fn report(&self, event: ProgressEvent) {
        let Some(percent) = self.map.percent(&event) else {
            debug!(
                task_id = %self.task_id,
                stage = event.stage,
                "Progress event for unmapped stage"
            );
            return;
        };
        let stage = ProgressMap::stage_code(&event);
        self.checkpoint(percent, stage, event.message).await;
    }

    /// Write an explicit progress value, raised to the last value if lower.
    pub async fn checkpoint(
        &self,
        percent: u8,
        stage: impl Into<String>,
        message: impl Into<String>,
    ) {
        let previous = self.last.fetch_max(percent, Ordering::AcqRel);
        let percent = previous.max(percent);
        let update = TaskUpdate::progress(percent, stage, message);
        if let Err(e) = self.registry.update(&self.task_id, update).await {
            // The client may delete a task while it is still running.
            warn!(task_id = %self.task_id, error = %e, "Failed to record progress");
        }
    }
}
