//! Per-run state handed to every pipeline stage.

use std::sync::Arc;

use parking_lot::Mutex;

use super::exec_log::ExecutionLogger;
use super::progress::{ProgressEvent, ProgressReporter};
use crate::database::models::GenerationStep;

/// Everything a pipeline run needs that is scoped to one task.
pub struct RunContext {
    logger: Arc<ExecutionLogger>,
    progress: ProgressReporter,
    step: Mutex<GenerationStep>,
}

impl RunContext {
    pub fn new(logger: Arc<ExecutionLogger>, progress: ProgressReporter) -> Self {
        Self {
            logger,
            progress,
            step: Mutex::new(GenerationStep::Init),
        }
    }

    pub fn task_id(&self) -> &str {
        self.logger.task_id()
    }

    pub fn logger(&self) -> &ExecutionLogger {
        &self.logger
    }

    /// Shared handle for fan-out units that outlive a borrow.
    pub fn logger_handle(&self) -> Arc<ExecutionLogger> {
        Arc::clone(&self.logger)
    }

    pub fn progress(&self) -> &ProgressReporter {
        &self.progress
    }

    pub async fn report(&self, event: ProgressEvent) {
        self.progress.report(event).await;
    }

    /// Mark the step now running. A failure escaping the run is logged under it.
    pub fn enter(&self, step: GenerationStep) {
        *self.step.lock() = step;
    }

    pub fn current_step(&self) -> GenerationStep {
        *self.step.lock()
    }
}
