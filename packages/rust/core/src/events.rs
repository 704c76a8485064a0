//! Run event logging and progress reporting.
//!
//! [`RunLogger`] persists structured events against a run row and mirrors
//! them to the tracing subscriber. [`ProgressReporter`] is the seam the CLI
//! uses to drive a progress bar; pipelines stay UI-agnostic.

use docforge_storage::Storage;
use serde_json::Value;

pub const LEVEL_INFO: &str = "INFO";
pub const LEVEL_WARN: &str = "WARN";
pub const LEVEL_ERROR: &str = "ERROR";

/// Structured event writer bound to one run.
pub struct RunLogger<'a> {
    storage: &'a Storage,
    run_id: String,
}

impl<'a> RunLogger<'a> {
    pub fn new(storage: &'a Storage, run_id: impl Into<String>) -> Self {
        Self {
            storage,
            run_id: run_id.into(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub async fn info(&self, message: &str, payload: Value) {
        tracing::info!(run_id = %self.run_id, %message, "run event");
        self.persist(LEVEL_INFO, message, payload).await;
    }

    pub async fn warn(&self, message: &str, payload: Value) {
        tracing::warn!(run_id = %self.run_id, %message, "run event");
        self.persist(LEVEL_WARN, message, payload).await;
    }

    pub async fn error(&self, message: &str, payload: Value) {
        tracing::error!(run_id = %self.run_id, %message, "run event");
        self.persist(LEVEL_ERROR, message, payload).await;
    }

    // Event persistence never fails the pipeline; a lost event is logged
    // and dropped.
    async fn persist(&self, level: &str, message: &str, payload: Value) {
        if let Err(e) = self
            .storage
            .insert_run_event(&self.run_id, level, message, &payload)
            .await
        {
            tracing::warn!(run_id = %self.run_id, error = %e, "failed to persist run event");
        }
    }
}

/// UI progress seam. Pipelines call this; the CLI maps it to a progress bar.
pub trait ProgressReporter: Send + Sync {
    fn begin(&self, label: &str, total: u64);
    fn advance(&self, message: &str);
    fn finish(&self, message: &str);
}

/// No-op reporter for tests and non-interactive callers.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn begin(&self, _label: &str, _total: u64) {}
    fn advance(&self, _message: &str) {}
    fn finish(&self, _message: &str) {}
}
