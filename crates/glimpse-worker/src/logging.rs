//! Structured cycle logging utilities.
//!
//! Every line carries the source name, the operation and a per-run id so the
//! interleaved output of concurrent cycles can be told apart.

use tracing::{error, info, warn, Span};
use uuid::Uuid;

/// Logger for one run of one operation against one source.
#[derive(Debug, Clone)]
pub struct CycleLogger {
    source: String,
    operation: String,
    run_id: String,
}

impl CycleLogger {
    /// Create a logger with a fresh run id.
    ///
    /// # Arguments
    /// * `source` - Source name, or a pseudo-name such as `all` for sweeps
    /// * `operation` - e.g. "capture_cycle", "assemble", "retention"
    pub fn new(source: &str, operation: &str) -> Self {
        Self {
            source: source.to_string(),
            operation: operation.to_string(),
            run_id: Uuid::new_v4().simple().to_string()[..8].to_string(),
        }
    }

    pub fn log_start(&self, message: &str) {
        info!(
            source = %self.source,
            operation = %self.operation,
            run_id = %self.run_id,
            "Started: {}", message
        );
    }

    pub fn log_progress(&self, message: &str) {
        info!(
            source = %self.source,
            operation = %self.operation,
            run_id = %self.run_id,
            "Progress: {}", message
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            source = %self.source,
            operation = %self.operation,
            run_id = %self.run_id,
            "Warning: {}", message
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            source = %self.source,
            operation = %self.operation,
            run_id = %self.run_id,
            "Error: {}", message
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(
            source = %self.source,
            operation = %self.operation,
            run_id = %self.run_id,
            "Completed: {}", message
        );
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Span for attaching further structured fields to nested work.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "cycle",
            source = %self.source,
            operation = %self.operation,
            run_id = %self.run_id
        )
    }
}
