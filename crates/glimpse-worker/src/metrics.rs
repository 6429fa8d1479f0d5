//! Prometheus metrics for the worker.

use std::net::SocketAddr;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::error::{WorkerError, WorkerResult};

/// Install the Prometheus recorder with an HTTP listener on `addr`.
pub fn init_metrics(addr: SocketAddr) -> WorkerResult<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| WorkerError::configuration_invalid(format!("metrics exporter: {e}")))
}

/// Metric names as constants for consistency.
pub mod names {
    // Capture cycles
    pub const CYCLES_STARTED_TOTAL: &str = "glimpse_cycles_started_total";
    pub const CYCLES_FAILED_TOTAL: &str = "glimpse_cycles_failed_total";
    pub const CYCLES_SKIPPED_TOTAL: &str = "glimpse_cycles_skipped_total";
    pub const CYCLE_DURATION_SECONDS: &str = "glimpse_cycle_duration_seconds";

    // Captioning
    pub const CAPTIONS_REQUESTED_TOTAL: &str = "glimpse_captions_requested_total";
    pub const CAPTIONS_REJECTED_TOTAL: &str = "glimpse_captions_rejected_total";
    pub const RATE_LIMIT_HITS_TOTAL: &str = "glimpse_rate_limit_hits_total";

    // Pointers
    pub const POINTER_FAILURES_TOTAL: &str = "glimpse_pointer_failures_total";

    // Segments
    pub const SEGMENTS_ROTATED_TOTAL: &str = "glimpse_segments_rotated_total";
    pub const FRAMES_ENCODED_TOTAL: &str = "glimpse_frames_encoded_total";
    pub const ENCODE_MISMATCHES_TOTAL: &str = "glimpse_encode_mismatches_total";

    // Retention
    pub const RETENTION_DELETIONS_TOTAL: &str = "glimpse_retention_deletions_total";
    pub const RETENTION_FREED_BYTES_TOTAL: &str = "glimpse_retention_freed_bytes_total";
}

pub fn record_cycle_started() {
    counter!(names::CYCLES_STARTED_TOTAL).increment(1);
}

/// Record a failed cycle, labelled by handling class.
pub fn record_cycle_failed(kind: &str) {
    let labels = [("kind", kind.to_string())];
    counter!(names::CYCLES_FAILED_TOTAL, &labels).increment(1);
}

pub fn record_cycle_skipped(reason: &str) {
    let labels = [("reason", reason.to_string())];
    counter!(names::CYCLES_SKIPPED_TOTAL, &labels).increment(1);
}

pub fn record_cycle_duration(duration_secs: f64) {
    histogram!(names::CYCLE_DURATION_SECONDS).record(duration_secs);
}

pub fn record_caption_requested() {
    counter!(names::CAPTIONS_REQUESTED_TOTAL).increment(1);
}

pub fn record_caption_rejected() {
    counter!(names::CAPTIONS_REJECTED_TOTAL).increment(1);
}

pub fn record_rate_limit_hit() {
    counter!(names::RATE_LIMIT_HITS_TOTAL).increment(1);
}

pub fn record_pointer_failure(pointer: &str) {
    let labels = [("pointer", pointer.to_string())];
    counter!(names::POINTER_FAILURES_TOTAL, &labels).increment(1);
}

pub fn record_segment_rotated(reason: &str) {
    let labels = [("reason", reason.to_string())];
    counter!(names::SEGMENTS_ROTATED_TOTAL, &labels).increment(1);
}

pub fn record_frames_encoded(count: usize) {
    counter!(names::FRAMES_ENCODED_TOTAL).increment(count as u64);
}

pub fn record_encode_mismatch() {
    counter!(names::ENCODE_MISMATCHES_TOTAL).increment(1);
}

pub fn record_retention_deletion(bytes: u64) {
    counter!(names::RETENTION_DELETIONS_TOTAL).increment(1);
    counter!(names::RETENTION_FREED_BYTES_TOTAL).increment(bytes);
}
