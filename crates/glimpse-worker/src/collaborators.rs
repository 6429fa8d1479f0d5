//! Seams to the external collaborators of the pipeline.
//!
//! The pipeline only ever talks to these traits; the FFmpeg and HTTP backed
//! implementations live in [`crate::media_tools`] and [`crate::captioner`], and
//! the integration tests substitute in-process fakes.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use glimpse_media::{SegmentEncoding, TailClip};
use glimpse_models::{Source, SourceUpdate};

use crate::error::WorkerResult;

/// Acquires one frame for a source.
#[async_trait]
pub trait FrameCapture: Send + Sync {
    /// Capture into `frame_dir` and return the final frame path. The final
    /// path must never be observable half-written.
    async fn capture(&self, source: &Source, frame_dir: &Path) -> WorkerResult<PathBuf>;
}

/// Video operations used by the segment assembler and teaser compiler.
#[async_trait]
pub trait VideoTool: Send + Sync {
    /// Duration of a video in seconds.
    async fn duration(&self, path: &Path) -> WorkerResult<f64>;

    async fn encode(
        &self,
        frames: &[PathBuf],
        output: &Path,
        encoding: &SegmentEncoding,
    ) -> WorkerResult<()>;

    /// Write `first` followed by `second` to `output`.
    async fn concat(&self, first: &Path, second: &Path, output: &Path) -> WorkerResult<()>;

    async fn compile_tails(&self, clips: &[TailClip], output: &Path) -> WorkerResult<()>;
}

/// Result of one call to the captioning service.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptionOutcome {
    Text(String),
    /// The service asked us to back off.
    RateLimited,
    Failed(String),
}

/// Semantic description of frames by an external service.
#[async_trait]
pub trait Captioner: Send + Sync {
    /// `frames` are ordered most recent first and may be empty.
    async fn caption(&self, prompt: &str, frames: &[PathBuf]) -> CaptionOutcome;
}

/// Captioner used when no service is configured.
#[derive(Debug, Clone, Default)]
pub struct DisabledCaptioner;

#[async_trait]
impl Captioner for DisabledCaptioner {
    async fn caption(&self, _prompt: &str, _frames: &[PathBuf]) -> CaptionOutcome {
        CaptionOutcome::Failed("captioning is not configured".to_string())
    }
}

/// Scores how well a frame matches a free-text object filter.
#[async_trait]
pub trait VisionClassifier: Send + Sync {
    /// Confidence in `[0, 1]`.
    async fn classify(&self, filter: &str, frame: &Path) -> WorkerResult<f64>;
}

/// Classifier that never detects anything.
#[derive(Debug, Clone, Default)]
pub struct NullClassifier;

#[async_trait]
impl VisionClassifier for NullClassifier {
    async fn classify(&self, _filter: &str, _frame: &Path) -> WorkerResult<f64> {
        Ok(0.0)
    }
}

/// Owner of the source records.
#[async_trait]
pub trait SourceStore: Send + Sync {
    async fn get(&self, name: &str) -> WorkerResult<Option<Source>>;

    /// Write back the mutable fields produced by one cycle.
    async fn save(&self, name: &str, update: &SourceUpdate) -> WorkerResult<()>;

    async fn list(&self) -> WorkerResult<BTreeMap<String, Source>>;
}
