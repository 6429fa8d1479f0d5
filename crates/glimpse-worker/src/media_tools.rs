//! FFmpeg-backed collaborator implementations.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use glimpse_media::{FfmpegFrameGrabber, SegmentEncoding, TailClip};
use glimpse_models::Source;

use crate::collaborators::{FrameCapture, VideoTool};
use crate::error::WorkerResult;

/// Captures frames with FFmpeg, bounded by each source's timeout.
#[derive(Debug, Clone, Default)]
pub struct FfmpegCapture {
    grabber: FfmpegFrameGrabber,
}

impl FfmpegCapture {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FrameCapture for FfmpegCapture {
    async fn capture(&self, source: &Source, frame_dir: &Path) -> WorkerResult<PathBuf> {
        let timeout = Duration::from_secs(source.timeout_secs.max(1));
        Ok(self
            .grabber
            .grab(&source.name, &source.url, frame_dir, timeout)
            .await?)
    }
}

/// Encodes, concatenates and probes segments with FFmpeg/FFprobe.
#[derive(Debug, Clone)]
pub struct FfmpegVideoTool {
    timeout: Duration,
}

impl FfmpegVideoTool {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl VideoTool for FfmpegVideoTool {
    async fn duration(&self, path: &Path) -> WorkerResult<f64> {
        Ok(glimpse_media::probe_duration(path).await?)
    }

    async fn encode(
        &self,
        frames: &[PathBuf],
        output: &Path,
        encoding: &SegmentEncoding,
    ) -> WorkerResult<()> {
        Ok(glimpse_media::encode_frames(frames, output, encoding, self.timeout).await?)
    }

    async fn concat(&self, first: &Path, second: &Path, output: &Path) -> WorkerResult<()> {
        Ok(glimpse_media::concat_segments(first, second, output, self.timeout).await?)
    }

    async fn compile_tails(&self, clips: &[TailClip], output: &Path) -> WorkerResult<()> {
        Ok(glimpse_media::compile_tails(clips, output, self.timeout).await?)
    }
}
