//! Segment encoding, concatenation and tail compilation.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use glimpse_models::encoding::{
    scale_pad_filter, DEFAULT_OUTPUT_FPS, DEFAULT_OUTPUT_HEIGHT, DEFAULT_OUTPUT_WIDTH,
    SEGMENT_CRF, SEGMENT_PIXEL_FORMAT, SEGMENT_PRESET, SEGMENT_VIDEO_CODEC,
};
use tempfile::NamedTempFile;
use tokio::fs;
use tracing::debug;

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};

/// Output format of assembled segments.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentEncoding {
    pub fps: u32,
    pub width: u32,
    pub height: u32,
    pub crf: u8,
    pub preset: String,
}

impl Default for SegmentEncoding {
    fn default() -> Self {
        Self {
            fps: DEFAULT_OUTPUT_FPS,
            width: DEFAULT_OUTPUT_WIDTH,
            height: DEFAULT_OUTPUT_HEIGHT,
            crf: SEGMENT_CRF,
            preset: SEGMENT_PRESET.to_string(),
        }
    }
}

impl SegmentEncoding {
    /// Duration a batch of `frames` occupies at the output rate.
    pub fn ideal_duration(&self, frames: usize) -> f64 {
        if self.fps == 0 {
            return 0.0;
        }
        frames as f64 / f64::from(self.fps)
    }
}

/// A `[inpoint, outpoint]` slice of an existing video.
#[derive(Debug, Clone, PartialEq)]
pub struct TailClip {
    pub path: PathBuf,
    pub inpoint: f64,
    pub outpoint: f64,
}

fn absolute(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Quote a path for an FFmpeg concat list.
fn quote(path: &Path) -> String {
    format!("'{}'", path.to_string_lossy().replace('\'', r"'\''"))
}

fn write_list(body: &str) -> MediaResult<NamedTempFile> {
    let mut list = tempfile::Builder::new()
        .prefix("glimpse-concat-")
        .suffix(".txt")
        .tempfile()?;
    list.write_all(body.as_bytes())?;
    list.flush()?;
    Ok(list)
}

fn frame_list_body(frames: &[PathBuf], fps: u32) -> String {
    let step = 1.0 / f64::from(fps.max(1));
    let mut body = String::new();
    for frame in frames {
        body.push_str(&format!("file {}\nduration {:.6}\n", quote(&absolute(frame)), step));
    }
    body
}

fn tail_list_body(clips: &[TailClip]) -> String {
    let mut body = String::new();
    for clip in clips {
        body.push_str(&format!(
            "file {}\ninpoint {:.3}\noutpoint {:.3}\n",
            quote(&absolute(&clip.path)),
            clip.inpoint,
            clip.outpoint
        ));
    }
    body
}

/// Encode still frames, in order, into a video at `output`.
pub async fn encode_frames(
    frames: &[PathBuf],
    output: &Path,
    encoding: &SegmentEncoding,
    timeout: Duration,
) -> MediaResult<()> {
    if frames.is_empty() {
        return Err(MediaError::EmptyInput(output.display().to_string()));
    }
    let list = write_list(&frame_list_body(frames, encoding.fps))?;

    let cmd = FfmpegCommand::new(output)
        .concat_list(list.path())
        .video_filter(scale_pad_filter(encoding.fps, encoding.width, encoding.height))
        .video_codec(SEGMENT_VIDEO_CODEC)
        .preset(encoding.preset.clone())
        .crf(encoding.crf)
        .output_args(["-pix_fmt", SEGMENT_PIXEL_FORMAT])
        .no_audio()
        .faststart();

    debug!("Encoding {} frames into {}", frames.len(), output.display());
    let result = FfmpegRunner::new().with_timeout(timeout).run(&cmd).await;
    if result.is_err() {
        let _ = fs::remove_file(output).await;
    }
    result
}

/// Re-encode `first` followed by `second` into `output`.
pub async fn concat_segments(
    first: &Path,
    second: &Path,
    output: &Path,
    timeout: Duration,
) -> MediaResult<()> {
    for input in [first, second] {
        if !fs::try_exists(input).await.unwrap_or(false) {
            return Err(MediaError::FileNotFound(input.to_path_buf()));
        }
    }

    let corrupt_tolerant = ["-err_detect", "ignore_err", "-fflags", "+genpts+discardcorrupt"];
    let cmd = FfmpegCommand::new(output)
        .input_with_args(corrupt_tolerant, first.to_string_lossy())
        .input_with_args(corrupt_tolerant, second.to_string_lossy())
        .filter_complex("[0:v:0][1:v:0]concat=n=2:v=1:a=0[outv]")
        .output_args(["-map", "[outv]"])
        .video_codec(SEGMENT_VIDEO_CODEC)
        .preset(SEGMENT_PRESET)
        .crf(SEGMENT_CRF)
        .output_args(["-pix_fmt", SEGMENT_PIXEL_FORMAT])
        .no_audio()
        .faststart();

    let result = FfmpegRunner::new().with_timeout(timeout).run(&cmd).await;
    if result.is_err() {
        let _ = fs::remove_file(output).await;
    }
    result
}

/// Stream-copy the given slices, in order, into `output`.
pub async fn compile_tails(clips: &[TailClip], output: &Path, timeout: Duration) -> MediaResult<()> {
    if clips.is_empty() {
        return Err(MediaError::EmptyInput(output.display().to_string()));
    }
    let list = write_list(&tail_list_body(clips))?;

    let cmd = FfmpegCommand::new(output)
        .input_with_args(
            ["-fflags", "+igndts+genpts+discardcorrupt", "-f", "concat", "-safe", "0"],
            list.path().to_string_lossy(),
        )
        .output_args(["-c", "copy"])
        .no_audio()
        .faststart();

    let result = FfmpegRunner::new().with_timeout(timeout).run(&cmd).await;
    if result.is_err() {
        let _ = fs::remove_file(output).await;
    }
    result
}
