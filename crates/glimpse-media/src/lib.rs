//! FFmpeg CLI wrapper and frame comparison.
//!
//! This crate provides:
//! - Type-safe FFmpeg command building with multiple inputs
//! - Timeout-bounded FFmpeg/FFprobe execution
//! - Single-frame capture from remote sources
//! - Segment encoding, concatenation and tail compilation
//! - SSIM-based frame difference estimation
//! - Atomic pointer publishing on the filesystem

pub mod capture;
pub mod command;
pub mod difference;
pub mod error;
pub mod fs_utils;
pub mod probe;
pub mod segment;

pub use capture::FfmpegFrameGrabber;
pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegRunner};
pub use difference::{difference, structural_similarity};
pub use error::{MediaError, MediaResult};
pub use fs_utils::{move_file, publish_link, resolve_link, write_atomic};
pub use probe::{probe_duration, probe_video, VideoInfo};
pub use segment::{compile_tails, concat_segments, encode_frames, SegmentEncoding, TailClip};
