//! Segment encoding constants.

/// Output frame rate of assembled segments.
pub const DEFAULT_OUTPUT_FPS: u32 = 30;
/// Output resolution (frames are scaled down and padded to fit).
pub const DEFAULT_OUTPUT_WIDTH: u32 = 1280;
pub const DEFAULT_OUTPUT_HEIGHT: u32 = 720;

/// Video codec for segment encoding.
pub const SEGMENT_VIDEO_CODEC: &str = "libx264";
/// Encoding preset; segments are re-encoded often so speed wins.
pub const SEGMENT_PRESET: &str = "ultrafast";
/// Constant Rate Factor for segments.
pub const SEGMENT_CRF: u8 = 23;
pub const SEGMENT_PIXEL_FORMAT: &str = "yuv420p";

/// Teaser compilation takes this many trailing seconds of each segment.
pub const TEASER_TAIL_SECS: f64 = 5.0;

/// Build the scale+pad filter that letterboxes frames into the output size
/// while preserving their aspect ratio.
pub fn scale_pad_filter(fps: u32, width: u32, height: u32) -> String {
    format!(
        "fps={fps},scale={width}:{height}:force_original_aspect_ratio=decrease,pad={width}:{height}:(ow-iw)/2:(oh-ih)/2"
    )
}
