//! Frame, pointer and segment file naming.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};

use crate::error::{ModelError, ModelResult};

/// Extension of captured frames.
pub const FRAME_EXTENSION: &str = "png";
/// Timestamp layout embedded in frame names (UTC, second resolution).
pub const FRAME_TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";
/// Marker for partially written captures.
pub const TEMP_MARKER: &str = ".tmp";

/// Optional per-source reference frame handed to the captioner.
pub const BASELINE_FRAME: &str = "baseline.png";
/// Directory (under the frame root) holding per-group pointers.
pub const GROUPS_DIR: &str = "groups";

/// The single mutable segment per source.
pub const IN_PROCESS_SEGMENT: &str = "in_process.mp4";
/// Scratch outputs of the assembler, replaced on every run.
pub const TEMP_SEGMENT: &str = "temp_video.mp4";
pub const CONCAT_SEGMENT: &str = "in_process.concat.mp4";
/// Video-root compilations built from the tails of in-process segments.
pub const ALL_TEASER: &str = "all_in_process.mp4";

/// Name of a finalized segment, stamped with its modification time.
pub fn finalized_segment_name(mtime_secs: i64) -> String {
    format!("final_{mtime_secs}.mp4")
}

/// Name of a group teaser in the video root.
pub fn group_teaser_name(group: &str) -> String {
    format!("{group}_in_process.mp4")
}

/// Name fragments that retention must never delete.
pub const PROTECTED_MARKERS: &[&str] = &[
    "in_process.",
    "last_motion.",
    "prev_motion.",
    "latest_camera.",
    "last_caption.",
    "baseline.",
];

/// Whether a file name belongs to a pointer or a live segment.
pub fn is_protected_name(file_name: &str) -> bool {
    PROTECTED_MARKERS.iter().any(|m| file_name.contains(m))
}

/// Named references to the currently relevant frame of a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PointerKind {
    Latest,
    LastMotion,
    PreviousMotion,
    LastCaption,
}

impl PointerKind {
    pub const ALL: [PointerKind; 4] = [
        PointerKind::Latest,
        PointerKind::LastMotion,
        PointerKind::PreviousMotion,
        PointerKind::LastCaption,
    ];

    pub fn file_name(&self) -> &'static str {
        match self {
            PointerKind::Latest => "latest_camera.png",
            PointerKind::LastMotion => "last_motion.png",
            PointerKind::PreviousMotion => "prev_motion.png",
            PointerKind::LastCaption => "last_caption.png",
        }
    }

    /// Sidecar file carrying the caption shown with the pointer.
    pub fn caption_file_name(&self) -> String {
        format!("{}.txt", self.file_name())
    }
}

impl std::fmt::Display for PointerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PointerKind::Latest => "latest",
            PointerKind::LastMotion => "last-motion",
            PointerKind::PreviousMotion => "previous-motion",
            PointerKind::LastCaption => "last-caption",
        };
        f.write_str(name)
    }
}

/// Parsed `<source>_<YYYYmmddHHMMSS>.png` frame name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameName {
    pub source: String,
    pub captured_at: DateTime<Utc>,
}

impl FrameName {
    pub fn new(source: impl Into<String>, captured_at: DateTime<Utc>) -> Self {
        Self {
            source: source.into(),
            captured_at,
        }
    }

    /// Final file name of the frame.
    pub fn file_name(&self) -> String {
        format!(
            "{}_{}.{}",
            self.source,
            self.captured_at.format(FRAME_TIMESTAMP_FORMAT),
            FRAME_EXTENSION
        )
    }

    /// Name used while the capture is still being written.
    pub fn temp_file_name(&self) -> String {
        format!(
            "{}_{}{}.{}",
            self.source,
            self.captured_at.format(FRAME_TIMESTAMP_FORMAT),
            TEMP_MARKER,
            FRAME_EXTENSION
        )
    }

    /// Parse a frame file name belonging to `source`.
    pub fn parse(source: &str, file_name: &str) -> ModelResult<Self> {
        let invalid = || ModelError::InvalidFrameName(file_name.to_string());

        let stem = file_name
            .strip_prefix(source)
            .and_then(|rest| rest.strip_prefix('_'))
            .and_then(|rest| rest.strip_suffix(".png"))
            .ok_or_else(invalid)?;
        if stem.contains(TEMP_MARKER) {
            return Err(invalid());
        }
        let naive =
            NaiveDateTime::parse_from_str(stem, FRAME_TIMESTAMP_FORMAT).map_err(|_| invalid())?;
        Ok(Self {
            source: source.to_string(),
            captured_at: Utc.from_utc_datetime(&naive),
        })
    }
}
