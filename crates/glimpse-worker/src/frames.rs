//! Frame directory listing.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use glimpse_models::FrameName;
use tokio::fs;

use crate::error::WorkerResult;

/// One finished frame on disk.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameEntry {
    pub path: PathBuf,
    pub captured_at: DateTime<Utc>,
    pub size: u64,
    pub modified: SystemTime,
}

/// Frames of `source` in `dir`, oldest first.
///
/// Pointers, temporary captures and anything not named like a frame are
/// skipped. A missing directory has no frames.
pub async fn list_frames(dir: &Path, source: &str) -> WorkerResult<Vec<FrameEntry>> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut frames = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let file_name = entry.file_name().to_string_lossy().to_string();
        let Ok(name) = FrameName::parse(source, &file_name) else {
            continue;
        };
        // Pointers are symlinks; only regular files are frames.
        let Ok(meta) = fs::symlink_metadata(entry.path()).await else {
            continue;
        };
        if !meta.is_file() {
            continue;
        }
        frames.push(FrameEntry {
            path: entry.path(),
            captured_at: name.captured_at,
            size: meta.len(),
            modified: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
        });
    }

    frames.sort_by(|a, b| {
        a.captured_at
            .cmp(&b.captured_at)
            .then_with(|| a.path.cmp(&b.path))
    });
    Ok(frames)
}

/// The frame captured closest to `at`.
pub fn closest_to(frames: &[FrameEntry], at: DateTime<Utc>) -> Option<&FrameEntry> {
    frames
        .iter()
        .min_by_key(|f| (f.captured_at - at).num_seconds().abs())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_list_frames_sorted_and_filtered() {
        let dir = TempDir::new().unwrap();
        for name in [
            "cam_20240101000200.png",
            "cam_20240101000000.png",
            "cam_20240101000100.png",
            "cam_20240101000300.tmp.png",
            "latest_camera.png",
            "other_20240101000000.png",
        ] {
            std::fs::write(dir.path().join(name), b"frame-bytes").unwrap();
        }

        let frames = list_frames(dir.path(), "cam").await.unwrap();
        let names: Vec<_> = frames
            .iter()
            .map(|f| f.path.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(
            names,
            vec![
                "cam_20240101000000.png",
                "cam_20240101000100.png",
                "cam_20240101000200.png"
            ]
        );
        assert_eq!(frames[0].size, 11);
    }

    #[tokio::test]
    async fn test_missing_directory_is_empty() {
        let dir = TempDir::new().unwrap();
        let frames = list_frames(&dir.path().join("nope"), "cam").await.unwrap();
        assert!(frames.is_empty());
    }

    #[test]
    fn test_closest_to() {
        let at = |m| Utc.with_ymd_and_hms(2024, 1, 1, 0, m, 0).unwrap();
        let frame = |m| FrameEntry {
            path: PathBuf::from(format!("f{m}")),
            captured_at: at(m),
            size: 1,
            modified: SystemTime::UNIX_EPOCH,
        };
        let frames = vec![frame(0), frame(10), frame(20)];
        assert_eq!(closest_to(&frames, at(12)).unwrap().path, PathBuf::from("f10"));
        assert_eq!(closest_to(&frames, at(59)).unwrap().path, PathBuf::from("f20"));
        assert!(closest_to(&[], at(0)).is_none());
    }
}
