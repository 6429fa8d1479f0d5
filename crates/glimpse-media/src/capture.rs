//! Single-frame capture from a remote source.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use glimpse_models::FrameName;
use tokio::fs;
use tracing::{debug, info};

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};

/// Grabs one still frame per call with FFmpeg.
///
/// Works for anything FFmpeg can open: image URLs, MJPEG/HLS/RTSP streams and
/// local files. The frame is written under a `.tmp.png` name first and renamed
/// into place, so a frame path is never observed half-written.
#[derive(Debug, Clone, Default)]
pub struct FfmpegFrameGrabber;

impl FfmpegFrameGrabber {
    pub fn new() -> Self {
        Self
    }

    /// Capture a frame for `source` into `frame_dir`, returning its final path.
    pub async fn grab(
        &self,
        source: &str,
        url: &str,
        frame_dir: &Path,
        timeout: Duration,
    ) -> MediaResult<PathBuf> {
        if url.trim().is_empty() {
            return Err(MediaError::capture_failed(format!(
                "source {source} has no url"
            )));
        }
        fs::create_dir_all(frame_dir).await?;

        let name = FrameName::new(source, Utc::now());
        let tmp_path = frame_dir.join(name.temp_file_name());
        let final_path = frame_dir.join(name.file_name());

        let cmd = grab_command(url, &tmp_path);
        debug!(source = %source, "Grabbing frame from {}", url);

        let result = FfmpegRunner::new().with_timeout(timeout).run(&cmd).await;
        if let Err(e) = result {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(e);
        }

        let size = fs::metadata(&tmp_path).await.map(|m| m.len()).unwrap_or(0);
        if size == 0 {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(MediaError::capture_failed(format!(
                "empty frame from {url}"
            )));
        }

        fs::rename(&tmp_path, &final_path).await?;
        info!(source = %source, "Captured frame {}", final_path.display());
        Ok(final_path)
    }
}

fn grab_command(url: &str, output: &Path) -> FfmpegCommand {
    let input_args: Vec<&str> = if url.starts_with("rtsp://") {
        vec!["-rtsp_transport", "tcp"]
    } else {
        Vec::new()
    };
    FfmpegCommand::new(output)
        .input_with_args(input_args, url)
        .single_frame()
        .output_args(["-update", "1"])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grab_command_for_rtsp() {
        let args = grab_command("rtsp://cam/1", Path::new("/tmp/a.tmp.png")).build_args();
        assert!(args.contains(&"-rtsp_transport".to_string()));
        assert!(args.contains(&"-frames:v".to_string()));
        assert_eq!(args.last().unwrap(), "/tmp/a.tmp.png");
    }

    #[test]
    fn test_grab_command_for_http() {
        let args = grab_command("https://example.com/cam.jpg", Path::new("x.png")).build_args();
        assert!(!args.contains(&"-rtsp_transport".to_string()));
    }

    #[test]
    fn test_grab_without_url_fails() {
        let dir = tempfile::TempDir::new().unwrap();
        let result = tokio_test::block_on(FfmpegFrameGrabber::new().grab(
            "cam",
            "",
            dir.path(),
            Duration::from_secs(1),
        ));
        assert!(matches!(result, Err(MediaError::CaptureFailed(_))));
    }
}
