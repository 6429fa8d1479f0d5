//! Teaser compilations of the live in-process segments.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use glimpse_media::TailClip;
use glimpse_models::encoding::TEASER_TAIL_SECS;
use glimpse_models::frame::{group_teaser_name, ALL_TEASER, IN_PROCESS_SEGMENT};
use glimpse_models::Source;
use tokio::fs;
use tracing::{debug, warn};

use crate::collaborators::VideoTool;
use crate::error::WorkerResult;
use crate::logging::CycleLogger;

/// Segments shorter than this are left out.
const MIN_SEGMENT_SECS: f64 = 1.0;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TeaserReport {
    pub written: Vec<PathBuf>,
    pub failed: usize,
}

/// Builds `all_in_process.mp4` from the last seconds of every source's
/// in-process segment, and one `<group>_in_process.mp4` per group.
pub struct TeaserCompiler {
    video_dir: PathBuf,
    tool: Arc<dyn VideoTool>,
    tail_secs: f64,
}

impl TeaserCompiler {
    pub fn new(video_dir: impl Into<PathBuf>, tool: Arc<dyn VideoTool>) -> Self {
        Self {
            video_dir: video_dir.into(),
            tool,
            tail_secs: TEASER_TAIL_SECS,
        }
    }

    pub async fn compile<'a>(&self, sources: impl IntoIterator<Item = &'a Source>) -> TeaserReport {
        let logger = CycleLogger::new("all", "teaser");
        let mut tails = Vec::new();
        let mut groups: BTreeMap<&str, Vec<TailClip>> = BTreeMap::new();

        for source in sources {
            let path = self.video_dir.join(&source.name).join(IN_PROCESS_SEGMENT);
            let Some(duration) = self.usable_duration(&path).await else {
                continue;
            };
            tails.push(TailClip {
                path: path.clone(),
                inpoint: (duration - self.tail_secs).max(0.0),
                outpoint: duration,
            });
            for group in &source.groups {
                groups.entry(group.as_str()).or_default().push(TailClip {
                    path: path.clone(),
                    inpoint: 0.0,
                    outpoint: duration,
                });
            }
        }

        let mut report = TeaserReport::default();
        let mut outputs = vec![(ALL_TEASER.to_string(), tails)];
        outputs.extend(
            groups
                .into_iter()
                .map(|(group, clips)| (group_teaser_name(group), clips)),
        );

        for (name, clips) in outputs {
            if clips.is_empty() {
                continue;
            }
            let output = self.video_dir.join(&name);
            match self.write(&clips, &output).await {
                Ok(()) => report.written.push(output),
                Err(e) => {
                    logger.log_warning(&format!("{name}: {e}"));
                    report.failed += 1;
                }
            }
        }
        logger.log_completion(&format!("{} teasers written", report.written.len()));
        report
    }

    async fn usable_duration(&self, path: &Path) -> Option<f64> {
        if !fs::try_exists(path).await.unwrap_or(false) {
            return None;
        }
        match self.tool.duration(path).await {
            Ok(d) if d >= MIN_SEGMENT_SECS => Some(d),
            Ok(d) => {
                debug!("Skipping {} ({:.1}s)", path.display(), d);
                None
            }
            Err(e) => {
                warn!("Cannot probe {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Compile into a temporary sibling and rename over `output`.
    async fn write(&self, clips: &[TailClip], output: &Path) -> WorkerResult<()> {
        let name = output
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let temp = output.with_file_name(format!(".{name}.tmp.mp4"));
        if let Err(e) = self.tool.compile_tails(clips, &temp).await {
            let _ = fs::remove_file(&temp).await;
            return Err(e);
        }
        fs::rename(&temp, output).await?;
        Ok(())
    }
}
