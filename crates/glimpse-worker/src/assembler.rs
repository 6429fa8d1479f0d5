//! Video segment assembler.
//!
//! Folds newly written frames of a source into its single in-process segment.
//! The segment's modification time is the watermark: after every commit it is
//! set to the newest frame it contains, so the next run picks up exactly the
//! frames written since. The in-process segment is finalized (renamed to
//! `final_<mtime>.mp4`) once it grows too large, too old or too long.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use glimpse_models::frame::{
    finalized_segment_name, CONCAT_SEGMENT, IN_PROCESS_SEGMENT, TEMP_SEGMENT,
};
use tokio::fs;
use tracing::debug;

use crate::collaborators::VideoTool;
use crate::config::SegmentPolicy;
use crate::error::{WorkerError, WorkerResult};
use crate::frames::{list_frames, FrameEntry};
use crate::logging::CycleLogger;
use crate::metrics;

/// Why an in-process segment was finalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationReason {
    Size,
    Age,
    Duration,
}

impl RotationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RotationReason::Size => "size",
            RotationReason::Age => "age",
            RotationReason::Duration => "duration",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AssembleOutcome {
    #[default]
    NoNewFrames,
    /// A new in-process segment was started from the batch.
    Started,
    /// The batch was concatenated onto the existing segment.
    Appended { mismatch: bool },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssembleReport {
    pub outcome: AssembleOutcome,
    pub frames: usize,
    pub rotated: Option<PathBuf>,
    /// The previous segment was short and old, and has been replaced.
    pub restarted_stalled: bool,
}

/// Observed state of the in-process segment.
#[derive(Debug, Clone)]
struct SegmentState {
    modified: SystemTime,
    size: u64,
    age: Duration,
    duration: f64,
}

impl SegmentState {
    fn is_stalled(&self, policy: &SegmentPolicy) -> bool {
        self.duration < policy.stall_min_secs && self.age > policy.stall_max_age
    }

    fn rotation_reason(&self, policy: &SegmentPolicy) -> Option<RotationReason> {
        if self.size > policy.max_in_process_bytes {
            Some(RotationReason::Size)
        } else if self.age > policy.rotation_age() {
            Some(RotationReason::Age)
        } else if self.duration >= policy.max_segment_secs {
            Some(RotationReason::Duration)
        } else {
            None
        }
    }
}

pub struct SegmentAssembler {
    frame_dir: PathBuf,
    video_dir: PathBuf,
    policy: SegmentPolicy,
    tool: Arc<dyn VideoTool>,
}

impl SegmentAssembler {
    pub fn new(
        frame_dir: impl Into<PathBuf>,
        video_dir: impl Into<PathBuf>,
        policy: SegmentPolicy,
        tool: Arc<dyn VideoTool>,
    ) -> Self {
        Self {
            frame_dir: frame_dir.into(),
            video_dir: video_dir.into(),
            policy,
            tool,
        }
    }

    pub fn in_process_path(&self, source: &str) -> PathBuf {
        self.video_dir.join(source).join(IN_PROCESS_SEGMENT)
    }

    /// Assemble every source in turn; failures are logged per source.
    pub async fn assemble_all<'a>(&self, sources: impl IntoIterator<Item = &'a String>) -> usize {
        let mut advanced = 0;
        for name in sources {
            match self.assemble(name).await {
                Ok(report) if report.outcome != AssembleOutcome::NoNewFrames => advanced += 1,
                Ok(_) => {}
                Err(e) => CycleLogger::new(name, "assemble").log_error(&e.to_string()),
            }
        }
        advanced
    }

    /// Advance one source's in-process segment.
    ///
    /// On encode or concatenation failure the existing segment is left as it
    /// was and the same frames are retried next time.
    pub async fn assemble(&self, source: &str) -> WorkerResult<AssembleReport> {
        let logger = CycleLogger::new(source, "assemble");
        // Frames written after this instant belong to the next run.
        let scan_start = SystemTime::now();
        let segment_dir = self.video_dir.join(source);
        fs::create_dir_all(&segment_dir).await?;
        let in_process = segment_dir.join(IN_PROCESS_SEGMENT);

        let mut report = AssembleReport::default();
        let mut baseline = UNIX_EPOCH;
        let mut existing = false;

        if let Some(state) = self.segment_state(&in_process, scan_start).await {
            baseline = state.modified;
            existing = true;

            if state.is_stalled(&self.policy) {
                logger.log_warning(&format!(
                    "segment stalled at {:.1}s, restarting",
                    state.duration
                ));
                baseline = UNIX_EPOCH;
                existing = false;
                report.restarted_stalled = true;
            } else if let Some(reason) = state.rotation_reason(&self.policy) {
                let finalized = segment_dir.join(finalized_segment_name(epoch_secs(state.modified)));
                fs::rename(&in_process, &finalized).await?;
                logger.log_progress(&format!(
                    "rotated by {} into {}",
                    reason.as_str(),
                    finalized.display()
                ));
                metrics::record_segment_rotated(reason.as_str());
                existing = false;
                report.rotated = Some(finalized);
            }
        }

        let batch = self.collect_batch(source, baseline, scan_start).await?;
        let Some(newest) = batch.last().map(|f| f.modified) else {
            debug!(source = %source, "No new frames to assemble");
            return Ok(report);
        };
        let frames: Vec<PathBuf> = batch.iter().map(|f| f.path.clone()).collect();
        report.frames = frames.len();

        let temp = segment_dir.join(TEMP_SEGMENT);
        if let Err(e) = self
            .tool
            .encode(&frames, &temp, &self.policy.encoding())
            .await
        {
            let _ = fs::remove_file(&temp).await;
            return Err(e);
        }

        if !existing {
            fs::rename(&temp, &in_process).await?;
            report.outcome = AssembleOutcome::Started;
        } else {
            let mismatch = self.encode_mismatch(&temp, frames.len(), &logger).await;
            let joined = segment_dir.join(CONCAT_SEGMENT);
            let concat = self.tool.concat(&in_process, &temp, &joined).await;
            let _ = fs::remove_file(&temp).await;
            if let Err(e) = concat {
                let _ = fs::remove_file(&joined).await;
                return Err(e);
            }
            fs::rename(&joined, &in_process).await?;
            report.outcome = AssembleOutcome::Appended { mismatch };
        }

        set_modified(&in_process, newest).await?;
        metrics::record_frames_encoded(frames.len());
        logger.log_completion(&format!("{} frames into {}", frames.len(), in_process.display()));
        Ok(report)
    }

    async fn segment_state(&self, path: &Path, now: SystemTime) -> Option<SegmentState> {
        let meta = fs::metadata(path).await.ok()?;
        let modified = meta.modified().unwrap_or(UNIX_EPOCH);
        let duration = match self.tool.duration(path).await {
            Ok(d) => d,
            Err(e) => {
                debug!("Cannot probe {}: {}", path.display(), e);
                0.0
            }
        };
        Some(SegmentState {
            modified,
            size: meta.len(),
            age: now.duration_since(modified).unwrap_or_default(),
            duration,
        })
    }

    /// Frames newer than `baseline` and older than `scan_start`, oldest first,
    /// capped to the most recent `max_batch_frames`.
    async fn collect_batch(
        &self,
        source: &str,
        baseline: SystemTime,
        scan_start: SystemTime,
    ) -> WorkerResult<Vec<FrameEntry>> {
        let frames = list_frames(&self.frame_dir.join(source), source).await?;
        let mut batch: Vec<FrameEntry> = frames
            .into_iter()
            .filter(|f| f.modified > baseline && f.modified < scan_start)
            .filter(|f| f.size > self.policy.min_frame_bytes)
            .collect();
        if batch.len() > self.policy.max_batch_frames {
            batch.drain(..batch.len() - self.policy.max_batch_frames);
        }
        Ok(batch)
    }

    /// Compare the encoded duration with the expected one. A mismatch is
    /// reported but never stops the concatenation.
    async fn encode_mismatch(&self, temp: &Path, frame_count: usize, logger: &CycleLogger) -> bool {
        let encoding = self.policy.encoding();
        let expected = encoding.ideal_duration(frame_count);
        let tolerance = 1.0 / f64::from(encoding.fps.max(1)) + 1e-3;

        let actual = match self.tool.duration(temp).await {
            Ok(d) => d,
            Err(e) => {
                logger.log_warning(&format!("cannot probe encoded batch: {e}"));
                metrics::record_encode_mismatch();
                return true;
            }
        };
        let perfect = (actual - expected).abs() <= tolerance;
        let full_batch = (actual - self.policy.full_batch_secs()).abs() <= tolerance;
        if perfect || full_batch {
            return false;
        }

        let err = WorkerError::EncodeMismatch { expected, actual };
        logger.log_warning(&format!("{err}, concatenating anyway"));
        metrics::record_encode_mismatch();
        true
    }
}

fn epoch_secs(t: SystemTime) -> i64 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

async fn set_modified(path: &Path, at: SystemTime) -> WorkerResult<()> {
    let file = fs::OpenOptions::new().write(true).open(path).await?;
    let file = file.into_std().await;
    tokio::task::spawn_blocking(move || file.set_modified(at))
        .await
        .map_err(|e| WorkerError::transient_io(format!("set mtime task: {e}")))??;
    Ok(())
}
