//! Capture cycle executor.
//!
//! One cycle for one source: capture a frame, score it against the previous
//! frame, run the captioning policy, maybe caption, republish pointers and
//! write the mutated source fields back to the store.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use glimpse_models::frame::BASELINE_FRAME;
use glimpse_models::{Source, SourceUpdate};
use tokio::fs;
use tracing::{debug, Instrument};

use crate::captioner::expand_prompt;
use crate::collaborators::{CaptionOutcome, Captioner, FrameCapture, SourceStore, VisionClassifier};
use crate::config::WorkerConfig;
use crate::cooldown::CaptionCooldown;
use crate::error::{WorkerError, WorkerResult};
use crate::frames::{closest_to, list_frames, FrameEntry};
use crate::logging::CycleLogger;
use crate::metrics;
use crate::pointers::{PointerPublisher, PublishReport};
use crate::policy::{is_refusal, CaptionDecision, CaptionPolicy};
use crate::store::SourceLocks;

/// Extra time granted to the capture collaborator beyond the source timeout.
const CAPTURE_GRACE: Duration = Duration::from_secs(5);

/// What a completed cycle did.
#[derive(Debug, Clone)]
pub struct CycleOutcome {
    pub frame: PathBuf,
    pub score: Option<f64>,
    pub decision: CaptionDecision,
    /// Newly accepted caption, if any.
    pub caption: Option<String>,
    /// Caption shown with the pointers (new or previously cached).
    pub displayed_caption: String,
    pub update: SourceUpdate,
    pub pointers: PublishReport,
}

/// Collaborators shared by every cycle.
pub struct CycleDeps {
    pub store: Arc<dyn SourceStore>,
    pub capture: Arc<dyn FrameCapture>,
    pub captioner: Arc<dyn Captioner>,
    pub classifier: Arc<dyn VisionClassifier>,
    pub cooldown: Arc<CaptionCooldown>,
}

pub struct CaptureCycleExecutor {
    frame_dir: PathBuf,
    caption_timeout: Duration,
    caption_prompt: String,
    deps: CycleDeps,
    policy: CaptionPolicy,
    publisher: PointerPublisher,
    locks: SourceLocks,
}

impl CaptureCycleExecutor {
    pub fn new(config: &WorkerConfig, deps: CycleDeps) -> Self {
        Self {
            frame_dir: config.frame_dir.clone(),
            caption_timeout: config.caption_timeout,
            caption_prompt: config.caption_prompt.clone(),
            deps,
            policy: CaptionPolicy::new(config.caption_policy.clone()),
            publisher: PointerPublisher::new(config.frame_dir.clone()),
            locks: SourceLocks::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn SourceStore> {
        &self.deps.store
    }

    pub fn publisher(&self) -> &PointerPublisher {
        &self.publisher
    }

    pub fn source_dir(&self, name: &str) -> PathBuf {
        self.frame_dir.join(name)
    }

    /// Run one cycle for `name`.
    ///
    /// Returns `Ok(None)` when another cycle for the same source is still
    /// running; the run is skipped rather than queued.
    pub async fn run(&self, name: &str) -> WorkerResult<Option<CycleOutcome>> {
        let Some(_guard) = self.locks.try_acquire(name) else {
            debug!(source = %name, "Cycle already running, skipping");
            metrics::record_cycle_skipped("busy");
            return Ok(None);
        };

        let logger = CycleLogger::new(name, "capture_cycle");
        metrics::record_cycle_started();
        let started = Instant::now();

        let result = self
            .run_locked(name, &logger)
            .instrument(logger.create_span())
            .await;
        metrics::record_cycle_duration(started.elapsed().as_secs_f64());

        match result {
            Ok(outcome) => Ok(Some(outcome)),
            Err(e) => {
                logger.log_error(&e.to_string());
                metrics::record_cycle_failed(e.kind().as_str());
                Err(e)
            }
        }
    }

    async fn run_locked(&self, name: &str, logger: &CycleLogger) -> WorkerResult<CycleOutcome> {
        let source = self
            .deps
            .store
            .get(name)
            .await?
            .ok_or_else(|| WorkerError::SourceNotFound(name.to_string()))?;
        let source_dir = self.source_dir(name);
        logger.log_start(&format!("capturing {}", source.url));

        let capture_timeout = Duration::from_secs(source.timeout_secs) + CAPTURE_GRACE;
        let frame = tokio::time::timeout(
            capture_timeout,
            self.deps.capture.capture(&source, &source_dir),
        )
        .await
        .map_err(|_| WorkerError::timeout("capture", capture_timeout))??;
        let now = Utc::now();

        let frames = list_frames(&source_dir, name).await?;
        let previous = frames
            .iter()
            .rev()
            .find(|f| f.path != frame)
            .map(|f| f.path.clone());
        let score = match previous {
            Some(previous) => score_frames(previous, frame.clone()).await,
            None => None,
        };

        let mut decision = self.policy.decide(&source, score, now);
        if source.has_object_filter() {
            let confidence = self.classify(&source, &frame, logger).await;
            decision.apply_object_confidence(confidence, source.object_confidence);
        }
        logger.log_progress(&format!(
            "score={} allow={} reasons={:?}",
            score.map(|s| format!("{s:.3}")).unwrap_or_else(|| "n/a".into()),
            decision.allow,
            decision.reasons
        ));

        let mut update = SourceUpdate {
            last_capture_time: Some(now),
            ..Default::default()
        };
        if decision.motion_detected {
            update.last_motion_time = Some(now);
        }

        let mut accepted = None;
        if decision.allow {
            let inputs = caption_inputs(&source_dir, &source, &frames, &frame).await;
            if let Some(text) = self.request_caption(&source, &inputs, now, logger).await {
                if is_refusal(&text) {
                    logger.log_warning(&format!("caption rejected: {text}"));
                    metrics::record_caption_rejected();
                    update.rejected_caption = Some(text);
                    update.rejected_caption_time = Some(now);
                } else {
                    update.last_caption = Some(text.clone());
                    update.last_caption_time = Some(now);
                    if decision.motion_trigger {
                        update.last_motion_caption = Some(text.clone());
                        update.last_motion_caption_time = Some(now);
                    }
                    accepted = Some(text);
                }
            }
        }

        let displayed_caption = accepted
            .clone()
            .unwrap_or_else(|| source.last_caption.clone());
        let pointers = self
            .publisher
            .publish_cycle(&source, &frame, &displayed_caption, decision.triggered())
            .await;
        if !pointers.failed.is_empty() {
            logger.log_warning(&format!("pointers not updated: {:?}", pointers.failed));
        }

        self.deps.store.save(name, &update).await?;
        logger.log_completion(&format!(
            "{} captioned={}",
            frame.display(),
            accepted.is_some()
        ));

        Ok(CycleOutcome {
            frame,
            score,
            decision,
            caption: accepted,
            displayed_caption,
            update,
            pointers,
        })
    }

    async fn classify(&self, source: &Source, frame: &Path, logger: &CycleLogger) -> f64 {
        let call = self.deps.classifier.classify(&source.object_filter, frame);
        match tokio::time::timeout(self.caption_timeout, call).await {
            Ok(Ok(confidence)) => confidence,
            Ok(Err(e)) => {
                logger.log_warning(&format!("classifier failed: {e}"));
                0.0
            }
            Err(_) => {
                logger.log_warning("classifier timed out");
                0.0
            }
        }
    }

    /// Call the captioner unless the shared cooldown is running.
    async fn request_caption(
        &self,
        source: &Source,
        inputs: &[PathBuf],
        now: DateTime<Utc>,
        logger: &CycleLogger,
    ) -> Option<String> {
        if let Some(left) = self.deps.cooldown.remaining_at(now) {
            logger.log_progress(&format!("captioning cooling down for {}s", left.as_secs()));
            return None;
        }

        let prompt = format!(
            "{}\nSource: {}. Images are ordered most recent first.",
            expand_prompt(&self.caption_prompt, now),
            source.name
        );
        metrics::record_caption_requested();
        let call = self.deps.captioner.caption(&prompt, inputs);
        match tokio::time::timeout(self.caption_timeout, call).await {
            Ok(CaptionOutcome::Text(text)) => {
                let text = text.trim().to_string();
                (!text.is_empty()).then_some(text)
            }
            Ok(CaptionOutcome::RateLimited) => {
                logger.log_warning("captioning rate limited, cooling down");
                metrics::record_rate_limit_hit();
                self.deps.cooldown.trip_at(now);
                None
            }
            Ok(CaptionOutcome::Failed(reason)) => {
                logger.log_warning(&format!("captioning failed: {reason}"));
                None
            }
            Err(_) => {
                logger.log_warning(&WorkerError::timeout("caption", self.caption_timeout).to_string());
                None
            }
        }
    }
}

/// Difference score of two frames, computed off the async runtime.
async fn score_frames(previous: PathBuf, newest: PathBuf) -> Option<f64> {
    tokio::task::spawn_blocking(move || glimpse_media::difference(&previous, &newest))
        .await
        .ok()
        .flatten()
}

/// Frames handed to the captioner, most recent first: the newest frame, the
/// frame closest to the previous caption, then the optional baseline.
async fn caption_inputs(
    source_dir: &Path,
    source: &Source,
    frames: &[FrameEntry],
    newest: &Path,
) -> Vec<PathBuf> {
    let mut inputs = vec![newest.to_path_buf()];

    if let Some(at) = source.last_caption_time {
        let older: Vec<FrameEntry> = frames.iter().filter(|f| f.path != newest).cloned().collect();
        if let Some(entry) = closest_to(&older, at) {
            inputs.push(entry.path.clone());
        }
    }

    let baseline = source_dir.join(BASELINE_FRAME);
    if fs::try_exists(&baseline).await.unwrap_or(false) {
        inputs.push(baseline);
    }
    inputs
}
