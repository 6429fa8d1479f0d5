//! Capture, captioning and archiving worker.
//!
//! This crate provides:
//! - Staggered per-source scheduling on a bounded worker pool
//! - The capture cycle with its captioning policy and shared cooldown
//! - Atomic pointer publishing per source and per group
//! - Incremental video segment assembly and teaser compilation
//! - Retention sweeps and cross-source summaries

pub mod assembler;
pub mod captioner;
pub mod collaborators;
pub mod config;
pub mod cooldown;
pub mod cycle;
pub mod error;
pub mod frames;
pub mod logging;
pub mod media_tools;
pub mod metrics;
pub mod pointers;
pub mod policy;
pub mod retention;
pub mod scheduler;
pub mod store;
pub mod summarizer;
pub mod teaser;

pub use assembler::{AssembleOutcome, AssembleReport, SegmentAssembler};
pub use captioner::HttpCaptioner;
pub use collaborators::{
    CaptionOutcome, Captioner, DisabledCaptioner, FrameCapture, NullClassifier, SourceStore,
    VideoTool, VisionClassifier,
};
pub use config::WorkerConfig;
pub use cooldown::CaptionCooldown;
pub use cycle::{CaptureCycleExecutor, CycleDeps, CycleOutcome};
pub use error::{ErrorKind, WorkerError, WorkerResult};
pub use logging::CycleLogger;
pub use media_tools::{FfmpegCapture, FfmpegVideoTool};
pub use pointers::PointerPublisher;
pub use policy::{CaptionDecision, CaptionPolicy};
pub use retention::RetentionSweeper;
pub use scheduler::Scheduler;
pub use store::{FileSourceStore, SourceLocks};
pub use summarizer::Summarizer;
pub use teaser::TeaserCompiler;
