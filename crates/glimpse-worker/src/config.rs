//! Worker configuration.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use glimpse_media::SegmentEncoding;
use glimpse_models::encoding::{
    DEFAULT_OUTPUT_FPS, DEFAULT_OUTPUT_HEIGHT, DEFAULT_OUTPUT_WIDTH, SEGMENT_CRF, SEGMENT_PRESET,
};

const MIB: u64 = 1024 * 1024;
const HOUR: u64 = 3600;
const DAY: u64 = 24 * HOUR;

pub const DEFAULT_CAPTION_PROMPT: &str = "Write a concise caption that highlights the most significant or unique aspect of this image in 10 words or less. Avoid general descriptions, and focus on noteworthy details or anomalies. Then, provide a brief, more detailed description in a couple of sentences. The time is $datetime UTC.";

pub const DEFAULT_SUMMARY_PROMPT: &str = "Summarize the following logs into a concise, technical transcript. Focus on providing clear, actionable insights and key takeaways. Keep the summary brief and organized, with one line per segment, separated by newlines. Start with a brief overview, including any major events or trends. Avoid repetition unless necessary. The time is $datetime.";

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_secs(key: &str, default: u64) -> Duration {
    Duration::from_secs(env_or(key, default))
}

/// Rotation and encoding heuristics of the segment assembler.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentPolicy {
    /// Rotate once the in-process segment grows past this many bytes.
    pub max_in_process_bytes: u64,
    /// Compressed-video retention window in days; segments older than seven
    /// windows are rotated.
    pub compressed_retention_days: u64,
    /// Rotate once the in-process segment is this long.
    pub max_segment_secs: f64,
    /// A segment shorter than this...
    pub stall_min_secs: f64,
    /// ...and older than this is considered stalled and restarted.
    pub stall_max_age: Duration,
    pub max_batch_frames: usize,
    pub output_fps: u32,
    pub output_width: u32,
    pub output_height: u32,
    /// Frames at or below this size are skipped.
    pub min_frame_bytes: u64,
}

impl Default for SegmentPolicy {
    fn default() -> Self {
        Self {
            max_in_process_bytes: 100 * MIB,
            compressed_retention_days: 7,
            max_segment_secs: 24.0,
            stall_min_secs: 10.0,
            stall_max_age: Duration::from_secs(HOUR),
            max_batch_frames: 300,
            output_fps: DEFAULT_OUTPUT_FPS,
            output_width: DEFAULT_OUTPUT_WIDTH,
            output_height: DEFAULT_OUTPUT_HEIGHT,
            min_frame_bytes: 10,
        }
    }
}

impl SegmentPolicy {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            max_in_process_bytes: env_or("GLIMPSE_SEGMENT_MAX_BYTES", d.max_in_process_bytes),
            compressed_retention_days: env_or(
                "GLIMPSE_SEGMENT_RETENTION_DAYS",
                d.compressed_retention_days,
            ),
            max_segment_secs: env_or("GLIMPSE_SEGMENT_MAX_SECS", d.max_segment_secs),
            stall_min_secs: env_or("GLIMPSE_SEGMENT_STALL_MIN_SECS", d.stall_min_secs),
            stall_max_age: env_secs(
                "GLIMPSE_SEGMENT_STALL_MAX_AGE_SECS",
                d.stall_max_age.as_secs(),
            ),
            max_batch_frames: env_or("GLIMPSE_SEGMENT_MAX_BATCH_FRAMES", d.max_batch_frames),
            output_fps: env_or("GLIMPSE_SEGMENT_FPS", d.output_fps),
            output_width: env_or("GLIMPSE_SEGMENT_WIDTH", d.output_width),
            output_height: env_or("GLIMPSE_SEGMENT_HEIGHT", d.output_height),
            min_frame_bytes: env_or("GLIMPSE_SEGMENT_MIN_FRAME_BYTES", d.min_frame_bytes),
        }
    }

    /// Age past which the in-process segment is finalized.
    pub fn rotation_age(&self) -> Duration {
        Duration::from_secs(self.compressed_retention_days * 7 * DAY)
    }

    /// Duration of a batch capped at `max_batch_frames`.
    pub fn full_batch_secs(&self) -> f64 {
        self.encoding().ideal_duration(self.max_batch_frames)
    }

    pub fn encoding(&self) -> SegmentEncoding {
        SegmentEncoding {
            fps: self.output_fps,
            width: self.output_width,
            height: self.output_height,
            crf: SEGMENT_CRF,
            preset: SEGMENT_PRESET.to_string(),
        }
    }
}

/// Limits applied by the retention sweeper to every directory.
#[derive(Debug, Clone, PartialEq)]
pub struct RetentionPolicy {
    /// Most recent entries that are never deleted.
    pub minimum_kept: usize,
    pub max_age: Duration,
    pub max_total_bytes: u64,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            minimum_kept: 10,
            max_age: Duration::from_secs(7 * DAY),
            max_total_bytes: 500 * MIB,
        }
    }
}

impl RetentionPolicy {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            minimum_kept: env_or("GLIMPSE_RETENTION_MINIMUM", d.minimum_kept),
            max_age: Duration::from_secs(
                env_or("GLIMPSE_RETENTION_MAX_AGE_DAYS", d.max_age.as_secs() / DAY) * DAY,
            ),
            max_total_bytes: env_or("GLIMPSE_RETENTION_MAX_BYTES", d.max_total_bytes),
        }
    }
}

/// Cadence limits of the captioning policy.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptionPolicyConfig {
    /// Force a motion caption when the last one is older than this.
    pub stale_motion: Duration,
    pub default_cadence: Duration,
    /// Cadence for sources captured every 30 minutes or faster.
    pub frequent_cadence: Duration,
    /// Cadence for sources captured every 5 minutes or faster.
    pub rapid_cadence: Duration,
    /// Live captioning uses `frequency_minutes / live_divisor` hours.
    pub live_divisor: u32,
    pub live_minimum: Duration,
}

impl Default for CaptionPolicyConfig {
    fn default() -> Self {
        Self {
            stale_motion: Duration::from_secs(3 * HOUR),
            default_cadence: Duration::from_secs(24 * HOUR),
            frequent_cadence: Duration::from_secs(8 * HOUR),
            rapid_cadence: Duration::from_secs(3 * HOUR),
            live_divisor: 7,
            live_minimum: Duration::from_secs(HOUR),
        }
    }
}

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Root of the per-source frame directories
    pub frame_dir: PathBuf,
    /// Root of the per-source segment directories
    pub video_dir: PathBuf,
    pub summary_dir: PathBuf,
    /// JSON file holding the source records
    pub sources_file: PathBuf,
    /// Maximum concurrent capture cycles
    pub max_workers: usize,
    /// Base unit of the per-source start offsets
    pub stagger_base: Duration,
    /// Delay before the one-time full crawl
    pub full_crawl_delay: Duration,
    pub archive_interval: Duration,
    pub teaser_interval: Duration,
    /// How often the sources file is re-read for configuration changes
    pub reload_interval: Duration,
    pub caption_timeout: Duration,
    /// Suppression window after the captioning service rate-limits us
    pub caption_cooldown: Duration,
    /// Upper bound for one encode or concatenation
    pub encode_timeout: Duration,
    pub caption_prompt: String,
    pub summary_prompt: String,
    pub llm_model: String,
    pub llm_url: String,
    pub llm_api_key: Option<String>,
    /// Prometheus listener; metrics are disabled when unset
    pub metrics_addr: Option<SocketAddr>,
    pub segment: SegmentPolicy,
    pub retention: RetentionPolicy,
    pub caption_policy: CaptionPolicyConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            frame_dir: PathBuf::from("data/screenshots"),
            video_dir: PathBuf::from("data/video"),
            summary_dir: PathBuf::from("data/summaries"),
            sources_file: PathBuf::from("data/sources.json"),
            max_workers: 8,
            stagger_base: Duration::from_secs(30),
            full_crawl_delay: Duration::from_secs(300),
            archive_interval: Duration::from_secs(60),
            teaser_interval: Duration::from_secs(180),
            reload_interval: Duration::from_secs(60),
            caption_timeout: Duration::from_secs(60),
            caption_cooldown: Duration::from_secs(900),
            encode_timeout: Duration::from_secs(600),
            caption_prompt: DEFAULT_CAPTION_PROMPT.to_string(),
            summary_prompt: DEFAULT_SUMMARY_PROMPT.to_string(),
            llm_model: "gpt-4o-mini".to_string(),
            llm_url: "https://api.openai.com/v1/chat/completions".to_string(),
            llm_api_key: None,
            metrics_addr: None,
            segment: SegmentPolicy::default(),
            retention: RetentionPolicy::default(),
            caption_policy: CaptionPolicyConfig::default(),
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            frame_dir: env_or("GLIMPSE_FRAME_DIR", d.frame_dir),
            video_dir: env_or("GLIMPSE_VIDEO_DIR", d.video_dir),
            summary_dir: env_or("GLIMPSE_SUMMARY_DIR", d.summary_dir),
            sources_file: env_or("GLIMPSE_SOURCES_FILE", d.sources_file),
            max_workers: env_or("GLIMPSE_MAX_WORKERS", d.max_workers).max(1),
            stagger_base: env_secs("GLIMPSE_STAGGER_BASE_SECS", 30),
            full_crawl_delay: env_secs("GLIMPSE_FULL_CRAWL_DELAY_SECS", 300),
            archive_interval: env_secs("GLIMPSE_ARCHIVE_INTERVAL_SECS", 60),
            teaser_interval: env_secs("GLIMPSE_TEASER_INTERVAL_SECS", 180),
            reload_interval: env_secs("GLIMPSE_RELOAD_INTERVAL_SECS", 60),
            caption_timeout: env_secs("GLIMPSE_CAPTION_TIMEOUT_SECS", 60),
            caption_cooldown: env_secs("GLIMPSE_CAPTION_COOLDOWN_SECS", 900),
            encode_timeout: env_secs("GLIMPSE_ENCODE_TIMEOUT_SECS", 600),
            caption_prompt: env_string("GLIMPSE_CAPTION_PROMPT", DEFAULT_CAPTION_PROMPT),
            summary_prompt: env_string("GLIMPSE_SUMMARY_PROMPT", DEFAULT_SUMMARY_PROMPT),
            llm_model: env_string("GLIMPSE_LLM_MODEL", &d.llm_model),
            llm_url: env_string("GLIMPSE_LLM_URL", &d.llm_url),
            llm_api_key: std::env::var("GLIMPSE_LLM_API_KEY")
                .ok()
                .filter(|k| !k.trim().is_empty()),
            metrics_addr: std::env::var("GLIMPSE_METRICS_ADDR")
                .ok()
                .and_then(|s| s.parse().ok()),
            segment: SegmentPolicy::from_env(),
            retention: RetentionPolicy::from_env(),
            caption_policy: CaptionPolicyConfig::default(),
        }
    }
}
