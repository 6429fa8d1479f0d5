//! Monitored sources and their per-cycle state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::error::{ModelError, ModelResult};
use crate::frame::GROUPS_DIR;

/// Largest accepted capture frequency (one year, in minutes).
pub const MAX_FREQUENCY_MINUTES: u32 = 525_600;

/// Maximum length of a source name.
pub const MAX_NAME_LEN: usize = 32;

/// One monitored endpoint: immutable configuration plus the mutable fields the
/// capture cycle reads at the start of a cycle and writes back at the end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct Source {
    /// Stable identifier, also the frame/segment directory name.
    #[validate(custom(function = "validate_name_field"))]
    pub name: String,

    /// Where frames are acquired from.
    #[serde(default)]
    pub url: String,

    /// Capture frequency in minutes.
    #[validate(range(min = 1, max = 525_600))]
    #[serde(default = "default_frequency")]
    pub frequency_minutes: u32,

    /// Per-capture timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Difference score at or above which a cycle counts as motion.
    #[validate(range(min = 0.0, max = 1.0))]
    #[serde(default = "default_motion_threshold")]
    pub motion_threshold: f64,

    /// Free text handed to the vision classifier; empty disables it.
    #[serde(default)]
    pub object_filter: String,

    #[validate(range(min = 0.0, max = 1.0))]
    #[serde(default = "default_object_confidence")]
    pub object_confidence: f64,

    #[serde(default)]
    pub groups: Vec<String>,

    /// Higher-cadence captioning mode.
    #[serde(default)]
    pub live_caption: bool,

    #[serde(default)]
    pub last_capture_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_caption: String,
    #[serde(default)]
    pub last_caption_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_motion_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_motion_caption: String,
    #[serde(default)]
    pub last_motion_caption_time: Option<DateTime<Utc>>,

    /// Most recent refusal-style caption, kept apart from `last_caption`.
    #[serde(default)]
    pub rejected_caption: String,
    #[serde(default)]
    pub rejected_caption_time: Option<DateTime<Utc>>,
}

fn default_frequency() -> u32 {
    60
}
fn default_timeout() -> u64 {
    10
}
fn default_motion_threshold() -> f64 {
    0.2
}
fn default_object_confidence() -> f64 {
    0.5
}

fn validate_name_field(name: &str) -> Result<(), ValidationError> {
    validate_source_name(name)
        .map(|_| ())
        .map_err(|_| ValidationError::new("invalid_source_name"))
}

impl Source {
    /// Create a source with default configuration.
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            frequency_minutes: default_frequency(),
            timeout_secs: default_timeout(),
            motion_threshold: default_motion_threshold(),
            object_filter: String::new(),
            object_confidence: default_object_confidence(),
            groups: Vec::new(),
            live_caption: false,
            last_capture_time: None,
            last_caption: String::new(),
            last_caption_time: None,
            last_motion_time: None,
            last_motion_caption: String::new(),
            last_motion_caption_time: None,
            rejected_caption: String::new(),
            rejected_caption_time: None,
        }
    }

    pub fn with_frequency(mut self, minutes: u32) -> Self {
        self.frequency_minutes = minutes;
        self
    }

    pub fn with_groups(mut self, groups: &str) -> Self {
        self.groups = normalize_groups(groups);
        self
    }

    /// Recurring job interval in seconds.
    pub fn interval_secs(&self) -> u64 {
        u64::from(self.frequency_minutes) * 60
    }

    pub fn has_caption(&self) -> bool {
        !self.last_caption.trim().is_empty()
    }

    pub fn has_motion_caption(&self) -> bool {
        !self.last_motion_caption.trim().is_empty()
    }

    pub fn has_object_filter(&self) -> bool {
        !self.object_filter.trim().is_empty()
    }

    /// Check every configuration field. Used by the scheduler before a job is
    /// registered.
    pub fn validate_config(&self) -> ModelResult<()> {
        self.validate()?;
        for group in &self.groups {
            validate_group_name(group)
                .map_err(|_| ModelError::invalid_field("groups", format!("invalid group {group:?}")))?;
        }
        if self.timeout_secs >= self.interval_secs() {
            return Err(ModelError::invalid_field(
                "timeout_secs",
                format!(
                    "timeout {}s must be less than frequency {}s",
                    self.timeout_secs,
                    self.interval_secs()
                ),
            ));
        }
        if !self.url.is_empty() && !self.url.starts_with('/') {
            url::Url::parse(&self.url)
                .map_err(|e| ModelError::invalid_field("url", e.to_string()))?;
        }
        Ok(())
    }

    /// Clamp the timeout below the frequency, the way edits are accepted.
    pub fn clamp_timeout(&mut self) {
        let interval = self.interval_secs();
        if interval > 1 && self.timeout_secs >= interval {
            self.timeout_secs = interval - 1;
        }
    }

    /// Apply the mutable fields written back at the end of a cycle.
    pub fn apply(&mut self, update: &SourceUpdate) {
        if let Some(t) = update.last_capture_time {
            self.last_capture_time = Some(t);
        }
        if let Some(ref caption) = update.last_caption {
            self.last_caption = caption.clone();
        }
        if let Some(t) = update.last_caption_time {
            self.last_caption_time = Some(t);
        }
        if let Some(t) = update.last_motion_time {
            self.last_motion_time = Some(t);
        }
        if let Some(ref caption) = update.last_motion_caption {
            self.last_motion_caption = caption.clone();
        }
        if let Some(t) = update.last_motion_caption_time {
            self.last_motion_caption_time = Some(t);
        }
        if let Some(ref caption) = update.rejected_caption {
            self.rejected_caption = caption.clone();
        }
        if let Some(t) = update.rejected_caption_time {
            self.rejected_caption_time = Some(t);
        }
    }
}

/// Mutable source fields produced by one cycle. `None` leaves a field as is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceUpdate {
    pub last_capture_time: Option<DateTime<Utc>>,
    pub last_caption: Option<String>,
    pub last_caption_time: Option<DateTime<Utc>>,
    pub last_motion_time: Option<DateTime<Utc>>,
    pub last_motion_caption: Option<String>,
    pub last_motion_caption_time: Option<DateTime<Utc>>,
    pub rejected_caption: Option<String>,
    pub rejected_caption_time: Option<DateTime<Utc>>,
}

impl SourceUpdate {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Validate a source name and return it unchanged.
///
/// Names double as directory names, so only `[A-Za-z0-9_.-]` is allowed, no
/// leading/trailing separator and no doubled separators. The group pointer
/// directory name is reserved.
pub fn validate_source_name(name: &str) -> ModelResult<&str> {
    if !is_path_component(name) || name == GROUPS_DIR {
        return Err(ModelError::InvalidName(name.to_string()));
    }
    Ok(name)
}

/// Validate a group name, which becomes a directory under the group pointer
/// directory and follows the source name rules.
pub fn validate_group_name(group: &str) -> ModelResult<&str> {
    if !is_path_component(group) {
        return Err(ModelError::InvalidName(group.to_string()));
    }
    Ok(group)
}

fn is_path_component(name: &str) -> bool {
    let separator = |c: char| matches!(c, '_' | '-' | '.');
    !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && name.chars().all(|c| c.is_ascii_alphanumeric() || separator(c))
        && !name.starts_with(separator)
        && !name.ends_with(separator)
        && !name.contains("..")
        && !name.contains("--")
        && !name.contains("__")
}

/// Split a comma-separated group list into trimmed, underscore-joined names.
///
/// Names that are not valid group names are dropped.
pub fn normalize_groups(groups: &str) -> Vec<String> {
    let mut out: Vec<String> = groups
        .split(',')
        .map(|g| g.trim().replace(' ', "_"))
        .filter(|g| validate_group_name(g).is_ok())
        .collect();
    out.dedup();
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_source_name() {
        assert!(validate_source_name("front-door").is_ok());
        assert!(validate_source_name("cam_1.north").is_ok());

        assert!(validate_source_name("").is_err());
        assert!(validate_source_name("-front").is_err());
        assert!(validate_source_name("front.").is_err());
        assert!(validate_source_name("a..b").is_err());
        assert!(validate_source_name("a__b").is_err());
        assert!(validate_source_name("../etc").is_err());
        assert!(validate_source_name("with space").is_err());
        assert!(validate_source_name(&"a".repeat(33)).is_err());
        assert!(validate_source_name("groups").is_err());
        assert!(validate_source_name("groups2").is_ok());
    }

    #[test]
    fn test_validate_group_name() {
        assert!(validate_group_name("north_side").is_ok());
        assert!(validate_group_name("groups").is_ok());
        assert!(validate_group_name("..").is_err());
        assert!(validate_group_name("a/b").is_err());
        assert!(validate_group_name("/etc").is_err());
    }

    #[test]
    fn test_normalize_groups() {
        assert_eq!(
            normalize_groups(" traffic, weather ,,north side"),
            vec!["traffic", "weather", "north_side"]
        );
        assert!(normalize_groups("").is_empty());
        assert_eq!(normalize_groups("..,a/b, ok ,../up"), vec!["ok"]);
    }

    #[test]
    fn test_validate_config() {
        let source = Source::new("front", "http://example.com/cam.jpg").with_frequency(30);
        assert!(source.validate_config().is_ok());

        let too_frequent = Source::new("front", "").with_frequency(0);
        assert!(too_frequent.validate_config().is_err());

        let too_rare = Source::new("front", "").with_frequency(MAX_FREQUENCY_MINUTES + 1);
        assert!(too_rare.validate_config().is_err());

        let mut bad_threshold = Source::new("front", "");
        bad_threshold.motion_threshold = 1.5;
        assert!(bad_threshold.validate_config().is_err());

        let mut slow = Source::new("front", "").with_frequency(1);
        slow.timeout_secs = 60;
        assert!(slow.validate_config().is_err());
        slow.clamp_timeout();
        assert_eq!(slow.timeout_secs, 59);
        assert!(slow.validate_config().is_ok());

        let mut escaping = Source::new("front", "");
        escaping.groups = vec!["north".into(), "../../tmp".into()];
        assert!(escaping.validate_config().is_err());
    }

    #[test]
    fn test_apply_update() {
        let mut source = Source::new("front", "");
        let now = Utc::now();
        source.apply(&SourceUpdate {
            last_caption: Some("A truck".to_string()),
            last_caption_time: Some(now),
            ..Default::default()
        });
        assert_eq!(source.last_caption, "A truck");
        assert_eq!(source.last_caption_time, Some(now));
        assert!(source.last_motion_time.is_none());
        assert!(SourceUpdate::default().is_empty());
    }

    #[test]
    fn test_source_deserializes_with_defaults() {
        let source: Source = serde_json::from_str(r#"{"name":"front"}"#).unwrap();
        assert_eq!(source.frequency_minutes, 60);
        assert!((source.motion_threshold - 0.2).abs() < f64::EPSILON);
        assert!(!source.has_caption());
    }
}
