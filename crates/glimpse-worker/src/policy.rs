//! Captioning policy.
//!
//! Decides per cycle whether a capture is worth an external caption. The
//! decision is a pure function of the source state, the difference score and
//! the current time; the object classifier result is folded in afterwards.

use std::time::Duration;

use chrono::{DateTime, Utc};
use glimpse_models::Source;

use crate::config::CaptionPolicyConfig;

/// Why a cycle was allowed to caption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerReason {
    /// No caption of that kind was ever produced.
    Bootstrap,
    /// Difference score at or above the motion threshold.
    Motion,
    /// Last motion caption older than the stale-motion floor.
    StaleMotion,
    /// Last caption older than the cadence ceiling.
    Cadence,
    /// Object classifier confidence met the configured threshold.
    Object,
}

/// Outcome of the captioning policy for one cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CaptionDecision {
    pub motion_trigger: bool,
    pub caption_trigger: bool,
    pub object_trigger: bool,
    pub allow: bool,
    /// The difference score itself crossed the motion threshold.
    pub motion_detected: bool,
    pub reasons: Vec<TriggerReason>,
}

impl CaptionDecision {
    /// Whether the event pointers (last motion, last caption) advance.
    pub fn triggered(&self) -> bool {
        self.motion_trigger || self.caption_trigger
    }

    /// OR in the classifier result. Never clears an earlier trigger.
    pub fn apply_object_confidence(&mut self, confidence: f64, threshold: f64) {
        if confidence >= threshold {
            self.object_trigger = true;
            self.allow = true;
            self.reasons.push(TriggerReason::Object);
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CaptionPolicy {
    config: CaptionPolicyConfig,
}

impl CaptionPolicy {
    pub fn new(config: CaptionPolicyConfig) -> Self {
        Self { config }
    }

    /// Longest a source may go without a caption.
    pub fn cadence_ceiling(&self, source: &Source) -> Duration {
        if source.live_caption {
            let divisor = f64::from(self.config.live_divisor.max(1));
            let hours = f64::from(source.frequency_minutes) / divisor;
            return Duration::from_secs_f64(hours * 3600.0).max(self.config.live_minimum);
        }
        match source.frequency_minutes {
            0..=5 => self.config.rapid_cadence,
            6..=30 => self.config.frequent_cadence,
            _ => self.config.default_cadence,
        }
    }

    /// Evaluate the bootstrap, motion, stale-motion and cadence rules in order.
    pub fn decide(&self, source: &Source, score: Option<f64>, now: DateTime<Utc>) -> CaptionDecision {
        let mut decision = CaptionDecision::default();

        if !source.has_caption() {
            decision.caption_trigger = true;
            decision.allow = true;
            decision.reasons.push(TriggerReason::Bootstrap);
        }
        if !source.has_motion_caption() {
            decision.motion_trigger = true;
            decision.allow = true;
            if !decision.reasons.contains(&TriggerReason::Bootstrap) {
                decision.reasons.push(TriggerReason::Bootstrap);
            }
        }

        // An undetermined score never counts as motion.
        if let Some(score) = score {
            if score >= source.motion_threshold {
                decision.motion_detected = true;
                decision.motion_trigger = true;
                decision.allow = true;
                decision.reasons.push(TriggerReason::Motion);
            }
        }

        if !decision.allow && older_than(source.last_motion_caption_time, now, self.config.stale_motion) {
            decision.motion_trigger = true;
            decision.allow = true;
            decision.reasons.push(TriggerReason::StaleMotion);
        }

        if !decision.allow && older_than(source.last_caption_time, now, self.cadence_ceiling(source)) {
            decision.caption_trigger = true;
            decision.allow = true;
            decision.reasons.push(TriggerReason::Cadence);
        }

        decision
    }
}

/// Whether `at` lies more than `limit` before `now`. Unknown times are stale.
fn older_than(at: Option<DateTime<Utc>>, now: DateTime<Utc>, limit: Duration) -> bool {
    let Some(at) = at else {
        return true;
    };
    match (now - at).to_std() {
        Ok(elapsed) => elapsed > limit,
        // `at` in the future
        Err(_) => false,
    }
}

/// Whether a caption reads like a refusal rather than a description.
pub fn is_refusal(caption: &str) -> bool {
    let lower = caption.to_lowercase();
    ["sorry", "cannot", "can not"]
        .iter()
        .any(|pattern| lower.contains(pattern))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn captioned(frequency: u32, caption_age: chrono::Duration) -> Source {
        let mut source = Source::new("cam", "").with_frequency(frequency);
        source.last_caption = "A parked car".into();
        source.last_caption_time = Some(now() - caption_age);
        source.last_motion_caption = "A parked car".into();
        source.last_motion_caption_time = Some(now() - chrono::Duration::minutes(30));
        source
    }

    #[test]
    fn test_bootstrap_without_caption() {
        let policy = CaptionPolicy::default();
        let source = Source::new("cam", "").with_frequency(30);
        let decision = policy.decide(&source, Some(0.0), now());
        assert!(decision.allow);
        assert!(decision.caption_trigger);
        assert!(decision.motion_trigger);
        assert_eq!(decision.reasons, vec![TriggerReason::Bootstrap]);
    }

    #[test]
    fn test_quiet_source_within_cadence_is_denied() {
        let policy = CaptionPolicy::default();
        let source = captioned(30, chrono::Duration::hours(1));
        let decision = policy.decide(&source, Some(0.0), now());
        assert!(!decision.allow);
        assert!(!decision.triggered());
    }

    #[test]
    fn test_motion_at_threshold_triggers() {
        let policy = CaptionPolicy::default();
        let source = captioned(30, chrono::Duration::hours(1));
        let decision = policy.decide(&source, Some(source.motion_threshold), now());
        assert!(decision.allow && decision.motion_trigger && decision.motion_detected);
        assert!(!decision.caption_trigger);
    }

    #[test]
    fn test_undetermined_score_is_not_motion() {
        let policy = CaptionPolicy::default();
        let source = captioned(30, chrono::Duration::hours(1));
        assert!(!policy.decide(&source, None, now()).allow);
    }

    #[test]
    fn test_stale_motion_floor() {
        let policy = CaptionPolicy::default();
        let mut source = captioned(30, chrono::Duration::hours(1));
        source.last_motion_caption_time = Some(now() - chrono::Duration::hours(4));
        let decision = policy.decide(&source, Some(0.0), now());
        assert!(decision.motion_trigger);
        assert_eq!(decision.reasons, vec![TriggerReason::StaleMotion]);
    }

    #[test]
    fn test_cadence_ceilings() {
        let policy = CaptionPolicy::default();
        let hours = |h: u64| Duration::from_secs(h * 3600);
        assert_eq!(policy.cadence_ceiling(&Source::new("a", "").with_frequency(60)), hours(24));
        assert_eq!(policy.cadence_ceiling(&Source::new("a", "").with_frequency(30)), hours(8));
        assert_eq!(policy.cadence_ceiling(&Source::new("a", "").with_frequency(5)), hours(3));

        let mut live = Source::new("a", "").with_frequency(70);
        live.live_caption = true;
        assert_eq!(policy.cadence_ceiling(&live), hours(10));
        live.frequency_minutes = 1;
        assert_eq!(policy.cadence_ceiling(&live), hours(1));
    }

    #[test]
    fn test_cadence_trigger() {
        let policy = CaptionPolicy::default();
        let source = captioned(5, chrono::Duration::hours(4));
        let decision = policy.decide(&source, Some(0.0), now());
        assert!(decision.caption_trigger && decision.allow);
        assert!(!decision.motion_trigger);
        assert_eq!(decision.reasons, vec![TriggerReason::Cadence]);
    }

    #[test]
    fn test_object_confidence_is_ored_in() {
        let policy = CaptionPolicy::default();
        let source = captioned(30, chrono::Duration::hours(1));
        let mut decision = policy.decide(&source, Some(0.0), now());
        decision.apply_object_confidence(0.4, 0.5);
        assert!(!decision.allow);
        decision.apply_object_confidence(0.5, 0.5);
        assert!(decision.allow && decision.object_trigger);
        assert!(!decision.triggered());
    }

    #[test]
    fn test_refusal_detection() {
        assert!(is_refusal("I'm Sorry, I can't help with that."));
        assert!(is_refusal("The image CANNOT be described"));
        assert!(is_refusal("I can not see anything"));
        assert!(!is_refusal("Delivery truck at the loading dock"));
    }
}
