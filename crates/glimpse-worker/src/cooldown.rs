//! Shared captioning cooldown.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};

const NEVER: i64 = i64::MIN;

/// Suppresses captioning calls for a fixed window after a rate-limit signal.
///
/// The last hit is a single atomic epoch-seconds register shared by every
/// job. A race between two jobs costs at most one extra call.
#[derive(Debug)]
pub struct CaptionCooldown {
    window: Duration,
    last_hit: AtomicI64,
}

impl CaptionCooldown {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_hit: AtomicI64::new(NEVER),
        }
    }

    /// Record a rate-limit signal now.
    pub fn trip(&self) {
        self.trip_at(Utc::now());
    }

    pub fn trip_at(&self, at: DateTime<Utc>) {
        self.last_hit.fetch_max(at.timestamp(), Ordering::AcqRel);
    }

    pub fn is_active(&self) -> bool {
        self.is_active_at(Utc::now())
    }

    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.remaining_at(now).is_some()
    }

    /// Time left in the window, if one is running.
    pub fn remaining_at(&self, now: DateTime<Utc>) -> Option<Duration> {
        let last = self.last_hit.load(Ordering::Acquire);
        if last == NEVER {
            return None;
        }
        let elapsed = now.timestamp().saturating_sub(last).max(0) as u64;
        self.window
            .as_secs()
            .checked_sub(elapsed)
            .filter(|left| *left > 0)
            .map(Duration::from_secs)
    }

    pub fn reset(&self) {
        self.last_hit.store(NEVER, Ordering::Release);
    }
}
