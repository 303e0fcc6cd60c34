//! Wall clock for stamping mutations.
//!
//! Conflict resolution is last-write-wins on `updated_at`, so every local
//! mutation takes its timestamp from here. Timestamps are truncated to
//! millisecond precision, the resolution both ends of the wire agree on.

use crate::Timestamp;
use chrono::{Duration, SubsecRound, Utc};
use std::sync::{Arc, Mutex};

/// The Unix epoch, used as the "never synced" watermark.
pub fn epoch() -> Timestamp {
    Timestamp::default()
}

/// A source of timestamps.
pub trait Clock: Send + Sync {
    /// Current time, at millisecond precision.
    fn now(&self) -> Timestamp;
}

/// The system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Utc::now().trunc_subsecs(3)
    }
}

/// A clock that only moves when told to. Shared between clones.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<Timestamp>>,
}

impl ManualClock {
    /// Create a clock stopped at `start`.
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: Arc::new(Mutex::new(start.trunc_subsecs(3))),
        }
    }

    /// Set the current time.
    pub fn set(&self, to: Timestamp) {
        *self.lock() = to.trunc_subsecs(3);
    }

    /// Move the clock forward (or backward, for a negative duration).
    pub fn advance(&self, by: Duration) {
        let mut now = self.lock();
        *now += by;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Timestamp> {
        // The guarded value is a plain timestamp, so a poisoned lock is still usable.
        self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.lock()
    }
}

/// Timestamp for the next mutation of a row last stamped `previous`.
///
/// Strictly later than `previous`, even when the wall clock stalls or
/// steps backwards.
pub fn next_mutation_time(clock: &dyn Clock, previous: Option<Timestamp>) -> Timestamp {
    let now = clock.now();
    match previous {
        Some(previous) if now <= previous => previous + Duration::milliseconds(1),
        _ => now,
    }
}
