//! Time source for repositories and the bookkeeper.
//!
//! Orphan detection compares `now - updated` with a timeout, so tests swap the
//! system clock for a [`ManualClock`] and move time explicitly.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use fleetkeeper_model::timestamp;

/// Source of the current time.
pub trait Clock: Send + Sync {
    /// Current time at stored precision.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        timestamp::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    /// Start at the given time.
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(timestamp::truncate(start))),
        }
    }

    /// Start at the current wall-clock time.
    pub fn starting_now() -> Self {
        Self::new(Utc::now())
    }

    /// Move the clock forward.
    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(next) = now.checked_add_signed(by) {
            *now = timestamp::truncate(next);
        }
    }

    /// Set the clock to an absolute time.
    pub fn set(&self, at: DateTime<Utc>) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now = timestamp::truncate(at);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Shared clock handle.
pub type SharedClock = Arc<dyn Clock>;

/// Wall clock as a shared handle.
pub fn system_clock() -> SharedClock {
    Arc::new(SystemClock)
}
