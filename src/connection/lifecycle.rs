// src/connection/lifecycle.rs

//! Creation and last-activity timestamps for a connection.

use std::fmt;
use std::sync::Arc;

/// A wall clock with seconds resolution.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Seconds since the Unix epoch.
    fn now_secs(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_secs(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

/// Tracks when a connection was created and when it last received input.
///
/// `last_active_at` never precedes `created_at`, and only inbound reads move it.
/// Age and idle time saturate at zero if the clock steps backwards.
#[derive(Debug, Clone)]
pub struct LifecycleTracker {
    clock: Arc<dyn Clock>,
    created_at: i64,
    last_active_at: i64,
}

impl LifecycleTracker {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let now = clock.now_secs();
        Self {
            clock,
            created_at: now,
            last_active_at: now,
        }
    }

    /// Records inbound activity.
    pub fn touch(&mut self) {
        self.last_active_at = self.clock.now_secs().max(self.created_at);
    }

    /// Whole seconds since creation.
    pub fn age(&self) -> u64 {
        elapsed_since(self.clock.now_secs(), self.created_at)
    }

    /// Whole seconds since the last inbound read.
    pub fn idle_time(&self) -> u64 {
        elapsed_since(self.clock.now_secs(), self.last_active_at)
    }

}

fn elapsed_since(now: i64, then: i64) -> u64 {
    now.saturating_sub(then).max(0) as u64
}
