//! Wall-clock source for mutation stamps and sync timestamps.
//!
//! All timestamps in the local store and on the wire are epoch milliseconds.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;

/// Epoch milliseconds.
pub type Millis = i64;

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> Millis;
}

/// Clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Millis {
        Utc::now().timestamp_millis()
    }
}

/// Manually driven clock for tests and simulations.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start: Millis) -> Self {
        Self {
            now: AtomicI64::new(start),
        }
    }

    pub fn set(&self, now: Millis) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Millis) -> Millis {
        self.now.fetch_add(by, Ordering::SeqCst) + by
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Millis {
        self.now.load(Ordering::SeqCst)
    }
}

/// Formats epoch milliseconds for display.
pub fn format_millis(millis: Millis) -> String {
    match chrono::DateTime::from_timestamp_millis(millis) {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        None => millis.to_string(),
    }
}
