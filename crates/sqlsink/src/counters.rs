//! Sink counters
//!
//! Monotonic counters describing batch activity, kept in process and read
//! through [`SinkCounters::snapshot`].

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters of one sink
#[derive(Debug, Default)]
pub struct SinkCounters {
    drain_attempt: AtomicU64,
    drain_success: AtomicU64,
    batch_complete: AtomicU64,
    batch_underflow: AtomicU64,
    batch_empty: AtomicU64,
    connection_failed: AtomicU64,
    started_at: Mutex<Option<DateTime<Utc>>>,
    stopped_at: Mutex<Option<DateTime<Utc>>>,
}

/// Point-in-time copy of [`SinkCounters`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CountersSnapshot {
    /// `take` calls made against the channel
    pub drain_attempt: u64,
    /// Events committed to the database and the channel
    pub drain_success: u64,
    /// Batches that reached the batch size
    pub batch_complete: u64,
    /// Non-empty batches smaller than the batch size
    pub batch_underflow: u64,
    /// Batches with no events
    pub batch_empty: u64,
    /// Batches rolled back
    pub connection_failed: u64,
    /// Last start
    pub started_at: Option<DateTime<Utc>>,
    /// Last stop
    pub stopped_at: Option<DateTime<Utc>>,
}

impl SinkCounters {
    /// Create zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    /// Count `n` take calls
    pub fn add_drain_attempt(&self, n: u64) {
        self.drain_attempt.fetch_add(n, Ordering::Relaxed);
    }

    /// Count `n` delivered events
    pub fn add_drain_success(&self, n: u64) {
        self.drain_success.fetch_add(n, Ordering::Relaxed);
    }

    /// Count a full batch
    pub fn inc_batch_complete(&self) {
        self.batch_complete.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a partial batch
    pub fn inc_batch_underflow(&self) {
        self.batch_underflow.fetch_add(1, Ordering::Relaxed);
    }

    /// Count an empty batch
    pub fn inc_batch_empty(&self) {
        self.batch_empty.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a rolled back batch
    pub fn inc_connection_failed(&self) {
        self.connection_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a start
    pub fn mark_started(&self) {
        *self.started_at.lock() = Some(Utc::now());
    }

    /// Record a stop
    pub fn mark_stopped(&self) {
        *self.stopped_at.lock() = Some(Utc::now());
    }

    /// Copy the current values
    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            drain_attempt: self.drain_attempt.load(Ordering::Relaxed),
            drain_success: self.drain_success.load(Ordering::Relaxed),
            batch_complete: self.batch_complete.load(Ordering::Relaxed),
            batch_underflow: self.batch_underflow.load(Ordering::Relaxed),
            batch_empty: self.batch_empty.load(Ordering::Relaxed),
            connection_failed: self.connection_failed.load(Ordering::Relaxed),
            started_at: *self.started_at.lock(),
            stopped_at: *self.stopped_at.lock(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_snapshot() {
        let counters = SinkCounters::new();
        counters.add_drain_attempt(3);
        counters.add_drain_success(2);
        counters.inc_batch_underflow();
        counters.inc_connection_failed();
        counters.mark_started();

        let snap = counters.snapshot();
        assert_eq!(snap.drain_attempt, 3);
        assert_eq!(snap.drain_success, 2);
        assert_eq!(snap.batch_underflow, 1);
        assert_eq!(snap.batch_complete, 0);
        assert_eq!(snap.batch_empty, 0);
        assert_eq!(snap.connection_failed, 1);
        assert!(snap.started_at.is_some());
        assert!(snap.stopped_at.is_none());
    }
}
