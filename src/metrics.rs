//! Relay counters.
//!
//! Every event the relay drops or fails on is counted here, so loss is
//! measurable even though HTTP callers always see success.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct RelayMetrics {
    /// Bodies that parsed and were handed to the queue.
    pub events_accepted: AtomicU64,
    /// Bodies dropped by the parser.
    pub events_malformed: AtomicU64,
    /// Broker writes that completed.
    pub writes_sent: AtomicU64,
    /// Broker writes dropped while disconnected, in flight at a loss, or rejected.
    pub writes_dropped: AtomicU64,
    /// Connections lost (either service).
    pub reconnects: AtomicU64,
    /// Documents inserted by the worker.
    pub documents_stored: AtomicU64,
    /// Popped keys with a missing or malformed entry.
    pub entries_orphaned: AtomicU64,
    /// Documents the store refused.
    pub insert_failures: AtomicU64,
}

impl RelayMetrics {
    pub const fn new() -> Self {
        Self {
            events_accepted: AtomicU64::new(0),
            events_malformed: AtomicU64::new(0),
            writes_sent: AtomicU64::new(0),
            writes_dropped: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
            documents_stored: AtomicU64::new(0),
            entries_orphaned: AtomicU64::new(0),
            insert_failures: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn record_accepted(&self) {
        self.events_accepted.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_malformed(&self) {
        self.events_malformed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_write(&self) {
        self.writes_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the new total.
    #[inline]
    pub fn record_dropped_write(&self) -> u64 {
        self.writes_dropped.fetch_add(1, Ordering::Relaxed) + 1
    }

    #[inline]
    pub fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_stored(&self) {
        self.documents_stored.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_orphaned(&self) {
        self.entries_orphaned.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_insert_failure(&self) {
        self.insert_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            events_accepted: self.events_accepted.load(Ordering::Relaxed),
            events_malformed: self.events_malformed.load(Ordering::Relaxed),
            writes_sent: self.writes_sent.load(Ordering::Relaxed),
            writes_dropped: self.writes_dropped.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            documents_stored: self.documents_stored.load(Ordering::Relaxed),
            entries_orphaned: self.entries_orphaned.load(Ordering::Relaxed),
            insert_failures: self.insert_failures.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`RelayMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub events_accepted: u64,
    pub events_malformed: u64,
    pub writes_sent: u64,
    pub writes_dropped: u64,
    pub reconnects: u64,
    pub documents_stored: u64,
    pub entries_orphaned: u64,
    pub insert_failures: u64,
}

impl MetricsSnapshot {
    /// Logs the snapshot as one structured event.
    pub fn log(&self, service: &str) {
        tracing::info!(
            service,
            events_accepted = self.events_accepted,
            events_malformed = self.events_malformed,
            writes_sent = self.writes_sent,
            writes_dropped = self.writes_dropped,
            reconnects = self.reconnects,
            documents_stored = self.documents_stored,
            entries_orphaned = self.entries_orphaned,
            insert_failures = self.insert_failures,
            "relay metrics"
        );
    }
}
