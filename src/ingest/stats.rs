use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::ingest::pipeline::Outcome;

/// Message counters, readable while the subscriber is running.
#[derive(Debug, Default)]
pub struct IngestStats {
    received: AtomicU64,
    counts_stored: AtomicU64,
    statuses_stored: AtomicU64,
    ignored: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IngestStatsSnapshot {
    pub received: u64,
    pub counts_stored: u64,
    pub statuses_stored: u64,
    pub ignored: u64,
    pub failed: u64,
    pub retried: u64,
}

impl IngestStats {
    pub fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_outcome(&self, outcome: &Outcome) {
        let counter = match outcome {
            Outcome::Count { .. } => &self.counts_stored,
            Outcome::Status { .. } => &self.statuses_stored,
            Outcome::Ignored(_) => &self.ignored,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.retried.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> IngestStatsSnapshot {
        IngestStatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            counts_stored: self.counts_stored.load(Ordering::Relaxed),
            statuses_stored: self.statuses_stored.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
        }
    }
}
