use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Process-wide counters for relay instances.
///
/// Every relay owns its parser state; these atomics are the only thing
/// concurrent relays share.
#[derive(Debug, Default)]
pub struct RelayMetrics {
    started: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    client_disconnects: AtomicU64,
    fallback_answers: AtomicU64,
    dropped_payloads: AtomicU64,
    forwarded_fragments: AtomicU64,
}

/// Point-in-time copy of [`RelayMetrics`], reported by `/health`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RelayMetricsSnapshot {
    pub started: u64,
    pub completed: u64,
    pub failed: u64,
    pub client_disconnects: u64,
    pub fallback_answers: u64,
    pub dropped_payloads: u64,
    pub forwarded_fragments: u64,
}

impl RelayMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_started(&self) {
        self.started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_client_disconnect(&self) {
        self.client_disconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fallback(&self) {
        self.fallback_answers.fetch_add(1, Ordering::Relaxed);
    }

    /// An upstream `data:` payload that could not be decoded as JSON.
    pub fn record_dropped_payload(&self) {
        self.dropped_payloads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_forwarded_fragment(&self) {
        self.forwarded_fragments.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> RelayMetricsSnapshot {
        RelayMetricsSnapshot {
            started: self.started.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            client_disconnects: self.client_disconnects.load(Ordering::Relaxed),
            fallback_answers: self.fallback_answers.load(Ordering::Relaxed),
            dropped_payloads: self.dropped_payloads.load(Ordering::Relaxed),
            forwarded_fragments: self.forwarded_fragments.load(Ordering::Relaxed),
        }
    }
}
