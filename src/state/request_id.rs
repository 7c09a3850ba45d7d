use std::sync::atomic::{AtomicU64, Ordering};

/// Hands out per-process request sequence numbers for log correlation.
pub(crate) struct RequestSeqGenerator {
    counter: AtomicU64,
}

impl RequestSeqGenerator {
    #[must_use]
    pub(crate) fn new() -> Self {
        Self {
            counter: AtomicU64::new(1),
        }
    }

    pub(crate) fn next_seq(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::Relaxed)
    }
}
