//! Admission Cache (spec.md §4.B): a bounded, frequency-aware in-process
//! map from counter key to the most recently observed count. `moka`
//! implements W-TinyLFU internally, which is exactly the admit-on-frequency
//! / evict-lowest-frequency behavior the spec calls for, so it's reused
//! here as the admission policy rather than reimplemented by hand.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use moka::future::Cache;
use moka::notification::RemovalCause;

/// Read-through (not write-through) cache of counter key → last observed
/// count. Correctness never depends on freshness here — only throughput
/// does (spec.md §4.B).
pub struct AdmissionCache {
    inner: Cache<String, u64>,
    evictions: Arc<AtomicU64>,
}

impl AdmissionCache {
    /// `max_capacity` bounds total admitted cost (each entry costs 1).
    pub fn new(max_capacity: u64) -> Self {
        let evictions = Arc::new(AtomicU64::new(0));
        let listener_evictions = evictions.clone();

        let inner = Cache::builder()
            .max_capacity(max_capacity)
            .eviction_listener(move |_key, _value, cause| {
                if matches!(cause, RemovalCause::Size | RemovalCause::Expired) {
                    listener_evictions.fetch_add(1, Ordering::Relaxed);
                }
            })
            .build();

        Self { inner, evictions }
    }

    /// Returns the most recently recorded count for `key`, or `None` on a
    /// miss. Lock-free on the fast path (moka's segmented concurrent map).
    pub async fn get(&self, key: &str) -> Option<u64> {
        self.inner.get(key).await
    }

    /// Offers an entry for insertion. Admission is governed by moka's
    /// frequency sketch; a `put` is not guaranteed to be retained.
    pub async fn put(&self, key: String, count: u64) {
        self.inner.insert(key, count).await;
    }

    /// Running count of evictions since creation, for metrics/logging.
    pub fn eviction_count(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    #[cfg(test)]
    pub async fn entry_count(&self) -> u64 {
        self.inner.run_pending_tasks().await;
        self.inner.entry_count()
    }
}
