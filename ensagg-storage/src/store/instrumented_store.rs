use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;

use super::{ObjectStore, StoreResult};
use crate::types::{ObjectId, Registration, SearchPage, SearchRequest};

/// A thread-safe container for object-store call statistics.
#[derive(Debug, Default)]
pub struct IoStats {
    // --- Calls ---
    pub searches: AtomicU64,
    pub blob_gets: AtomicU64,
    pub metadata_posts: AtomicU64,
    pub blob_puts: AtomicU64,
    pub deletes: AtomicU64,

    // --- Payload volume ---
    pub get_bytes: AtomicU64,
    pub put_bytes: AtomicU64,

    // --- Calls that returned an error ---
    pub failed_calls: AtomicU64,
}

impl IoStats {
    /// Capture a point-in-time snapshot of the accumulated counters.
    pub fn snapshot(&self) -> IoStatsSnapshot {
        IoStatsSnapshot {
            searches: self.searches.load(Ordering::Relaxed),
            blob_gets: self.blob_gets.load(Ordering::Relaxed),
            metadata_posts: self.metadata_posts.load(Ordering::Relaxed),
            blob_puts: self.blob_puts.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            get_bytes: self.get_bytes.load(Ordering::Relaxed),
            put_bytes: self.put_bytes.load(Ordering::Relaxed),
            failed_calls: self.failed_calls.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.searches.store(0, Ordering::Relaxed);
        self.blob_gets.store(0, Ordering::Relaxed);
        self.metadata_posts.store(0, Ordering::Relaxed);
        self.blob_puts.store(0, Ordering::Relaxed);
        self.deletes.store(0, Ordering::Relaxed);
        self.get_bytes.store(0, Ordering::Relaxed);
        self.put_bytes.store(0, Ordering::Relaxed);
        self.failed_calls.store(0, Ordering::Relaxed);
    }

    fn record<T, E>(&self, counter: &AtomicU64, result: &Result<T, E>) {
        counter.fetch_add(1, Ordering::Relaxed);
        if result.is_err() {
            self.failed_calls.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Immutable copy of [`IoStats`] counters captured at a specific moment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IoStatsSnapshot {
    pub searches: u64,
    pub blob_gets: u64,
    pub metadata_posts: u64,
    pub blob_puts: u64,
    pub deletes: u64,
    pub get_bytes: u64,
    pub put_bytes: u64,
    pub failed_calls: u64,
}

impl IoStatsSnapshot {
    /// Compute the delta between two snapshots (`newer - older`). Saturates at zero.
    pub fn delta_since(&self, older: &Self) -> Self {
        macro_rules! delta {
            ($field:ident) => {
                self.$field.saturating_sub(older.$field)
            };
        }

        Self {
            searches: delta!(searches),
            blob_gets: delta!(blob_gets),
            metadata_posts: delta!(metadata_posts),
            blob_puts: delta!(blob_puts),
            deletes: delta!(deletes),
            get_bytes: delta!(get_bytes),
            put_bytes: delta!(put_bytes),
            failed_calls: delta!(failed_calls),
        }
    }

    fn bytes_to_mib(bytes: u64) -> f64 {
        bytes as f64 / (1024.0 * 1024.0)
    }

    /// One-line human-readable summary, used in run logs.
    pub fn summary(&self) -> String {
        format!(
            "searches={} gets={} ({:.2} MiB) posts={} puts={} ({:.2} MiB) deletes={} failed={}",
            self.searches,
            self.blob_gets,
            Self::bytes_to_mib(self.get_bytes),
            self.metadata_posts,
            self.blob_puts,
            Self::bytes_to_mib(self.put_bytes),
            self.deletes,
            self.failed_calls,
        )
    }
}

/// Store wrapper that counts every call passing through it.
pub struct InstrumentedStore<S: ObjectStore> {
    inner: S,
    stats: Arc<IoStats>,
}

impl<S: ObjectStore> InstrumentedStore<S> {
    pub fn new(inner: S) -> (Self, Arc<IoStats>) {
        let stats = Arc::new(IoStats::default());
        (
            Self {
                inner,
                stats: Arc::clone(&stats),
            },
            stats,
        )
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn stats(&self) -> &Arc<IoStats> {
        &self.stats
    }
}

#[async_trait]
impl<S: ObjectStore> ObjectStore for InstrumentedStore<S> {
    async fn search(&self, request: &SearchRequest) -> StoreResult<SearchPage> {
        let result = self.inner.search(request).await;
        self.stats.record(&self.stats.searches, &result);
        result
    }

    async fn open_point_in_time(&self, keep_alive: Duration) -> StoreResult<String> {
        self.inner.open_point_in_time(keep_alive).await
    }

    async fn close_point_in_time(&self, pit: &str) -> StoreResult<()> {
        self.inner.close_point_in_time(pit).await
    }

    async fn get_blob(&self, object_id: &ObjectId) -> StoreResult<Bytes> {
        let result = self.inner.get_blob(object_id).await;
        self.stats.record(&self.stats.blob_gets, &result);
        if let Ok(bytes) = &result {
            self.stats
                .get_bytes
                .fetch_add(bytes.len() as u64, Ordering::Relaxed);
        }
        result
    }

    async fn post_metadata(
        &self,
        parent_id: &ObjectId,
        metadata: &Value,
    ) -> StoreResult<Registration> {
        let result = self.inner.post_metadata(parent_id, metadata).await;
        self.stats.record(&self.stats.metadata_posts, &result);
        result
    }

    async fn put_blob(&self, blob_url: &str, bytes: Bytes) -> StoreResult<u16> {
        let len = bytes.len() as u64;
        let result = self.inner.put_blob(blob_url, bytes).await;
        self.stats.record(&self.stats.blob_puts, &result);
        if result.is_ok() {
            self.stats.put_bytes.fetch_add(len, Ordering::Relaxed);
        }
        result
    }

    async fn delete(&self, object_id: &ObjectId) -> StoreResult<()> {
        let result = self.inner.delete(object_id).await;
        self.stats.record(&self.stats.deletes, &result);
        result
    }
}
