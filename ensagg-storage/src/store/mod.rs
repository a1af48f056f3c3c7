use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;

use ensagg_result::StoreError;

use crate::types::{ObjectId, Registration, SearchPage, SearchRequest};

pub mod dir_store;
pub mod instrumented_store;
pub mod mem_store;

pub use dir_store::DirObjectStore;
pub use instrumented_store::{InstrumentedStore, IoStats, IoStatsSnapshot};
pub use mem_store::{Fault, MemObjectStore, StoredObject};

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Remote object store holding metadata documents and their blobs.
///
/// Implementations must be safe to call concurrently from many tasks; the engine shares
/// a single handle across all of its fetch and upload workers.
///
/// `post_metadata` and `put_blob` report the service's status code in their `Ok` value.
/// An `Err` from them always means the request never completed.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    async fn search(&self, request: &SearchRequest) -> StoreResult<SearchPage>;

    /// Freeze the current result set so paging stays consistent under concurrent writes.
    async fn open_point_in_time(&self, keep_alive: Duration) -> StoreResult<String>;

    async fn close_point_in_time(&self, pit: &str) -> StoreResult<()>;

    async fn get_blob(&self, object_id: &ObjectId) -> StoreResult<Bytes>;

    /// Register a metadata document as a child of `parent_id`.
    async fn post_metadata(&self, parent_id: &ObjectId, metadata: &Value)
    -> StoreResult<Registration>;

    async fn put_blob(&self, blob_url: &str, bytes: Bytes) -> StoreResult<u16>;

    /// Remove an object and every object registered below it.
    async fn delete(&self, object_id: &ObjectId) -> StoreResult<()>;
}
