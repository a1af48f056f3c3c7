//! Object-store interface consumed by the aggregation engine.
//!
//! The engine never talks to a concrete service. It holds one shared
//! `Arc<dyn ObjectStore>` handle and issues five kinds of calls through it: paged
//! searches (with point-in-time snapshots), blob reads, metadata registration, blob
//! writes, and deletion.
//!
//! Three implementations ship with the crate:
//!
//! - [`MemObjectStore`]: in-memory, with scripted fault injection for tests.
//! - [`DirObjectStore`]: persists metadata documents and blobs under a directory.
//! - [`InstrumentedStore`]: wraps any store and counts calls and bytes.

pub mod store;
pub mod types;

pub use store::{
    DirObjectStore, Fault, InstrumentedStore, IoStats, IoStatsSnapshot, MemObjectStore,
    ObjectStore, StoreResult, StoredObject,
};
pub use types::{
    ObjectId, Registration, SearchFilter, SearchHit, SearchPage, SearchRequest, derive_object_id,
    uuid_from_string,
};
