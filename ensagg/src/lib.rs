//! ensagg: ensemble aggregation of per-realization tables
//!
//! This crate is the entrypoint of the workspace. It re-exports the runner, the store
//! abstractions and the error type from the underlying `ensagg-*` crates.
//!
//! # Quick Start
//!
//! Seed an in-memory store with a small ensemble and aggregate it:
//!
//! ```rust
//! use std::sync::Arc;
//! use ensagg::{AggregationRunner, EnsembleSeed, RunOptions, RuntimeConfig, seed_ensemble};
//! use ensagg::storage::{MemObjectStore, ObjectStore};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let store = Arc::new(MemObjectStore::new());
//! let seeded = seed_ensemble(store.as_ref(), &EnsembleSeed::new("demo", 3)).await.unwrap();
//!
//! let store: Arc<dyn ObjectStore> = store;
//! let runner = AggregationRunner::new(store, RuntimeConfig::default()).unwrap();
//! let report = runner.run(&seeded.query(), &RunOptions::default()).await.unwrap();
//! assert_eq!(report.realizations, vec![0, 1, 2]);
//! # });
//! ```
//!
//! # Architecture
//!
//! - **Runtime** (`ensagg-runtime`): query, concurrent fetch, upload, dispatch, config.
//! - **Aggregation** (`ensagg-aggregate`): reconcile, concatenate, decompose, statistics.
//! - **Metadata** (`ensagg-metadata`): typed documents, the shared stub, artifact builder.
//! - **Codec** (`ensagg-codec`): decoder chain for fetched payloads, artifact encoding.
//! - **Storage** (`ensagg-storage`): the `ObjectStore` trait and its implementations.

pub use ensagg_runtime::{
    AggregationRunner, DispatchTask, EnsembleSeed, RunOptions, RunReport, RuntimeConfig,
    SeededEnsemble, TableIdentity, TableQuery, generate_dispatch_info, seed_ensemble,
};

pub mod storage {
    //! Object store trait and implementations.

    pub use ensagg_storage::{
        DirObjectStore, InstrumentedStore, IoStats, IoStatsSnapshot, MemObjectStore, ObjectId,
        ObjectStore,
    };
}

pub mod aggregate {
    //! Table-level building blocks, usable without a store.

    pub use ensagg_aggregate::{StatisticsEngine, concat_reconciled, decompose, reconcile};
    pub use ensagg_metadata::{Artifact, MetadataStub, Operation, build_artifact};
}

pub use ensagg_result::{Error, Result};
