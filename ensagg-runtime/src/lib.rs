//! Async runtime of the aggregation engine.
//!
//! [`AggregationRunner`] drives one run end to end: query the store for the realization
//! tables of one logical table, fetch and reconcile them concurrently, decompose the
//! unified table, compute statistics on a dedicated CPU pool, build artifacts and upload
//! them with bounded concurrency.
//!
//! [`generate_dispatch_info`] splits a whole case into independent runs that can be
//! handed to separate workers.

pub mod config;
pub mod dispatch;
pub mod fetch;
pub mod orchestrator;
pub mod query;
pub mod retry;
pub mod runner;
pub mod seed;
pub mod upload;

pub use config::RuntimeConfig;
pub use dispatch::{DispatchTask, generate_dispatch_info, split_list};
pub use fetch::BlobFetcher;
pub use orchestrator::{AggregationOutcome, Orchestrator, RealizationHandle};
pub use query::{QuerySplit, TableQuery, collect_hits, query_realizations, split_hits};
pub use retry::Backoff;
pub use runner::{AggregationRunner, GRAND_AGGREGATION_NAME, RunOptions, RunReport};
pub use seed::{
    CaseHandle, EnsembleSeed, SeededEnsemble, TableIdentity, register_case, seed_ensemble,
    synthetic_table, upload_realization_table,
};
pub use upload::{UploadCoordinator, UploadReport};
