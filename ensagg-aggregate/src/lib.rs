//! Table-level aggregation primitives.
//!
//! The pipeline, per logical table:
//!
//! 1. [`reconcile`] each realization's table against the run's required column set.
//! 2. [`concat_reconciled`] the reconciled tables into one unified table.
//! 3. [`decompose`] the unified table into one sub-table per vector and per index column.
//! 4. Reduce every vector sub-table with the [`StatisticsEngine`].

use ensagg_result::Error;

pub mod decompose;
pub mod engine;
pub mod reconcile;
pub mod stats;
pub mod unify;

pub type AggregateResult<T> = Result<T, Error>;

pub use decompose::{Decomposition, EXCLUDED_COLUMNS, decompose};
pub use engine::{StatisticsEngine, StatisticsReport};
pub use reconcile::{REAL_COLUMN, reconcile, required_from_tables};
pub use stats::{GroupedValues, is_aggregatable, percentile, reduce};
pub use unify::{Unified, concat_reconciled};
