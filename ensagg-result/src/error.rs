use std::{fmt, io};
use thiserror::Error;

use crate::kinds::{FetchError, StoreError, UploadError};

/// Unified error type for aggregation runs.
///
/// Per-realization and per-artifact failures are *not* represented here while a run is in
/// progress; they are collected as [`FetchError`] / [`UploadError`] values and reported.
/// The variants below are what escapes a public API call.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error while reading or writing local files.
    ///
    /// Only the directory-backed store and the CLI touch the local file system.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Arrow error during columnar operations.
    ///
    /// Raised by concatenation, casting, projection, and IPC encoding. Decoding errors of
    /// fetched payloads are reported through [`crate::DecodeError`] instead.
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Metadata document could not be (de)serialized.
    #[error("metadata JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A store call that is not scoped to one realization or artifact failed.
    ///
    /// Search and point-in-time calls land here; blob fetches and uploads use their
    /// own kinds.
    #[error("object store error: {0}")]
    Store(#[from] StoreError),

    /// A single fetch failure that was escalated by the caller.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// A single upload failure that was escalated by the caller.
    #[error(transparent)]
    Upload(#[from] UploadError),

    /// Every realization of a run failed to fetch (or there were none to fetch).
    ///
    /// This is the only fetch-related condition that aborts a run. It is raised before
    /// any upload is scheduled.
    #[error("no realization could be aggregated ({attempted} attempted)")]
    EmptyAggregation { attempted: usize },

    /// Realization schemas disagree on a column's type.
    ///
    /// Reconciliation resolves these with a fixed cast table and logs them as warnings;
    /// the variant exists so the mismatch can be reported with the same formatting.
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    /// A run produced artifacts but none of them reached the store.
    #[error("none of {attempted} artifacts could be uploaded")]
    NothingUploaded { attempted: usize },

    /// Invalid user input or API parameter.
    ///
    /// Examples: a segment length of zero, a table index column missing from the
    /// aggregated table, an unparsable environment variable.
    #[error("Invalid argument: {0}")]
    InvalidArgumentError(String),

    /// A query matched nothing.
    #[error("not found: {0}")]
    NotFound(String),

    /// Internal error indicating a bug or unexpected state.
    #[error("An internal operation failed: {0}")]
    Internal(String),
}

impl Error {
    /// Create an invalid-argument error from any displayable value.
    ///
    /// # Examples
    ///
    /// ```
    /// use ensagg_result::Error;
    ///
    /// fn parse_segment(input: &str) -> Result<usize, Error> {
    ///     input.parse::<usize>().map_err(Error::invalid_argument)
    /// }
    ///
    /// assert_eq!(parse_segment("42").unwrap(), 42);
    /// assert!(matches!(parse_segment("x"), Err(Error::InvalidArgumentError(_))));
    /// ```
    #[inline]
    pub fn invalid_argument<E: fmt::Display>(err: E) -> Self {
        Error::InvalidArgumentError(err.to_string())
    }

    /// Create an internal error from any displayable value.
    #[inline]
    pub fn internal<E: fmt::Display>(err: E) -> Self {
        Error::Internal(err.to_string())
    }
}
