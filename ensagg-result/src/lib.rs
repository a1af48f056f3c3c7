//! Error types and result definitions for ensemble table aggregation.
//!
//! The workspace uses one run-level error enum ([`Error`]) plus a small set of closed
//! error kinds for the components whose failures are isolated rather than propagated:
//!
//! - [`StoreError`]: a single call against the object store failed (transport or status).
//! - [`DecodeError`]: one decoder in the format probe chain rejected a payload.
//! - [`FetchError`]: one realization could not be retrieved. The orchestrator records it
//!   and carries on with the remaining realizations.
//! - [`UploadError`]: one artifact could not be uploaded. The coordinator records it and
//!   carries on with the remaining artifacts.
//!
//! Only conditions that leave a run without any data ([`Error::EmptyAggregation`],
//! [`Error::NothingUploaded`]) or without any input ([`Error::NotFound`]) abort a run.
//!
//! # Error Categories
//!
//! - **I/O errors** ([`Error::Io`]): local files of the directory-backed store
//! - **Data format errors** ([`Error::Arrow`], [`Error::Json`]): columnar and metadata
//!   serialization
//! - **Store errors** ([`Error::Store`]): query and registration calls that cannot be
//!   isolated to one realization or artifact
//! - **Aggregation outcomes** ([`Error::EmptyAggregation`], [`Error::SchemaMismatch`],
//!   [`Error::NothingUploaded`])
//! - **User input errors** ([`Error::InvalidArgumentError`])
//! - **Internal errors** ([`Error::Internal`]): bugs or unexpected states

pub mod error;
pub mod kinds;
pub mod result;

pub use error::Error;
pub use kinds::{
    DecodeError, FetchError, StoreError, UploadError, is_success_status, is_transient_status,
};
pub use result::Result;
