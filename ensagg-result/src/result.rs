use crate::error::Error;

/// Result type alias used throughout the ensagg crates.
///
/// Shorthand for `std::result::Result<T, Error>`. Component-level failures that are
/// handled locally (fetch, upload, decode) use their own error kinds and are folded into
/// [`Error`] only when they escape a run.
pub type Result<T> = std::result::Result<T, Error>;
