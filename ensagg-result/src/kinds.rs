//! Closed error kinds for the components whose failures are isolated per item.

use thiserror::Error;

/// Failure of a single object-store call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The request never produced a response (connection reset, timeout, DNS, ...).
    #[error("transport failure: {0}")]
    Transport(String),

    /// The service answered with a non-success status code.
    #[error("status {code}: {message}")]
    Status { code: u16, message: String },
}

impl StoreError {
    pub fn status(code: u16, message: impl Into<String>) -> Self {
        StoreError::Status {
            code,
            message: message.into(),
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::status(404, what)
    }

    /// Whether retrying the same request may succeed.
    ///
    /// Transport failures, request timeouts (408), rate limiting (429) and server-side
    /// errors (5xx) are transient. Every other status is permanent.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Transport(_) => true,
            StoreError::Status { code, .. } => is_transient_status(*code),
        }
    }

    pub fn code(&self) -> Option<u16> {
        match self {
            StoreError::Transport(_) => None,
            StoreError::Status { code, .. } => Some(*code),
        }
    }
}

/// Status codes accepted as success for registration and blob writes.
pub fn is_success_status(code: u16) -> bool {
    matches!(code, 200 | 201)
}

/// Status codes worth retrying.
pub fn is_transient_status(code: u16) -> bool {
    code == 408 || code == 429 || code >= 500
}

/// A decoder in the format probe chain rejected a payload.
///
/// Every decoder must fail with this instead of returning a partially decoded table.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{format}: {message}")]
pub struct DecodeError {
    pub format: &'static str,
    pub message: String,
}

impl DecodeError {
    pub fn new(format: &'static str, message: impl Into<String>) -> Self {
        Self {
            format,
            message: message.into(),
        }
    }
}

/// Failure to retrieve one realization's table.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Retry-worthy failure of one attempt. Surfaces only through [`FetchError::Failed`]
    /// once the attempts are used up, or directly when retries are disabled.
    #[error("transient failure fetching {object_id}: {source}")]
    Transient {
        object_id: String,
        #[source]
        source: StoreError,
    },

    /// Not worth retrying: missing object, rejected request, undecodable payload.
    #[error("permanent failure fetching {object_id}: {reason}")]
    Permanent { object_id: String, reason: String },

    /// Transient failures persisted through every attempt.
    #[error("fetching {object_id} failed after {attempts} attempts: {last}")]
    Failed {
        object_id: String,
        attempts: u32,
        last: StoreError,
    },
}

impl FetchError {
    pub fn object_id(&self) -> &str {
        match self {
            FetchError::Transient { object_id, .. }
            | FetchError::Permanent { object_id, .. }
            | FetchError::Failed { object_id, .. } => object_id,
        }
    }
}

/// Failure to upload one artifact.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UploadError {
    /// Attempts used up on transient failures. Only possible when the coordinator
    /// is configured with a bounded number of attempts.
    #[error("upload of {path} still failing after {attempts} attempts: {detail}")]
    Transient {
        path: String,
        attempts: u32,
        detail: String,
    },

    /// Rejected by the service (payload too large, malformed metadata, ...).
    #[error("upload of {path} rejected (status {status:?}): {detail}")]
    Permanent {
        path: String,
        status: Option<u16>,
        detail: String,
    },
}

impl UploadError {
    pub fn path(&self) -> &str {
        match self {
            UploadError::Transient { path, .. } | UploadError::Permanent { path, .. } => path,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert!(StoreError::status(503, "busy").is_transient());
        assert!(StoreError::status(429, "slow down").is_transient());
        assert!(StoreError::status(408, "timeout").is_transient());
        assert!(StoreError::Transport("reset".into()).is_transient());
        assert!(!StoreError::status(404, "gone").is_transient());
        assert!(!StoreError::status(413, "too large").is_transient());
        assert!(is_success_status(201));
        assert!(!is_success_status(204));
    }

    #[test]
    fn upload_error_mentions_status() {
        let err = UploadError::Permanent {
            path: "summary--FOPT--eclipse--mean--iter-0".into(),
            status: Some(413),
            detail: "payload too large".into(),
        };
        let text = err.to_string();
        assert!(text.contains("413"), "{text}");
        assert_eq!(err.path(), "summary--FOPT--eclipse--mean--iter-0");
    }
}
