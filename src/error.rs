//! Error types shared by the store facade and the remap workflow.
//!
//! [`StoreError`] is what every [`Store`](crate::store::Store) call returns on
//! failure. [`OpError`] wraps it for the standalone operations (alias swap,
//! pipeline test, schema fetch), and [`ErrorKind`] is the classification the
//! orchestrator attaches to a failed stage so callers can decide between
//! retry, delete-and-retry, or finishing the remaining stage by hand.

use std::fmt;

use thiserror::Error;

/// Failure reported by a store facade call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Connectivity, TLS, timeout, or authentication failure.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The store answered with a non-success HTTP status.
    #[error("store rejected request ({status}): {body}")]
    Rejected { status: u16, body: String },

    /// The store reported a failure inside an otherwise successful response.
    #[error("store reported failure: {0}")]
    Remote(String),

    /// The response did not have the expected shape.
    #[error("unexpected store response: {0}")]
    Decode(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::Unavailable(_) => ErrorKind::StoreUnavailable,
            StoreError::Rejected { status, .. } if *status == 401 || *status == 403 => {
                ErrorKind::StoreUnavailable
            }
            StoreError::Rejected { .. } | StoreError::Remote(_) | StoreError::Decode(_) => {
                ErrorKind::StoreRejected
            }
        }
    }

    /// Whether the request may have taken effect despite the error.
    ///
    /// Only a 4xx answer means the store refused the request outright.
    pub fn may_have_applied(&self) -> bool {
        match self {
            StoreError::Rejected { status, .. } => *status >= 500,
            StoreError::Unavailable(_) | StoreError::Remote(_) | StoreError::Decode(_) => true,
        }
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            StoreError::Decode(e.to_string())
        } else {
            StoreError::Unavailable(e.to_string())
        }
    }
}

/// Failure of a standalone operation (alias swap, pipeline test, schema fetch).
#[derive(Debug, Error)]
pub enum OpError {
    #[error("invalid request: {0}")]
    Precondition(String),

    #[error("collection '{0}' has no records to sample")]
    NoSampleData(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl OpError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OpError::Precondition(_) => ErrorKind::Precondition,
            OpError::NoSampleData(_) => ErrorKind::NoSampleData,
            OpError::Store(e) => e.kind(),
        }
    }
}

/// Classification of a failed remap stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad or missing request fields, caught before any mutation.
    Precondition,
    /// Target exists and replacing it was not requested.
    AlreadyExists,
    /// Connectivity or auth failure on a store call.
    StoreUnavailable,
    /// The store refused a request or answered with something unusable.
    StoreRejected,
    /// Copy task finished with processed != total.
    PartialCopy,
    /// The store reported an error on the copy task.
    TaskError,
    /// Records were copied but restoring index settings failed.
    FinalizeFailed,
    /// Records were copied but the alias update failed.
    AliasSwapFailed,
    /// The pipeline test found no record to sample.
    NoSampleData,
    /// The poll loop was stopped through the cancel hook.
    Cancelled,
    /// The poll loop exceeded the configured maximum wait.
    TimedOut,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Precondition => "precondition",
            ErrorKind::AlreadyExists => "already-exists",
            ErrorKind::StoreUnavailable => "store-unavailable",
            ErrorKind::StoreRejected => "store-rejected",
            ErrorKind::PartialCopy => "partial-copy",
            ErrorKind::TaskError => "task-error",
            ErrorKind::FinalizeFailed => "finalize-failed",
            ErrorKind::AliasSwapFailed => "alias-swap-failed",
            ErrorKind::NoSampleData => "no-sample-data",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::TimedOut => "timed-out",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_unknown_unless_refused() {
        assert!(StoreError::Unavailable("timeout".into()).may_have_applied());
        assert!(StoreError::Remote("not acknowledged".into()).may_have_applied());
        assert!(StoreError::Decode("no body".into()).may_have_applied());
        assert!(StoreError::Rejected { status: 504, body: String::new() }.may_have_applied());
        assert!(!StoreError::Rejected { status: 400, body: String::new() }.may_have_applied());
        assert!(!StoreError::Rejected { status: 403, body: String::new() }.may_have_applied());
    }

    #[test]
    fn auth_rejections_count_as_unavailable() {
        let e = StoreError::Rejected {
            status: 401,
            body: "missing authentication credentials".to_string(),
        };
        assert_eq!(e.kind(), ErrorKind::StoreUnavailable);

        let e = StoreError::Rejected {
            status: 400,
            body: "mapper_parsing_exception".to_string(),
        };
        assert_eq!(e.kind(), ErrorKind::StoreRejected);
    }

    #[test]
    fn op_error_kinds() {
        assert_eq!(
            OpError::NoSampleData("docs".into()).kind(),
            ErrorKind::NoSampleData
        );
        assert_eq!(
            OpError::Store(StoreError::Unavailable("refused".into())).kind(),
            ErrorKind::StoreUnavailable
        );
        assert_eq!(
            OpError::NoSampleData("docs".into()).to_string(),
            "collection 'docs' has no records to sample"
        );
    }
}
