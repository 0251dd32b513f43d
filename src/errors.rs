//! Error taxonomy for the ingestion core.
//!
//! Every fallible public operation in this crate returns [`CoreError`]. The
//! variants mirror the error kinds the design documents the pipeline and
//! retry policy react to; an outer HTTP layer (out of scope for this crate)
//! maps them to status codes, but the mapping itself lives there, not here.

use thiserror::Error;

/// Top-level error type returned by every fallible operation in this crate.
#[derive(Error, Debug)]
pub enum CoreError {
    /// The requested row does not exist.
    #[error("not found: {resource} {id}")]
    NotFound { resource: &'static str, id: String },

    /// The external source refused access to the item.
    #[error("private or forbidden: {message}")]
    PrivateOrForbidden { message: String },

    /// Transient network/I/O failure; retryable.
    #[error("network error: {message}")]
    Network { message: String },

    /// Media could not be decoded or transcoded; terminal.
    #[error("format error: {message}")]
    Format { message: String },

    /// The operation was aborted by a cancellation signal.
    #[error("cancelled")]
    Cancelled,

    /// An external error that does not fit any other kind; retryable.
    #[error("unknown error: {message}")]
    Unknown { message: String },

    /// A compare-and-set precondition did not hold.
    #[error("conflict: {message}")]
    Conflict { message: String },

    /// Caller input did not satisfy a documented constraint.
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Unrecoverable failure of a core dependency (store, disk).
    #[error("fatal error: {message}")]
    Fatal { message: String },
}

impl CoreError {
    pub fn not_found(resource: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource,
            id: id.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal {
            message: message.into(),
        }
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::Unknown {
            message: message.into(),
        }
    }

    /// The classification used by the retry policy and the pipeline's error
    /// handling; deliberately narrower than the full enum since `Conflict`,
    /// `Validation` and `Fatal` never originate from an external client
    /// call.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::PrivateOrForbidden { .. } => ErrorKind::PrivateOrForbidden,
            Self::Network { .. } => ErrorKind::Network,
            Self::Format { .. } => ErrorKind::Format,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Unknown { .. } => ErrorKind::Unknown,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::Validation { .. } => ErrorKind::Validation,
            Self::Fatal { .. } => ErrorKind::Fatal,
        }
    }
}

/// The bare classification of an error, independent of its message. Used by
/// the retry policy, which only ever needs to know the kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    PrivateOrForbidden,
    Network,
    Format,
    Cancelled,
    Unknown,
    Conflict,
    Validation,
    Fatal,
}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => CoreError::NotFound {
                resource: "row",
                id: String::new(),
            },
            sqlx::Error::Database(db_err) => {
                if db_err.is_unique_violation() {
                    CoreError::Conflict {
                        message: db_err.message().to_string(),
                    }
                } else {
                    CoreError::Fatal {
                        message: db_err.message().to_string(),
                    }
                }
            }
            other => CoreError::Fatal {
                message: other.to_string(),
            },
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
