//! Error types for mapper operations.

use std::fmt;

/// Convenience alias for results carrying [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// The primary error type for all mapper operations.
///
/// Backend failures travel in [`Error::Backend`] and are never rewritten by
/// the mapper. The whole type is `Clone` and `PartialEq` so a result cursor
/// can surface an error once and keep it retrievable afterwards.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// No collection name was resolvable from a string or entity argument.
    UnknownCollection,
    /// A terminal query operation ran before any filter terms were set.
    InvalidQuery,
    /// Delete was attempted on an entity whose primary key is the zero value.
    ZeroItemId,
    /// Schema resolution failed: the type declares no mapped fields.
    ExpectingStruct {
        /// Name of the offending type.
        type_name: &'static str,
    },
    /// Schema resolution found no field flagged as the primary key.
    MissingPrimaryKey {
        /// Name of the offending type.
        type_name: &'static str,
    },
    /// A required entity value was absent.
    ExpectingNonNilValue,
    /// Commit or rollback was invoked without an active transaction.
    MissingTransaction,
    /// Entity-supplied validation rejected the value.
    Validation(String),
    /// An error reported by the storage backend, passed through unchanged.
    Backend(BackendError),
    /// A rollback failure chained onto the error that triggered the rollback.
    ///
    /// The original error stays primary; the rollback failure is attached as
    /// additional context instead of replacing it.
    Rollback {
        /// The error that caused the transaction to unwind.
        original: Box<Error>,
        /// The error reported while rolling back.
        rollback: Box<Error>,
    },
    /// Free-form application error, typically produced by lifecycle hooks.
    Custom(String),
}

impl Error {
    /// Build a backend error with the given kind and message.
    pub fn backend(kind: BackendErrorKind, message: impl Into<String>) -> Self {
        Error::Backend(BackendError {
            kind,
            message: message.into(),
        })
    }

    /// Build a free-form application error.
    pub fn custom(message: impl Into<String>) -> Self {
        Error::Custom(message.into())
    }

    /// Build a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation(message.into())
    }

    /// Whether this error is a backend "no such record" report.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::Backend(BackendError {
                kind: BackendErrorKind::NotFound,
                ..
            })
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::UnknownCollection => write!(f, "unknown collection"),
            Error::InvalidQuery => write!(f, "invalid query: no filter terms were set"),
            Error::ZeroItemId => write!(f, "item id is the zero value"),
            Error::ExpectingStruct { type_name } => {
                write!(f, "type {type_name} declares no mapped fields")
            }
            Error::MissingPrimaryKey { type_name } => {
                write!(f, "type {type_name} has no field flagged as primary key")
            }
            Error::ExpectingNonNilValue => write!(f, "expecting a non-nil value"),
            Error::MissingTransaction => write!(f, "no active transaction"),
            Error::Validation(msg) => write!(f, "validation failed: {msg}"),
            Error::Backend(err) => write!(f, "backend error: {err}"),
            Error::Rollback { original, rollback } => {
                write!(f, "{original} (rollback also failed: {rollback})")
            }
            Error::Custom(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Rollback { original, .. } => Some(original.as_ref()),
            _ => None,
        }
    }
}

/// An error originating in the storage backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendError {
    /// Coarse classification of the failure.
    pub kind: BackendErrorKind,
    /// Backend-supplied message, verbatim.
    pub message: String,
}

impl BackendError {
    /// Create a new backend error.
    pub fn new(kind: BackendErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.as_str(), self.message)
    }
}

/// Coarse classification of backend failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendErrorKind {
    /// No record matched the request.
    NotFound,
    /// A uniqueness or integrity constraint was violated.
    Conflict,
    /// The connection or transaction is no longer usable.
    Closed,
    /// The backend does not implement the requested operation.
    Unsupported,
    /// Any other backend failure.
    Other,
}

impl BackendErrorKind {
    /// Short lowercase label for this kind.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            BackendErrorKind::NotFound => "not found",
            BackendErrorKind::Conflict => "conflict",
            BackendErrorKind::Closed => "closed",
            BackendErrorKind::Unsupported => "unsupported",
            BackendErrorKind::Other => "backend failure",
        }
    }
}
