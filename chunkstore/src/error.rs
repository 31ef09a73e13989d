//! Driver errors.
//!
//! Every failure surfaced by a driver carries an [`ErrorKind`] and a message.
//! Storage errors are wrapped with the operation and key that failed.

use chunkstore_storage::StorageError;
use derive_more::Display;
use thiserror::Error;

/// The kind of a [`DriverError`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Display)]
pub enum ErrorKind {
    /// A malformed argument, specification member, or constraint.
    #[display("INVALID_ARGUMENT")]
    InvalidArgument,
    /// Stored state is incompatible with the request.
    #[display("FAILED_PRECONDITION")]
    FailedPrecondition,
    /// Creation was requested but the array already exists.
    #[display("ALREADY_EXISTS")]
    AlreadyExists,
    /// The array or a resource does not exist.
    #[display("NOT_FOUND")]
    NotFound,
    /// An operation lost too many races with concurrent writers.
    #[display("ABORTED")]
    Aborted,
    /// An index outside of the array bounds.
    #[display("OUT_OF_RANGE")]
    OutOfRange,
    /// Stored data is corrupt.
    #[display("DATA_LOSS")]
    DataLoss,
    /// An unsupported feature.
    #[display("UNIMPLEMENTED")]
    Unimplemented,
    /// An internal or storage failure.
    #[display("INTERNAL")]
    Internal,
}

/// A driver error.
#[derive(Clone, Debug, Error)]
pub enum DriverError {
    /// An error with a kind and message.
    #[error("{kind}: {message}")]
    Status {
        /// The error kind.
        kind: ErrorKind,
        /// The error message.
        message: String,
    },
    /// A storage error.
    #[error("error {operation} {key:?}: {source}")]
    Storage {
        /// The storage operation, e.g. `reading`.
        operation: &'static str,
        /// The key or prefix.
        key: String,
        /// The underlying error.
        #[source]
        source: StorageError,
    },
}

impl DriverError {
    /// Create a new error.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Status {
            kind,
            message: message.into(),
        }
    }

    /// Create an [`ErrorKind::InvalidArgument`] error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }

    /// Create an [`ErrorKind::FailedPrecondition`] error.
    pub fn failed_precondition(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::FailedPrecondition, message)
    }

    /// Create an [`ErrorKind::AlreadyExists`] error.
    pub fn already_exists(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AlreadyExists, message)
    }

    /// Create an [`ErrorKind::NotFound`] error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    /// Create an [`ErrorKind::Aborted`] error.
    pub fn aborted(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Aborted, message)
    }

    /// Create an [`ErrorKind::OutOfRange`] error.
    pub fn out_of_range(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::OutOfRange, message)
    }

    /// Create an [`ErrorKind::DataLoss`] error.
    pub fn data_loss(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::DataLoss, message)
    }

    /// Create an [`ErrorKind::Unimplemented`] error.
    pub fn unimplemented(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unimplemented, message)
    }

    /// Create an [`ErrorKind::Internal`] error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// Wrap a storage error with the operation and key that failed.
    pub fn storage(operation: &'static str, key: impl Into<String>, source: StorageError) -> Self {
        Self::Storage {
            operation,
            key: key.into(),
            source,
        }
    }

    /// The kind of the error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Status { kind, .. } => *kind,
            Self::Storage { source, .. } => match source {
                StorageError::ReadOnly => ErrorKind::FailedPrecondition,
                StorageError::StorePrefixError(_) | StorageError::InvalidStoreKey(_) => {
                    ErrorKind::InvalidArgument
                }
                StorageError::Unsupported(_) => ErrorKind::Unimplemented,
                StorageError::IOError(_) | StorageError::Other(_) => ErrorKind::Internal,
            },
        }
    }

    /// Prefix the message with `context`, keeping the kind.
    #[must_use]
    pub fn with_context(self, context: impl std::fmt::Display) -> Self {
        match self {
            Self::Status { kind, message } => Self::Status {
                kind,
                message: format!("{context}: {message}"),
            },
            storage @ Self::Storage { .. } => Self::Status {
                kind: storage.kind(),
                message: format!("{context}: {storage}"),
            },
        }
    }
}
