//! Resource manager error types.

use std::fmt;

use thiserror::Error;

use crate::storage::StorageError;

/// Result type for resource manager operations.
pub type ResourceResult<T> = Result<T, ResourceError>;

/// Condition reported by a resource manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceErrorKind {
    /// The request itself was malformed or refused by a write guard.
    InvalidRequest,
    /// Payload empty or longer than the queue allows.
    LengthError,
    /// Queue is full.
    NoSpace,
    /// Caller may not write to the queue.
    NotAuthorized,
    /// Operation named a transaction the resource never enlisted.
    NotEnlisted,
    /// Underlying store failed.
    Storage,
}

impl fmt::Display for ResourceErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResourceErrorKind::InvalidRequest => "INVREQ",
            ResourceErrorKind::LengthError => "LENGERR",
            ResourceErrorKind::NoSpace => "NOSPACE",
            ResourceErrorKind::NotAuthorized => "NOTAUTH",
            ResourceErrorKind::NotEnlisted => "NOTENLISTED",
            ResourceErrorKind::Storage => "STORAGE",
        };
        f.write_str(name)
    }
}

/// Error raised by a resource manager.
#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct ResourceError {
    kind: ResourceErrorKind,
    message: String,
    #[source]
    source: Option<StorageError>,
}

impl ResourceError {
    pub fn new(kind: ResourceErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn not_enlisted(tx_id: &str) -> Self {
        Self::new(
            ResourceErrorKind::NotEnlisted,
            format!("transaction {} is not enlisted", tx_id),
        )
    }

    pub fn kind(&self) -> ResourceErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<StorageError> for ResourceError {
    fn from(err: StorageError) -> Self {
        Self {
            kind: ResourceErrorKind::Storage,
            message: err.to_string(),
            source: Some(err),
        }
    }
}
