//! Transaction error types.

use std::fmt;

use thiserror::Error;

use crate::resource::{ResourceError, ResourceErrorKind};
use crate::storage::QueueName;
use crate::transaction::status::TransactionStatus;

/// Result type for transaction operations.
pub type TransactionResult<T> = Result<T, TransactionError>;

/// Errors that can occur during transaction operations.
#[derive(Debug, Error)]
pub enum TransactionError {
    /// The transaction manager could not be located or has shut down.
    #[error("transaction manager '{name}' is unavailable")]
    ManagerUnavailable { name: String },

    /// A write was attempted with no transaction active for the calling flow.
    #[error("no active transaction for write to queue {queue}")]
    NoActiveTransaction { queue: QueueName },

    /// The resource rejected a write; the transaction is now rollback-only.
    #[error("write to queue {queue} failed in transaction {tx_id}: {source}")]
    ResourceWriteFailed {
        tx_id: String,
        queue: QueueName,
        #[source]
        source: ResourceError,
    },

    /// Operation not allowed in the transaction's current status.
    #[error("cannot {operation} transaction {tx_id} in state {status}")]
    IllegalState {
        tx_id: String,
        operation: &'static str,
        status: TransactionStatus,
    },

    /// Commit was requested on a rollback-only transaction, which was rolled back instead.
    #[error("transaction {tx_id} was marked rollback-only and has been rolled back")]
    RollbackOnlyCommitAttempted { tx_id: String },

    /// The resource manager failed outside of a write.
    #[error("resource failed to {operation} transaction {tx_id}: {source}")]
    Resource {
        tx_id: String,
        operation: &'static str,
        #[source]
        source: ResourceError,
    },

    /// Rolling back after an error failed too.
    #[error("rollback failed ({rollback}) after: {original}")]
    RollbackFailed {
        original: Box<TransactionError>,
        rollback: Box<TransactionError>,
    },

    /// Error raised by application code inside a transaction boundary.
    #[error("{0}")]
    Application(String),
}

/// Discriminant of [`TransactionError`], used to configure boundary policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ManagerUnavailable,
    NoActiveTransaction,
    ResourceWriteFailed,
    IllegalState,
    RollbackOnlyCommitAttempted,
    Resource,
    RollbackFailed,
    Application,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl TransactionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TransactionError::ManagerUnavailable { .. } => ErrorKind::ManagerUnavailable,
            TransactionError::NoActiveTransaction { .. } => ErrorKind::NoActiveTransaction,
            TransactionError::ResourceWriteFailed { .. } => ErrorKind::ResourceWriteFailed,
            TransactionError::IllegalState { .. } => ErrorKind::IllegalState,
            TransactionError::RollbackOnlyCommitAttempted { .. } => {
                ErrorKind::RollbackOnlyCommitAttempted
            }
            TransactionError::Resource { .. } => ErrorKind::Resource,
            TransactionError::RollbackFailed { .. } => ErrorKind::RollbackFailed,
            TransactionError::Application(_) => ErrorKind::Application,
        }
    }

    /// Create an application error.
    pub fn application(message: impl Into<String>) -> Self {
        Self::Application(message.into())
    }

    /// Whether the transaction this error was raised in can no longer commit.
    pub fn forces_rollback(&self) -> bool {
        matches!(
            self,
            TransactionError::ResourceWriteFailed { .. }
                | TransactionError::RollbackOnlyCommitAttempted { .. }
                | TransactionError::RollbackFailed { .. }
        )
    }

    /// Check if retrying the whole unit of work may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransactionError::ResourceWriteFailed { source, .. }
            | TransactionError::Resource { source, .. } => {
                source.kind() == ResourceErrorKind::Storage
            }
            _ => false,
        }
    }

    /// Kind of the underlying resource failure, if any.
    pub fn resource_kind(&self) -> Option<ResourceErrorKind> {
        match self {
            TransactionError::ResourceWriteFailed { source, .. }
            | TransactionError::Resource { source, .. } => Some(source.kind()),
            TransactionError::RollbackFailed { original, .. } => original.resource_kind(),
            _ => None,
        }
    }
}
