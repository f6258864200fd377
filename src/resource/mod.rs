//! The queue resource seam.
//!
//! A resource manager owns the physical queues. Its public write looks
//! synchronous and immediate, but every write is issued on behalf of an
//! enlisted transaction and only becomes visible to readers once that
//! transaction is committed through the same manager.
//!
//! Two managers ship with the crate:
//! - [`InMemoryQueues`]: staged writes in process memory
//! - [`GitQueueStore`]: durable, one git branch per transaction

mod error;
mod git;
mod handle;
mod memory;

pub use error::{ResourceError, ResourceErrorKind, ResourceResult};
pub use git::GitQueueStore;
pub use handle::ResourceHandle;
pub use memory::InMemoryQueues;

use crate::storage::QueueName;

/// Largest payload a single queue item may carry, in bytes.
pub const DEFAULT_MAX_PAYLOAD_LEN: usize = 32_763;

/// A transaction-aware queue resource manager.
///
/// Implementations must make every write issued under `tx_id` invisible to
/// [`ResourceManager::read_queue`] until [`ResourceManager::commit`] succeeds
/// for that transaction, and must discard those writes on
/// [`ResourceManager::rollback`].
pub trait ResourceManager: Send + Sync {
    /// Short name used in diagnostics.
    fn name(&self) -> &str;

    /// Register a new transaction with the resource.
    fn enlist(&self, tx_id: &str) -> ResourceResult<()>;

    /// Append a string to a queue on behalf of an enlisted transaction.
    fn write_string(&self, tx_id: &str, queue: &QueueName, payload: &str) -> ResourceResult<()>;

    /// Make every write of the transaction visible.
    fn commit(&self, tx_id: &str) -> ResourceResult<()>;

    /// Discard every write of the transaction.
    fn rollback(&self, tx_id: &str) -> ResourceResult<()>;

    /// Committed contents of a queue, oldest first.
    fn read_queue(&self, queue: &QueueName) -> ResourceResult<Vec<String>>;

    /// Queues holding at least one committed item.
    fn list_queues(&self) -> ResourceResult<Vec<QueueName>>;
}

/// Per-queue limits enforced at write time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueLimits {
    /// maximum payload length in bytes
    pub max_payload_len: usize,
    /// maximum number of items a queue may hold, committed plus pending
    pub max_items: Option<usize>,
}

impl Default for QueueLimits {
    fn default() -> Self {
        Self {
            max_payload_len: DEFAULT_MAX_PAYLOAD_LEN,
            max_items: None,
        }
    }
}

impl QueueLimits {
    pub fn max_payload_len(mut self, len: usize) -> Self {
        self.max_payload_len = len;
        self
    }

    pub fn max_items(mut self, items: usize) -> Self {
        self.max_items = Some(items);
        self
    }

    /// Check a write against the limits, given how many items the queue
    /// already holds.
    pub fn check(&self, queue: &QueueName, payload: &str, current_items: usize) -> ResourceResult<()> {
        if payload.is_empty() {
            return Err(ResourceError::new(
                ResourceErrorKind::LengthError,
                format!("empty payload for queue {}", queue),
            ));
        }
        if payload.len() > self.max_payload_len {
            return Err(ResourceError::new(
                ResourceErrorKind::LengthError,
                format!(
                    "payload of {} bytes exceeds limit of {} for queue {}",
                    payload.len(),
                    self.max_payload_len,
                    queue
                ),
            ));
        }
        if let Some(max) = self.max_items {
            if current_items >= max {
                return Err(ResourceError::new(
                    ResourceErrorKind::NoSpace,
                    format!("queue {} is full ({} items)", queue, max),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limits() {
        let queue = QueueName::new("EXAMPLE").unwrap();
        let limits = QueueLimits::default().max_payload_len(5).max_items(2);

        assert!(limits.check(&queue, "hello", 0).is_ok());
        assert_eq!(
            limits.check(&queue, "", 0).unwrap_err().kind(),
            ResourceErrorKind::LengthError
        );
        assert_eq!(
            limits.check(&queue, "hello!", 0).unwrap_err().kind(),
            ResourceErrorKind::LengthError
        );
        assert_eq!(
            limits.check(&queue, "hi", 2).unwrap_err().kind(),
            ResourceErrorKind::NoSpace
        );
    }
}
