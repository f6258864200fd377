//! Gate between application writes and the resource manager.

use tracing::{debug, warn};

use crate::resource::ResourceHandle;
use crate::transaction::error::{TransactionError, TransactionResult};
use crate::transaction::manager::TransactionManager;

/// Ties resource handle writes to the caller's active transaction.
///
/// The coordinator holds no buffer of its own: each call is exactly one
/// physical write on the enlisted resource.
#[derive(Debug, Clone)]
pub struct Coordinator {
    manager: TransactionManager,
}

impl Coordinator {
    pub fn new(manager: TransactionManager) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &TransactionManager {
        &self.manager
    }

    /// Write `payload` to the handle's queue inside the active transaction.
    ///
    /// Fails with [`TransactionError::NoActiveTransaction`] and touches
    /// nothing when the calling flow has no transaction. A resource failure
    /// marks the transaction rollback-only before it is returned.
    pub fn write(&self, handle: &ResourceHandle, payload: &str) -> TransactionResult<()> {
        let ctx = self
            .manager
            .current()
            .ok_or_else(|| TransactionError::NoActiveTransaction {
                queue: handle.name().clone(),
            })?;

        let status = ctx.status();
        if !status.is_active() {
            return Err(TransactionError::IllegalState {
                tx_id: ctx.id().to_string(),
                operation: "write to",
                status,
            });
        }

        match self
            .manager
            .resource()
            .write_string(ctx.id(), handle.name(), payload)
        {
            Ok(()) => {
                ctx.record_write(handle.name(), payload);
                debug!(tx_id = ctx.id(), queue = %handle.name(), bytes = payload.len(), "wrote item");
                Ok(())
            }
            Err(source) => {
                warn!(tx_id = ctx.id(), queue = %handle.name(), error = %source, "write failed");
                self.manager.mark_rollback_only(&ctx)?;
                Err(TransactionError::ResourceWriteFailed {
                    tx_id: ctx.id().to_string(),
                    queue: handle.name().clone(),
                    source,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::resource::{
        InMemoryQueues, ResourceError, ResourceErrorKind, ResourceManager,
    };
    use crate::transaction::TransactionStatus;

    fn setup(queues: InMemoryQueues) -> (InMemoryQueues, Coordinator) {
        let manager = TransactionManager::new(Arc::new(queues.clone()));
        (queues, Coordinator::new(manager))
    }

    fn handle() -> ResourceHandle {
        ResourceHandle::new("EXAMPLE").unwrap()
    }

    #[test]
    fn test_write_without_transaction() {
        let (queues, coordinator) = setup(InMemoryQueues::new());

        let err = coordinator.write(&handle(), "orphan").unwrap_err();
        assert!(matches!(err, TransactionError::NoActiveTransaction { .. }));
        assert_eq!(queues.enlisted_count(), 0);
        assert!(queues.read_queue(handle().name()).unwrap().is_empty());
    }

    #[test]
    fn test_write_records_in_context() {
        let (queues, coordinator) = setup(InMemoryQueues::new());
        let ctx = coordinator.manager().begin().unwrap();

        coordinator.write(&handle(), "first").unwrap();
        coordinator.write(&handle(), "second").unwrap();

        let payloads: Vec<_> = ctx.writes().into_iter().map(|w| w.payload).collect();
        assert_eq!(payloads, vec!["first", "second"]);
        assert_eq!(queues.pending_writes(ctx.id()).len(), 2);
    }

    #[test]
    fn test_failed_write_marks_rollback_only() {
        let failing = InMemoryQueues::new().with_write_guard(|_, _| {
            Err(ResourceError::new(ResourceErrorKind::NotAuthorized, "denied"))
        });
        let (_queues, coordinator) = setup(failing);
        let ctx = coordinator.manager().begin().unwrap();

        let err = coordinator.write(&handle(), "x").unwrap_err();
        assert_eq!(err.resource_kind(), Some(ResourceErrorKind::NotAuthorized));
        assert_eq!(ctx.status(), TransactionStatus::MarkedRollback);

        let err = coordinator.write(&handle(), "y").unwrap_err();
        assert!(matches!(err, TransactionError::IllegalState { .. }));
    }
}
