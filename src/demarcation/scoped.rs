//! Scoped-callback demarcation.

use tracing::debug;

use crate::demarcation::{abort, complete, rollback_after_error, CompletionGuard, Outcome};
use crate::transaction::{TransactionContext, TransactionManager, TransactionResult};

/// Runs a callback inside a transaction and finishes it afterwards.
///
/// The callback receives the context and may mark it rollback-only. It
/// commits on normal return, rolls back when the context is rollback-only,
/// and rolls back then re-raises on error. A panicking callback also rolls
/// the transaction back.
#[derive(Debug, Clone)]
pub struct TransactionTemplate {
    manager: TransactionManager,
}

impl TransactionTemplate {
    pub fn new(manager: TransactionManager) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &TransactionManager {
        &self.manager
    }

    pub fn execute<T, F>(&self, callback: F) -> TransactionResult<Outcome<T>>
    where
        F: FnOnce(&TransactionContext) -> TransactionResult<T>,
    {
        let ctx = self.manager.begin()?;
        if ctx.is_new_transaction() {
            debug!(tx_id = ctx.id(), "template started new transaction");
        } else {
            debug!(tx_id = ctx.id(), "template joined existing transaction");
        }

        let guard = CompletionGuard::new(&self.manager, &ctx);
        let result = callback(&ctx);
        guard.disarm();

        match result {
            Ok(_) if ctx.is_rollback_only() && ctx.is_new_transaction() => {
                abort(&self.manager, &ctx, "callback marked the transaction rollback-only")
            }
            Ok(value) => complete(&self.manager, &ctx, value),
            Err(e) => Err(rollback_after_error(&self.manager, &ctx, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::panic::{self, AssertUnwindSafe};
    use std::sync::Arc;

    use super::*;
    use crate::resource::{InMemoryQueues, ResourceHandle, ResourceManager};
    use crate::transaction::{Coordinator, TransactionError, TransactionStatus};

    fn setup() -> (InMemoryQueues, TransactionTemplate, Coordinator) {
        let queues = InMemoryQueues::new();
        let manager = TransactionManager::new(Arc::new(queues.clone()));
        (
            queues,
            TransactionTemplate::new(manager.clone()),
            Coordinator::new(manager),
        )
    }

    fn handle() -> ResourceHandle {
        ResourceHandle::new("EXAMPLE").unwrap()
    }

    #[test]
    fn test_commit_on_return() {
        let (queues, template, coordinator) = setup();
        let outcome = template
            .execute(|_| {
                coordinator.write(&handle(), "hello")?;
                Ok(1)
            })
            .unwrap();
        assert_eq!(outcome, Outcome::Committed(1));
        assert_eq!(queues.read_queue(handle().name()).unwrap(), vec!["hello"]);
    }

    #[test]
    fn test_rollback_only_mark() {
        let (queues, template, coordinator) = setup();
        let err = template
            .execute(|ctx| {
                ctx.mark_rollback_only()?;
                coordinator.write(&handle(), "nope")
            })
            .unwrap_err();
        // writes are refused once the context is rollback-only
        assert!(matches!(err, TransactionError::IllegalState { .. }));
        assert!(queues.read_queue(handle().name()).unwrap().is_empty());

        let outcome = template
            .execute(|ctx| {
                coordinator.write(&handle(), "nope")?;
                ctx.mark_rollback_only()
            })
            .unwrap();
        assert!(outcome.is_rolled_back());
        assert!(queues.read_queue(handle().name()).unwrap().is_empty());
    }

    #[test]
    fn test_error_rolls_back_and_reraises() {
        let (queues, template, coordinator) = setup();
        let err = template
            .execute(|_| -> TransactionResult<()> {
                coordinator.write(&handle(), "partial")?;
                Err(TransactionError::application("boom"))
            })
            .unwrap_err();
        assert!(matches!(err, TransactionError::Application(ref m) if m == "boom"));
        assert!(queues.read_queue(handle().name()).unwrap().is_empty());
        assert_eq!(template.manager().active_count(), 0);
    }

    #[test]
    fn test_panic_rolls_back() {
        let (queues, template, coordinator) = setup();
        let mut seen = None;

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            template.execute(|ctx| -> TransactionResult<()> {
                seen = Some(ctx.clone());
                coordinator.write(&handle(), "lost").unwrap();
                panic!("callback blew up");
            })
        }));

        assert!(result.is_err());
        assert_eq!(seen.unwrap().status(), TransactionStatus::RolledBack);
        assert!(queues.read_queue(handle().name()).unwrap().is_empty());
        assert_eq!(template.manager().active_count(), 0);
    }

    #[test]
    fn test_nested_template_participates() {
        let (queues, template, coordinator) = setup();
        let outcome = template
            .execute(|_| {
                let inner = template.execute(|ctx| {
                    assert!(!ctx.is_new_transaction());
                    coordinator.write(&handle(), "inner")?;
                    Ok(())
                })?;
                assert_eq!(inner, Outcome::Participated(()));
                Ok(())
            })
            .unwrap();
        assert!(outcome.is_committed());
        assert_eq!(queues.read_queue(handle().name()).unwrap(), vec!["inner"]);
    }
}
