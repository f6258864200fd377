//! Transaction manager - coordinates all transaction operations.
//!
//! The TransactionManager is the main entry point for transactions.
//! It handles:
//! - Creating or joining the context of the calling flow
//! - Enlisting the resource manager and driving its commit/rollback
//! - Tracking active transactions per flow
//! - Serializing commits

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};
use ulid::Ulid;

use crate::resource::ResourceManager;
use crate::transaction::context::TransactionContext;
use crate::transaction::error::{TransactionError, TransactionResult};
use crate::transaction::status::TransactionStatus;

/// Name a manager reports when none was given.
pub const DEFAULT_MANAGER_NAME: &str = "default";

/// Transaction manager facade.
///
/// Thread-safe: can be shared across threads via Clone (uses Arc internally).
/// Each thread is one flow and sees at most one active transaction.
#[derive(Clone)]
pub struct TransactionManager {
    inner: Arc<TransactionManagerInner>,
}

struct TransactionManagerInner {
    name: String,
    resource: Arc<dyn ResourceManager>,
    /// Active transaction per flow.
    active: RwLock<HashMap<ThreadId, TransactionContext>>,
    /// Mutex for serializing commits.
    commit_lock: Mutex<()>,
    available: AtomicBool,
}

impl TransactionManager {
    /// Create a new transaction manager over the given resource.
    pub fn new(resource: Arc<dyn ResourceManager>) -> Self {
        Self::named(DEFAULT_MANAGER_NAME, resource)
    }

    pub fn named(name: impl Into<String>, resource: Arc<dyn ResourceManager>) -> Self {
        Self {
            inner: Arc::new(TransactionManagerInner {
                name: name.into(),
                resource,
                active: RwLock::new(HashMap::new()),
                commit_lock: Mutex::new(()),
                available: AtomicBool::new(true),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Get a reference to the underlying resource manager.
    pub fn resource(&self) -> &Arc<dyn ResourceManager> {
        &self.inner.resource
    }

    /// Begin a transaction, or join the one already active in this flow.
    ///
    /// The returned handle reports `is_new_transaction() == true` only when a
    /// transaction was created.
    pub fn begin(&self) -> TransactionResult<TransactionContext> {
        if !self.is_available() {
            return Err(TransactionError::ManagerUnavailable {
                name: self.inner.name.clone(),
            });
        }

        let flow = thread::current().id();
        if let Some(existing) = self.inner.active.read().get(&flow) {
            debug!(tx_id = existing.id(), "joining existing transaction");
            return Ok(existing.joined());
        }

        let tx_id = Ulid::new().to_string().to_lowercase();
        self.inner
            .resource
            .enlist(&tx_id)
            .map_err(|source| TransactionError::Resource {
                tx_id: tx_id.clone(),
                operation: "enlist",
                source,
            })?;

        let ctx = TransactionContext::new(tx_id, flow);
        self.inner.active.write().insert(flow, ctx.joined());
        debug!(tx_id = ctx.id(), resource = self.inner.resource.name(), "began transaction");
        Ok(ctx)
    }

    /// Joined handle on the transaction active in the calling flow.
    pub fn current(&self) -> Option<TransactionContext> {
        let flow = thread::current().id();
        self.inner.active.read().get(&flow).map(TransactionContext::joined)
    }

    /// Commit the transaction.
    ///
    /// A rollback-only transaction is rolled back and
    /// [`TransactionError::RollbackOnlyCommitAttempted`] is returned.
    ///
    /// On a joined handle this defers to the owner and changes nothing, so
    /// `Ok(())` does not mean the work will commit: if the shared transaction
    /// is already rollback-only it still returns `Ok(())` and the owner's
    /// commit will roll back. Check [`TransactionContext::is_rollback_only`]
    /// when that matters.
    pub fn commit(&self, ctx: &TransactionContext) -> TransactionResult<()> {
        if !ctx.is_new_transaction() {
            let status = ctx.status();
            if status.is_terminal() {
                return Err(illegal(ctx, "commit", status));
            }
            debug!(tx_id = ctx.id(), rollback_only = status.is_rollback_only(), "commit deferred to transaction owner");
            return Ok(());
        }

        match ctx.claim_commit() {
            Ok(()) => {}
            Err(TransactionStatus::MarkedRollback) => {
                warn!(tx_id = ctx.id(), "commit requested on rollback-only transaction");
                self.finish_rollback(ctx)?;
                return Err(TransactionError::RollbackOnlyCommitAttempted {
                    tx_id: ctx.id().to_string(),
                });
            }
            Err(status) => {
                if status.is_terminal() {
                    self.detach(ctx);
                }
                return Err(illegal(ctx, "commit", status));
            }
        }

        let _guard = self.inner.commit_lock.lock();
        let result = self.inner.resource.commit(ctx.id());
        ctx.finish_commit(result.is_ok());
        self.detach(ctx);

        match result {
            Ok(()) => {
                info!(tx_id = ctx.id(), writes = ctx.write_count(), "committed");
                Ok(())
            }
            Err(source) => {
                // the resource has already discarded the branch or staged writes
                error!(tx_id = ctx.id(), error = %source, "resource commit failed");
                Err(TransactionError::Resource {
                    tx_id: ctx.id().to_string(),
                    operation: "commit",
                    source,
                })
            }
        }
    }

    /// Roll the transaction back.
    ///
    /// On a joined handle this marks the shared transaction rollback-only.
    pub fn rollback(&self, ctx: &TransactionContext) -> TransactionResult<()> {
        let status = ctx.status();
        if status.is_terminal() {
            return Err(illegal(ctx, "roll back", status));
        }
        if !ctx.is_new_transaction() {
            debug!(tx_id = ctx.id(), "rollback in joined scope marks transaction rollback-only");
            return ctx.mark_rollback_only();
        }
        self.finish_rollback(ctx)
    }

    /// Restrict the outcome of the transaction to rollback.
    pub fn mark_rollback_only(&self, ctx: &TransactionContext) -> TransactionResult<()> {
        ctx.mark_rollback_only()?;
        warn!(tx_id = ctx.id(), "transaction marked rollback-only");
        Ok(())
    }

    fn finish_rollback(&self, ctx: &TransactionContext) -> TransactionResult<()> {
        if let Err(e) = ctx.transition("roll back", TransactionStatus::RolledBack) {
            if ctx.is_completed() {
                self.detach(ctx);
            }
            return Err(e);
        }
        self.detach(ctx);

        match self.inner.resource.rollback(ctx.id()) {
            Ok(()) => {
                info!(tx_id = ctx.id(), discarded = ctx.write_count(), "rolled back");
                Ok(())
            }
            Err(source) => {
                error!(tx_id = ctx.id(), error = %source, "resource rollback failed");
                Err(TransactionError::Resource {
                    tx_id: ctx.id().to_string(),
                    operation: "roll back",
                    source,
                })
            }
        }
    }

    /// Remove the context from its flow, if it is still the flow's transaction.
    fn detach(&self, ctx: &TransactionContext) {
        let mut active = self.inner.active.write();
        if active
            .get(&ctx.flow())
            .is_some_and(|current| current.same_transaction(ctx))
        {
            active.remove(&ctx.flow());
        }
    }

    /// Get the number of active transactions.
    pub fn active_count(&self) -> usize {
        self.inner.active.read().len()
    }

    /// List all active transaction IDs.
    pub fn active_transactions(&self) -> Vec<String> {
        self.inner
            .active
            .read()
            .values()
            .map(|ctx| ctx.id().to_string())
            .collect()
    }

    pub fn is_available(&self) -> bool {
        self.inner.available.load(Ordering::Acquire)
    }

    /// Refuse new transactions. Transactions already running may still finish.
    pub fn shutdown(&self) {
        self.inner.available.store(false, Ordering::Release);
        info!(name = %self.inner.name, active = self.active_count(), "transaction manager shut down");
    }
}

fn illegal(
    ctx: &TransactionContext,
    operation: &'static str,
    status: TransactionStatus,
) -> TransactionError {
    TransactionError::IllegalState {
        tx_id: ctx.id().to_string(),
        operation,
        status,
    }
}

impl fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionManager")
            .field("name", &self.inner.name)
            .field("resource", &self.inner.resource.name())
            .field("active_count", &self.active_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{InMemoryQueues, ResourceManager, ResourceResult};
    use crate::storage::QueueName;

    type CommitHook = Box<dyn FnOnce() + Send>;

    /// In-memory queues that run a hook just before applying a commit.
    struct HookedCommit {
        queues: InMemoryQueues,
        hook: Mutex<Option<CommitHook>>,
    }

    impl ResourceManager for HookedCommit {
        fn name(&self) -> &str {
            "hooked"
        }

        fn enlist(&self, tx_id: &str) -> ResourceResult<()> {
            self.queues.enlist(tx_id)
        }

        fn write_string(&self, tx_id: &str, queue: &QueueName, payload: &str) -> ResourceResult<()> {
            self.queues.write_string(tx_id, queue, payload)
        }

        fn commit(&self, tx_id: &str) -> ResourceResult<()> {
            let hook = self.hook.lock().take();
            if let Some(hook) = hook {
                hook();
            }
            self.queues.commit(tx_id)
        }

        fn rollback(&self, tx_id: &str) -> ResourceResult<()> {
            self.queues.rollback(tx_id)
        }

        fn read_queue(&self, queue: &QueueName) -> ResourceResult<Vec<String>> {
            self.queues.read_queue(queue)
        }

        fn list_queues(&self) -> ResourceResult<Vec<QueueName>> {
            self.queues.list_queues()
        }
    }

    fn setup() -> (InMemoryQueues, TransactionManager) {
        let queues = InMemoryQueues::new();
        let manager = TransactionManager::new(Arc::new(queues.clone()));
        (queues, manager)
    }

    fn queue() -> QueueName {
        QueueName::new("EXAMPLE").unwrap()
    }

    #[test]
    fn test_begin_and_commit() {
        let (queues, manager) = setup();

        let ctx = manager.begin().unwrap();
        assert!(ctx.is_new_transaction());
        assert_eq!(manager.active_count(), 1);

        queues.write_string(ctx.id(), &queue(), "hello").unwrap();
        manager.commit(&ctx).unwrap();

        assert_eq!(ctx.status(), TransactionStatus::Committed);
        assert_eq!(manager.active_count(), 0);
        assert_eq!(queues.read_queue(&queue()).unwrap(), vec!["hello"]);
    }

    #[test]
    fn test_begin_and_rollback() {
        let (queues, manager) = setup();

        let ctx = manager.begin().unwrap();
        queues.write_string(ctx.id(), &queue(), "hello").unwrap();
        manager.rollback(&ctx).unwrap();

        assert_eq!(ctx.status(), TransactionStatus::RolledBack);
        assert_eq!(manager.active_count(), 0);
        assert!(queues.read_queue(&queue()).unwrap().is_empty());
    }

    #[test]
    fn test_nested_begin_joins() {
        let (_queues, manager) = setup();

        let outer = manager.begin().unwrap();
        let inner = manager.begin().unwrap();
        assert!(!inner.is_new_transaction());
        assert!(inner.same_transaction(&outer));
        assert_eq!(manager.active_count(), 1);

        manager.commit(&inner).unwrap();
        assert_eq!(outer.status(), TransactionStatus::Active);

        manager.commit(&outer).unwrap();
        assert_eq!(outer.status(), TransactionStatus::Committed);
    }

    #[test]
    fn test_commit_in_flight_cannot_be_marked_rollback_only() {
        let queues = InMemoryQueues::new();
        let resource = Arc::new(HookedCommit {
            queues: queues.clone(),
            hook: Mutex::new(None),
        });
        let manager = TransactionManager::new(resource.clone());

        let ctx = manager.begin().unwrap();
        queues.write_string(ctx.id(), &queue(), "hello").unwrap();

        let shared = ctx.clone();
        let (sender, marked) = std::sync::mpsc::channel();
        *resource.hook.lock() = Some(Box::new(move || {
            let result = std::thread::spawn(move || shared.mark_rollback_only())
                .join()
                .unwrap();
            sender.send(result).unwrap();
        }));

        manager.commit(&ctx).unwrap();

        let err = marked.recv().unwrap().unwrap_err();
        assert!(matches!(err, TransactionError::IllegalState { .. }));
        assert_eq!(ctx.status(), TransactionStatus::Committed);
        assert_eq!(queues.read_queue(&queue()).unwrap(), vec!["hello"]);
        assert_eq!(manager.active_count(), 0);

        let next = manager.begin().unwrap();
        assert!(next.is_new_transaction());
        assert!(!next.same_transaction(&ctx));
    }

    #[test]
    fn test_joined_commit_on_rollback_only_defers() {
        let (queues, manager) = setup();

        let outer = manager.begin().unwrap();
        queues.write_string(outer.id(), &queue(), "doomed").unwrap();
        let inner = manager.begin().unwrap();
        manager.mark_rollback_only(&inner).unwrap();

        manager.commit(&inner).unwrap();
        assert!(inner.is_rollback_only());
        assert_eq!(manager.active_count(), 1);

        let err = manager.commit(&outer).unwrap_err();
        assert!(matches!(err, TransactionError::RollbackOnlyCommitAttempted { .. }));
        assert!(queues.read_queue(&queue()).unwrap().is_empty());
    }

    #[test]
    fn test_joined_rollback_marks_owner() {
        let (_queues, manager) = setup();

        let outer = manager.begin().unwrap();
        let inner = manager.begin().unwrap();
        manager.rollback(&inner).unwrap();
        assert!(outer.is_rollback_only());

        let err = manager.commit(&outer).unwrap_err();
        assert!(matches!(err, TransactionError::RollbackOnlyCommitAttempted { .. }));
        assert_eq!(outer.status(), TransactionStatus::RolledBack);
        assert_eq!(manager.active_count(), 0);
    }

    #[test]
    fn test_commit_rollback_only_rolls_back() {
        let (queues, manager) = setup();

        let ctx = manager.begin().unwrap();
        queues.write_string(ctx.id(), &queue(), "doomed").unwrap();
        manager.mark_rollback_only(&ctx).unwrap();

        let err = manager.commit(&ctx).unwrap_err();
        assert!(matches!(err, TransactionError::RollbackOnlyCommitAttempted { .. }));
        assert!(queues.read_queue(&queue()).unwrap().is_empty());
    }

    #[test]
    fn test_terminal_calls_are_illegal() {
        let (_queues, manager) = setup();

        let ctx = manager.begin().unwrap();
        manager.commit(&ctx).unwrap();

        for err in [
            manager.commit(&ctx).unwrap_err(),
            manager.rollback(&ctx).unwrap_err(),
            manager.mark_rollback_only(&ctx).unwrap_err(),
        ] {
            assert!(matches!(err, TransactionError::IllegalState { .. }));
        }
    }

    #[test]
    fn test_new_transaction_after_completion() {
        let (_queues, manager) = setup();

        let first = manager.begin().unwrap();
        manager.rollback(&first).unwrap();

        let second = manager.begin().unwrap();
        assert!(second.is_new_transaction());
        assert_ne!(first.id(), second.id());
    }

    #[test]
    fn test_flows_are_independent() {
        let (_queues, manager) = setup();
        let ctx = manager.begin().unwrap();

        let other = manager.clone();
        let other_id = std::thread::spawn(move || {
            let ctx = other.begin().unwrap();
            assert!(ctx.is_new_transaction());
            let id = ctx.id().to_string();
            other.commit(&ctx).unwrap();
            id
        })
        .join()
        .unwrap();

        assert_ne!(ctx.id(), other_id);
        assert_eq!(manager.current().unwrap().id(), ctx.id());
        manager.commit(&ctx).unwrap();
        assert!(manager.current().is_none());
    }

    #[test]
    fn test_shutdown() {
        let (_queues, manager) = setup();
        manager.shutdown();
        let err = manager.begin().unwrap_err();
        assert!(matches!(err, TransactionError::ManagerUnavailable { .. }));
    }
}
