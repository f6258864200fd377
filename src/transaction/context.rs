//! Transaction context - the flow-scoped unit of work.
//!
//! A context is created by [`TransactionManager::begin`] and shared by every
//! handle that joins it. Handles differ only in whether they own the
//! transaction (`is_new_transaction`); status and write records live in the
//! shared state.
//!
//! [`TransactionManager::begin`]: crate::transaction::TransactionManager::begin

use std::fmt;
use std::sync::Arc;
use std::thread::ThreadId;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::storage::QueueName;
use crate::transaction::error::{TransactionError, TransactionResult};
use crate::transaction::status::TransactionStatus;

/// One write issued through the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRecord {
    pub tx_id: String,
    pub queue: QueueName,
    pub payload: String,
}

/// Handle on the active transaction of a flow.
///
/// Cloning yields another handle on the same transaction with the same
/// ownership.
#[derive(Clone)]
pub struct TransactionContext {
    shared: Arc<SharedContext>,
    is_new: bool,
}

struct SharedContext {
    id: String,
    flow: ThreadId,
    started_at: DateTime<Utc>,
    state: Mutex<ContextState>,
}

#[derive(Default)]
struct ContextState {
    status: TransactionStatus,
    writes: Vec<WriteRecord>,
    /// set while the resource commit is in flight; blocks every transition
    committing: bool,
}

impl TransactionContext {
    pub(crate) fn new(id: String, flow: ThreadId) -> Self {
        Self {
            shared: Arc::new(SharedContext {
                id,
                flow,
                started_at: Utc::now(),
                state: Mutex::new(ContextState::default()),
            }),
            is_new: true,
        }
    }

    /// Another handle on the same transaction that does not own it.
    pub(crate) fn joined(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            is_new: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.shared.id
    }

    /// True for the handle returned by the `begin` that created the transaction.
    pub fn is_new_transaction(&self) -> bool {
        self.is_new
    }

    pub fn status(&self) -> TransactionStatus {
        self.shared.state.lock().status
    }

    pub fn is_active(&self) -> bool {
        self.status().is_active()
    }

    pub fn is_rollback_only(&self) -> bool {
        self.status().is_rollback_only()
    }

    pub fn is_completed(&self) -> bool {
        self.status().is_terminal()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.shared.started_at
    }

    pub(crate) fn flow(&self) -> ThreadId {
        self.shared.flow
    }

    /// Writes issued so far, in order.
    pub fn writes(&self) -> Vec<WriteRecord> {
        self.shared.state.lock().writes.clone()
    }

    pub fn write_count(&self) -> usize {
        self.shared.state.lock().writes.len()
    }

    /// Whether both handles refer to the same transaction.
    pub fn same_transaction(&self, other: &TransactionContext) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Restrict the outcome of this transaction to rollback.
    ///
    /// Idempotent on a rollback-only transaction; fails once the transaction
    /// has completed.
    pub fn mark_rollback_only(&self) -> TransactionResult<()> {
        self.transition("mark rollback-only", TransactionStatus::MarkedRollback)
    }

    pub(crate) fn transition(
        &self,
        operation: &'static str,
        next: TransactionStatus,
    ) -> TransactionResult<()> {
        let mut state = self.shared.state.lock();
        if state.committing || !state.status.can_transition_to(next) {
            return Err(TransactionError::IllegalState {
                tx_id: self.shared.id.clone(),
                operation,
                status: state.status,
            });
        }
        state.status = next;
        Ok(())
    }

    /// Claim the commit of an active transaction.
    ///
    /// Until [`finish_commit`](Self::finish_commit) runs, no other handle can
    /// mark the transaction rollback-only or complete it. Returns the status
    /// that prevented the claim.
    pub(crate) fn claim_commit(&self) -> Result<(), TransactionStatus> {
        let mut state = self.shared.state.lock();
        if state.committing || state.status != TransactionStatus::Active {
            return Err(state.status);
        }
        state.committing = true;
        Ok(())
    }

    /// Settle a claimed commit as `Committed` or `RolledBack`.
    pub(crate) fn finish_commit(&self, committed: bool) {
        let mut state = self.shared.state.lock();
        state.committing = false;
        state.status = if committed {
            TransactionStatus::Committed
        } else {
            TransactionStatus::RolledBack
        };
    }

    pub(crate) fn record_write(&self, queue: &QueueName, payload: &str) {
        self.shared.state.lock().writes.push(WriteRecord {
            tx_id: self.shared.id.clone(),
            queue: queue.clone(),
            payload: payload.to_string(),
        });
    }
}

impl fmt::Debug for TransactionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("TransactionContext")
            .field("id", &self.shared.id)
            .field("is_new", &self.is_new)
            .field("status", &state.status)
            .field("writes", &state.writes.len())
            .finish()
    }
}
