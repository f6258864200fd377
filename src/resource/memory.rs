//! In-process queue resource manager.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace};

use crate::resource::{QueueLimits, ResourceError, ResourceManager, ResourceResult};
use crate::storage::QueueName;

type WriteGuard = dyn Fn(&QueueName, &str) -> ResourceResult<()> + Send + Sync;

/// Queues held in memory, with writes staged per transaction.
///
/// Cloning shares the same queues.
#[derive(Clone)]
pub struct InMemoryQueues {
    inner: Arc<Inner>,
}

struct Inner {
    committed: RwLock<BTreeMap<QueueName, Vec<String>>>,
    /// staged writes keyed by transaction ID, in write order
    pending: Mutex<HashMap<String, Vec<(QueueName, String)>>>,
    limits: QueueLimits,
    guard: RwLock<Option<Arc<WriteGuard>>>,
}

impl InMemoryQueues {
    pub fn new() -> Self {
        Self::with_limits(QueueLimits::default())
    }

    pub fn with_limits(limits: QueueLimits) -> Self {
        Self {
            inner: Arc::new(Inner {
                committed: RwLock::new(BTreeMap::new()),
                pending: Mutex::new(HashMap::new()),
                limits,
                guard: RwLock::new(None),
            }),
        }
    }

    /// Install a check run before every write is staged.
    ///
    /// A failing guard makes the write fail without staging anything.
    pub fn with_write_guard<F>(self, guard: F) -> Self
    where
        F: Fn(&QueueName, &str) -> ResourceResult<()> + Send + Sync + 'static,
    {
        *self.inner.guard.write() = Some(Arc::new(guard));
        self
    }

    /// Number of transactions currently enlisted.
    pub fn enlisted_count(&self) -> usize {
        self.inner.pending.lock().len()
    }

    /// Writes staged by a transaction that has not finished yet.
    pub fn pending_writes(&self, tx_id: &str) -> Vec<(QueueName, String)> {
        self.inner
            .pending
            .lock()
            .get(tx_id)
            .cloned()
            .unwrap_or_default()
    }

    fn committed_len(&self, queue: &QueueName) -> usize {
        self.inner
            .committed
            .read()
            .get(queue)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

impl Default for InMemoryQueues {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for InMemoryQueues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let enlisted = self.enlisted_count();
        let queues = self.inner.committed.read().len();
        f.debug_struct("InMemoryQueues")
            .field("queues", &queues)
            .field("enlisted", &enlisted)
            .finish()
    }
}

impl ResourceManager for InMemoryQueues {
    fn name(&self) -> &str {
        "memory"
    }

    fn enlist(&self, tx_id: &str) -> ResourceResult<()> {
        self.inner
            .pending
            .lock()
            .entry(tx_id.to_string())
            .or_default();
        trace!(tx_id, "enlisted");
        Ok(())
    }

    fn write_string(&self, tx_id: &str, queue: &QueueName, payload: &str) -> ResourceResult<()> {
        let guard = self.inner.guard.read().clone();
        if let Some(guard) = guard {
            guard(queue, payload)?;
        }

        // lock order is pending, then committed; commit moves items under both
        let mut pending = self.inner.pending.lock();
        let committed = self.committed_len(queue);
        let staged: usize = pending
            .values()
            .map(|writes| writes.iter().filter(|(q, _)| q == queue).count())
            .sum();

        let writes = pending
            .get_mut(tx_id)
            .ok_or_else(|| ResourceError::not_enlisted(tx_id))?;

        self.inner
            .limits
            .check(queue, payload, committed + staged)?;
        writes.push((queue.clone(), payload.to_string()));
        Ok(())
    }

    fn commit(&self, tx_id: &str) -> ResourceResult<()> {
        let mut pending = self.inner.pending.lock();
        let writes = pending
            .remove(tx_id)
            .ok_or_else(|| ResourceError::not_enlisted(tx_id))?;

        let count = writes.len();
        let mut committed = self.inner.committed.write();
        for (queue, payload) in writes {
            committed.entry(queue).or_default().push(payload);
        }
        debug!(tx_id, items = count, "applied staged writes");
        Ok(())
    }

    fn rollback(&self, tx_id: &str) -> ResourceResult<()> {
        let writes = self
            .inner
            .pending
            .lock()
            .remove(tx_id)
            .ok_or_else(|| ResourceError::not_enlisted(tx_id))?;
        debug!(tx_id, items = writes.len(), "discarded staged writes");
        Ok(())
    }

    fn read_queue(&self, queue: &QueueName) -> ResourceResult<Vec<String>> {
        Ok(self
            .inner
            .committed
            .read()
            .get(queue)
            .cloned()
            .unwrap_or_default())
    }

    fn list_queues(&self) -> ResourceResult<Vec<QueueName>> {
        Ok(self.inner.committed.read().keys().cloned().collect())
    }
}
