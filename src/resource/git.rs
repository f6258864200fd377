//! Durable queue resource manager on top of [`GitRepository`].
//!
//! Each enlisted transaction gets a `tx/{id}` branch forked from `main`.
//! Writes append commits to that branch only, so readers of `main` never
//! see them. Commit fast-forwards `main` when nothing else landed in the
//! meantime; otherwise the transaction's writes are replayed on top of the
//! current `main`. Queues are append-only, so replay never conflicts.
//! Rollback deletes the branch.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::resource::{QueueLimits, ResourceError, ResourceManager, ResourceResult};
use crate::storage::{BranchName, CommitId, CommitInfo, GitRepository, QueueName, RepositoryStats};

/// Queue resource manager persisting into a git repository.
#[derive(Clone)]
pub struct GitQueueStore {
    inner: Arc<Inner>,
}

struct Inner {
    repo: GitRepository,
    open: RwLock<HashMap<String, OpenBranch>>,
    /// serializes moves of `main`
    commit_lock: Mutex<()>,
    limits: QueueLimits,
}

#[derive(Debug, Clone)]
struct OpenBranch {
    branch: BranchName,
    base: CommitId,
    head: CommitId,
    writes: Vec<(QueueName, String)>,
}

impl GitQueueStore {
    pub fn new(repo: GitRepository) -> Self {
        Self::with_limits(repo, QueueLimits::default())
    }

    pub fn with_limits(repo: GitRepository, limits: QueueLimits) -> Self {
        Self {
            inner: Arc::new(Inner {
                repo,
                open: RwLock::new(HashMap::new()),
                commit_lock: Mutex::new(()),
                limits,
            }),
        }
    }

    /// Open the repository at `path`, creating it if needed.
    pub fn open_or_init(path: impl AsRef<Path>) -> ResourceResult<Self> {
        Ok(Self::new(GitRepository::open_or_init(path)?))
    }

    pub fn repo(&self) -> &GitRepository {
        &self.inner.repo
    }

    /// IDs of transactions holding an open branch.
    pub fn open_transactions(&self) -> Vec<String> {
        self.inner.open.read().keys().cloned().collect()
    }

    /// Recent commits on `main`, newest first.
    pub fn history(&self, limit: Option<usize>) -> ResourceResult<Vec<CommitInfo>> {
        let head = self.inner.repo.head()?;
        Ok(self.inner.repo.history(head, limit)?)
    }

    pub fn stats(&self) -> ResourceResult<RepositoryStats> {
        let head = self.inner.repo.head()?;
        Ok(self.inner.repo.stats(head)?)
    }

    /// Delete transaction branches no live transaction owns.
    ///
    /// Such branches are left behind when a process dies mid-transaction.
    pub fn cleanup_abandoned(&self) -> ResourceResult<usize> {
        let live: HashSet<String> = self.inner.open.read().keys().cloned().collect();
        let branches = self.inner.repo.list_transaction_branches()?;

        let mut cleaned = 0;
        for branch in branches {
            let Some(tx_id) = branch.transaction_id() else {
                continue;
            };
            if live.contains(tx_id) {
                continue;
            }
            match self.inner.repo.delete_transaction_branch(tx_id) {
                Ok(()) => cleaned += 1,
                Err(e) => warn!(branch = %branch, error = %e, "failed to remove abandoned branch"),
            }
        }
        if cleaned > 0 {
            info!(cleaned, "removed abandoned transaction branches");
        }
        Ok(cleaned)
    }

    /// Move `main` to include the writes of `state`.
    fn publish(&self, tx_id: &str, state: &OpenBranch) -> ResourceResult<CommitId> {
        let repo = &self.inner.repo;
        let main = repo.head()?;

        if main == state.base {
            let new_head = repo.fast_forward_main(&state.branch, state.base)?;
            debug!(tx_id, head = %new_head.short(), "fast-forwarded main");
            return Ok(new_head);
        }

        // main moved: replay runs of same-queue writes onto it
        let mut head = main;
        let mut run: Vec<String> = Vec::new();
        let mut run_queue: Option<&QueueName> = None;
        for (queue, payload) in &state.writes {
            if run_queue.is_some_and(|q| q != queue) {
                if let Some(q) = run_queue {
                    head = repo.append_items(q, &run, head, Some(tx_id))?;
                }
                run.clear();
            }
            run_queue = Some(queue);
            run.push(payload.clone());
        }
        if let Some(q) = run_queue {
            head = repo.append_items(q, &run, head, Some(tx_id))?;
        }

        repo.advance_main(main, head)?;
        debug!(
            tx_id,
            items = state.writes.len(),
            head = %head.short(),
            "replayed writes onto moved main"
        );
        Ok(head)
    }

    fn take_open(&self, tx_id: &str) -> ResourceResult<OpenBranch> {
        self.inner
            .open
            .write()
            .remove(tx_id)
            .ok_or_else(|| ResourceError::not_enlisted(tx_id))
    }

    fn drop_branch(&self, tx_id: &str) {
        if let Err(e) = self.inner.repo.delete_transaction_branch(tx_id) {
            warn!(tx_id, error = %e, "failed to delete transaction branch");
        }
    }
}

impl fmt::Debug for GitQueueStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GitQueueStore")
            .field("path", &self.inner.repo.path())
            .field("open", &self.inner.open.read().len())
            .finish()
    }
}

impl ResourceManager for GitQueueStore {
    fn name(&self) -> &str {
        "git"
    }

    fn enlist(&self, tx_id: &str) -> ResourceResult<()> {
        let base = self.inner.repo.head()?;
        let branch = self.inner.repo.create_transaction_branch(tx_id, base)?;
        debug!(tx_id, branch = %branch, base = %base.short(), "created transaction branch");

        self.inner.open.write().insert(
            tx_id.to_string(),
            OpenBranch {
                branch,
                base,
                head: base,
                writes: Vec::new(),
            },
        );
        Ok(())
    }

    fn write_string(&self, tx_id: &str, queue: &QueueName, payload: &str) -> ResourceResult<()> {
        let mut open = self.inner.open.write();
        let state = open
            .get_mut(tx_id)
            .ok_or_else(|| ResourceError::not_enlisted(tx_id))?;

        if self.inner.limits.max_items.is_some() {
            let main = self.inner.repo.head()?;
            let committed = self.inner.repo.read_queue(queue, main)?.len();
            let staged = state.writes.iter().filter(|(q, _)| q == queue).count();
            self.inner.limits.check(queue, payload, committed + staged)?;
        } else {
            self.inner.limits.check(queue, payload, 0)?;
        }

        let new_head = self
            .inner
            .repo
            .append_item(queue, payload, state.head, Some(tx_id))?;
        self.inner.repo.update_branch(&state.branch, new_head)?;

        state.head = new_head;
        state.writes.push((queue.clone(), payload.to_string()));
        Ok(())
    }

    fn commit(&self, tx_id: &str) -> ResourceResult<()> {
        let _guard = self.inner.commit_lock.lock();
        let state = self.take_open(tx_id)?;

        let result = if state.writes.is_empty() {
            Ok(state.base)
        } else {
            self.publish(tx_id, &state)
        };
        self.drop_branch(tx_id);
        result.map(|_| ())
    }

    fn rollback(&self, tx_id: &str) -> ResourceResult<()> {
        let state = self.take_open(tx_id)?;
        self.drop_branch(tx_id);
        debug!(tx_id, discarded = state.writes.len(), "rolled back transaction branch");
        Ok(())
    }

    fn read_queue(&self, queue: &QueueName) -> ResourceResult<Vec<String>> {
        let head = self.inner.repo.head()?;
        Ok(self
            .inner
            .repo
            .read_queue(queue, head)?
            .into_iter()
            .map(|item| item.payload)
            .collect())
    }

    fn list_queues(&self) -> ResourceResult<Vec<QueueName>> {
        let head = self.inner.repo.head()?;
        Ok(self.inner.repo.list_queues(head)?)
    }
}
