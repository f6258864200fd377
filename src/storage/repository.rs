//! Thread-safe handle over the queue store repository.
//!
//! All git access goes through one lock; callers work in terms of queues,
//! commits and branches and never see `git2` types.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use git2::Repository;
use parking_lot::Mutex;

use crate::storage::blob::{self, QueueItem};
use crate::storage::commit::{self, CommitInfo, CommitMessage};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::refs::RefManager;
use crate::storage::tree::TreeMutator;
use crate::storage::types::{BranchName, CommitId, GitSignature, QueueName};

/// Shared handle on an on-disk queue store. Cheap to clone.
#[derive(Clone)]
pub struct GitRepository {
    inner: Arc<Shared>,
}

struct Shared {
    // git2::Repository is Send but not Sync
    repo: Mutex<Repository>,
    path: PathBuf,
    signature: GitSignature,
}

impl GitRepository {
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        match Repository::open(path) {
            Ok(repo) => Ok(Self::from_parts(repo, path)),
            Err(_) => Err(StorageError::NotInitialized(path.to_path_buf())),
        }
    }

    /// Create a store at `path` whose `main` holds one empty root commit.
    pub fn init(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        let store = Self::from_parts(Repository::init(path)?, path);
        store.with_repo(|repo| {
            let root = commit::create_initial_commit(repo, &store.inner.signature)?;
            RefManager::init_main_branch(repo, root)
        })?;
        Ok(store)
    }

    pub fn open_or_init(path: impl AsRef<Path>) -> StorageResult<Self> {
        match Self::open(&path) {
            Err(StorageError::NotInitialized(_)) => Self::init(path),
            other => other,
        }
    }

    fn from_parts(repo: Repository, path: &Path) -> Self {
        let inner = Shared {
            repo: Mutex::new(repo),
            path: path.to_path_buf(),
            signature: GitSignature::queuetx(),
        };
        Self { inner: Arc::new(inner) }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Run `f` while holding the repository lock.
    pub fn with_repo<T>(&self, f: impl FnOnce(&Repository) -> StorageResult<T>) -> StorageResult<T> {
        let repo = self.inner.repo.lock();
        f(&repo)
    }

    /// Tip of `main`.
    pub fn head(&self) -> StorageResult<CommitId> {
        self.with_repo(RefManager::head_commit)
    }

    pub fn resolve_branch(&self, branch: &BranchName) -> StorageResult<CommitId> {
        self.with_repo(|repo| RefManager::resolve_branch(repo, branch))
    }

    pub fn get_commit(&self, id: CommitId) -> StorageResult<CommitInfo> {
        self.with_repo(|repo| commit::get_commit(repo, id))
    }

    pub fn list_queues(&self, at: CommitId) -> StorageResult<Vec<QueueName>> {
        self.with_repo(|repo| Ok(commit::get_tree_at_commit(repo, at)?.list_queues()))
    }

    /// Append payloads to a queue in a single commit.
    ///
    /// Returns the new commit ID; `at` is not moved, callers advance
    /// whichever branch they are working on.
    pub fn append_items(
        &self,
        queue: &QueueName,
        payloads: &[String],
        at: CommitId,
        tx_id: Option<&str>,
    ) -> StorageResult<CommitId> {
        self.with_repo(|repo| {
            let tree = commit::get_tree_at_commit(repo, at)?;
            let mut seq = tree.next_seq(repo, queue)?;
            let first = seq;

            let mut mutator = TreeMutator::from_tree(repo, &tree)?;
            for payload in payloads {
                let item = QueueItem::new(seq, payload.as_str(), tx_id);
                let blob_id = blob::write_blob(repo, &item)?;
                mutator.append_item(queue, seq, blob_id)?;
                seq = seq.next();
            }
            let new_tree_id = mutator.write()?;

            let message = match (payloads.len(), tx_id) {
                (n, Some(id)) if n > 1 => CommitMessage::replay(queue, n, id),
                _ => CommitMessage::append(queue, first, tx_id),
            };

            commit::write_commit(repo, new_tree_id, Some(at), &message, &self.inner.signature)
        })
    }

    /// Append a single payload to a queue.
    pub fn append_item(
        &self,
        queue: &QueueName,
        payload: &str,
        at: CommitId,
        tx_id: Option<&str>,
    ) -> StorageResult<CommitId> {
        self.append_items(queue, &[payload.to_string()], at, tx_id)
    }

    /// Read every item of a queue, in queue order.
    pub fn read_queue(&self, queue: &QueueName, at: CommitId) -> StorageResult<Vec<QueueItem>> {
        self.with_repo(|repo| {
            let tree = commit::get_tree_at_commit(repo, at)?;
            let entries = tree.list_items(repo, queue)?;

            let mut items = Vec::with_capacity(entries.len());
            for (seq, blob_id) in entries {
                let bytes = blob::read_blob(repo, blob_id)?;
                items.push(blob::deserialize_item(&bytes, queue, seq)?);
            }
            Ok(items)
        })
    }

    pub fn update_branch(&self, branch: &BranchName, target: CommitId) -> StorageResult<()> {
        self.with_repo(|repo| RefManager::update_branch(repo, branch, target))
    }

    pub fn branch_exists(&self, branch: &BranchName) -> StorageResult<bool> {
        self.with_repo(|repo| Ok(RefManager::branch_exists(repo, branch)))
    }

    pub fn list_transaction_branches(&self) -> StorageResult<Vec<BranchName>> {
        self.with_repo(RefManager::list_transaction_branches)
    }

    pub fn create_transaction_branch(&self, tx_id: &str, base: CommitId) -> StorageResult<BranchName> {
        self.with_repo(|repo| RefManager::create_transaction_branch(repo, tx_id, base))
    }

    pub fn delete_transaction_branch(&self, tx_id: &str) -> StorageResult<()> {
        self.with_repo(|repo| RefManager::delete_transaction_branch(repo, tx_id))
    }

    /// Fast-forward main to a transaction branch.
    ///
    /// Only succeeds if main hasn't moved since `expected_main`.
    pub fn fast_forward_main(&self, tx_branch: &BranchName, expected_main: CommitId) -> StorageResult<CommitId> {
        self.with_repo(|repo| {
            let tx_commit = RefManager::resolve_branch(repo, tx_branch)?;
            RefManager::update_branch_if_unchanged(repo, &BranchName::main(), expected_main, tx_commit)?;
            Ok(tx_commit)
        })
    }

    /// Move main from `expected_main` to `new_head`.
    pub fn advance_main(&self, expected_main: CommitId, new_head: CommitId) -> StorageResult<()> {
        self.with_repo(|repo| {
            RefManager::update_branch_if_unchanged(repo, &BranchName::main(), expected_main, new_head)
        })
    }

    /// First-parent log from `from`, newest first.
    pub fn history(&self, from: CommitId, limit: Option<usize>) -> StorageResult<Vec<CommitInfo>> {
        self.with_repo(|repo| commit::history(repo, from, limit))
    }

    pub fn stats(&self, at: CommitId) -> StorageResult<RepositoryStats> {
        self.with_repo(|repo| {
            let tree = commit::get_tree_at_commit(repo, at)?;
            Ok(RepositoryStats {
                queue_count: tree.list_queues().len(),
                total_items: tree.count_all_items(repo)?,
                open_transaction_branches: RefManager::list_transaction_branches(repo)?.len(),
            })
        })
    }
}

/// Counts taken at one commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryStats {
    pub queue_count: usize,
    pub total_items: usize,
    pub open_transaction_branches: usize,
}

impl std::fmt::Display for RepositoryStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} queue(s), {} item(s), {} open tx branch(es)",
            self.queue_count, self.total_items, self.open_transaction_branches
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, GitRepository) {
        let dir = TempDir::new().unwrap();
        let repo = GitRepository::init(dir.path()).unwrap();
        (dir, repo)
    }

    fn payloads(items: &[QueueItem]) -> Vec<&str> {
        items.iter().map(|i| i.payload.as_str()).collect()
    }

    #[test]
    fn test_open_or_init() {
        let dir = TempDir::new().unwrap();

        let repo1 = GitRepository::open_or_init(dir.path()).unwrap();
        let head1 = repo1.head().unwrap();
        drop(repo1);

        let repo2 = GitRepository::open_or_init(dir.path()).unwrap();
        assert_eq!(repo2.head().unwrap(), head1);
    }

    #[test]
    fn test_open_missing_repository() {
        let dir = TempDir::new().unwrap();
        let result = GitRepository::open(dir.path().join("missing"));
        assert!(matches!(result, Err(StorageError::NotInitialized(_))));
    }

    #[test]
    fn test_append_and_read() {
        let (_dir, repo) = setup();
        let queue = QueueName::new("EXAMPLE").unwrap();
        let head = repo.head().unwrap();

        assert!(repo.read_queue(&queue, head).unwrap().is_empty());

        let head = repo.append_item(&queue, "first", head, None).unwrap();
        let head = repo.append_item(&queue, "second", head, Some("tx001")).unwrap();

        let items = repo.read_queue(&queue, head).unwrap();
        assert_eq!(payloads(&items), vec!["first", "second"]);
        assert_eq!(items[1].tx_id.as_deref(), Some("tx001"));
        assert_eq!(repo.list_queues(head).unwrap(), vec![queue]);
    }

    #[test]
    fn test_append_does_not_move_main() {
        let (_dir, repo) = setup();
        let queue = QueueName::new("EXAMPLE").unwrap();
        let head = repo.head().unwrap();

        let detached = repo.append_item(&queue, "pending", head, None).unwrap();
        assert_eq!(repo.head().unwrap(), head);
        assert!(repo.read_queue(&queue, repo.head().unwrap()).unwrap().is_empty());
        assert_eq!(repo.read_queue(&queue, detached).unwrap().len(), 1);
    }

    #[test]
    fn test_transaction_branch_fast_forward() {
        let (_dir, repo) = setup();
        let queue = QueueName::new("EXAMPLE").unwrap();
        let head = repo.head().unwrap();

        let branch = repo.create_transaction_branch("tx001", head).unwrap();
        let tx_head = repo.append_item(&queue, "hello", head, Some("tx001")).unwrap();
        repo.update_branch(&branch, tx_head).unwrap();

        repo.fast_forward_main(&branch, head).unwrap();
        repo.delete_transaction_branch("tx001").unwrap();

        let main_head = repo.head().unwrap();
        assert_eq!(main_head, tx_head);
        assert_eq!(payloads(&repo.read_queue(&queue, main_head).unwrap()), vec!["hello"]);
        assert!(!repo.branch_exists(&branch).unwrap());
    }

    #[test]
    fn test_concurrent_modification_detection() {
        let (_dir, repo) = setup();
        let queue = QueueName::new("EXAMPLE").unwrap();
        let head = repo.head().unwrap();

        let branch = repo.create_transaction_branch("tx001", head).unwrap();
        let moved = repo.append_item(&queue, "other", head, None).unwrap();
        repo.advance_main(head, moved).unwrap();

        let result = repo.fast_forward_main(&branch, head);
        assert!(matches!(result, Err(StorageError::ConcurrentModification { .. })));
    }

    #[test]
    fn test_batch_append_numbering() {
        let (_dir, repo) = setup();
        let queue = QueueName::new("EXAMPLE").unwrap();
        let head = repo.head().unwrap();
        let head = repo.append_item(&queue, "a", head, None).unwrap();

        let batch = vec!["b".to_string(), "c".to_string()];
        let head = repo.append_items(&queue, &batch, head, Some("tx9")).unwrap();

        let items = repo.read_queue(&queue, head).unwrap();
        let seqs: Vec<u64> = items.iter().map(|i| i.seq.get()).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
        assert!(repo.get_commit(head).unwrap().message.starts_with("[REPLAY]"));
    }

    #[test]
    fn test_history_and_stats() {
        let (_dir, repo) = setup();
        let queue = QueueName::new("EXAMPLE").unwrap();
        let head = repo.head().unwrap();

        let stats = repo.stats(head).unwrap();
        assert_eq!(stats.queue_count, 0);
        assert_eq!(stats.total_items, 0);

        let head = repo.append_item(&queue, "x", head, None).unwrap();
        let history = repo.history(head, Some(10)).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].id, head);

        let stats = repo.stats(head).unwrap();
        assert_eq!(stats.queue_count, 1);
        assert_eq!(stats.total_items, 1);
    }
}
