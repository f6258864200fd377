//! Commits and history.
//!
//! Every append to a queue is one commit. Commits made inside a transaction
//! carry its id in the message so the log shows which unit of work wrote
//! what, and replayed runs are tagged so they stand out from direct writes.

use chrono::{DateTime, TimeZone, Utc};
use git2::{Repository, Sort};

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::tree::{create_initial_tree, TreeHandle};
use crate::storage::types::{CommitId, GitSignature, ItemSeq, QueueName, TreeId};

/// One entry of the queue store log.
#[derive(Debug, Clone)]
pub struct CommitInfo {
    pub id: CommitId,
    pub parent: Option<CommitId>,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl CommitInfo {
    fn read(commit: &git2::Commit<'_>) -> Self {
        let timestamp = Utc
            .timestamp_opt(commit.time().seconds(), 0)
            .single()
            .unwrap_or_default();
        Self {
            id: CommitId::new(commit.id()),
            parent: commit.parent_ids().next().map(CommitId::new),
            message: commit.message().unwrap_or_default().to_string(),
            timestamp,
        }
    }

    pub fn summary(&self) -> &str {
        self.message.lines().next().unwrap_or_default()
    }

    /// Transaction that produced this commit, if any.
    pub fn transaction_id(&self) -> Option<&str> {
        let summary = self.summary();
        if let Some(rest) = summary.strip_prefix(CommitMessage::REPLAY) {
            return rest.rsplit(' ').next();
        }
        summary
            .split_whitespace()
            .find_map(|word| word.strip_prefix("tx:"))
    }

    pub fn is_replay(&self) -> bool {
        self.message.starts_with(CommitMessage::REPLAY)
    }
}

/// Write a commit over `tree` without moving any reference.
pub fn write_commit(
    repo: &Repository,
    tree: TreeId,
    parent: Option<CommitId>,
    message: &str,
    signature: &GitSignature,
) -> StorageResult<CommitId> {
    let tree = repo.find_tree(tree.raw())?;
    let sig = signature.to_git2_signature()?;
    let parent = match parent {
        Some(id) => Some(
            repo.find_commit(id.raw())
                .map_err(|_| StorageError::CommitNotFound(id.to_string()))?,
        ),
        None => None,
    };
    let parents: Vec<&git2::Commit<'_>> = parent.iter().collect();

    let oid = repo.commit(None, &sig, &sig, message, &tree, &parents)?;
    Ok(CommitId::new(oid))
}

/// Root commit of a fresh store: an empty tree, no parent.
pub fn create_initial_commit(repo: &Repository, signature: &GitSignature) -> StorageResult<CommitId> {
    let tree = create_initial_tree(repo)?;
    write_commit(repo, tree, None, CommitMessage::INIT, signature)
}

pub fn get_commit(repo: &Repository, id: CommitId) -> StorageResult<CommitInfo> {
    repo.find_commit(id.raw())
        .map(|c| CommitInfo::read(&c))
        .map_err(|_| StorageError::CommitNotFound(id.to_string()))
}

pub fn get_tree_at_commit(repo: &Repository, id: CommitId) -> StorageResult<TreeHandle<'_>> {
    let commit = repo
        .find_commit(id.raw())
        .map_err(|_| StorageError::CommitNotFound(id.to_string()))?;
    Ok(TreeHandle::new(commit.tree()?))
}

/// Walk first parents back from `start`, newest first.
pub fn history(repo: &Repository, start: CommitId, limit: Option<usize>) -> StorageResult<Vec<CommitInfo>> {
    let mut walk = repo.revwalk()?;
    walk.push(start.raw())?;
    walk.simplify_first_parent()?;
    walk.set_sorting(Sort::TOPOLOGICAL)?;

    let mut log = Vec::new();
    for oid in walk.take(limit.unwrap_or(usize::MAX)) {
        log.push(CommitInfo::read(&repo.find_commit(oid?)?));
    }
    Ok(log)
}

/// Message formats for queue store commits.
pub struct CommitMessage;

impl CommitMessage {
    pub const INIT: &'static str = "[INIT] queue store";
    pub const REPLAY: &'static str = "[REPLAY] ";

    pub fn append(queue: &QueueName, seq: ItemSeq, tx_id: Option<&str>) -> String {
        match tx_id {
            Some(id) => format!("[WRITE] {}#{} tx:{}", queue, seq, id),
            None => format!("[WRITE] {}#{}", queue, seq),
        }
    }

    /// A run of a transaction's items re-applied on top of a newer main.
    pub fn replay(queue: &QueueName, items: usize, tx_id: &str) -> String {
        format!("{}{} x{} from {}", Self::REPLAY, queue, items, tx_id)
    }
}
