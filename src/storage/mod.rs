//! git-backed queue store
//!
//! This module is the durable half of the queue resource manager. Each queue
//! is a directory, each written string is a JSON blob inside it, and every
//! append is a commit. The transaction layer never touches git2 directly.
//!
//! Layout of a store:
//!
//! ```text
//! refs/heads/main          committed state of every queue
//! refs/heads/tx/{id}       one per open transaction, forked from main
//! {QUEUE}/00000001.json    one blob per item, numbered in append order
//! ```
//!
//! ```ignore
//! use queuetx::storage::{GitRepository, QueueName};
//!
//! let repo = GitRepository::open_or_init("./queues")?;
//! let queue = QueueName::new("EXAMPLE")?;
//!
//! let head = repo.head()?;
//! let head = repo.append_item(&queue, "hello", head, None)?;
//! let items = repo.read_queue(&queue, head)?;
//! ```

mod blob;
mod commit;
mod error;
mod refs;
mod repository;
mod tree;
mod types;

pub use blob::QueueItem;
pub use commit::{CommitInfo, CommitMessage};
pub use error::{StorageError, StorageResult};
pub use repository::{GitRepository, RepositoryStats};
pub use types::{
    BlobId, BranchName, CommitId, GitSignature, InvalidNameError, ItemPath, ItemSeq, QueueName,
    TreeId,
};
