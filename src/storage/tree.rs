//! tree operations for queue management.
//!
//! in Git, a tree is a directory. In the queue store:
//! - the root tree contains one directory per queue plus `_meta`
//! - each queue directory contains item blobs named by sequence number
//!
//! Queues are append-only, so the mutator only knows how to add items.

use std::collections::HashMap;

use git2::{FileMode, ObjectType, Repository, Tree, TreeBuilder as Git2TreeBuilder};

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::{BlobId, ItemPath, ItemSeq, QueueName, TreeId};

/// name of the metadata directory created with every repository
pub const META_DIR: &str = "_meta";

/// A read only handle to a git tree at a specific commit
///
/// think of it as a snapshot - it won't change even if new commits are made.
pub struct TreeHandle<'repo> {
    tree: Tree<'repo>,
}

impl<'repo> TreeHandle<'repo> {
    pub(crate) fn new(tree: Tree<'repo>) -> Self {
        Self { tree }
    }

    pub(crate) fn inner(&self) -> &Tree<'repo> {
        &self.tree
    }

    /// list all queues (top-level directories, excluding metadata)
    pub fn list_queues(&self) -> Vec<QueueName> {
        self.tree
            .iter()
            .filter_map(|entry| {
                if entry.kind() != Some(ObjectType::Tree) {
                    return None;
                }
                // QueueName rejects the leading underscore of metadata dirs
                QueueName::new(entry.name()?).ok()
            })
            .collect()
    }

    fn queue_tree(&self, repo: &'repo Repository, queue: &QueueName) -> StorageResult<Option<Tree<'repo>>> {
        match self.tree.get_name(queue.as_str()) {
            Some(entry) => {
                if entry.kind() != Some(ObjectType::Tree) {
                    return Err(StorageError::UnexpectedEntryType {
                        path: queue.as_str().into(),
                        expected: "tree (directory)".to_string(),
                        found: format!("{:?}", entry.kind()),
                    });
                }
                Ok(Some(repo.find_tree(entry.id())?))
            }
            None => Ok(None),
        }
    }

    /// list the items of a queue in queue order
    ///
    /// a queue that was never written to is simply empty
    pub fn list_items(&self, repo: &'repo Repository, queue: &QueueName) -> StorageResult<Vec<(ItemSeq, BlobId)>> {
        let Some(queue_tree) = self.queue_tree(repo, queue)? else {
            return Ok(Vec::new());
        };

        let mut items = Vec::with_capacity(queue_tree.len());
        for entry in queue_tree.iter() {
            if entry.kind() != Some(ObjectType::Blob) {
                continue;
            }
            let Some(seq) = entry.name().and_then(ItemSeq::from_file_name) else {
                continue;
            };
            items.push((seq, BlobId::new(entry.id())));
        }
        items.sort_by_key(|(seq, _)| *seq);

        Ok(items)
    }

    /// the sequence number the next appended item will get
    pub fn next_seq(&self, repo: &'repo Repository, queue: &QueueName) -> StorageResult<ItemSeq> {
        let items = self.list_items(repo, queue)?;
        Ok(items.last().map(|(seq, _)| seq.next()).unwrap_or(ItemSeq::FIRST))
    }

    /// count total items across all queues (for stats)
    pub fn count_all_items(&self, repo: &'repo Repository) -> StorageResult<usize> {
        let mut count = 0;
        for queue in self.list_queues() {
            count += self.list_items(repo, &queue)?.len();
        }
        Ok(count)
    }
}

/// a mutable tree builder for appending items
///
/// this adds up changes and produces a new tree when its final;
/// the original tree is not modified
pub struct TreeMutator<'repo> {
    repo: &'repo Repository,
    root_builder: Git2TreeBuilder<'repo>,
    /// queue directories touched so far (queue -> builder)
    modified_queues: HashMap<String, Git2TreeBuilder<'repo>>,
    /// original queue tree IDs for queues we haven't touched
    original_queues: HashMap<String, git2::Oid>,
}

impl<'repo> TreeMutator<'repo> {
    pub fn from_tree(repo: &'repo Repository, tree: &TreeHandle<'_>) -> StorageResult<Self> {
        let root_builder = repo.treebuilder(Some(tree.inner()))?;

        let mut original_queues = HashMap::new();
        for entry in tree.inner().iter() {
            if entry.kind() == Some(ObjectType::Tree) {
                if let Some(name) = entry.name() {
                    original_queues.insert(name.to_string(), entry.id());
                }
            }
        }

        Ok(Self {
            repo,
            root_builder,
            modified_queues: HashMap::new(),
            original_queues,
        })
    }

    pub fn empty(repo: &'repo Repository) -> StorageResult<Self> {
        Ok(Self {
            repo,
            root_builder: repo.treebuilder(None)?,
            modified_queues: HashMap::new(),
            original_queues: HashMap::new(),
        })
    }

    fn queue_builder(&mut self, queue: &str) -> StorageResult<&mut Git2TreeBuilder<'repo>> {
        if !self.modified_queues.contains_key(queue) {
            let builder = match self.original_queues.get(queue) {
                Some(original_id) => {
                    let original_tree = self.repo.find_tree(*original_id)?;
                    self.repo.treebuilder(Some(&original_tree))?
                }
                None => self.repo.treebuilder(None)?,
            };
            self.modified_queues.insert(queue.to_string(), builder);
        }
        self.modified_queues
            .get_mut(queue)
            .ok_or_else(|| StorageError::Internal(format!("missing tree builder for {}", queue)))
    }

    /// add an item blob to a queue, creating the queue directory on first use
    pub fn append_item(&mut self, queue: &QueueName, seq: ItemSeq, blob_id: BlobId) -> StorageResult<()> {
        let builder = self.queue_builder(queue.as_str())?;
        let file_name = seq.file_name();

        if builder.get(&file_name)?.is_some() {
            return Err(StorageError::ItemAlreadyExists(ItemPath::new(queue.clone(), seq)));
        }

        builder.insert(&file_name, blob_id.raw(), FileMode::Blob.into())?;
        Ok(())
    }

    /// write all changes and return the new root tree ID
    pub fn write(mut self) -> StorageResult<TreeId> {
        for (queue, builder) in self.modified_queues {
            let queue_tree_id = builder.write()?;
            self.root_builder.insert(&queue, queue_tree_id, FileMode::Tree.into())?;
        }

        let root_id = self.root_builder.write()?;
        Ok(TreeId::new(root_id))
    }
}

/// create the initial tree: an empty root plus the `_meta` directory
///
/// git does not track empty directories, so `_meta` carries a marker blob
pub fn create_initial_tree(repo: &Repository) -> StorageResult<TreeId> {
    let mut builder = TreeMutator::empty(repo)?;

    let marker = repo.blob(b"queuetx queue store\n")?;
    let mut meta_builder = repo.treebuilder(None)?;
    meta_builder.insert("store", marker, FileMode::Blob.into())?;
    let meta_tree_id = meta_builder.write()?;

    builder
        .root_builder
        .insert(META_DIR, meta_tree_id, FileMode::Tree.into())?;

    builder.write()
}
