//! Branch references.
//!
//! `main` holds every committed queue item. Each open transaction owns a
//! `tx/{id}` branch forked from `main`; the branch disappears when the
//! transaction finishes either way. Moves of `main` are compare-and-swap so
//! a stale writer can never overwrite a newer head.

use git2::{ErrorCode, Repository};

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::{BranchName, CommitId};

/// Namespace of reference operations on a repository.
pub struct RefManager;

impl RefManager {
    pub fn resolve_branch(repo: &Repository, branch: &BranchName) -> StorageResult<CommitId> {
        repo.find_reference(&branch.as_ref_path())
            .and_then(|r| r.peel_to_commit())
            .map(|c| CommitId::new(c.id()))
            .map_err(|_| StorageError::RefNotFound(branch.to_string()))
    }

    /// Commit `HEAD` (always `main`) points at.
    pub fn head_commit(repo: &Repository) -> StorageResult<CommitId> {
        match repo.head() {
            Ok(head) => Ok(CommitId::new(head.peel_to_commit()?.id())),
            Err(e) if e.code() == ErrorCode::UnbornBranch => Err(StorageError::EmptyRepository),
            Err(e) => Err(e.into()),
        }
    }

    pub fn branch_exists(repo: &Repository, branch: &BranchName) -> bool {
        repo.find_reference(&branch.as_ref_path()).is_ok()
    }

    fn create(repo: &Repository, branch: &BranchName, target: CommitId) -> StorageResult<()> {
        let message = format!("queuetx: create {} at {}", branch, target.short());
        match repo.reference(&branch.as_ref_path(), target.raw(), false, &message) {
            Ok(_) => Ok(()),
            Err(e) if e.code() == ErrorCode::Exists => {
                Err(StorageError::BranchAlreadyExists(branch.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Point a branch at `target` unconditionally.
    pub fn update_branch(repo: &Repository, branch: &BranchName, target: CommitId) -> StorageResult<()> {
        if !Self::branch_exists(repo, branch) {
            return Err(StorageError::RefNotFound(branch.to_string()));
        }
        let message = format!("queuetx: move {} to {}", branch, target.short());
        repo.reference(&branch.as_ref_path(), target.raw(), true, &message)?;
        Ok(())
    }

    /// Point a branch at `new_target` only if it still points at `expected`.
    pub fn update_branch_if_unchanged(
        repo: &Repository,
        branch: &BranchName,
        expected: CommitId,
        new_target: CommitId,
    ) -> StorageResult<()> {
        let message = format!(
            "queuetx: advance {} {}..{}",
            branch,
            expected.short(),
            new_target.short()
        );
        match repo.reference_matching(
            &branch.as_ref_path(),
            new_target.raw(),
            true,
            expected.raw(),
            &message,
        ) {
            Ok(_) => Ok(()),
            Err(e) if e.code() == ErrorCode::Modified => Err(StorageError::ConcurrentModification {
                branch: branch.to_string(),
            }),
            Err(e) if e.code() == ErrorCode::NotFound => {
                Err(StorageError::RefNotFound(branch.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Every `tx/*` branch, including ones left behind by a crashed process.
    pub fn list_transaction_branches(repo: &Repository) -> StorageResult<Vec<BranchName>> {
        let pattern = format!("refs/heads/{}*", BranchName::TX_PREFIX);
        let mut branches = Vec::new();
        for reference in repo.references_glob(&pattern)? {
            let reference = reference?;
            if let Some(name) = reference.shorthand() {
                branches.push(BranchName::new(name)?);
            }
        }
        branches.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        Ok(branches)
    }

    pub fn create_transaction_branch(repo: &Repository, tx_id: &str, base: CommitId) -> StorageResult<BranchName> {
        let branch = BranchName::for_transaction(tx_id);
        Self::create(repo, &branch, base)?;
        Ok(branch)
    }

    pub fn delete_transaction_branch(repo: &Repository, tx_id: &str) -> StorageResult<()> {
        let branch = BranchName::for_transaction(tx_id);
        repo.find_reference(&branch.as_ref_path())
            .map_err(|_| StorageError::RefNotFound(branch.to_string()))?
            .delete()?;
        Ok(())
    }

    /// Create `main` at the initial commit and attach `HEAD` to it.
    pub fn init_main_branch(repo: &Repository, initial_commit: CommitId) -> StorageResult<()> {
        let main = BranchName::main();
        if !Self::branch_exists(repo, &main) {
            Self::create(repo, &main, initial_commit)?;
        }
        repo.set_head(&main.as_ref_path())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::commit::create_initial_commit;
    use crate::storage::types::GitSignature;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Repository, CommitId) {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        let root = create_initial_commit(&repo, &GitSignature::queuetx()).unwrap();
        RefManager::init_main_branch(&repo, root).unwrap();
        (dir, repo, root)
    }

    fn child_of(repo: &Repository, parent: CommitId) -> CommitId {
        let parent = repo.find_commit(parent.raw()).unwrap();
        let sig = git2::Signature::now("test", "test@localhost").unwrap();
        let oid = repo
            .commit(None, &sig, &sig, "child", &parent.tree().unwrap(), &[&parent])
            .unwrap();
        CommitId::new(oid)
    }

    #[test]
    fn test_head_is_main() {
        let (_dir, repo, root) = setup();
        assert_eq!(RefManager::head_commit(&repo).unwrap(), root);
        assert_eq!(RefManager::resolve_branch(&repo, &BranchName::main()).unwrap(), root);
    }

    #[test]
    fn test_empty_repository() {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        assert!(matches!(
            RefManager::head_commit(&repo),
            Err(StorageError::EmptyRepository)
        ));
    }

    #[test]
    fn test_transaction_branch_lifecycle() {
        let (_dir, repo, root) = setup();

        let branch = RefManager::create_transaction_branch(&repo, "tx001", root).unwrap();
        RefManager::create_transaction_branch(&repo, "tx002", root).unwrap();
        assert_eq!(branch.transaction_id(), Some("tx001"));
        assert_eq!(RefManager::list_transaction_branches(&repo).unwrap().len(), 2);

        RefManager::delete_transaction_branch(&repo, "tx001").unwrap();
        assert_eq!(
            RefManager::list_transaction_branches(&repo).unwrap(),
            vec![BranchName::for_transaction("tx002")]
        );
        assert!(RefManager::delete_transaction_branch(&repo, "tx001").is_err());
    }

    #[test]
    fn test_duplicate_transaction_branch() {
        let (_dir, repo, root) = setup();
        RefManager::create_transaction_branch(&repo, "tx001", root).unwrap();
        assert!(matches!(
            RefManager::create_transaction_branch(&repo, "tx001", root),
            Err(StorageError::BranchAlreadyExists(_))
        ));
    }

    #[test]
    fn test_compare_and_swap_main() {
        let (_dir, repo, root) = setup();
        let next = child_of(&repo, root);
        let main = BranchName::main();

        RefManager::update_branch_if_unchanged(&repo, &main, root, next).unwrap();
        assert_eq!(RefManager::head_commit(&repo).unwrap(), next);

        let stale = RefManager::update_branch_if_unchanged(&repo, &main, root, next);
        assert!(matches!(stale, Err(StorageError::ConcurrentModification { .. })));
    }

    #[test]
    fn test_update_missing_branch() {
        let (_dir, repo, root) = setup();
        let ghost = BranchName::for_transaction("ghost");
        assert!(matches!(
            RefManager::update_branch(&repo, &ghost, root),
            Err(StorageError::RefNotFound(_))
        ));
    }
}
