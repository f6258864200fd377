//! Declarative demarcation: an operation wrapped in a transaction boundary
//! whose rollback behaviour is configured by error kind.

use std::collections::HashSet;

use tracing::debug;

use crate::demarcation::{complete, rollback_after_error, CompletionGuard, Outcome};
use crate::transaction::{ErrorKind, TransactionError, TransactionManager, TransactionResult};

/// Which errors roll the boundary's transaction back.
///
/// By default every error does. Kinds in the no-rollback set let the
/// transaction commit before the error is re-raised. A transaction that is
/// already rollback-only still rolls back.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BoundaryPolicy {
    /// `None` means every kind
    rollback_for: Option<HashSet<ErrorKind>>,
    no_rollback_for: HashSet<ErrorKind>,
}

impl BoundaryPolicy {
    /// Roll back on every error.
    pub fn rollback_on_all() -> Self {
        Self::default()
    }

    /// Roll back only on the given kinds.
    pub fn rollback_for(kinds: impl IntoIterator<Item = ErrorKind>) -> Self {
        Self {
            rollback_for: Some(kinds.into_iter().collect()),
            no_rollback_for: HashSet::new(),
        }
    }

    /// Exempt a kind from rollback.
    pub fn no_rollback_for(mut self, kind: ErrorKind) -> Self {
        self.no_rollback_for.insert(kind);
        self
    }

    pub fn rolls_back(&self, err: &TransactionError) -> bool {
        let kind = err.kind();
        if self.no_rollback_for.contains(&kind) {
            return false;
        }
        match &self.rollback_for {
            Some(kinds) => kinds.contains(&kind),
            None => true,
        }
    }
}

/// Runs operations inside a transaction according to a [`BoundaryPolicy`].
#[derive(Debug, Clone)]
pub struct TransactionBoundary {
    manager: TransactionManager,
    policy: BoundaryPolicy,
}

impl TransactionBoundary {
    pub fn new(manager: TransactionManager) -> Self {
        Self::with_policy(manager, BoundaryPolicy::default())
    }

    pub fn with_policy(manager: TransactionManager, policy: BoundaryPolicy) -> Self {
        Self { manager, policy }
    }

    pub fn policy(&self) -> &BoundaryPolicy {
        &self.policy
    }

    /// Call `operation` inside a transaction.
    ///
    /// Success commits. An error the policy rolls back for rolls back and is
    /// re-raised; any other error commits first, then is re-raised.
    pub fn invoke<T, F>(&self, operation: F) -> TransactionResult<Outcome<T>>
    where
        F: FnOnce() -> TransactionResult<T>,
    {
        let ctx = self.manager.begin()?;
        let guard = CompletionGuard::new(&self.manager, &ctx);
        let result = operation();
        guard.disarm();

        match result {
            Ok(value) => complete(&self.manager, &ctx, value),
            Err(e) if self.policy.rolls_back(&e) => {
                debug!(tx_id = ctx.id(), kind = %e.kind(), "error triggers rollback");
                Err(rollback_after_error(&self.manager, &ctx, e))
            }
            Err(e) => {
                debug!(tx_id = ctx.id(), kind = %e.kind(), "error exempt from rollback, committing");
                match self.manager.commit(&ctx) {
                    Ok(()) | Err(TransactionError::RollbackOnlyCommitAttempted { .. }) => Err(e),
                    Err(commit) => Err(commit),
                }
            }
        }
    }
}
