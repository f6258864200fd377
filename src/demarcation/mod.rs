//! Ways of drawing a transaction boundary around application code.
//!
//! - [`ExplicitDemarcation`]: begin, write, then commit or roll back by hand
//! - [`TransactionTemplate`]: run a callback inside a transaction
//! - [`TransactionBoundary`]: wrap an operation with a rollback policy
//!
//! Every strategy leaves the transaction it started in a terminal state and
//! reports what happened as an [`Outcome`].

mod declarative;
mod explicit;
mod scoped;

pub use declarative::{BoundaryPolicy, TransactionBoundary};
pub use explicit::{ExplicitDemarcation, MatchMode, RollbackKeyword};
pub use scoped::TransactionTemplate;

use std::fmt;

use tracing::{error, warn};

use crate::transaction::{TransactionContext, TransactionError, TransactionManager, TransactionResult};

/// Terminal result of a demarcated unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    /// The strategy owned the transaction and committed it.
    Committed(T),
    /// The transaction was rolled back, for the given reason.
    RolledBack(String),
    /// The strategy joined an outer transaction; its owner decides.
    Participated(T),
}

impl<T> Outcome<T> {
    pub fn is_committed(&self) -> bool {
        matches!(self, Outcome::Committed(_))
    }

    pub fn is_rolled_back(&self) -> bool {
        matches!(self, Outcome::RolledBack(_))
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Outcome::Committed(v) | Outcome::Participated(v) => Some(v),
            Outcome::RolledBack(_) => None,
        }
    }

    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Outcome<U> {
        match self {
            Outcome::Committed(v) => Outcome::Committed(f(v)),
            Outcome::Participated(v) => Outcome::Participated(f(v)),
            Outcome::RolledBack(reason) => Outcome::RolledBack(reason),
        }
    }
}

impl<T: fmt::Display> fmt::Display for Outcome<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Committed(v) => write!(f, "committed: {}", v),
            Outcome::Participated(v) => write!(f, "joined outer transaction: {}", v),
            Outcome::RolledBack(reason) => write!(f, "rolled back: {}", reason),
        }
    }
}

/// Commit `ctx` and translate the result into an [`Outcome`].
pub(crate) fn complete<T>(
    manager: &TransactionManager,
    ctx: &TransactionContext,
    value: T,
) -> TransactionResult<Outcome<T>> {
    let was_rollback_only = ctx.is_rollback_only();
    match manager.commit(ctx) {
        Ok(()) if ctx.is_new_transaction() => Ok(Outcome::Committed(value)),
        Ok(()) if was_rollback_only => Ok(Outcome::RolledBack(format!(
            "transaction {} is marked rollback-only",
            ctx.id()
        ))),
        Ok(()) => Ok(Outcome::Participated(value)),
        Err(TransactionError::RollbackOnlyCommitAttempted { tx_id }) => Ok(Outcome::RolledBack(
            format!("transaction {} was marked rollback-only", tx_id),
        )),
        Err(e) => Err(e),
    }
}

/// Roll `ctx` back on purpose and report it.
pub(crate) fn abort<T>(
    manager: &TransactionManager,
    ctx: &TransactionContext,
    reason: impl Into<String>,
) -> TransactionResult<Outcome<T>> {
    manager.rollback(ctx)?;
    Ok(Outcome::RolledBack(reason.into()))
}

/// Roll `ctx` back because of `err`, returning the error to raise.
pub(crate) fn rollback_after_error(
    manager: &TransactionManager,
    ctx: &TransactionContext,
    err: TransactionError,
) -> TransactionError {
    if ctx.is_completed() {
        return err;
    }
    match manager.rollback(ctx) {
        Ok(()) => err,
        Err(rollback) => {
            error!(tx_id = ctx.id(), error = %rollback, "rollback after error failed");
            TransactionError::RollbackFailed {
                original: Box::new(err),
                rollback: Box::new(rollback),
            }
        }
    }
}

/// Rolls the transaction back if the scope is left without completing it,
/// which only happens when user code panics.
pub(crate) struct CompletionGuard<'a> {
    manager: &'a TransactionManager,
    ctx: &'a TransactionContext,
    armed: bool,
}

impl<'a> CompletionGuard<'a> {
    pub(crate) fn new(manager: &'a TransactionManager, ctx: &'a TransactionContext) -> Self {
        Self {
            manager,
            ctx,
            armed: true,
        }
    }

    pub(crate) fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for CompletionGuard<'_> {
    fn drop(&mut self) {
        if !self.armed || self.ctx.is_completed() {
            return;
        }
        warn!(tx_id = self.ctx.id(), "transaction scope abandoned, rolling back");
        if let Err(e) = self.manager.rollback(self.ctx) {
            error!(tx_id = self.ctx.id(), error = %e, "rollback of abandoned scope failed");
        }
    }
}
