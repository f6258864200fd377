//! Explicit begin/commit/rollback demarcation.

use std::fmt;

use tracing::debug;

use crate::demarcation::{complete, rollback_after_error, Outcome};
use crate::resource::ResourceHandle;
use crate::transaction::{Coordinator, TransactionResult};

/// How a payload is compared with the rollback keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchMode {
    /// Payload contains the keyword anywhere.
    #[default]
    Contains,
    /// Payload is the keyword.
    Exact,
}

/// Keyword that turns a write into a rollback request. Matching ignores case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollbackKeyword {
    keyword: String,
    mode: MatchMode,
}

impl RollbackKeyword {
    pub const DEFAULT: &'static str = "rollback";

    pub fn new(keyword: impl Into<String>) -> Self {
        Self {
            keyword: keyword.into().to_lowercase(),
            mode: MatchMode::default(),
        }
    }

    pub fn mode(mut self, mode: MatchMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn as_str(&self) -> &str {
        &self.keyword
    }

    pub fn matches(&self, payload: &str) -> bool {
        let payload = payload.to_lowercase();
        match self.mode {
            MatchMode::Contains => payload.contains(&self.keyword),
            MatchMode::Exact => payload.trim() == self.keyword,
        }
    }
}

impl Default for RollbackKeyword {
    fn default() -> Self {
        Self::new(Self::DEFAULT)
    }
}

impl fmt::Display for RollbackKeyword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.keyword)
    }
}

/// Writes one payload per transaction, demarcated by hand.
#[derive(Debug, Clone)]
pub struct ExplicitDemarcation {
    coordinator: Coordinator,
    handle: ResourceHandle,
    keyword: RollbackKeyword,
}

impl ExplicitDemarcation {
    pub fn new(coordinator: Coordinator, handle: ResourceHandle) -> Self {
        Self {
            coordinator,
            handle,
            keyword: RollbackKeyword::default(),
        }
    }

    pub fn with_keyword(mut self, keyword: RollbackKeyword) -> Self {
        self.keyword = keyword;
        self
    }

    /// Begin, write `payload`, then roll back if it carries the rollback
    /// keyword and commit otherwise.
    ///
    /// A failed write rolls back and is returned; if that rollback fails
    /// too, both errors are returned together.
    pub fn run(&self, payload: &str) -> TransactionResult<Outcome<String>> {
        let manager = self.coordinator.manager();
        let ctx = manager.begin()?;

        if let Err(e) = self.coordinator.write(&self.handle, payload) {
            return Err(rollback_after_error(manager, &ctx, e));
        }

        if self.keyword.matches(payload) {
            debug!(tx_id = ctx.id(), keyword = %self.keyword, "rollback requested by payload");
            manager.rollback(&ctx)?;
            return Ok(Outcome::RolledBack(format!(
                "rollback keyword '{}' found in payload",
                self.keyword
            )));
        }

        complete(manager, &ctx, payload.to_string())
    }
}
