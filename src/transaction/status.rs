//! Transaction status.
//!
//! ```text
//! Active ──────────────┬──> Committed
//!   │                  └──> RolledBack
//!   └──> MarkedRollback ──> RolledBack
//! ```
//!
//! No transition leaves a terminal status.

use std::fmt;

/// Lifecycle status of a transaction context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TransactionStatus {
    #[default]
    Active,
    /// The only possible outcome is rollback.
    MarkedRollback,
    Committed,
    RolledBack,
}

impl TransactionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransactionStatus::Committed | TransactionStatus::RolledBack)
    }

    /// Writes are accepted only in this status.
    pub fn is_active(&self) -> bool {
        matches!(self, TransactionStatus::Active)
    }

    pub fn is_rollback_only(&self) -> bool {
        matches!(self, TransactionStatus::MarkedRollback)
    }

    /// Whether the lifecycle allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: TransactionStatus) -> bool {
        use TransactionStatus::*;
        matches!(
            (self, next),
            (Active, MarkedRollback)
                | (Active, Committed)
                | (Active, RolledBack)
                | (MarkedRollback, MarkedRollback)
                | (MarkedRollback, RolledBack)
        )
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionStatus::Active => write!(f, "ACTIVE"),
            TransactionStatus::MarkedRollback => write!(f, "MARKED_ROLLBACK"),
            TransactionStatus::Committed => write!(f, "COMMITTED"),
            TransactionStatus::RolledBack => write!(f, "ROLLED_BACK"),
        }
    }
}

impl std::str::FromStr for TransactionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().replace([' ', '-'], "_").as_str() {
            "ACTIVE" => Ok(TransactionStatus::Active),
            "MARKED_ROLLBACK" | "ROLLBACK_ONLY" => Ok(TransactionStatus::MarkedRollback),
            "COMMITTED" => Ok(TransactionStatus::Committed),
            "ROLLED_BACK" | "ROLLEDBACK" => Ok(TransactionStatus::RolledBack),
            _ => Err(format!("unknown transaction status: {}", s)),
        }
    }
}
