//! Transaction management for queuetx.
//!
//! A transaction is a unit of work over the queue resource manager. The
//! manager keeps at most one active transaction per flow (thread); a nested
//! `begin` joins it. Writes go through the [`Coordinator`], which refuses
//! them outside a transaction and marks the transaction rollback-only when
//! the resource rejects one.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   TransactionManager                        │
//! │   (begin/join, commit, rollback, rollback-only, per flow)   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!        ┌─────────────────────┼─────────────────────┐
//!        │                     │                     │
//!        ▼                     ▼                     ▼
//!  ┌─────────────┐       ┌─────────────┐       ┌─────────────┐
//!  │ Transaction │       │ Coordinator │       │  Resource   │
//!  │   Context   │       │  (writes)   │       │  Manager    │
//!  └─────────────┘       └─────────────┘       └─────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use queuetx::resource::{InMemoryQueues, ResourceHandle};
//! use queuetx::transaction::{Coordinator, TransactionManager};
//!
//! let manager = TransactionManager::new(Arc::new(InMemoryQueues::new()));
//! let coordinator = Coordinator::new(manager.clone());
//! let queue = ResourceHandle::new("EXAMPLE")?;
//!
//! let ctx = manager.begin()?;
//! coordinator.write(&queue, "hello")?;
//! manager.commit(&ctx)?;  // or manager.rollback(&ctx)
//! ```

mod context;
mod coordinator;
mod error;
mod manager;
mod registry;
mod status;

pub use context::{TransactionContext, WriteRecord};
pub use coordinator::Coordinator;
pub use error::{ErrorKind, TransactionError, TransactionResult};
pub use manager::{TransactionManager, DEFAULT_MANAGER_NAME};
pub use registry::TransactionRegistry;
pub use status::TransactionStatus;
