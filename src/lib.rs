//! queuetx - transactional writes to a write-only queue
//!
//! This crate coordinates a unit of work between a transaction manager and a
//! queue resource whose only primitive is "append a string". Writes made
//! inside a transaction become visible when it commits and are discarded
//! when it rolls back. The durable queue store keeps every queue in a git
//! repository, with one branch per open transaction.
//!
//! # Example
//!
//! ```no_run
//! use queuetx::app::QueueApp;
//!
//! let app = QueueApp::open("./queues").unwrap();
//! app.explicit("hello").unwrap();            // committed
//! app.explicit("rollback please").unwrap();  // rolled back
//! assert_eq!(app.read(None).unwrap(), vec!["hello"]);
//! ```

pub mod app;
pub mod demarcation;
pub mod resource;
pub mod storage;
pub mod transaction;
