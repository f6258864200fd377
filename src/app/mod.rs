//! Application API and REPL interface.
//!
//! [`QueueApp`] wires a resource manager, a registered transaction manager
//! and the demarcation strategies to one configured queue; [`Repl`] drives
//! it from the command line.

mod api;
mod repl;

pub use api::{AppConfig, AppError, AppResult, AppStats, QueueApp};
pub use repl::{Command, Repl, ReplConfig};
