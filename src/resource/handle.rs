use std::fmt;

use crate::storage::{InvalidNameError, QueueName};

/// Accessor bound to one named queue.
///
/// Handles carry no state beyond the queue name; writes go through a
/// [`Coordinator`](crate::transaction::Coordinator) so they are always tied
/// to the caller's active transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceHandle {
    name: QueueName,
}

impl ResourceHandle {
    pub fn new(name: impl Into<String>) -> Result<Self, InvalidNameError> {
        Ok(Self {
            name: QueueName::new(name)?,
        })
    }

    pub fn name(&self) -> &QueueName {
        &self.name
    }
}

impl From<QueueName> for ResourceHandle {
    fn from(name: QueueName) -> Self {
        Self { name }
    }
}

impl fmt::Display for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "queue:{}", self.name)
    }
}
