//! Queue application API - the operations the CLI exposes.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use crate::demarcation::{
    BoundaryPolicy, ExplicitDemarcation, MatchMode, Outcome, RollbackKeyword, TransactionBoundary,
    TransactionTemplate,
};
use crate::resource::{
    GitQueueStore, ResourceError, ResourceHandle, ResourceManager,
};
use crate::storage::{CommitInfo, GitRepository, InvalidNameError, QueueName, StorageError};
use crate::transaction::{
    Coordinator, ErrorKind, TransactionError, TransactionManager, TransactionRegistry,
    TransactionResult,
};

/// Result type for application operations.
pub type AppResult<T> = Result<T, AppError>;

/// Application errors.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("resource error: {0}")]
    Resource(#[from] ResourceError),

    #[error("transaction error: {0}")]
    Transaction(#[from] TransactionError),

    #[error("invalid queue name: {0}")]
    InvalidName(#[from] InvalidNameError),

    #[error("queue store not found: {0}")]
    NotFound(PathBuf),

    #[error("{0} is only available on the git-backed store")]
    Unsupported(&'static str),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Application configuration options.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Path to the queue store directory.
    pub path: PathBuf,
    /// Create if doesn't exist.
    pub create_if_missing: bool,
    /// Name the transaction manager is registered under.
    pub manager_name: String,
    /// Queue the operations write to.
    pub queue: String,
    /// Payloads carrying this word are rolled back.
    pub rollback_keyword: String,
    pub match_mode: MatchMode,
    /// Batch elements containing this marker abort the batch.
    pub error_marker: String,
    /// Enable verbose logging.
    pub verbose: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(".queuetx"),
            create_if_missing: true,
            manager_name: "queuetx".into(),
            queue: "EXAMPLE".into(),
            rollback_keyword: RollbackKeyword::DEFAULT.into(),
            match_mode: MatchMode::Contains,
            error_marker: "error".into(),
            verbose: false,
        }
    }
}

impl AppConfig {
    /// Create a new configuration with the given path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    pub fn queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = queue.into();
        self
    }

    pub fn rollback_keyword(mut self, keyword: impl Into<String>) -> Self {
        self.rollback_keyword = keyword.into();
        self
    }

    pub fn match_mode(mut self, mode: MatchMode) -> Self {
        self.match_mode = mode;
        self
    }

    pub fn error_marker(mut self, marker: impl Into<String>) -> Self {
        self.error_marker = marker.into();
        self
    }

    pub fn verbose(mut self, value: bool) -> Self {
        self.verbose = value;
        self
    }

    fn keyword(&self) -> RollbackKeyword {
        RollbackKeyword::new(&self.rollback_keyword).mode(self.match_mode)
    }
}

/// The queue application handle.
pub struct QueueApp {
    config: AppConfig,
    registry: TransactionRegistry,
    handle: ResourceHandle,
    resource: Arc<dyn ResourceManager>,
    git: Option<GitQueueStore>,
}

impl QueueApp {
    /// Open or create a git-backed queue store at the given path.
    pub fn open(path: impl AsRef<Path>) -> AppResult<Self> {
        Self::open_with_config(AppConfig::new(path.as_ref()))
    }

    /// Open a git-backed queue store with custom configuration.
    pub fn open_with_config(config: AppConfig) -> AppResult<Self> {
        let repo = if config.create_if_missing {
            GitRepository::open_or_init(&config.path)?
        } else if config.path.exists() {
            GitRepository::open(&config.path)?
        } else {
            return Err(AppError::NotFound(config.path.clone()));
        };

        let store = GitQueueStore::new(repo);
        let cleaned = store.cleanup_abandoned()?;
        if cleaned > 0 {
            warn!(cleaned, "discarded transactions left over from a previous run");
        }

        let mut app = Self::with_resource(config, Arc::new(store.clone()))?;
        app.git = Some(store);
        Ok(app)
    }

    /// Run against any resource manager, e.g. an in-memory one.
    pub fn with_resource(config: AppConfig, resource: Arc<dyn ResourceManager>) -> AppResult<Self> {
        let handle = ResourceHandle::new(&config.queue)?;
        let registry = TransactionRegistry::new();
        registry.bind(TransactionManager::named(&config.manager_name, Arc::clone(&resource)));
        info!(
            manager = %config.manager_name,
            resource = resource.name(),
            queue = %handle.name(),
            "queue application ready"
        );

        Ok(Self {
            config,
            registry,
            handle,
            resource,
            git: None,
        })
    }

    /// Get the configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn registry(&self) -> &TransactionRegistry {
        &self.registry
    }

    pub fn queue(&self) -> &QueueName {
        self.handle.name()
    }

    /// Locate the transaction manager.
    pub fn manager(&self) -> TransactionResult<TransactionManager> {
        self.registry.lookup(&self.config.manager_name)
    }

    fn coordinator(&self) -> TransactionResult<Coordinator> {
        Ok(Coordinator::new(self.manager()?))
    }

    /// Write `text` with explicit begin/commit; the rollback keyword rolls it back.
    pub fn explicit(&self, text: &str) -> AppResult<Outcome<String>> {
        let strategy = ExplicitDemarcation::new(self.coordinator()?, self.handle.clone())
            .with_keyword(self.config.keyword());
        Ok(strategy.run(text)?)
    }

    /// Write `text` inside a transaction template.
    ///
    /// The rollback keyword marks the transaction rollback-only. A rejected
    /// write does the same and is reported as a rollback, not an error.
    pub fn template(&self, text: &str) -> AppResult<Outcome<String>> {
        let coordinator = self.coordinator()?;
        let template = TransactionTemplate::new(coordinator.manager().clone());
        let keyword = self.config.keyword();

        let outcome = template.execute(|ctx| {
            match coordinator.write(&self.handle, text) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::ResourceWriteFailed => {
                    warn!(tx_id = ctx.id(), error = %e, "write rejected inside template");
                    return Ok(text.to_string());
                }
                Err(e) => return Err(e),
            }
            if keyword.matches(text) {
                coordinator.manager().mark_rollback_only(ctx)?;
            }
            Ok(text.to_string())
        })?;
        Ok(outcome)
    }

    /// Write `text` inside a declarative boundary; the rollback keyword
    /// raises an application error that rolls it back.
    pub fn declarative(&self, text: &str) -> AppResult<Outcome<String>> {
        let coordinator = self.coordinator()?;
        let boundary = TransactionBoundary::new(coordinator.manager().clone());
        let keyword = self.config.keyword();

        let result = boundary.invoke(|| {
            coordinator.write(&self.handle, text)?;
            if keyword.matches(text) {
                return Err(TransactionError::application(format!(
                    "rollback requested by payload '{}'",
                    text
                )));
            }
            Ok(text.to_string())
        });
        rolled_back_on_error(result)
    }

    /// Write every item in one transaction. An item containing the error
    /// marker aborts the whole batch.
    pub fn batch<S: AsRef<str>>(&self, items: &[S]) -> AppResult<Outcome<usize>> {
        let coordinator = self.coordinator()?;
        let boundary =
            TransactionBoundary::with_policy(coordinator.manager().clone(), BoundaryPolicy::rollback_on_all());
        let marker = self.config.error_marker.as_str();

        let result = boundary.invoke(|| {
            for item in items {
                let item = item.as_ref();
                if item.contains(marker) {
                    return Err(TransactionError::application(format!(
                        "batch item '{}' contains the error marker '{}'",
                        item, marker
                    )));
                }
                coordinator.write(&self.handle, item)?;
            }
            Ok(items.len())
        });
        rolled_back_on_error(result)
    }

    /// Committed items of a queue (the configured one by default).
    pub fn read(&self, queue: Option<&str>) -> AppResult<Vec<String>> {
        let queue = match queue {
            Some(name) => QueueName::new(name)?,
            None => self.handle.name().clone(),
        };
        Ok(self.resource.read_queue(&queue)?)
    }

    pub fn queues(&self) -> AppResult<Vec<QueueName>> {
        Ok(self.resource.list_queues()?)
    }

    /// Commit history of the store, newest first.
    pub fn history(&self, limit: Option<usize>) -> AppResult<Vec<CommitInfo>> {
        match &self.git {
            Some(store) => Ok(store.history(limit)?),
            None => Err(AppError::Unsupported("history")),
        }
    }

    pub fn stats(&self) -> AppResult<AppStats> {
        let queues = self.resource.list_queues()?;
        let mut total_items = 0;
        for queue in &queues {
            total_items += self.resource.read_queue(queue)?.len();
        }
        let active_transactions = self.manager().map(|m| m.active_count()).unwrap_or(0);
        let open_branches = match &self.git {
            Some(store) => Some(store.stats()?.open_transaction_branches),
            None => None,
        };

        Ok(AppStats {
            resource: self.resource.name().to_string(),
            queues: queues.len(),
            total_items,
            active_transactions,
            open_branches,
        })
    }

    /// Stop accepting new transactions.
    pub fn shutdown(&self) {
        if let Ok(manager) = self.manager() {
            manager.shutdown();
        }
    }
}

/// Errors raised inside a boundary that rolled the transaction back are
/// reported as a rollback outcome.
fn rolled_back_on_error<T>(result: TransactionResult<Outcome<T>>) -> AppResult<Outcome<T>> {
    match result {
        Ok(outcome) => Ok(outcome),
        Err(e) if matches!(e.kind(), ErrorKind::Application | ErrorKind::ResourceWriteFailed) => {
            Ok(Outcome::RolledBack(e.to_string()))
        }
        Err(e) => Err(e.into()),
    }
}

/// Application statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppStats {
    /// Resource manager name.
    pub resource: String,
    /// Number of non-empty queues.
    pub queues: usize,
    /// Committed items across all queues.
    pub total_items: usize,
    /// Number of active transactions.
    pub active_transactions: usize,
    /// Transaction branches on disk, git store only.
    pub open_branches: Option<usize>,
}

impl fmt::Display for AppStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Queue Statistics ({}):", self.resource)?;
        writeln!(f, "  Queues: {}", self.queues)?;
        writeln!(f, "  Total Items: {}", self.total_items)?;
        write!(f, "  Active Transactions: {}", self.active_transactions)?;
        if let Some(branches) = self.open_branches {
            write!(f, "\n  Open Transaction Branches: {}", branches)?;
        }
        Ok(())
    }
}
