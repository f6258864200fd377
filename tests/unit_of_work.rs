//! End-to-end behaviour of the coordinator against both queue stores.

use std::sync::Arc;
use std::thread;

use tempfile::TempDir;

use queuetx::demarcation::{ExplicitDemarcation, Outcome, TransactionBoundary, TransactionTemplate};
use queuetx::resource::{
    GitQueueStore, InMemoryQueues, ResourceError, ResourceErrorKind, ResourceHandle,
    ResourceManager,
};
use queuetx::transaction::{
    Coordinator, ErrorKind, TransactionError, TransactionManager, TransactionRegistry,
    TransactionStatus,
};

struct Fixture {
    _dir: Option<TempDir>,
    resource: Arc<dyn ResourceManager>,
    manager: TransactionManager,
    coordinator: Coordinator,
    queue: ResourceHandle,
}

impl Fixture {
    fn memory() -> Self {
        Self::build(None, Arc::new(InMemoryQueues::new()))
    }

    fn git() -> Self {
        let dir = TempDir::new().unwrap();
        let store = GitQueueStore::open_or_init(dir.path()).unwrap();
        Self::build(Some(dir), Arc::new(store))
    }

    fn build(dir: Option<TempDir>, resource: Arc<dyn ResourceManager>) -> Self {
        let manager = TransactionManager::new(Arc::clone(&resource));
        Self {
            _dir: dir,
            coordinator: Coordinator::new(manager.clone()),
            resource,
            manager,
            queue: ResourceHandle::new("EXAMPLE").unwrap(),
        }
    }

    fn visible(&self) -> Vec<String> {
        self.resource.read_queue(self.queue.name()).unwrap()
    }
}

fn both() -> [Fixture; 2] {
    [Fixture::memory(), Fixture::git()]
}

#[test]
fn atomicity_commit_and_rollback() {
    for fx in both() {
        let ctx = fx.manager.begin().unwrap();
        fx.coordinator.write(&fx.queue, "one").unwrap();
        fx.coordinator.write(&fx.queue, "two").unwrap();
        assert!(fx.visible().is_empty(), "uncommitted writes leaked");
        fx.manager.commit(&ctx).unwrap();
        assert_eq!(fx.visible(), vec!["one", "two"]);

        let ctx = fx.manager.begin().unwrap();
        fx.coordinator.write(&fx.queue, "three").unwrap();
        fx.manager.rollback(&ctx).unwrap();
        assert_eq!(fx.visible(), vec!["one", "two"]);
    }
}

#[test]
fn nested_begin_joins_and_defers() {
    for fx in both() {
        let outer = fx.manager.begin().unwrap();
        let inner = fx.manager.begin().unwrap();
        assert!(outer.is_new_transaction());
        assert!(!inner.is_new_transaction());
        assert_eq!(inner.id(), outer.id());

        fx.coordinator.write(&fx.queue, "joined").unwrap();
        fx.manager.commit(&inner).unwrap();
        assert!(fx.visible().is_empty());

        fx.manager.commit(&outer).unwrap();
        assert_eq!(fx.visible(), vec!["joined"]);
    }
}

#[test]
fn rollback_only_is_monotonic() {
    for fx in both() {
        let ctx = fx.manager.begin().unwrap();
        fx.coordinator.write(&fx.queue, "doomed").unwrap();
        fx.manager.mark_rollback_only(&ctx).unwrap();
        fx.manager.mark_rollback_only(&ctx).unwrap();

        let err = fx.manager.commit(&ctx).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RollbackOnlyCommitAttempted);
        assert_eq!(ctx.status(), TransactionStatus::RolledBack);
        assert!(fx.visible().is_empty());

        let err = fx.manager.commit(&ctx).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IllegalState);
    }
}

#[test]
fn writes_require_active_transaction() {
    for fx in both() {
        let err = fx.coordinator.write(&fx.queue, "orphan").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoActiveTransaction);
        assert!(fx.visible().is_empty());
        assert!(fx.resource.list_queues().unwrap().is_empty());
    }
}

#[test]
fn batch_is_all_or_nothing() {
    for fx in both() {
        let boundary = TransactionBoundary::new(fx.manager.clone());
        let batch = |items: &[&str]| {
            boundary.invoke(|| {
                for item in items {
                    if item.contains("error") {
                        return Err(TransactionError::application("error marker in batch"));
                    }
                    fx.coordinator.write(&fx.queue, item)?;
                }
                Ok(items.len())
            })
        };

        assert_eq!(
            batch(&["hello", "cics", "transaction"][..]).unwrap(),
            Outcome::Committed(3)
        );
        let err = batch(&["goodbye", "error", "fred"][..]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Application);
        assert_eq!(fx.visible(), vec!["hello", "cics", "transaction"]);
    }
}

#[test]
fn keyword_rolls_back_explicit_write() {
    for fx in both() {
        let strategy = ExplicitDemarcation::new(fx.coordinator.clone(), fx.queue.clone());

        assert!(strategy.run("rollback from X").unwrap().is_rolled_back());
        assert!(fx.visible().is_empty());

        let outcome = strategy.run("hello CICS from X").unwrap();
        assert_eq!(outcome, Outcome::Committed("hello CICS from X".to_string()));
        assert_eq!(fx.visible(), vec!["hello CICS from X"]);
    }
}

#[test]
fn registry_lookup_is_idempotent() {
    let fx = Fixture::memory();
    let registry = TransactionRegistry::new();
    registry.bind(fx.manager.clone());

    let first = registry.lookup("default").unwrap();
    let second = registry.lookup("default").unwrap();
    let ctx = first.begin().unwrap();
    let joined = second.begin().unwrap();
    assert!(!joined.is_new_transaction());
    assert_eq!(joined.id(), ctx.id());
    first.rollback(&ctx).unwrap();

    let err = registry.lookup("missing").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ManagerUnavailable);
}

#[test]
fn failed_write_forces_rollback() {
    let queues = InMemoryQueues::new().with_write_guard(|_, payload| {
        if payload.len() > 8 {
            Err(ResourceError::new(ResourceErrorKind::LengthError, "too long"))
        } else {
            Ok(())
        }
    });
    let fx = Fixture::build(None, Arc::new(queues));
    let template = TransactionTemplate::new(fx.manager.clone());

    let outcome = template
        .execute(|_| {
            fx.coordinator.write(&fx.queue, "short")?;
            if let Err(e) = fx.coordinator.write(&fx.queue, "far too long") {
                assert_eq!(e.kind(), ErrorKind::ResourceWriteFailed);
            }
            Ok(())
        })
        .unwrap();

    assert!(outcome.is_rolled_back());
    assert!(fx.visible().is_empty());
}

#[test]
fn concurrent_flows_are_isolated() {
    let fx = Fixture::git();
    let handles: Vec<_> = (0..4)
        .map(|n| {
            let manager = fx.manager.clone();
            let coordinator = fx.coordinator.clone();
            let queue = fx.queue.clone();
            thread::spawn(move || {
                let ctx = manager.begin().unwrap();
                assert!(ctx.is_new_transaction());
                coordinator.write(&queue, &format!("flow-{}", n)).unwrap();
                if n % 2 == 0 {
                    manager.commit(&ctx).unwrap();
                } else {
                    manager.rollback(&ctx).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let mut visible = fx.visible();
    visible.sort();
    assert_eq!(visible, vec!["flow-0", "flow-2"]);
    assert_eq!(fx.manager.active_count(), 0);
}
