use samyama_ogm::{
    Config, Database, GraphStore, LifecycleEvent, LifecycleListener, Node, NodeId, OgmError,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Reads a node's name while the database shuts down
struct ShutdownReader {
    node: NodeId,
    seen: Mutex<Option<String>>,
}

impl LifecycleListener for ShutdownReader {
    fn on_event(&self, event: &LifecycleEvent<'_>) -> anyhow::Result<()> {
        if let LifecycleEvent::Shutdown(db) = event {
            let node = Node::load(self.node, db)?
                .ok_or_else(|| anyhow::anyhow!("node vanished"))?;
            let name = node.node().get_property("name")?;
            *self.seen.lock().unwrap() = name.and_then(|v| v.as_string().map(str::to_string));
        }
        Ok(())
    }
}

/// Fails on the named event while `armed` is set
struct Tripwire {
    event: &'static str,
    armed: AtomicBool,
}

impl Tripwire {
    fn new(event: &'static str) -> Arc<Self> {
        Arc::new(Self {
            event,
            armed: AtomicBool::new(true),
        })
    }
}

impl LifecycleListener for Tripwire {
    fn on_event(&self, event: &LifecycleEvent<'_>) -> anyhow::Result<()> {
        if event.name() == self.event && self.armed.load(Ordering::SeqCst) {
            anyhow::bail!("tripwire on {}", self.event);
        }
        Ok(())
    }
}

#[test]
fn test_running_reflects_lifecycle() {
    let db = Database::new(Config::in_memory());
    assert!(!db.running());

    db.start().unwrap();
    assert!(db.running());

    db.shutdown().unwrap();
    assert!(!db.running());
}

#[test]
fn test_double_start_is_misuse() {
    let db = Database::in_memory();
    db.start().unwrap();

    let err = db.start().unwrap_err();
    assert!(matches!(err, OgmError::LifecycleMisuse(_)));
    assert!(db.running());
}

#[test]
fn test_shutdown_when_stopped_is_noop() {
    let db = Database::in_memory();
    db.shutdown().unwrap();
    assert!(!db.running());
}

#[test]
fn test_entity_operations_require_running_database() {
    let db = Database::in_memory();
    assert!(matches!(Node::create(&db), Err(OgmError::LifecycleMisuse(_))));
    assert!(matches!(db.begin_tx(), Err(OgmError::LifecycleMisuse(_))));
    assert!(matches!(
        Node::load(NodeId::new(1), &db),
        Err(OgmError::LifecycleMisuse(_))
    ));
    assert!(db.each_node().is_err());
}

#[test]
fn test_shutdown_listener_sees_open_store() {
    let db = Database::in_memory();
    db.start().unwrap();

    let alice = Node::create(&db).unwrap();
    alice.set_property("name", "Alice").unwrap();

    let reader = Arc::new(ShutdownReader {
        node: alice.id(),
        seen: Mutex::new(None),
    });
    db.add_listener(reader.clone());

    db.shutdown().unwrap();
    assert_eq!(reader.seen.lock().unwrap().as_deref(), Some("Alice"));
}

#[test]
fn test_failing_shutdown_keeps_database_serving() {
    let db = Database::in_memory();
    db.indexes().node_indexer("Node").index("name").unwrap();
    db.start().unwrap();
    let node = Node::create(&db).unwrap();

    let tripwire = Tripwire::new("shutdown");
    db.add_listener(tripwire.clone());

    let err = db.shutdown().unwrap_err();
    assert!(matches!(err, OgmError::ListenerFailure { event: "shutdown", .. }));
    assert!(db.running());

    // commits still reach the indexes and the listeners
    node.set_property("name", "Alice").unwrap();
    let found = db.indexes().node_indexer("Node").find("name", "Alice").unwrap();
    assert_eq!(found, vec![node.handle().entity_id()]);

    let creation = Tripwire::new("node_created");
    db.add_listener(creation.clone());
    let err = Node::create(&db).unwrap_err();
    assert!(matches!(err, OgmError::ListenerFailure { event: "commit", .. }));
    creation.armed.store(false, Ordering::SeqCst);

    tripwire.armed.store(false, Ordering::SeqCst);
    db.shutdown().unwrap();
    assert!(!db.running());
}

#[test]
fn test_failing_start_listener_propagates() {
    let db = Database::in_memory();
    db.add_listener(Tripwire::new("started"));

    let err = db.start().unwrap_err();
    assert!(matches!(err, OgmError::ListenerFailure { event: "started", .. }));
    // the store was opened before the notification
    assert!(db.running());
}

#[test]
fn test_listeners_run_in_registration_order() {
    struct Named(&'static str, Arc<Mutex<Vec<&'static str>>>);

    impl LifecycleListener for Named {
        fn on_event(&self, event: &LifecycleEvent<'_>) -> anyhow::Result<()> {
            if let LifecycleEvent::Started(_) = event {
                self.1.lock().unwrap().push(self.0);
            }
            Ok(())
        }
    }

    let order = Arc::new(Mutex::new(Vec::new()));
    let db = Database::in_memory();
    db.add_listener(Arc::new(Named("first", order.clone())));
    db.add_listener(Arc::new(Named("second", order.clone())));
    db.add_listener(Arc::new(Named("third", order.clone())));

    db.start().unwrap();
    assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
}

#[test]
fn test_drop_closes_store() {
    let store: Arc<dyn GraphStore>;
    {
        let db = Database::in_memory();
        db.start().unwrap();
        store = db.store().unwrap();
        assert!(store.is_open());
    }
    assert!(!store.is_open());
}

#[test]
fn test_custom_store_factory() {
    let opened = Arc::new(AtomicBool::new(false));
    let flag = opened.clone();
    let db = Database::with_store(Config::in_memory(), move |config: &Config| {
        flag.store(true, Ordering::SeqCst);
        config.open_store()
    });

    assert!(!opened.load(Ordering::SeqCst));
    db.start().unwrap();
    assert!(opened.load(Ordering::SeqCst));
}
