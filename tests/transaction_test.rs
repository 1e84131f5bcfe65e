use samyama_ogm::{
    Database, GraphError, LifecycleEvent, LifecycleListener, Node, OgmError, PropertyValue,
    Relationship, TransactionData,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Records event names and committed change sets
#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<&'static str>>,
    commits: Mutex<Vec<TransactionData>>,
}

impl LifecycleListener for Recorder {
    fn on_event(&self, event: &LifecycleEvent<'_>) -> anyhow::Result<()> {
        self.events.lock().unwrap().push(event.name());
        Ok(())
    }

    fn on_commit(&self, data: &TransactionData) {
        self.commits.lock().unwrap().push(data.clone());
    }
}

/// Vetoes any commit that writes `frozen`
struct FrozenKey {
    armed: AtomicBool,
}

impl LifecycleListener for FrozenKey {
    fn on_event(&self, event: &LifecycleEvent<'_>) -> anyhow::Result<()> {
        if let LifecycleEvent::PropertyChanged(change) = event {
            if change.key == "frozen" && self.armed.load(Ordering::SeqCst) {
                anyhow::bail!("{} may not change", change.key);
            }
        }
        Ok(())
    }
}

fn running_db() -> Database {
    let db = Database::in_memory();
    db.start().unwrap();
    db
}

#[test]
fn test_commit_makes_changes_visible() {
    let db = running_db();
    let tx = db.begin_tx().unwrap();
    let node = Node::create(&db).unwrap();
    node.set_property("name", "Alice").unwrap();
    tx.commit().unwrap();

    let loaded = Node::load(node.id(), &db).unwrap().unwrap();
    assert_eq!(
        loaded.node().get_property("name").unwrap(),
        Some(PropertyValue::String("Alice".to_string()))
    );
}

#[test]
fn test_dropped_guard_rolls_back() {
    let db = running_db();
    let kept = Node::create(&db).unwrap();

    let created = {
        let _tx = db.begin_tx().unwrap();
        kept.set_property("name", "changed").unwrap();
        Node::create(&db).unwrap().id()
    };

    assert!(Node::load(created, &db).unwrap().is_none());
    assert_eq!(kept.get_property("name").unwrap(), None);
    assert_eq!(db.each_node().unwrap().count(), 1);
}

#[test]
fn test_explicit_rollback() {
    let db = running_db();
    let node = Node::create(&db).unwrap();
    node.set_property("n", 1i64).unwrap();

    let tx = db.begin_tx().unwrap();
    node.set_property("n", 2i64).unwrap();
    node.remove_property("n").unwrap();
    tx.rollback().unwrap();

    assert_eq!(node.get_property("n").unwrap(), Some(PropertyValue::Integer(1)));
}

#[test]
fn test_nested_transactions_join_outer() {
    let db = running_db();
    let outer = db.begin_tx().unwrap();
    let inner = db.begin_tx().unwrap();
    assert_eq!(outer.id(), inner.id());

    let node = Node::create(&db).unwrap();
    inner.commit().unwrap();
    outer.rollback().unwrap();

    assert!(Node::load(node.id(), &db).unwrap().is_none());
}

#[test]
fn test_inner_rollback_dooms_outer() {
    let db = running_db();
    let outer = db.begin_tx().unwrap();
    let node = Node::create(&db).unwrap();

    let inner = db.begin_tx().unwrap();
    node.set_property("name", "Bob").unwrap();
    inner.rollback().unwrap();

    let err = outer.commit().unwrap_err();
    assert!(matches!(
        err,
        OgmError::Store(GraphError::TransactionRolledBack(_))
    ));
    assert!(Node::load(node.id(), &db).unwrap().is_none());
}

#[test]
fn test_veto_rolls_back_whole_transaction() {
    let db = running_db();
    let veto = Arc::new(FrozenKey {
        armed: AtomicBool::new(true),
    });
    db.add_listener(veto.clone());

    let node = Node::create(&db).unwrap();

    let tx = db.begin_tx().unwrap();
    node.set_property("name", "Alice").unwrap();
    node.set_property("frozen", true).unwrap();
    let extra = Node::create(&db).unwrap();

    let err = tx.commit().unwrap_err();
    match err {
        OgmError::ListenerFailure { event, source } => {
            assert_eq!(event, "commit");
            assert!(format!("{:#}", source).contains("frozen may not change"));
        }
        other => panic!("unexpected error: {other}"),
    }

    assert_eq!(node.get_property("name").unwrap(), None);
    assert_eq!(node.get_property("frozen").unwrap(), None);
    assert!(Node::load(extra.id(), &db).unwrap().is_none());

    veto.armed.store(false, Ordering::SeqCst);
    node.set_property("frozen", true).unwrap();
    assert_eq!(
        node.get_property("frozen").unwrap(),
        Some(PropertyValue::Boolean(true))
    );
}

#[test]
fn test_commit_events_in_category_order() {
    let db = running_db();
    let a = Node::create(&db).unwrap();
    let b = Node::create(&db).unwrap();
    let doomed = Node::create(&db).unwrap();
    let friend = Relationship::create(&db, "friend", &a, &b, None).unwrap();

    let recorder = Arc::new(Recorder::default());
    db.add_listener(recorder.clone());

    let tx = db.begin_tx().unwrap();
    friend.delete().unwrap();
    doomed.del().unwrap();
    a.set_property("name", "Alice").unwrap();
    let c = Node::create(&db).unwrap();
    Relationship::create(&db, "friend", &a, &c, None).unwrap();
    tx.commit().unwrap();

    assert_eq!(
        *recorder.events.lock().unwrap(),
        vec![
            "node_created",
            "relationship_created",
            "property_changed",
            "relationship_deleted",
            "node_deleted",
        ]
    );

    let commits = recorder.commits.lock().unwrap();
    assert_eq!(commits.len(), 1);
    assert_eq!(commits[0].created_nodes, vec![c.id()]);
    assert_eq!(commits[0].deleted_nodes[0].id, doomed.id());
}

#[test]
fn test_rollback_notifies_no_listener() {
    let db = running_db();
    let recorder = Arc::new(Recorder::default());
    db.add_listener(recorder.clone());

    let tx = db.begin_tx().unwrap();
    Node::create(&db).unwrap();
    tx.rollback().unwrap();

    assert!(recorder.events.lock().unwrap().is_empty());
    assert!(recorder.commits.lock().unwrap().is_empty());
}

#[test]
fn test_transactions_are_per_thread() {
    let db = running_db();
    let tx = db.begin_tx().unwrap();
    let mine = Node::create(&db).unwrap().id();

    let theirs = std::thread::scope(|scope| {
        scope
            .spawn(|| Node::create(&db).unwrap().id())
            .join()
            .unwrap()
    });

    tx.rollback().unwrap();
    assert!(Node::load(mine, &db).unwrap().is_none());
    assert!(Node::load(theirs, &db).unwrap().is_some());
}

#[test]
fn test_uncommitted_node_cannot_be_linked_from_other_thread() {
    let db = running_db();
    let b = Node::create(&db).unwrap();

    let tx = db.begin_tx().unwrap();
    let x = Node::create(&db).unwrap();

    let linked = std::thread::scope(|scope| {
        scope
            .spawn(|| Relationship::create(&db, "friend", &x, &b, None).map(|r| r.id()))
            .join()
            .unwrap()
    });
    assert!(matches!(
        linked,
        Err(OgmError::Store(GraphError::WriteConflict { .. }))
    ));

    tx.rollback().unwrap();
    assert!(Node::load(x.id(), &db).unwrap().is_none());
    assert!(b.incoming(None).unwrap().is_empty());
    assert_eq!(db.each_node().unwrap().count(), 1);
}

#[test]
fn test_rollback_keeps_other_threads_committed_writes() {
    let db = running_db();
    let node = Node::create(&db).unwrap();
    node.set_property("name", "Alice").unwrap();

    let tx = db.begin_tx().unwrap();
    node.set_property("name", "Alicia").unwrap();

    let (renamed, aged) = std::thread::scope(|scope| {
        scope
            .spawn(|| (node.set_property("name", "Bob"), node.set_property("age", 30i64)))
            .join()
            .unwrap()
    });
    assert!(matches!(
        renamed,
        Err(OgmError::Store(GraphError::WriteConflict { .. }))
    ));
    aged.unwrap();

    tx.rollback().unwrap();
    assert_eq!(
        node.get_property("name").unwrap(),
        Some(PropertyValue::String("Alice".to_string()))
    );
    assert_eq!(node.get_property("age").unwrap(), Some(PropertyValue::Integer(30)));
}
