use samyama_ogm::{
    Database, Node, NodeLike, NodeWrapper, PropertyMap, Relationship, RelationshipLike,
    RelationshipWrapper, CLASSNAME_PROPERTY,
};
use std::collections::HashSet;

struct Person(Node);

impl NodeWrapper for Person {
    const CLASS_NAME: &'static str = "Person";

    fn wrap(node: Node) -> Self {
        Person(node)
    }

    fn wrapped(&self) -> &Node {
        &self.0
    }
}

struct Company(Node);

impl NodeWrapper for Company {
    const CLASS_NAME: &'static str = "Company";

    fn wrap(node: Node) -> Self {
        Company(node)
    }

    fn wrapped(&self) -> &Node {
        &self.0
    }
}

struct Employment(Relationship);

impl RelationshipWrapper for Employment {
    const CLASS_NAME: &'static str = "Employment";

    fn wrap(relationship: Relationship) -> Self {
        Employment(relationship)
    }

    fn wrapped(&self) -> &Relationship {
        &self.0
    }
}

fn db() -> Database {
    let db = Database::in_memory();
    db.wrappers().register_node::<Person>();
    db.wrappers().register_node::<Company>();
    db.wrappers().register_relationship::<Employment>();
    db.start().unwrap();
    db
}

fn named(name: &str) -> Option<PropertyMap> {
    let mut props = PropertyMap::new();
    props.insert("name".to_string(), name.into());
    Some(props)
}

#[test]
fn test_create_typed_stamps_marker() {
    let db = db();
    let alice = Node::create_typed::<Person>(&db, named("Alice")).unwrap();

    assert_eq!(alice.0.class_marker().unwrap().as_deref(), Some("Person"));
    assert_eq!(
        alice.0.get_property("name").unwrap().unwrap().as_string(),
        Some("Alice")
    );
}

#[test]
fn test_load_resolves_registered_type() {
    let db = db();
    let alice = Node::create_typed::<Person>(&db, named("Alice")).unwrap();
    let plain = Node::create(&db).unwrap();

    let loaded = Node::load(alice.0.id(), &db).unwrap().unwrap();
    assert_eq!(loaded.class_name(), "Person");
    assert!(loaded.downcast_ref::<Person>().is_some());

    let loaded = Node::load(plain.id(), &db).unwrap().unwrap();
    assert_eq!(loaded.class_name(), "Node");
}

#[test]
fn test_unregistered_marker_falls_back() {
    let db = db();
    let node = Node::create(&db).unwrap();
    node.set_property(CLASSNAME_PROPERTY, "Robot").unwrap();

    let loaded = Node::load(node.id(), &db).unwrap().unwrap();
    assert!(loaded.is::<Node>());
    assert_eq!(loaded.node(), &node);
}

#[test]
fn test_navigation_returns_typed_wrappers() {
    let db = db();
    let alice = Node::create_typed::<Person>(&db, named("Alice")).unwrap();
    let acme = Node::create_typed::<Company>(&db, named("Acme")).unwrap();

    let job = Relationship::create_typed::<Employment>(&db, "works_at", &alice, &acme, None).unwrap();
    assert_eq!(job.0.rel_type().unwrap().as_str(), "works_at");

    let loaded = Relationship::load(job.0.id(), &db).unwrap().unwrap();
    assert!(loaded.is::<Employment>());

    let employer = loaded.relationship().end_node().unwrap();
    assert!(employer.is::<Company>());
    let employee = loaded.relationship().other_node(&*employer).unwrap();
    assert!(employee.is::<Person>());

    let jobs = alice.0.outgoing(None).unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].class_name(), "Employment");
}

#[test]
fn test_each_node_resolves_types() {
    let db = db();
    Node::create_typed::<Person>(&db, named("Alice")).unwrap();
    Node::create_typed::<Company>(&db, named("Acme")).unwrap();
    Node::create(&db).unwrap();

    let classes: Vec<&'static str> = db.each_node().unwrap().map(|n| n.class_name()).collect();
    assert_eq!(classes, vec!["Person", "Company", "Node"]);
}

#[test]
fn test_wrapper_identity_is_handle_identity() {
    let db = db();
    let alice = Node::create_typed::<Person>(&db, named("Alice")).unwrap();

    let typed = Node::load(alice.0.id(), &db).unwrap().unwrap();
    let rewrapped = db.wrappers().wrap_node(typed.node().handle().clone());
    let as_plain: &dyn NodeLike = typed.node();

    assert_eq!(&*typed, &*rewrapped);
    assert_eq!(&*typed, as_plain);

    let mut set: HashSet<Box<dyn NodeLike>> = HashSet::new();
    set.insert(typed);
    set.insert(rewrapped);
    assert_eq!(set.len(), 1);
}

#[test]
fn test_relationship_wrapper_equality() {
    let db = db();
    let a = Node::create(&db).unwrap();
    let b = Node::create(&db).unwrap();
    let handle = Relationship::create(&db, "knows", &a, &b, None).unwrap();

    let first = Relationship::load(handle.id(), &db).unwrap().unwrap();
    let second: Box<dyn RelationshipLike> = db.wrappers().wrap_relationship(handle.clone());
    assert_eq!(&*first, &*second);
    assert_eq!(first.relationship().handle(), &handle);
}
