use anyhow::Context;
use samyama_ogm::{
    Config, Database, Direction, LifecycleEvent, LifecycleListener, Node, NodeWrapper,
    PropertyMap, Relationship,
};
use std::sync::Arc;

/// Domain type used by the demo
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

impl Person {
    fn name(&self) -> String {
        self.0
            .get_property("name")
            .ok()
            .flatten()
            .and_then(|value| value.as_string().map(str::to_string))
            .unwrap_or_default()
    }
}

/// Prints lifecycle events as they happen
struct EventPrinter;

impl LifecycleListener for EventPrinter {
    fn on_event(&self, event: &LifecycleEvent<'_>) -> anyhow::Result<()> {
        match event {
            LifecycleEvent::Started(_) => println!("  [event] database started"),
            LifecycleEvent::Shutdown(db) => {
                let nodes = db.each_node()?.count();
                println!("  [event] database shutting down with {} node(s)", nodes);
            }
            LifecycleEvent::PropertyChanged(change) => {
                println!("  [event] {}.{} changed", change.entity, change.key)
            }
            other => println!("  [event] {}", other.name()),
        }
        Ok(())
    }
}

fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    println!("Samyama OGM v{}", samyama_ogm::version());
    println!("==========================================");
    println!();

    let config = match std::env::args().nth(1) {
        Some(path) => Config::from_file(&path).with_context(|| format!("loading {}", path))?,
        None => Config::in_memory(),
    };
    println!("Storage: {}", config.location());

    let db = Database::new(config);
    db.wrappers().register_node::<Person>();
    db.add_listener(Arc::new(EventPrinter));
    db.indexes()
        .node_indexer(Person::CLASS_NAME)
        .index("name")?;
    db.indexes().rel_indexer("friend").index("since")?;

    db.start()?;
    demo_friends(&db)?;
    db.shutdown()?;

    Ok(())
}

fn demo_friends(db: &Database) -> anyhow::Result<()> {
    println!("\n=== Typed nodes and relationships ===");

    let mut props = PropertyMap::new();
    props.insert("name".to_string(), "Alice".into());
    let alice = Node::create_typed::<Person>(db, Some(props))?;

    let mut props = PropertyMap::new();
    props.insert("name".to_string(), "Bob".into());
    let bob = Node::create_typed::<Person>(db, Some(props))?;
    println!("✓ Created {} and {}", alice.name(), bob.name());

    let mut props = PropertyMap::new();
    props.insert("since".to_string(), 2001i64.into());
    let handle = Relationship::create(db, "friend", &alice, &bob, Some(props))?;

    let Some(friendship) = Relationship::load(handle.id(), db)? else {
        anyhow::bail!("relationship {} vanished", handle.id());
    };
    let rel = friendship.relationship();
    let start = rel.start_node()?;
    let end = rel.end_node()?;
    println!(
        "✓ {} -[friend since {}]-> {}",
        start
            .downcast_ref::<Person>()
            .map(Person::name)
            .unwrap_or_default(),
        rel.get_property("since")?
            .map(|value| value.to_string())
            .unwrap_or_default(),
        end.downcast_ref::<Person>()
            .map(Person::name)
            .unwrap_or_default(),
    );

    println!("\n=== Index lookups ===");
    let found = db.indexes().node_indexer(Person::CLASS_NAME).find("name", "Bob")?;
    println!("✓ Person.name = Bob -> {:?}", found);
    let found = db.indexes().rel_indexer("friend").find("since", 2001i64)?;
    println!("✓ friend.since = 2001 -> {:?}", found);

    println!("\n=== Navigation ===");
    for neighbour in alice.0.neighbours(Direction::Both, None)? {
        println!("✓ Alice knows {:?}", neighbour);
    }

    println!("\n=== Iteration ===");
    for node in db.each_node()? {
        println!("✓ {:?}", node);
    }

    println!("\n=== Deletion ===");
    rel.del()?;
    println!(
        "✓ friendship loadable after delete: {}",
        Relationship::load(handle.id(), db)?.is_some()
    );

    Ok(())
}
