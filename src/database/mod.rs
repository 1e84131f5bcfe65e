//! Database lifecycle
//!
//! A [`Database`] owns one graph store while it runs, together with the
//! event handler, wrapper registry and index registry that sit on top of it.
//!
//! ```
//! use samyama_ogm::{Config, Database, Node};
//!
//! let db = Database::new(Config::in_memory());
//! db.start().unwrap();
//! let alice = Node::create(&db).unwrap();
//! alice.set_property("name", "Alice").unwrap();
//! assert_eq!(db.each_node().unwrap().count(), 1);
//! db.shutdown().unwrap();
//! ```

pub mod event_handler;
pub mod transaction;

pub use event_handler::{EventHandler, LifecycleEvent, LifecycleListener};
pub use transaction::Transaction;

use crate::config::Config;
use crate::entity::{NodeLike, WrapperRegistry};
use crate::error::{OgmError, OgmResult};
use crate::graph::{GraphResult, GraphStore, NodeHandle, TransactionEventHandler};
use crate::index::{IndexManager, IndexProvider, IndexRegistry};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{info, warn};

/// Opens the store when a database starts
pub type StoreFactory = Box<dyn Fn(&Config) -> GraphResult<Arc<dyn GraphStore>> + Send + Sync>;

/// Handle to one embedded graph database
///
/// Constructing a `Database` does no I/O; the store is opened by
/// [`start`](Self::start) and closed by [`shutdown`](Self::shutdown) or when
/// the handle is dropped. `start` and `shutdown` must not race each other.
pub struct Database {
    config: Config,
    factory: StoreFactory,
    store: RwLock<Option<Arc<dyn GraphStore>>>,
    event_handler: Arc<EventHandler>,
    wrappers: Arc<WrapperRegistry>,
    indexes: Arc<IndexRegistry>,
    running: AtomicBool,
}

impl Database {
    /// Database on the embedded store described by `config`
    pub fn new(config: Config) -> Self {
        Self::with_store(config, |config: &Config| config.open_store())
    }

    pub fn in_memory() -> Self {
        Self::new(Config::in_memory())
    }

    /// Database on a store opened by `factory`
    pub fn with_store<F>(config: Config, factory: F) -> Self
    where
        F: Fn(&Config) -> GraphResult<Arc<dyn GraphStore>> + Send + Sync + 'static,
    {
        Self::with_backends(config, factory, Arc::new(IndexManager::new()))
    }

    /// Database on a store opened by `factory`, indexing into `index_provider`
    pub fn with_backends<F>(config: Config, factory: F, index_provider: Arc<dyn IndexProvider>) -> Self
    where
        F: Fn(&Config) -> GraphResult<Arc<dyn GraphStore>> + Send + Sync + 'static,
    {
        let indexes = Arc::new(IndexRegistry::new(index_provider));
        let event_handler = Arc::new(EventHandler::new());
        // Index maintenance runs before any application listener
        event_handler.add_listener(Arc::clone(&indexes) as Arc<dyn LifecycleListener>);

        Self {
            config,
            factory: Box::new(factory),
            store: RwLock::new(None),
            event_handler,
            wrappers: Arc::new(WrapperRegistry::new()),
            indexes,
            running: AtomicBool::new(false),
        }
    }

    /// Open the store and announce `Started`
    ///
    /// Fails with [`OgmError::LifecycleMisuse`] when already running. If a
    /// `Started` listener fails the database is left running and the error is
    /// returned.
    pub fn start(&self) -> OgmResult<()> {
        if self.running() {
            return Err(OgmError::LifecycleMisuse(
                "database is already running".to_string(),
            ));
        }

        info!("Starting database at {}", self.config.location());
        let store = (self.factory)(&self.config)?;

        if let Err(err) = self.indexes.bind(Arc::clone(&store)) {
            if let Err(close_err) = store.close() {
                warn!("Closing store after failed start: {}", close_err);
            }
            return Err(err.into());
        }
        store.register_commit_listener(self.commit_listener());

        *self.store.write().unwrap_or_else(PoisonError::into_inner) = Some(store);
        self.running.store(true, Ordering::Release);

        self.event_handler.notify_started(self)?;
        info!("Database started");
        Ok(())
    }

    /// Announce `Shutdown`, then close the store. Does nothing when not running.
    ///
    /// Listeners see the store still open. If one fails, the error is
    /// returned and the database stays running as before, commit events and
    /// index maintenance included; calling `shutdown` again retries.
    pub fn shutdown(&self) -> OgmResult<()> {
        if !self.running() {
            return Ok(());
        }
        let store = self
            .store
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let Some(store) = store else {
            self.running.store(false, Ordering::Release);
            return Ok(());
        };

        info!("Shutting down database");
        let listener = self.commit_listener();
        store.unregister_commit_listener(&listener);
        if let Err(err) = self.event_handler.notify_shutdown(self) {
            store.register_commit_listener(listener);
            return Err(err);
        }

        store.close()?;
        self.indexes.unbind();
        self.store
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.running.store(false, Ordering::Release);
        info!("Database shut down");
        Ok(())
    }

    pub fn running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Begin a transaction on the calling thread
    pub fn begin_tx(&self) -> OgmResult<Transaction> {
        Transaction::begin(self.store()?)
    }

    /// All nodes, each resolved to its wrapper
    ///
    /// The iterator is lazy and single-pass. Nodes created after the call are
    /// not yielded and nodes deleted before they are reached are skipped;
    /// beyond that, concurrent changes give no ordering guarantee.
    pub fn each_node(&self) -> OgmResult<impl Iterator<Item = Box<dyn NodeLike>>> {
        let store = self.store()?;
        let wrappers = Arc::clone(&self.wrappers);
        let ids = store.all_nodes()?;
        Ok(ids.map(move |id| wrappers.wrap_node(NodeHandle::new(id, Arc::clone(&store)))))
    }

    /// The open store; fails when the database is not running
    pub fn store(&self) -> OgmResult<Arc<dyn GraphStore>> {
        if !self.running() {
            return Err(OgmError::LifecycleMisuse(
                "database is not running".to_string(),
            ));
        }
        self.store
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| OgmError::LifecycleMisuse("database is not running".to_string()))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn wrappers(&self) -> &Arc<WrapperRegistry> {
        &self.wrappers
    }

    pub fn indexes(&self) -> &Arc<IndexRegistry> {
        &self.indexes
    }

    pub fn event_handler(&self) -> &Arc<EventHandler> {
        &self.event_handler
    }

    /// Shortcut for `event_handler().add_listener(..)`
    pub fn add_listener(&self, listener: Arc<dyn LifecycleListener>) {
        self.event_handler.add_listener(listener);
    }

    fn commit_listener(&self) -> Arc<dyn TransactionEventHandler> {
        Arc::clone(&self.event_handler) as Arc<dyn TransactionEventHandler>
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            warn!("Database shutdown on drop failed: {}", err);
        }
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("location", &self.config.location())
            .field("running", &self.running())
            .finish()
    }
}
