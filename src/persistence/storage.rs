//! RocksDB storage layer implementation
//!
//! Committed node and relationship records live in their own column families.
//! Each commit is written as one `WriteBatch`, together with the id counters,
//! so a reopened store never hands out an id twice.

use crate::graph::{EdgeId, EdgeRecord, NodeId, NodeRecord};
use rocksdb::{ColumnFamilyDescriptor, Options, WriteBatch, DB};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

const CF_NODES: &str = "nodes";
const CF_EDGES: &str = "edges";
const CF_META: &str = "meta";
const COUNTERS_KEY: &[u8] = b"counters";

/// Storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    /// RocksDB error
    #[error("RocksDB error: {0}")]
    RocksDb(#[from] rocksdb::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Column family error
    #[error("Column family error: {0}")]
    ColumnFamily(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Tunables for the on-disk store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageOptions {
    /// RocksDB write buffer size in megabytes
    pub write_buffer_mb: usize,
    /// Compress record column families with LZ4
    pub compression: bool,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            write_buffer_mb: 64,
            compression: true,
        }
    }
}

/// Next ids to allocate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdCounters {
    pub next_node_id: u64,
    pub next_edge_id: u64,
}

impl Default for IdCounters {
    fn default() -> Self {
        Self {
            next_node_id: 1,
            next_edge_id: 1,
        }
    }
}

/// Record writes produced by one commit
#[derive(Debug, Default)]
pub struct CommitBatch {
    pub put_nodes: Vec<NodeRecord>,
    pub delete_nodes: Vec<NodeId>,
    pub put_edges: Vec<EdgeRecord>,
    pub delete_edges: Vec<EdgeId>,
    pub counters: IdCounters,
}

impl CommitBatch {
    pub fn is_empty(&self) -> bool {
        self.put_nodes.is_empty()
            && self.delete_nodes.is_empty()
            && self.put_edges.is_empty()
            && self.delete_edges.is_empty()
    }
}

/// RocksDB-based persistent storage
pub struct PersistentStorage {
    db: Arc<DB>,
    path: String,
}

impl PersistentStorage {
    /// Open or create persistent storage at `path`
    pub fn open(path: impl AsRef<Path>, options: &StorageOptions) -> StorageResult<Self> {
        std::fs::create_dir_all(path.as_ref())?;
        let path_str = path.as_ref().to_string_lossy().into_owned();

        info!("Opening persistent storage at: {}", path_str);

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        opts.set_write_buffer_size(options.write_buffer_mb * 1024 * 1024);
        opts.set_max_write_buffer_number(3);
        opts.set_wal_recovery_mode(rocksdb::DBRecoveryMode::PointInTime);

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new("default", Options::default()),
            ColumnFamilyDescriptor::new(CF_NODES, Self::record_cf_options(options)),
            ColumnFamilyDescriptor::new(CF_EDGES, Self::record_cf_options(options)),
            ColumnFamilyDescriptor::new(CF_META, Options::default()),
        ];

        let db = DB::open_cf_descriptors(&opts, &path_str, cf_descriptors)?;

        info!("Persistent storage opened successfully");

        Ok(Self {
            db: Arc::new(db),
            path: path_str,
        })
    }

    fn record_cf_options(options: &StorageOptions) -> Options {
        let mut opts = Options::default();
        if options.compression {
            opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        } else {
            opts.set_compression_type(rocksdb::DBCompressionType::None);
        }
        opts
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Apply one commit atomically
    pub fn apply(&self, batch: &CommitBatch) -> StorageResult<()> {
        let nodes = self.cf(CF_NODES)?;
        let edges = self.cf(CF_EDGES)?;
        let meta = self.cf(CF_META)?;

        let mut write = WriteBatch::default();
        for node in &batch.put_nodes {
            write.put_cf(&nodes, Self::node_key(node.id), bincode::serialize(node)?);
        }
        for id in &batch.delete_nodes {
            write.delete_cf(&nodes, Self::node_key(*id));
        }
        for edge in &batch.put_edges {
            write.put_cf(&edges, Self::edge_key(edge.id), bincode::serialize(edge)?);
        }
        for id in &batch.delete_edges {
            write.delete_cf(&edges, Self::edge_key(*id));
        }
        write.put_cf(&meta, COUNTERS_KEY, bincode::serialize(&batch.counters)?);

        self.db.write(write)?;

        debug!(
            "Applied commit batch: {} node puts, {} node deletes, {} edge puts, {} edge deletes",
            batch.put_nodes.len(),
            batch.delete_nodes.len(),
            batch.put_edges.len(),
            batch.delete_edges.len()
        );

        Ok(())
    }

    /// Get all nodes (for recovery)
    pub fn scan_nodes(&self) -> StorageResult<Vec<NodeRecord>> {
        let cf = self.cf(CF_NODES)?;
        let mut nodes = Vec::new();

        for item in self.db.iterator_cf(&cf, rocksdb::IteratorMode::Start) {
            let (_key, value) = item?;
            nodes.push(bincode::deserialize(&value)?);
        }

        Ok(nodes)
    }

    /// Get all relationships (for recovery)
    pub fn scan_edges(&self) -> StorageResult<Vec<EdgeRecord>> {
        let cf = self.cf(CF_EDGES)?;
        let mut edges = Vec::new();

        for item in self.db.iterator_cf(&cf, rocksdb::IteratorMode::Start) {
            let (_key, value) = item?;
            edges.push(bincode::deserialize(&value)?);
        }

        Ok(edges)
    }

    /// Stored id counters, if any commit has happened yet
    pub fn counters(&self) -> StorageResult<Option<IdCounters>> {
        let cf = self.cf(CF_META)?;
        match self.db.get_cf(&cf, COUNTERS_KEY)? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    /// Flush all data to disk
    pub fn flush(&self) -> StorageResult<()> {
        for name in [CF_NODES, CF_EDGES, CF_META] {
            let cf = self.cf(name)?;
            self.db.flush_cf(&cf)?;
        }
        debug!("Flushed storage to disk");
        Ok(())
    }

    fn cf(&self, name: &str) -> StorageResult<&rocksdb::ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StorageError::ColumnFamily(name.to_string()))
    }

    // Big-endian keys keep iteration in id order
    fn node_key(id: NodeId) -> [u8; 8] {
        id.as_u64().to_be_bytes()
    }

    fn edge_key(id: EdgeId) -> [u8; 8] {
        id.as_u64().to_be_bytes()
    }
}

impl std::fmt::Debug for PersistentStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistentStorage")
            .field("path", &self.path)
            .finish()
    }
}
