//! Persistence layer
//!
//! Durable storage for the embedded graph store. Only committed transactions
//! reach this layer.

pub mod storage;

pub use storage::{
    CommitBatch, IdCounters, PersistentStorage, StorageError, StorageOptions, StorageResult,
};
