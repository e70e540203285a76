pub mod database;
pub mod entry;

use entry::Entry;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;
use tokio::sync::RwLock;

pub use database::Database;

/// Errors raised by the storage engine. Commands pass the message through
/// to the client untouched.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StorageError {
    #[error("Corruption: {0}")]
    Corruption(String),

    #[error("IO error: {0}")]
    Io(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// A single mutation inside a [`WriteBatch`].
#[derive(Debug, Clone)]
pub enum BatchOp {
    Put(Vec<u8>, Entry),
    Delete(Vec<u8>),
}

/// A group of mutations applied atomically by [`Storage::write`].
#[derive(Debug, Default, Clone)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        WriteBatch::default()
    }

    pub fn put(&mut self, key: Vec<u8>, entry: Entry) {
        self.ops.push(BatchOp::Put(key, entry));
    }

    pub fn delete(&mut self, key: Vec<u8>) {
        self.ops.push(BatchOp::Delete(key));
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn into_ops(self) -> Vec<BatchOp> {
        self.ops
    }
}

/// Ordered key-value engine contract.
///
/// Keys are namespace-prefixed byte strings (see [`compose_key`]). The engine
/// knows nothing about expiry; [`Database`] hides expired entries.
pub trait Storage: Send + Sync {
    /// Raw point lookup, expired entries included.
    fn get(&self, key: &[u8]) -> StorageResult<Option<&Entry>>;

    /// Forward iterator over every key at or after `start`, in byte order.
    fn iter_from(
        &self,
        start: Bound<&[u8]>,
    ) -> Box<dyn Iterator<Item = StorageResult<(&[u8], &Entry)>> + '_>;

    /// Apply every operation of the batch or none of them.
    fn write(&mut self, batch: WriteBatch) -> StorageResult<()>;

    fn put(&mut self, key: Vec<u8>, entry: Entry) -> StorageResult<()> {
        let mut batch = WriteBatch::new();
        batch.put(key, entry);
        self.write(batch)
    }

    fn delete(&mut self, key: Vec<u8>) -> StorageResult<()> {
        let mut batch = WriteBatch::new();
        batch.delete(key);
        self.write(batch)
    }
}

/// In-memory ordered engine backed by a `BTreeMap`.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    data: BTreeMap<Vec<u8>, Entry>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        MemoryStorage::default()
    }

    /// Number of physical keys across every namespace, expired ones included.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &[u8]) -> StorageResult<Option<&Entry>> {
        Ok(self.data.get(key))
    }

    fn iter_from(
        &self,
        start: Bound<&[u8]>,
    ) -> Box<dyn Iterator<Item = StorageResult<(&[u8], &Entry)>> + '_> {
        Box::new(
            self.data
                .range::<[u8], _>((start, Bound::Unbounded))
                .map(|(k, v)| Ok((k.as_slice(), v))),
        )
    }

    fn write(&mut self, batch: WriteBatch) -> StorageResult<()> {
        for op in batch.into_ops() {
            match op {
                BatchOp::Put(key, entry) => {
                    self.data.insert(key, entry);
                }
                BatchOp::Delete(key) => {
                    self.data.remove(&key);
                }
            }
        }
        Ok(())
    }
}

/// Physical key for `user_key` inside `namespace`: `[ns_len][ns][user_key]`.
pub fn compose_key(namespace: &str, user_key: &[u8]) -> Vec<u8> {
    let ns = namespace.as_bytes();
    debug_assert!(ns.len() <= u8::MAX as usize);
    let mut key = Vec::with_capacity(1 + ns.len() + user_key.len());
    key.push(ns.len() as u8);
    key.extend_from_slice(ns);
    key.extend_from_slice(user_key);
    key
}

pub type SharedStore = Arc<RwLock<MemoryStorage>>;
