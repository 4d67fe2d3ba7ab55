//! The storage contract tries are built on, plus an in-memory backend.

use std::{collections::HashMap, fmt::Debug, sync::Arc};

use parking_lot::RwLock;
use thiserror::Error;

/// Result type of every [`NodeDb`] operation.
pub type StoreResult<T> = Result<T, StoreError>;

/// Failure reported by a storage backend.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum StoreError {
    /// The backend itself failed (I/O, corruption, ...).
    #[error("Node store backend failure: {0}")]
    Backend(String),
}

/// A key-value store holding raw trie nodes (and contract code) under their
/// content hash.
///
/// Implementations must be safe to share between the tries of one state, so
/// every method takes `&self`.
pub trait NodeDb: Debug + Send + Sync {
    /// Point read. Returns `None` if the key is absent.
    fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>>;

    /// Point write. Overwrites any existing value.
    fn put(&self, key: &[u8], value: Vec<u8>) -> StoreResult<()>;

    /// Writes many entries at once.
    fn put_batch(&self, entries: Vec<(Vec<u8>, Vec<u8>)>) -> StoreResult<()> {
        for (k, v) in entries {
            self.put(&k, v)?;
        }
        Ok(())
    }

    /// Every key currently present in the store, in no particular order.
    fn keys(&self) -> StoreResult<Vec<Vec<u8>>>;
}

impl<T: NodeDb + ?Sized> NodeDb for Arc<T> {
    fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        (**self).get(key)
    }

    fn put(&self, key: &[u8], value: Vec<u8>) -> StoreResult<()> {
        (**self).put(key, value)
    }

    fn put_batch(&self, entries: Vec<(Vec<u8>, Vec<u8>)>) -> StoreResult<()> {
        (**self).put_batch(entries)
    }

    fn keys(&self) -> StoreResult<Vec<Vec<u8>>> {
        (**self).keys()
    }
}

/// A [`NodeDb`] kept entirely in memory.
///
/// Cloning is cheap and the clones share the same underlying map.
#[derive(Clone, Debug, Default)]
pub struct MemNodeDb {
    entries: Arc<RwLock<HashMap<Vec<u8>, Vec<u8>>>>,
}

impl MemNodeDb {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns `true` if nothing has been written yet.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Returns `true` if `key` is present.
    pub fn contains(&self, key: &[u8]) -> bool {
        self.entries.read().contains_key(key)
    }

    /// Removes `key` from the store, returning its value. Tries never delete
    /// nodes, this only simulates a store that is missing data.
    #[cfg(test)]
    pub(crate) fn remove(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.entries.write().remove(key)
    }
}

impl NodeDb for MemNodeDb {
    fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn put(&self, key: &[u8], value: Vec<u8>) -> StoreResult<()> {
        self.entries.write().insert(key.to_vec(), value);
        Ok(())
    }

    fn put_batch(&self, entries: Vec<(Vec<u8>, Vec<u8>)>) -> StoreResult<()> {
        let mut map = self.entries.write();
        map.extend(entries);
        Ok(())
    }

    fn keys(&self) -> StoreResult<Vec<Vec<u8>>> {
        Ok(self.entries.read().keys().cloned().collect())
    }
}

impl FromIterator<(Vec<u8>, Vec<u8>)> for MemNodeDb {
    fn from_iter<T: IntoIterator<Item = (Vec<u8>, Vec<u8>)>>(iter: T) -> Self {
        Self {
            entries: Arc::new(RwLock::new(iter.into_iter().collect())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_entries() {
        let db = MemNodeDb::new();
        let other = db.clone();

        db.put(b"k", b"v".to_vec()).unwrap();

        assert_eq!(other.get(b"k").unwrap(), Some(b"v".to_vec()));
        assert_eq!(other.len(), 1);
    }

    #[test]
    fn batch_write_and_key_iteration() {
        let db = MemNodeDb::new();
        db.put_batch(vec![
            (vec![1], vec![10]),
            (vec![2], vec![20]),
            (vec![3], vec![30]),
        ])
        .unwrap();

        let mut keys = db.keys().unwrap();
        keys.sort();
        assert_eq!(keys, vec![vec![1], vec![2], vec![3]]);
        assert_eq!(db.get(&[4]).unwrap(), None);
    }

    #[test]
    fn arc_forwards_to_inner_store() {
        let db = Arc::new(MemNodeDb::new());
        NodeDb::put(&db, b"a", vec![7]).unwrap();
        assert!(db.contains(b"a"));
        assert_eq!(NodeDb::keys(&db).unwrap(), vec![b"a".to_vec()]);
    }
}
