//! In-memory key/value store.

use crate::error::StorageResult;
use crate::store::KeyValueStore;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::ops::Bound;

/// An in-memory key/value store.
///
/// Nothing survives the process. Suitable for unit and integration tests
/// and for hosts whose own configuration storage wraps the engine.
///
/// # Example
///
/// ```rust
/// use fieldcrypt_storage::{KeyValueStore, MemoryStore};
///
/// let store = MemoryStore::new();
/// store.set("queue", "0001", b"item").unwrap();
/// assert_eq!(store.count("queue").unwrap(), 1);
/// ```
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<(String, String), Vec<u8>>>,
}

impl MemoryStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of entries across all collections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the store holds no entries at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

pub(crate) fn scan_range(
    map: &BTreeMap<(String, String), Vec<u8>>,
    collection: &str,
    after: Option<&str>,
    limit: usize,
) -> Vec<(String, Vec<u8>)> {
    let start = match after {
        Some(key) => Bound::Excluded((collection.to_string(), key.to_string())),
        None => Bound::Included((collection.to_string(), String::new())),
    };
    map.range((start, Bound::Unbounded))
        .take_while(|((c, _), _)| c == collection)
        .take(limit)
        .map(|((_, k), v)| (k.clone(), v.clone()))
        .collect()
}

pub(crate) fn collection_range<'a, V>(
    map: &'a BTreeMap<(String, String), V>,
    collection: &str,
) -> impl Iterator<Item = (&'a (String, String), &'a V)> {
    let start = (collection.to_string(), String::new());
    let owned = collection.to_string();
    map.range(start..).take_while(move |((c, _), _)| *c == owned)
}

impl KeyValueStore for MemoryStore {
    fn get(&self, collection: &str, key: &str) -> StorageResult<Option<Vec<u8>>> {
        Ok(self
            .entries
            .read()
            .get(&(collection.to_string(), key.to_string()))
            .cloned())
    }

    fn set(&self, collection: &str, key: &str, value: &[u8]) -> StorageResult<()> {
        self.entries
            .write()
            .insert((collection.to_string(), key.to_string()), value.to_vec());
        Ok(())
    }

    fn delete(&self, collection: &str, key: &str) -> StorageResult<bool> {
        Ok(self
            .entries
            .write()
            .remove(&(collection.to_string(), key.to_string()))
            .is_some())
    }

    fn set_many(&self, collection: &str, entries: &[(String, Vec<u8>)]) -> StorageResult<()> {
        let mut map = self.entries.write();
        for (key, value) in entries {
            map.insert((collection.to_string(), key.clone()), value.clone());
        }
        Ok(())
    }

    fn scan(&self, collection: &str, after: Option<&str>, limit: usize) -> StorageResult<Vec<(String, Vec<u8>)>> {
        Ok(scan_range(&self.entries.read(), collection, after, limit))
    }

    fn keys(&self, collection: &str) -> StorageResult<Vec<String>> {
        let entries = self.entries.read();
        Ok(collection_range(&entries, collection)
            .map(|((_, k), _)| k.clone())
            .collect())
    }

    fn delete_all(&self, collection: &str) -> StorageResult<()> {
        self.entries.write().retain(|(c, _), _| c != collection);
        Ok(())
    }
}
