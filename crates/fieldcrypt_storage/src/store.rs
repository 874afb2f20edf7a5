//! Key/value store trait definition.

use crate::error::StorageResult;

/// Durable storage of byte values grouped into named collections.
///
/// # Invariants
///
/// - `set` followed by `get` of the same `(collection, key)` returns the value
/// - `keys` returns the keys of one collection in ascending order
/// - Once a mutating call returns `Ok`, the change is durable for the
///   store's persistence level
/// - Stores must be `Send + Sync`; mutation goes through `&self`
///
/// # Implementors
///
/// - [`super::MemoryStore`] - For testing
/// - [`super::FileStore`] - For persistent storage
pub trait KeyValueStore: Send + Sync {
    /// Reads the value stored under `key`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn get(&self, collection: &str, key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Stores `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if the write cannot be made durable.
    fn set(&self, collection: &str, key: &str, value: &[u8]) -> StorageResult<()>;

    /// Removes `key`. Returns whether it was present.
    ///
    /// # Errors
    ///
    /// Returns an error if the write cannot be made durable.
    fn delete(&self, collection: &str, key: &str) -> StorageResult<bool>;

    /// Lists the keys of a collection in ascending order.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn keys(&self, collection: &str) -> StorageResult<Vec<String>>;

    /// Removes every key of a collection.
    ///
    /// # Errors
    ///
    /// Returns an error if the write cannot be made durable.
    fn delete_all(&self, collection: &str) -> StorageResult<()>;

    /// Stores several values in one collection with a single durable write
    /// where the store supports it.
    ///
    /// # Errors
    ///
    /// Returns an error if the write cannot be made durable. Stores that
    /// batch the write apply either every entry or none.
    fn set_many(&self, collection: &str, entries: &[(String, Vec<u8>)]) -> StorageResult<()> {
        for (key, value) in entries {
            self.set(collection, key, value)?;
        }
        Ok(())
    }

    /// Returns up to `limit` entries of a collection in ascending key
    /// order, starting after `after` (or at the first key).
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn scan(&self, collection: &str, after: Option<&str>, limit: usize) -> StorageResult<Vec<(String, Vec<u8>)>> {
        let mut page = Vec::new();
        for key in self.keys(collection)? {
            if page.len() == limit {
                break;
            }
            if after.is_some_and(|after| key.as_str() <= after) {
                continue;
            }
            if let Some(value) = self.get(collection, &key)? {
                page.push((key, value));
            }
        }
        Ok(page)
    }

    /// Number of keys in a collection.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn count(&self, collection: &str) -> StorageResult<usize> {
        Ok(self.keys(collection)?.len())
    }
}
