//! Encrypted-types registry.
//!
//! The set of record types that currently carry the blob field. Stored as
//! one versioned entry in the key/value store and cached in memory; every
//! write replaces the cache, so reads after a write never go to storage.

use crate::error::CoreResult;
use crate::types::{ENCRYPTED_TYPES_KEY, STATE_COLLECTION};
use fieldcrypt_storage::KeyValueStore;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct RegistryEntry {
    version: u64,
    entity_types: BTreeSet<String>,
}

/// Record types carrying the blob field.
///
/// Only the state manager writes it.
pub struct EncryptedTypesRegistry {
    store: Arc<dyn KeyValueStore>,
    cache: RwLock<Option<RegistryEntry>>,
}

impl EncryptedTypesRegistry {
    /// Creates a registry over `store`. Nothing is read until first use.
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            cache: RwLock::new(None),
        }
    }

    fn entry(&self) -> CoreResult<RegistryEntry> {
        if let Some(entry) = self.cache.read().as_ref() {
            return Ok(entry.clone());
        }
        let entry = match self.store.get(STATE_COLLECTION, ENCRYPTED_TYPES_KEY)? {
            Some(bytes) => fieldcrypt_codec::from_cbor(&bytes)?,
            None => RegistryEntry::default(),
        };
        *self.cache.write() = Some(entry.clone());
        Ok(entry)
    }

    /// The current set.
    ///
    /// # Errors
    ///
    /// Returns storage or codec errors on a cache miss.
    pub fn get(&self) -> CoreResult<BTreeSet<String>> {
        Ok(self.entry()?.entity_types)
    }

    /// Whether `record_type` is in the set.
    ///
    /// # Errors
    ///
    /// Returns storage or codec errors on a cache miss.
    pub fn contains(&self, record_type: &str) -> CoreResult<bool> {
        if let Some(entry) = self.cache.read().as_ref() {
            return Ok(entry.entity_types.contains(record_type));
        }
        Ok(self.entry()?.entity_types.contains(record_type))
    }

    /// Number of writes since the entry was created.
    ///
    /// # Errors
    ///
    /// Returns storage or codec errors on a cache miss.
    pub fn version(&self) -> CoreResult<u64> {
        Ok(self.entry()?.version)
    }

    /// Replaces the set and persists it.
    ///
    /// # Errors
    ///
    /// Returns storage or codec errors; the cache is left as it was.
    pub(crate) fn set(&self, entity_types: BTreeSet<String>) -> CoreResult<()> {
        let current = self.entry()?;
        let next = RegistryEntry {
            version: current.version + 1,
            entity_types,
        };
        let bytes = fieldcrypt_codec::to_cbor(&next)?;
        self.store.set(STATE_COLLECTION, ENCRYPTED_TYPES_KEY, &bytes)?;
        tracing::debug!(version = next.version, types = ?next.entity_types, "encrypted types registry updated");
        *self.cache.write() = Some(next);
        Ok(())
    }

    /// Drops the cache; the next read goes to storage.
    pub fn invalidate(&self) {
        *self.cache.write() = None;
    }
}

impl std::fmt::Debug for EncryptedTypesRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptedTypesRegistry")
            .field("cache", &*self.cache.read())
            .finish_non_exhaustive()
    }
}
