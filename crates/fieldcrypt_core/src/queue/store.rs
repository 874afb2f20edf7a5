//! Queue over a [`KeyValueStore`].

use super::{ClaimedItem, QueueItem, ReconciliationQueue};
use crate::error::{CoreError, CoreResult};
use crate::types::QUEUE_NAME;
use fieldcrypt_storage::KeyValueStore;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Millisecond wall clock used for claim leases.
pub trait Clock: Send + Sync {
    /// Milliseconds since the Unix epoch.
    fn now_ms(&self) -> u64;
}

/// The system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct Claim {
    token: Uuid,
    expires_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct StoredEntry {
    data: QueueItem,
    created_ms: u64,
    claim: Option<Claim>,
}

/// Entries read per page while looking for a claimable item.
const CLAIM_PAGE: usize = 64;

/// A durable queue stored in the `field_encrypt_update_entity_encryption`
/// collection.
///
/// Keys are zero-padded sequence numbers, so key order is FIFO order. The
/// last sequence number handed out is cached; a key that turns out to be
/// taken sends the queue back to the store for the real last key.
///
/// Claims are serialized through an in-process lock and leases protect
/// against workers in the same process. Draining one store from several
/// processes is not supported: [`FileStore`](fieldcrypt_storage::FileStore)
/// holds its directory exclusively, so every worker must share one
/// `StoredQueue` (or at least one store) inside one process.
pub struct StoredQueue {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    /// Serializes queue operations; holds the last sequence number used.
    last_sequence: Mutex<Option<u64>>,
}

impl StoredQueue {
    /// Creates a queue using the system clock.
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    /// Creates a queue with an explicit clock.
    pub fn with_clock(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            last_sequence: Mutex::new(None),
        }
    }

    /// Removes every item, claimed or not.
    ///
    /// # Errors
    ///
    /// Returns storage errors.
    pub fn delete_queue(&self) -> CoreResult<()> {
        let _guard = self.last_sequence.lock();
        self.store.delete_all(QUEUE_NAME)?;
        Ok(())
    }

    fn read(&self, key: &str) -> CoreResult<Option<StoredEntry>> {
        match self.store.get(QUEUE_NAME, key)? {
            Some(bytes) => Ok(Some(fieldcrypt_codec::from_cbor(&bytes)?)),
            None => Ok(None),
        }
    }

    fn write(&self, key: &str, entry: &StoredEntry) -> CoreResult<()> {
        let bytes = fieldcrypt_codec::to_cbor(entry)?;
        self.store.set(QUEUE_NAME, key, &bytes)?;
        Ok(())
    }

    fn held(&self, item: &ClaimedItem) -> CoreResult<StoredEntry> {
        let entry = self
            .read(&item.item_id)?
            .ok_or_else(|| CoreError::invalid_operation(format!("queue item {} no longer exists", item.item_id)))?;
        match entry.claim {
            Some(claim) if claim.token == item.claim => Ok(entry),
            _ => Err(CoreError::invalid_operation(format!(
                "claim on queue item {} is no longer held",
                item.item_id
            ))),
        }
    }

    /// Hands out the next free sequence number.
    fn next_sequence(&self, last: &mut Option<u64>) -> CoreResult<u64> {
        let next = match *last {
            Some(seq) if self.store.get(QUEUE_NAME, &item_key(seq + 1))?.is_none() => seq + 1,
            _ => match self.store.keys(QUEUE_NAME)?.last() {
                Some(key) => parse_key(key)? + 1,
                None => 1,
            },
        };
        *last = Some(next);
        Ok(next)
    }

    fn encode_new(&self, item: &QueueItem, now: u64) -> CoreResult<Vec<u8>> {
        let entry = StoredEntry {
            data: item.clone(),
            created_ms: now,
            claim: None,
        };
        Ok(fieldcrypt_codec::to_cbor(&entry)?)
    }
}

fn item_key(sequence: u64) -> String {
    format!("{sequence:020}")
}

fn parse_key(key: &str) -> CoreResult<u64> {
    key.parse::<u64>()
        .map_err(|_| CoreError::invalid_operation(format!("malformed queue key {key}")))
}

impl ReconciliationQueue for StoredQueue {
    fn create_item(&self, item: &QueueItem) -> CoreResult<()> {
        let mut last = self.last_sequence.lock();
        let key = item_key(self.next_sequence(&mut last)?);
        let bytes = self.encode_new(item, self.clock.now_ms())?;
        self.store.set(QUEUE_NAME, &key, &bytes)?;
        tracing::trace!(key = %key, record_type = %item.record_type, id = %item.record_id, "queue item created");
        Ok(())
    }

    fn create_items(&self, items: &[QueueItem]) -> CoreResult<()> {
        if items.is_empty() {
            return Ok(());
        }
        let mut last = self.last_sequence.lock();
        let now = self.clock.now_ms();
        let entries = items
            .iter()
            .map(|item| Ok((item_key(self.next_sequence(&mut last)?), self.encode_new(item, now)?)))
            .collect::<CoreResult<Vec<_>>>()?;
        self.store.set_many(QUEUE_NAME, &entries)?;
        tracing::debug!(items = items.len(), "queue items created");
        Ok(())
    }

    fn number_of_items(&self) -> CoreResult<usize> {
        Ok(self.store.count(QUEUE_NAME)?)
    }

    fn claim_item(&self, lease: Duration) -> CoreResult<Option<ClaimedItem>> {
        let _guard = self.last_sequence.lock();
        let now = self.clock.now_ms();
        let lease_ms = u64::try_from(lease.as_millis()).unwrap_or(u64::MAX);

        let mut after: Option<String> = None;
        loop {
            let page = self.store.scan(QUEUE_NAME, after.as_deref(), CLAIM_PAGE)?;
            let Some((last_key, _)) = page.last() else {
                return Ok(None);
            };
            let next_after = last_key.clone();

            for (key, bytes) in page {
                let mut entry: StoredEntry = fieldcrypt_codec::from_cbor(&bytes)?;
                if entry.claim.is_some_and(|c| c.expires_ms > now) {
                    continue;
                }
                let claim = Claim {
                    token: Uuid::new_v4(),
                    expires_ms: now.saturating_add(lease_ms),
                };
                entry.claim = Some(claim);
                self.write(&key, &entry)?;
                return Ok(Some(ClaimedItem {
                    item_id: key,
                    claim: claim.token,
                    data: entry.data,
                }));
            }
            after = Some(next_after);
        }
    }

    fn release_item(&self, item: &ClaimedItem) -> CoreResult<()> {
        let _guard = self.last_sequence.lock();
        let mut entry = self.held(item)?;
        entry.claim = None;
        self.write(&item.item_id, &entry)
    }

    fn delete_item(&self, item: &ClaimedItem) -> CoreResult<()> {
        let _guard = self.last_sequence.lock();
        self.held(item)?;
        self.store.delete(QUEUE_NAME, &item.item_id)?;
        Ok(())
    }
}

impl std::fmt::Debug for StoredQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredQueue").finish_non_exhaustive()
    }
}
