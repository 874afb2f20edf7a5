//! Reconciliation queue.
//!
//! One item per record (or revision) that must be re-saved so its stored
//! form matches the current settings. Items are claimed with a lease; an
//! item whose lease expires becomes claimable again.

mod batch;
mod store;
mod worker;

pub use batch::{
    BatchContext, BatchReport, BatchResults, CronReport, QueueProcessor, QueueStatus, CANNOT_CLAIM,
};
pub use store::{Clock, StoredQueue, SystemClock};
pub use worker::UpdateRecordEncryption;

use crate::error::CoreResult;
use crate::types::RecordId;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Payload of one queue item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueItem {
    /// Record type id.
    pub record_type: String,
    /// Record id, or revision id for revisionable types.
    pub record_id: RecordId,
}

impl QueueItem {
    /// Creates an item.
    pub fn new(record_type: impl Into<String>, record_id: impl Into<RecordId>) -> Self {
        Self {
            record_type: record_type.into(),
            record_id: record_id.into(),
        }
    }
}

/// An item held under a lease.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimedItem {
    /// Storage key of the item.
    pub item_id: String,
    /// Lease token; must be presented to release or delete.
    pub claim: Uuid,
    /// The payload.
    pub data: QueueItem,
}

/// Durable FIFO of reconciliation work.
pub trait ReconciliationQueue: Send + Sync {
    /// Appends an item.
    ///
    /// # Errors
    ///
    /// Returns storage or codec errors.
    fn create_item(&self, item: &QueueItem) -> CoreResult<()>;

    /// Appends several items, in order.
    ///
    /// # Errors
    ///
    /// Returns storage or codec errors. Queues that write the batch at once
    /// add either every item or none.
    fn create_items(&self, items: &[QueueItem]) -> CoreResult<()> {
        items.iter().try_for_each(|item| self.create_item(item))
    }

    /// Number of items, claimed ones included.
    ///
    /// # Errors
    ///
    /// Returns storage errors.
    fn number_of_items(&self) -> CoreResult<usize>;

    /// Claims the oldest unclaimed (or lease-expired) item.
    ///
    /// # Errors
    ///
    /// Returns storage or codec errors.
    fn claim_item(&self, lease: Duration) -> CoreResult<Option<ClaimedItem>>;

    /// Gives a claimed item back to the queue.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`](crate::CoreError::InvalidOperation)
    /// if the claim is no longer held, or storage errors.
    fn release_item(&self, item: &ClaimedItem) -> CoreResult<()>;

    /// Removes a claimed item for good.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`](crate::CoreError::InvalidOperation)
    /// if the claim is no longer held, or storage errors.
    fn delete_item(&self, item: &ClaimedItem) -> CoreResult<()>;
}
