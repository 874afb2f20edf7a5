//! Queue worker: re-saves one record under the current settings.

use super::QueueItem;
use crate::error::CoreResult;
use crate::host::{RecordStorage, RecordTypes};
use std::sync::Arc;

/// Loads the queued record (or revision) and saves it in place.
///
/// The save runs through the host's storage, which calls the processor,
/// so the stored form afterwards follows the current settings.
pub struct UpdateRecordEncryption {
    record_types: Arc<dyn RecordTypes>,
    storage: Arc<dyn RecordStorage>,
}

impl UpdateRecordEncryption {
    /// Creates a worker.
    pub fn new(record_types: Arc<dyn RecordTypes>, storage: Arc<dyn RecordStorage>) -> Self {
        Self {
            record_types,
            storage,
        }
    }

    /// Processes one item.
    ///
    /// Items whose record type or record no longer exists succeed without
    /// doing anything. The save never creates a new revision.
    ///
    /// # Errors
    ///
    /// Returns load or save errors. Retryable errors leave the item for a
    /// later attempt.
    pub fn process_item(&self, item: &QueueItem) -> CoreResult<()> {
        let Some(definition) = self.record_types.definition(&item.record_type) else {
            tracing::debug!(record_type = %item.record_type, "record type gone; dropping queue item");
            return Ok(());
        };
        let loaded = if definition.revisionable {
            self.storage.load_revision(&item.record_type, &item.record_id)?
        } else {
            self.storage.load(&item.record_type, &item.record_id)?
        };
        let Some(mut record) = loaded else {
            tracing::debug!(record_type = %item.record_type, id = %item.record_id, "record gone; dropping queue item");
            return Ok(());
        };

        record.new_revision = false;
        self.storage.save(&mut record)?;
        tracing::debug!(record_type = %item.record_type, id = %item.record_id, "record re-saved");
        Ok(())
    }

    /// Progress line shown while `item` is processed.
    #[must_use]
    pub fn batch_message(&self, item: &QueueItem) -> String {
        let label = self
            .record_types
            .definition(&item.record_type)
            .map_or_else(|| item.record_type.clone(), |d| d.label.clone());
        format!(
            "Updating {label} with ID {} to use the latest field encryption settings",
            item.record_id
        )
    }
}

impl std::fmt::Debug for UpdateRecordEncryption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateRecordEncryption").finish_non_exhaustive()
    }
}
