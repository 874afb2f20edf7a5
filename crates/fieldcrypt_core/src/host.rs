//! Interfaces the host platform implements.
//!
//! The engine owns no record storage, schema or type registry. It drives
//! the host through these traits and the host calls back into
//! [`FieldEncryptionProcessor`](crate::FieldEncryptionProcessor) on its
//! save and load paths.

use crate::error::CoreResult;
use crate::record::{CacheInformation, Record, RecordTypeDefinition};
use crate::schema::BlobFieldDefinition;
use crate::types::RecordId;
use std::sync::Arc;

/// Record type definitions and their cached metadata.
pub trait RecordTypes: Send + Sync {
    /// Definition of one type, `None` if the type does not exist.
    fn definition(&self, record_type: &str) -> Option<Arc<RecordTypeDefinition>>;

    /// Ids of every known record type.
    fn record_type_ids(&self) -> Vec<String>;

    /// Drops cached definitions so the next read sees schema changes.
    fn clear_cached_definitions(&self);

    /// Records the effective cache flags of a type.
    ///
    /// # Errors
    ///
    /// Returns an error if the host cannot persist the flags.
    fn set_cache_information(&self, record_type: &str, info: CacheInformation) -> CoreResult<()>;
}

/// Installs and removes the blob field.
pub trait SchemaManager: Send + Sync {
    /// Adds the blob field to a record type.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema change fails.
    fn install_blob_field(&self, record_type: &str, definition: &BlobFieldDefinition) -> CoreResult<()>;

    /// Removes the blob field and every value stored in it.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema change fails.
    fn uninstall_blob_field(&self, record_type: &str) -> CoreResult<()>;

    /// Whether the type currently carries the blob field.
    fn blob_field_installed(&self, record_type: &str) -> bool;
}

/// A record id query.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RecordQuery {
    /// Record type to search.
    pub record_type: String,
    /// Return one id per revision instead of one per record.
    pub all_revisions: bool,
    /// Only records where this field has a value.
    pub field_exists: Option<String>,
    /// Only records whose blob was sealed with this profile.
    pub encryption_profile: Option<String>,
}

impl RecordQuery {
    /// Query over every record of a type.
    pub fn new(record_type: impl Into<String>) -> Self {
        Self {
            record_type: record_type.into(),
            ..Self::default()
        }
    }

    /// Enumerate revisions.
    #[must_use]
    pub fn all_revisions(mut self, value: bool) -> Self {
        self.all_revisions = value;
        self
    }

    /// Require a field value.
    #[must_use]
    pub fn field_exists(mut self, field: impl Into<String>) -> Self {
        self.field_exists = Some(field.into());
        self
    }

    /// Require a blob profile.
    #[must_use]
    pub fn encryption_profile(mut self, profile: impl Into<String>) -> Self {
        self.encryption_profile = Some(profile.into());
        self
    }
}

/// Record persistence.
///
/// `save` must run [`encrypt_record`](crate::FieldEncryptionProcessor::encrypt_record)
/// before writing, with `original` set to the persisted state; `load` and
/// `load_revision` must run
/// [`decrypt_record`](crate::FieldEncryptionProcessor::decrypt_record)
/// before returning.
pub trait RecordStorage: Send + Sync {
    /// Loads the current revision of a record.
    ///
    /// # Errors
    ///
    /// Returns an error if loading or decryption fails.
    fn load(&self, record_type: &str, id: &RecordId) -> CoreResult<Option<Record>>;

    /// Loads a specific revision.
    ///
    /// # Errors
    ///
    /// Returns an error if loading or decryption fails.
    fn load_revision(&self, record_type: &str, revision_id: &RecordId) -> CoreResult<Option<Record>>;

    /// Saves a record, running encryption first.
    ///
    /// # Errors
    ///
    /// Returns an error if encryption or the write fails; nothing is written
    /// in that case.
    fn save(&self, record: &mut Record) -> CoreResult<()>;

    /// Ids matching a query (revision ids when `all_revisions` is set).
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn query(&self, query: &RecordQuery) -> CoreResult<Vec<RecordId>>;

    /// Whether any record of the type exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the check fails.
    fn has_data(&self, record_type: &str) -> CoreResult<bool>;

    /// Whether any record of the type has a value for the field.
    ///
    /// # Errors
    ///
    /// Returns an error if the check fails.
    fn field_has_data(&self, record_type: &str, field: &str) -> CoreResult<bool>;
}
