//! Records as seen by the engine.
//!
//! A record has one [`Translation`] per language. Each translation holds
//! its field values and, once the record type carries it, its own
//! [`EncryptedBlob`]. A loaded revision is a separate `Record` value, so
//! blobs are never shared between revisions or translations.

mod definition;

pub use definition::{CacheInformation, FieldDefinition, RecordTypeDefinition};

use crate::blob::EncryptedBlob;
use crate::types::RecordId;
use fieldcrypt_codec::Value;
use std::collections::BTreeMap;

/// Property name to value, for one item of a field.
pub type PropertyMap = BTreeMap<String, Value>;

/// The items of one field; the index is the delta.
pub type FieldItems = Vec<PropertyMap>;

/// One language variant of a record.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Translation {
    /// Field values by field name.
    pub fields: BTreeMap<String, FieldItems>,
    /// The encrypted blob; `None` while the record type lacks the blob field.
    pub blob: Option<EncryptedBlob>,
}

impl Translation {
    /// Value of one property, if set.
    #[must_use]
    pub fn property(&self, field: &str, delta: usize, property: &str) -> Option<&Value> {
        self.fields.get(field)?.get(delta)?.get(property)
    }
}

/// A record (or one loaded revision of it).
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Record type id.
    pub record_type: String,
    /// Identity; `None` before the first save.
    pub id: Option<RecordId>,
    /// Revision id for revisionable types.
    pub revision_id: Option<RecordId>,
    /// Language of the default translation.
    pub default_langcode: String,
    /// Translations by language code.
    pub translations: BTreeMap<String, Translation>,
    /// Whether the next save creates a new revision.
    pub new_revision: bool,
    /// Persisted state before the current save, set by the host during save.
    pub original: Option<Box<Record>>,
}

impl Record {
    /// Creates an unsaved record with an empty default translation.
    pub fn new(record_type: impl Into<String>, langcode: impl Into<String>) -> Self {
        let langcode = langcode.into();
        let mut translations = BTreeMap::new();
        translations.insert(langcode.clone(), Translation::default());
        Self {
            record_type: record_type.into(),
            id: None,
            revision_id: None,
            default_langcode: langcode,
            translations,
            new_revision: false,
            original: None,
        }
    }

    /// Sets the id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<RecordId>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Sets a field of the default translation.
    #[must_use]
    pub fn with_field(mut self, field: impl Into<String>, items: FieldItems) -> Self {
        let lang = self.default_langcode.clone();
        self.translation_mut(&lang).fields.insert(field.into(), items);
        self
    }

    /// Returns a translation, creating an empty one if missing.
    pub fn translation_mut(&mut self, langcode: &str) -> &mut Translation {
        self.translations.entry(langcode.to_string()).or_default()
    }

    /// The default translation.
    #[must_use]
    pub fn default_translation(&self) -> Option<&Translation> {
        self.translations.get(&self.default_langcode)
    }

    /// Value of one property of the default translation.
    #[must_use]
    pub fn property(&self, field: &str, delta: usize, property: &str) -> Option<&Value> {
        self.default_translation()?.property(field, delta, property)
    }

    /// Whether any translation carries the blob field.
    #[must_use]
    pub fn has_blob_field(&self) -> bool {
        self.translations.values().any(|t| t.blob.is_some())
    }

    /// Attaches an empty blob to every translation that lacks one.
    pub fn attach_blob_field(&mut self) {
        for translation in self.translations.values_mut() {
            translation.blob.get_or_insert_with(EncryptedBlob::default);
        }
    }

    /// Removes the blob from every translation.
    pub fn detach_blob_field(&mut self) {
        for translation in self.translations.values_mut() {
            translation.blob = None;
        }
    }
}

/// Builds a single-property item, the common shape of simple fields.
pub fn item(property: &str, value: impl Into<Value>) -> PropertyMap {
    let mut map = PropertyMap::new();
    map.insert(property.to_string(), value.into());
    map
}
