//! Record type and field definitions supplied by the host.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Cache flags of a record type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheInformation {
    /// Rendered output may be cached.
    pub render_cache: bool,
    /// Loaded records may be kept in a persistent cache.
    pub persistent_cache: bool,
}

impl CacheInformation {
    /// Both caches enabled.
    pub const CACHEABLE: Self = Self {
        render_cache: true,
        persistent_cache: true,
    };

    /// Both caches disabled.
    pub const UNCACHEABLE: Self = Self {
        render_cache: false,
        persistent_cache: false,
    };
}

impl Default for CacheInformation {
    fn default() -> Self {
        Self::CACHEABLE
    }
}

/// A field on a record type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDefinition {
    /// Field name.
    pub name: String,
    /// Field type (e.g. `string`, `text_with_summary`, `decimal`).
    pub field_type: String,
    /// Whether the field is defined by the record type itself rather than
    /// added through configuration.
    #[serde(default)]
    pub base_field: bool,
    /// Property name to declared data type.
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl FieldDefinition {
    /// Creates a configurable field.
    pub fn new(name: impl Into<String>, field_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            field_type: field_type.into(),
            base_field: false,
            properties: BTreeMap::new(),
        }
    }

    /// Marks the field as a base field.
    #[must_use]
    pub fn base(mut self) -> Self {
        self.base_field = true;
        self
    }

    /// Adds a property with its data type.
    #[must_use]
    pub fn property(mut self, name: impl Into<String>, data_type: impl Into<String>) -> Self {
        self.properties.insert(name.into(), data_type.into());
        self
    }

    /// Declared data type of a property.
    #[must_use]
    pub fn data_type(&self, property: &str) -> Option<&str> {
        self.properties.get(property).map(String::as_str)
    }
}

/// A record type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordTypeDefinition {
    /// Machine id.
    pub id: String,
    /// Human readable singular label.
    pub label: String,
    /// Records keep revisions.
    #[serde(default)]
    pub revisionable: bool,
    /// Records have translations.
    #[serde(default)]
    pub translatable: bool,
    /// Cache flags as declared by the host.
    #[serde(default)]
    pub cache: CacheInformation,
    /// Fields by name.
    pub fields: BTreeMap<String, FieldDefinition>,
}

impl RecordTypeDefinition {
    /// Creates a cacheable, non-revisionable, non-translatable type.
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            revisionable: false,
            translatable: false,
            cache: CacheInformation::CACHEABLE,
            fields: BTreeMap::new(),
        }
    }

    /// Sets whether records keep revisions.
    #[must_use]
    pub fn revisionable(mut self, value: bool) -> Self {
        self.revisionable = value;
        self
    }

    /// Sets whether records have translations.
    #[must_use]
    pub fn translatable(mut self, value: bool) -> Self {
        self.translatable = value;
        self
    }

    /// Adds a field.
    #[must_use]
    pub fn field(mut self, field: FieldDefinition) -> Self {
        self.fields.insert(field.name.clone(), field);
        self
    }

    /// Looks up a field.
    #[must_use]
    pub fn get_field(&self, name: &str) -> Option<&FieldDefinition> {
        self.fields.get(name)
    }
}
