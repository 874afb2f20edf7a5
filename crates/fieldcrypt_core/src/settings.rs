//! Encryption settings repository.
//!
//! Configurable fields carry a [`FieldEncryptionSetting`] of their own.
//! Base fields are configured per record type through
//! [`RecordTypeSettings`].

use crate::record::{FieldDefinition, RecordTypeDefinition};
use fieldcrypt_codec::Value;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Encryption settings of one field.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldEncryptionSetting {
    /// Whether the field is encrypted.
    pub encrypted: bool,
    /// Properties to encrypt, in order, without duplicates.
    pub properties: Vec<String>,
    /// Per-property placeholder replacing the computed one.
    pub placeholder_overrides: BTreeMap<String, Value>,
}

impl FieldEncryptionSetting {
    /// An encrypted setting for the given properties.
    pub fn encrypted<I, S>(properties: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut setting = Self {
            encrypted: true,
            ..Self::default()
        };
        for property in properties {
            let property = property.into();
            if !setting.properties.contains(&property) {
                setting.properties.push(property);
            }
        }
        setting
    }

    /// Adds a placeholder override.
    #[must_use]
    pub fn with_placeholder(mut self, property: impl Into<String>, value: impl Into<Value>) -> Self {
        self.placeholder_overrides.insert(property.into(), value.into());
        self
    }

    /// Removes duplicate properties, keeping first occurrences.
    pub fn normalize(&mut self) {
        let mut seen = Vec::with_capacity(self.properties.len());
        self.properties.retain(|p| {
            if seen.contains(p) {
                false
            } else {
                seen.push(p.clone());
                true
            }
        });
    }

    /// Properties encrypted by this setting; empty when not encrypted.
    #[must_use]
    pub fn encrypted_properties(&self) -> &[String] {
        if self.encrypted {
            &self.properties
        } else {
            &[]
        }
    }
}

/// Base-field encryption of one record type.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordTypeSettings {
    /// Base field name to its setting.
    pub base_fields: BTreeMap<String, FieldEncryptionSetting>,
}

impl RecordTypeSettings {
    /// Whether any base field is encrypted.
    #[must_use]
    pub fn encrypts_anything(&self) -> bool {
        self.base_fields.values().any(|s| s.encrypted)
    }
}

/// Holds every encryption setting.
///
/// Writes go through the settings manager, which also queues affected
/// records and reconciles schema state.
#[derive(Debug, Default)]
pub struct EncryptionSettings {
    fields: RwLock<BTreeMap<(String, String), FieldEncryptionSetting>>,
    record_types: RwLock<BTreeMap<String, RecordTypeSettings>>,
}

impl EncryptionSettings {
    /// Creates an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Setting of a configurable field.
    #[must_use]
    pub fn field(&self, record_type: &str, field: &str) -> Option<FieldEncryptionSetting> {
        self.fields
            .read()
            .get(&(record_type.to_string(), field.to_string()))
            .cloned()
    }

    /// Stores a configurable field setting; returns the previous one.
    pub fn set_field(
        &self,
        record_type: &str,
        field: &str,
        setting: FieldEncryptionSetting,
    ) -> Option<FieldEncryptionSetting> {
        self.fields
            .write()
            .insert((record_type.to_string(), field.to_string()), setting)
    }

    /// Removes a configurable field setting.
    pub fn remove_field(&self, record_type: &str, field: &str) -> Option<FieldEncryptionSetting> {
        self.fields
            .write()
            .remove(&(record_type.to_string(), field.to_string()))
    }

    /// Base-field settings of a record type.
    #[must_use]
    pub fn record_type(&self, record_type: &str) -> Option<RecordTypeSettings> {
        self.record_types.read().get(record_type).cloned()
    }

    /// Stores base-field settings; returns the previous ones.
    pub fn set_record_type(
        &self,
        record_type: &str,
        settings: RecordTypeSettings,
    ) -> Option<RecordTypeSettings> {
        self.record_types
            .write()
            .insert(record_type.to_string(), settings)
    }

    /// Removes base-field settings.
    pub fn remove_record_type(&self, record_type: &str) -> Option<RecordTypeSettings> {
        self.record_types.write().remove(record_type)
    }

    /// The setting that applies to `field` of `record_type`.
    #[must_use]
    pub fn setting_for(&self, record_type: &str, field: &FieldDefinition) -> Option<FieldEncryptionSetting> {
        if field.base_field {
            self.record_types
                .read()
                .get(record_type)?
                .base_fields
                .get(&field.name)
                .cloned()
        } else {
            self.field(record_type, &field.name)
        }
    }

    /// Fields of `definition` that are encrypted, with their settings.
    #[must_use]
    pub fn encrypted_fields<'a>(
        &self,
        definition: &'a RecordTypeDefinition,
    ) -> Vec<(&'a FieldDefinition, FieldEncryptionSetting)> {
        definition
            .fields
            .values()
            .filter_map(|field| {
                self.setting_for(&definition.id, field)
                    .filter(|s| s.encrypted)
                    .map(|s| (field, s))
            })
            .collect()
    }

    /// Whether a record type needs the blob field: it has base-field
    /// settings, or any configurable field of it is encrypted.
    #[must_use]
    pub fn requires_encryption(&self, record_type: &str) -> bool {
        if self
            .record_types
            .read()
            .get(record_type)
            .is_some_and(|s| !s.base_fields.is_empty())
        {
            return true;
        }
        self.fields
            .read()
            .iter()
            .any(|((t, _), s)| t == record_type && s.encrypted)
    }

    /// Every configurable field setting, keyed by `(record_type, field)`.
    #[must_use]
    pub fn all_fields(&self) -> BTreeMap<(String, String), FieldEncryptionSetting> {
        self.fields.read().clone()
    }

    /// Every record type settings entry.
    #[must_use]
    pub fn all_record_types(&self) -> BTreeMap<String, RecordTypeSettings> {
        self.record_types.read().clone()
    }
}
