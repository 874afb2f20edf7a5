//! Field encryption processor.
//!
//! Runs on the host's save path ([`encrypt_record`]) and load path
//! ([`decrypt_record`]). On save every configured property value is moved
//! into the translation's blob and replaced by its placeholder; on load
//! the placeholders are replaced with the decrypted values.
//!
//! Both operations work on a copy of the record and only write it back
//! once every translation succeeded, so a failure never leaves a record
//! half encrypted.
//!
//! [`encrypt_record`]: FieldEncryptionProcessor::encrypt_record
//! [`decrypt_record`]: FieldEncryptionProcessor::decrypt_record

use crate::blob::DecryptedPayload;
use crate::config::SharedConfig;
use crate::crypto::EncryptionService;
use crate::error::{CoreError, CoreResult};
use crate::host::RecordTypes;
use crate::placeholder::placeholder_for_field;
use crate::record::{FieldDefinition, FieldItems, Record, RecordTypeDefinition, Translation};
use crate::registry::EncryptedTypesRegistry;
use crate::settings::{EncryptionSettings, FieldEncryptionSetting};
use fieldcrypt_codec::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Where a placeholder is about to be written.
#[derive(Debug, Clone, Copy)]
pub struct PlaceholderContext<'a> {
    /// Record type id.
    pub record_type: &'a str,
    /// Translation language.
    pub langcode: &'a str,
    /// The field being processed.
    pub field: &'a FieldDefinition,
    /// The property being processed.
    pub property: &'a str,
}

/// Decides whether a record may be encrypted on this save.
pub type AllowEncryption = Box<dyn Fn(&Record) -> bool + Send + Sync>;

/// Rewrites the computed placeholder for one property.
pub type PlaceholderAlter =
    Box<dyn Fn(&PlaceholderContext<'_>, Option<Value>) -> Option<Value> + Send + Sync>;

/// Moves configured property values between plaintext and blobs.
pub struct FieldEncryptionProcessor {
    settings: Arc<EncryptionSettings>,
    registry: Arc<EncryptedTypesRegistry>,
    record_types: Arc<dyn RecordTypes>,
    service: Arc<dyn EncryptionService>,
    config: SharedConfig,
    allow: Vec<AllowEncryption>,
    alters: Vec<PlaceholderAlter>,
}

impl FieldEncryptionProcessor {
    /// Creates a processor with no predicates or placeholder alters.
    pub fn new(
        settings: Arc<EncryptionSettings>,
        registry: Arc<EncryptedTypesRegistry>,
        record_types: Arc<dyn RecordTypes>,
        service: Arc<dyn EncryptionService>,
        config: SharedConfig,
    ) -> Self {
        Self {
            settings,
            registry,
            record_types,
            service,
            config,
            allow: Vec::new(),
            alters: Vec::new(),
        }
    }

    /// Registers an allow-encryption predicate. All predicates must agree;
    /// a single `false` skips encryption for that save.
    #[must_use]
    pub fn with_allow_predicate(
        mut self,
        predicate: impl Fn(&Record) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.allow.push(Box::new(predicate));
        self
    }

    /// Registers a placeholder alter. Alters run in registration order,
    /// each receiving the previous result.
    #[must_use]
    pub fn with_placeholder_alter(
        mut self,
        alter: impl Fn(&PlaceholderContext<'_>, Option<Value>) -> Option<Value> + Send + Sync + 'static,
    ) -> Self {
        self.alters.push(Box::new(alter));
        self
    }

    /// Whether every registered predicate allows encrypting `record`.
    #[must_use]
    pub fn encryption_allowed(&self, record: &Record) -> bool {
        self.allow.iter().all(|predicate| predicate(record))
    }

    /// Encrypts the configured fields of every translation of `record`.
    ///
    /// No-op when the record type is not registered or a predicate vetoes.
    /// Sets placeholders on `record.original` for every property its own
    /// blob held, so storage change detection sees the restored plaintext
    /// when a field stops being encrypted.
    ///
    /// # Errors
    ///
    /// Returns an error if no default profile is configured, the type is
    /// unknown, or sealing fails. `record` is unchanged on error.
    pub fn encrypt_record(&self, record: &mut Record) -> CoreResult<()> {
        if !self.registry.contains(&record.record_type)? {
            return Ok(());
        }
        if !self.encryption_allowed(record) {
            tracing::debug!(record_type = %record.record_type, id = ?record.id, "encryption vetoed");
            return Ok(());
        }

        let definition = self
            .record_types
            .definition(&record.record_type)
            .ok_or_else(|| CoreError::record_type_not_found(&record.record_type))?;
        let profile = self
            .config
            .read()
            .default_profile()
            .map(str::to_string)
            .ok_or(CoreError::MissingDefaultProfile)?;
        let fields = self.settings.encrypted_fields(&definition);

        let mut working = record.clone();
        working.attach_blob_field();
        let Record {
            record_type,
            translations,
            original,
            ..
        } = &mut working;

        for (langcode, translation) in translations.iter_mut() {
            let Translation { fields: values, blob } = translation;
            let Some(blob) = blob.as_mut() else {
                continue;
            };
            blob.reset();
            let candidate = self.collect(record_type, langcode, &fields, values);

            if let Some(original) = original.as_deref_mut() {
                if let Some(previous) = original.translations.get_mut(langcode) {
                    self.placeholder_previous(&definition, langcode, &profile, previous)?;
                }
            }

            blob.set_decrypted(candidate);
            blob.encrypt(self.service.as_ref(), &profile)?;
        }

        *record = working;
        Ok(())
    }

    /// Restores real values from every translation's blob.
    ///
    /// Only deltas already present on the field are overwritten. Records
    /// without a blob, and blobs without ciphertext, are left as they are.
    ///
    /// # Errors
    ///
    /// Returns profile, cipher or codec errors. `record` is unchanged on
    /// error.
    pub fn decrypt_record(&self, record: &mut Record) -> CoreResult<()> {
        if !record.has_blob_field() {
            return Ok(());
        }
        let default_profile = self.config.read().default_profile().map(str::to_string);

        let mut working = record.clone();
        for translation in working.translations.values_mut() {
            let Translation { fields, blob } = translation;
            let Some(blob) = blob.as_mut() else {
                continue;
            };
            if let Some(payload) = blob.load_decrypted(self.service.as_ref(), default_profile.as_deref())? {
                apply_payload(fields, payload);
            }
        }

        *record = working;
        Ok(())
    }

    /// Names of the fields of `record` that are encrypted, for render
    /// integrations that must keep them out of caches.
    ///
    /// # Errors
    ///
    /// Returns registry read errors.
    pub fn encrypted_field_names(&self, record: &Record) -> CoreResult<Vec<String>> {
        if !self.registry.contains(&record.record_type)? {
            return Ok(Vec::new());
        }
        let Some(definition) = self.record_types.definition(&record.record_type) else {
            return Ok(Vec::new());
        };
        Ok(self
            .settings
            .encrypted_fields(&definition)
            .into_iter()
            .map(|(field, _)| field.name.clone())
            .collect())
    }

    /// The value stored in plaintext for one property.
    pub fn placeholder(&self, ctx: &PlaceholderContext<'_>, setting: &FieldEncryptionSetting) -> Value {
        let override_value = setting.placeholder_overrides.get(ctx.property);
        let computed = match ctx.field.data_type(ctx.property) {
            Some(data_type) => placeholder_for_field(&ctx.field.field_type, data_type, override_value),
            None => override_value.cloned(),
        };
        let altered = self.alters.iter().fold(computed, |acc, alter| alter(ctx, acc));
        altered.unwrap_or_else(|| {
            tracing::warn!(
                record_type = ctx.record_type,
                field = %ctx.field.name,
                property = ctx.property,
                "no placeholder for property; storing null"
            );
            Value::Null
        })
    }

    /// Swaps real values for placeholders and returns what was taken.
    fn collect(
        &self,
        record_type: &str,
        langcode: &str,
        fields: &[(&FieldDefinition, FieldEncryptionSetting)],
        values: &mut BTreeMap<String, FieldItems>,
    ) -> Option<DecryptedPayload> {
        let mut candidate: Option<DecryptedPayload> = None;

        for (field, setting) in fields {
            let Some(items) = values.get_mut(&field.name) else {
                continue;
            };
            for (delta, item) in items.iter_mut().enumerate() {
                for property in &setting.properties {
                    let Some(current) = item.get_mut(property) else {
                        continue;
                    };
                    if current.is_null() || current.is_empty_text() {
                        continue;
                    }
                    let ctx = PlaceholderContext {
                        record_type,
                        langcode,
                        field,
                        property,
                    };
                    let placeholder = self.placeholder(&ctx, setting);
                    if *current != placeholder {
                        let real = std::mem::replace(current, placeholder);
                        candidate
                            .get_or_insert_with(DecryptedPayload::new)
                            .entry(field.name.clone())
                            .or_default()
                            .entry(delta)
                            .or_default()
                            .insert(property.clone(), real);
                    } else if let Some(stale) = candidate
                        .as_mut()
                        .and_then(|c| c.get_mut(&field.name))
                        .and_then(|d| d.get_mut(&delta))
                    {
                        stale.remove(property);
                    }
                }
            }
        }
        candidate
    }

    /// Writes placeholders into the pre-save snapshot for every property
    /// held in its blob.
    fn placeholder_previous(
        &self,
        definition: &RecordTypeDefinition,
        langcode: &str,
        profile: &str,
        previous: &mut Translation,
    ) -> CoreResult<()> {
        let Translation { fields: values, blob } = previous;
        let Some(blob) = blob.as_mut() else {
            return Ok(());
        };
        let Some(payload) = blob.load_decrypted(self.service.as_ref(), Some(profile))? else {
            return Ok(());
        };

        for (field_name, deltas) in payload {
            let Some(field) = definition.get_field(field_name) else {
                continue;
            };
            let Some(items) = values.get_mut(field_name) else {
                continue;
            };
            let setting = self
                .settings
                .setting_for(&definition.id, field)
                .unwrap_or_default();
            for (delta, item) in items.iter_mut().enumerate() {
                let Some(properties) = deltas.get(&delta) else {
                    continue;
                };
                for property in properties.keys() {
                    let ctx = PlaceholderContext {
                        record_type: &definition.id,
                        langcode,
                        field,
                        property,
                    };
                    item.insert(property.clone(), self.placeholder(&ctx, &setting));
                }
            }
        }
        Ok(())
    }
}

fn apply_payload(fields: &mut BTreeMap<String, FieldItems>, payload: &DecryptedPayload) {
    for (field_name, deltas) in payload {
        let Some(items) = fields.get_mut(field_name) else {
            continue;
        };
        for (delta, item) in items.iter_mut().enumerate() {
            let Some(properties) = deltas.get(&delta) else {
                continue;
            };
            for (property, value) in properties {
                item.insert(property.clone(), value.clone());
            }
        }
    }
}

impl std::fmt::Debug for FieldEncryptionProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldEncryptionProcessor")
            .field("allow_predicates", &self.allow.len())
            .field("placeholder_alters", &self.alters.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::crypto::{EncryptionProfile, ProfileRegistry};
    use crate::record::{item, CacheInformation};
    use crate::types::ENCRYPTED_VALUE;
    use fieldcrypt_storage::MemoryStore;
    use std::collections::BTreeSet;

    struct Xor;

    impl EncryptionProfile for Xor {
        fn encrypt(&self, plaintext: &[u8]) -> CoreResult<Vec<u8>> {
            Ok(plaintext.iter().map(|b| b ^ 0x3c).collect())
        }

        fn decrypt(&self, ciphertext: &[u8]) -> CoreResult<Vec<u8>> {
            Ok(ciphertext.iter().map(|b| b ^ 0x3c).collect())
        }
    }

    struct Types(Arc<RecordTypeDefinition>);

    impl RecordTypes for Types {
        fn definition(&self, record_type: &str) -> Option<Arc<RecordTypeDefinition>> {
            (record_type == self.0.id).then(|| Arc::clone(&self.0))
        }

        fn record_type_ids(&self) -> Vec<String> {
            vec![self.0.id.clone()]
        }

        fn clear_cached_definitions(&self) {}

        fn set_cache_information(&self, _: &str, _: CacheInformation) -> CoreResult<()> {
            Ok(())
        }
    }

    fn article() -> RecordTypeDefinition {
        RecordTypeDefinition::new("article", "Article")
            .field(FieldDefinition::new("title", "string").base().property("value", "string"))
            .field(FieldDefinition::new("field_age", "integer").property("value", "integer"))
            .field(FieldDefinition::new("field_note", "string").property("value", "string"))
    }

    fn processor(config: Config) -> FieldEncryptionProcessor {
        let settings = Arc::new(EncryptionSettings::new());
        settings.set_field("article", "field_age", FieldEncryptionSetting::encrypted(["value"]));
        settings.set_field("article", "field_note", FieldEncryptionSetting::encrypted(["value"]));

        let registry = Arc::new(EncryptedTypesRegistry::new(Arc::new(MemoryStore::new())));
        registry.set(BTreeSet::from(["article".to_string()])).unwrap();

        let service = ProfileRegistry::new();
        service.register("p1", Xor);

        FieldEncryptionProcessor::new(
            settings,
            registry,
            Arc::new(Types(Arc::new(article()))),
            Arc::new(service),
            config.shared(),
        )
    }

    fn default_processor() -> FieldEncryptionProcessor {
        processor(Config::new().encryption_profile("p1"))
    }

    fn record() -> Record {
        Record::new("article", "en")
            .with_id(1u64)
            .with_field("title", vec![item("value", "Hello")])
            .with_field("field_age", vec![item("value", 42i64)])
            .with_field("field_note", vec![item("value", "Secret"), item("value", "")])
    }

    #[test]
    fn encrypt_then_decrypt() {
        let processor = default_processor();
        let mut record = record();

        processor.encrypt_record(&mut record).unwrap();
        assert_eq!(record.property("field_note", 0, "value"), Some(&Value::from(ENCRYPTED_VALUE)));
        assert_eq!(record.property("field_age", 0, "value"), Some(&Value::Integer(0)));
        assert_eq!(record.property("field_note", 1, "value"), Some(&Value::from("")));
        assert_eq!(record.property("title", 0, "value"), Some(&Value::from("Hello")));

        let blob = record.default_translation().unwrap().blob.as_ref().unwrap();
        assert_eq!(blob.encryption_profile(), Some("p1"));
        assert!(blob.value().is_some());
        assert!(blob.decrypted().is_none());

        processor.decrypt_record(&mut record).unwrap();
        assert_eq!(record.property("field_note", 0, "value"), Some(&Value::from("Secret")));
        assert_eq!(record.property("field_age", 0, "value"), Some(&Value::Integer(42)));
    }

    #[test]
    fn value_equal_to_placeholder_stays_plain() {
        let processor = default_processor();
        let mut record = Record::new("article", "en").with_field("field_age", vec![item("value", 0i64)]);

        processor.encrypt_record(&mut record).unwrap();
        let blob = record.default_translation().unwrap().blob.as_ref().unwrap();
        assert!(blob.value().is_none());
        assert_eq!(record.property("field_age", 0, "value"), Some(&Value::Integer(0)));
    }

    #[test]
    fn unregistered_type_untouched() {
        let processor = default_processor();
        let mut record = record();
        record.record_type = "page".to_string();
        let before = record.clone();

        processor.encrypt_record(&mut record).unwrap();
        assert_eq!(record, before);
    }

    #[test]
    fn veto_skips_encryption() {
        let processor = default_processor()
            .with_allow_predicate(|_| true)
            .with_allow_predicate(|record| record.id.is_none());
        let mut record = record();
        let before = record.clone();

        processor.encrypt_record(&mut record).unwrap();
        assert_eq!(record, before);
    }

    #[test]
    fn missing_profile_leaves_record_unchanged() {
        let processor = processor(Config::new());
        let mut record = record();
        let before = record.clone();

        assert!(matches!(
            processor.encrypt_record(&mut record),
            Err(CoreError::MissingDefaultProfile)
        ));
        assert_eq!(record, before);
    }

    #[test]
    fn alters_see_previous_result() {
        let processor = default_processor()
            .with_placeholder_alter(|ctx, current| {
                if ctx.field.name == "field_note" {
                    Some(Value::from("[hidden]"))
                } else {
                    current
                }
            })
            .with_placeholder_alter(|_, current| current);
        let mut record = record();

        processor.encrypt_record(&mut record).unwrap();
        assert_eq!(record.property("field_note", 0, "value"), Some(&Value::from("[hidden]")));
        assert_eq!(record.property("field_age", 0, "value"), Some(&Value::Integer(0)));
    }

    #[test]
    fn previous_snapshot_gets_placeholders() {
        let processor = default_processor();
        let mut stored = record();
        processor.encrypt_record(&mut stored).unwrap();

        // Host loads the stored copy, decrypts it and keeps it as original.
        let mut original = stored.clone();
        processor.decrypt_record(&mut original).unwrap();
        assert_eq!(original.property("field_note", 0, "value"), Some(&Value::from("Secret")));

        let mut editing = original.clone();
        editing.original = Some(Box::new(original));
        processor.encrypt_record(&mut editing).unwrap();

        let snapshot = editing.original.as_deref().unwrap();
        assert_eq!(snapshot.property("field_note", 0, "value"), Some(&Value::from(ENCRYPTED_VALUE)));
        assert_eq!(snapshot.property("field_age", 0, "value"), Some(&Value::Integer(0)));
    }

    #[test]
    fn decrypt_without_blob_is_noop() {
        let processor = default_processor();
        let mut record = record();
        let before = record.clone();
        processor.decrypt_record(&mut record).unwrap();
        assert_eq!(record, before);
    }

    #[test]
    fn encrypted_field_names_lists_configured_fields() {
        let processor = default_processor();
        let names = processor.encrypted_field_names(&record()).unwrap();
        assert_eq!(names, vec!["field_age".to_string(), "field_note".to_string()]);
    }
}
