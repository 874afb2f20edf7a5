//! Settings writes and their side effects.
//!
//! Every change to field or record type encryption goes through
//! [`SettingsManager`]. A change that affects stored data queues the
//! affected records for re-saving, and every change ends with
//! [`StateManager::reconcile`] so the blob field exists wherever it is
//! needed before the first of those records is saved.

use crate::config::{Config, SharedConfig};
use crate::crypto::EncryptionService;
use crate::error::{CoreError, CoreResult};
use crate::host::{RecordQuery, RecordStorage, RecordTypes};
use crate::placeholder::placeholder_for_field;
use crate::queue::{QueueItem, ReconciliationQueue};
use crate::record::{FieldDefinition, RecordTypeDefinition};
use crate::schema::SchemaPlan;
use crate::settings::{EncryptionSettings, FieldEncryptionSetting, RecordTypeSettings};
use crate::state::StateManager;
use std::sync::Arc;

const RUN_QUEUE_HINT: &str =
    "Process the update queue now, or the updates will be performed automatically by cron.";

/// Checks that `setting` can be applied to `field`.
///
/// An encrypted setting needs a default profile, and every configured
/// property must exist on the field and have a placeholder (computed or
/// overridden). Disabled settings are always valid.
///
/// # Errors
///
/// Returns [`CoreError::MissingDefaultProfile`],
/// [`CoreError::UnknownProperty`] or [`CoreError::MissingPlaceholder`].
pub fn validate_field_setting(
    record_type: &str,
    field: &FieldDefinition,
    setting: &FieldEncryptionSetting,
    config: &Config,
) -> CoreResult<()> {
    if !setting.encrypted {
        return Ok(());
    }
    if config.default_profile().is_none() {
        return Err(CoreError::MissingDefaultProfile);
    }
    for property in &setting.properties {
        let data_type = field
            .data_type(property)
            .ok_or_else(|| CoreError::UnknownProperty {
                record_type: record_type.to_string(),
                field: field.name.clone(),
                property: property.clone(),
            })?;
        let override_value = setting.placeholder_overrides.get(property);
        if placeholder_for_field(&field.field_type, data_type, override_value).is_none() {
            return Err(CoreError::MissingPlaceholder {
                record_type: record_type.to_string(),
                field: field.name.clone(),
                property: property.clone(),
                data_type: data_type.to_string(),
            });
        }
    }
    Ok(())
}

/// One row of the encrypted fields overview.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedFieldSummary {
    /// Record type id.
    pub record_type: String,
    /// Record type label.
    pub record_type_label: String,
    /// Field name.
    pub field: String,
    /// Whether the field is a base field.
    pub base_field: bool,
    /// Encrypted properties.
    pub properties: Vec<String>,
}

/// Side effects of a settings write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsOutcome {
    /// Records (or revisions) queued for re-saving.
    pub queued: usize,
    /// Messages for the operator.
    pub messages: Vec<String>,
    /// Schema changes applied by reconciliation, if any.
    pub schema: Option<SchemaPlan>,
}

/// Applies settings changes.
pub struct SettingsManager {
    settings: Arc<EncryptionSettings>,
    record_types: Arc<dyn RecordTypes>,
    storage: Arc<dyn RecordStorage>,
    queue: Arc<dyn ReconciliationQueue>,
    state: Arc<StateManager>,
    service: Arc<dyn EncryptionService>,
    config: SharedConfig,
}

impl SettingsManager {
    /// Creates a settings manager.
    pub fn new(
        settings: Arc<EncryptionSettings>,
        record_types: Arc<dyn RecordTypes>,
        storage: Arc<dyn RecordStorage>,
        queue: Arc<dyn ReconciliationQueue>,
        state: Arc<StateManager>,
        service: Arc<dyn EncryptionService>,
        config: SharedConfig,
    ) -> Self {
        Self {
            settings,
            record_types,
            storage,
            queue,
            state,
            service,
            config,
        }
    }

    fn definition(&self, record_type: &str) -> CoreResult<Arc<RecordTypeDefinition>> {
        self.record_types
            .definition(record_type)
            .ok_or_else(|| CoreError::record_type_not_found(record_type))
    }

    /// Stores the setting of a configurable field.
    ///
    /// When the setting changed and the field has stored data, every record
    /// (every revision for revisionable types) with a value in the field is
    /// queued.
    ///
    /// # Errors
    ///
    /// Returns validation errors before anything is stored, and storage,
    /// queue or schema errors afterwards.
    pub fn save_field_setting(
        &self,
        record_type: &str,
        field: &str,
        mut setting: FieldEncryptionSetting,
    ) -> CoreResult<SettingsOutcome> {
        let definition = self.definition(record_type)?;
        let field_definition = definition
            .get_field(field)
            .ok_or_else(|| CoreError::FieldNotFound {
                record_type: record_type.to_string(),
                field: field.to_string(),
            })?;
        if field_definition.base_field {
            return Err(CoreError::invalid_operation(format!(
                "{record_type}.{field} is a base field; configure it through the record type settings"
            )));
        }
        setting.normalize();
        validate_field_setting(record_type, field_definition, &setting, &self.config.read())?;

        let previous = self
            .settings
            .set_field(record_type, field, setting.clone())
            .unwrap_or_default();

        let mut outcome = SettingsOutcome::default();
        if previous != setting && self.storage.field_has_data(record_type, field)? {
            outcome.queued = self.enqueue(&definition, RecordQuery::new(record_type).field_exists(field))?;
            outcome.messages.push(format!(
                "Updates to records with existing data for this field have been queued to be processed. {RUN_QUEUE_HINT}"
            ));
        }
        outcome.schema = self.state.reconcile()?;
        Ok(outcome)
    }

    /// Drops the setting of a configurable field whose storage was deleted.
    ///
    /// # Errors
    ///
    /// Returns schema errors.
    pub fn delete_field_setting(&self, record_type: &str, field: &str) -> CoreResult<SettingsOutcome> {
        self.settings.remove_field(record_type, field);
        Ok(SettingsOutcome {
            schema: self.state.reconcile()?,
            ..SettingsOutcome::default()
        })
    }

    /// Stores base field encryption for a record type.
    ///
    /// Entries that encrypt nothing are dropped; when none remain the
    /// settings are deleted instead. On create, or when the base fields
    /// changed, every record of the type is queued.
    ///
    /// # Errors
    ///
    /// Returns validation errors before anything is stored, and storage,
    /// queue or schema errors afterwards.
    pub fn save_record_type_settings(
        &self,
        record_type: &str,
        mut settings: RecordTypeSettings,
    ) -> CoreResult<SettingsOutcome> {
        let definition = self.definition(record_type)?;
        settings
            .base_fields
            .retain(|_, setting| setting.encrypted && !setting.properties.is_empty());
        if settings.base_fields.is_empty() {
            return self.delete_record_type_settings(record_type);
        }

        {
            let config = self.config.read();
            for (name, setting) in &mut settings.base_fields {
                setting.normalize();
                let field = definition
                    .get_field(name)
                    .filter(|f| f.base_field)
                    .ok_or_else(|| CoreError::FieldNotFound {
                        record_type: record_type.to_string(),
                        field: name.clone(),
                    })?;
                validate_field_setting(record_type, field, setting, &config)?;
            }
        }

        let previous = self.settings.set_record_type(record_type, settings.clone());
        let mut outcome = SettingsOutcome::default();
        if !previous.is_some_and(|p| p.base_fields == settings.base_fields) {
            self.queue_all_records(record_type, &mut outcome)?;
        }
        outcome.messages.push(format!(
            "Updated encryption settings for {} base fields.",
            definition.label
        ));
        outcome.schema = self.state.reconcile()?;
        Ok(outcome)
    }

    /// Deletes base field encryption for a record type and queues its
    /// records so they get decrypted.
    ///
    /// # Errors
    ///
    /// Returns storage, queue or schema errors.
    pub fn delete_record_type_settings(&self, record_type: &str) -> CoreResult<SettingsOutcome> {
        let mut outcome = SettingsOutcome::default();
        if self.settings.remove_record_type(record_type).is_some() {
            self.queue_all_records(record_type, &mut outcome)?;
        }
        outcome.schema = self.state.reconcile()?;
        Ok(outcome)
    }

    /// Prunes a deleted base field from its record type settings.
    ///
    /// # Errors
    ///
    /// Same as [`save_record_type_settings`](Self::save_record_type_settings).
    pub fn on_base_field_deleted(&self, record_type: &str, field: &str) -> CoreResult<SettingsOutcome> {
        let Some(mut settings) = self.settings.record_type(record_type) else {
            return Ok(SettingsOutcome::default());
        };
        if settings.base_fields.remove(field).is_none() {
            return Ok(SettingsOutcome::default());
        }
        if settings.base_fields.is_empty() {
            self.delete_record_type_settings(record_type)
        } else {
            self.save_record_type_settings(record_type, settings)
        }
    }

    /// Removes encryption from one field; stored values get decrypted by
    /// the queued updates.
    ///
    /// Placeholder overrides of configurable fields are kept.
    ///
    /// # Errors
    ///
    /// Same as the underlying save.
    pub fn decrypt_field(&self, record_type: &str, field: &str, base_field: bool) -> CoreResult<SettingsOutcome> {
        if base_field {
            return self.on_base_field_deleted(record_type, field);
        }
        let mut setting = self.settings.field(record_type, field).unwrap_or_default();
        setting.encrypted = false;
        setting.properties.clear();
        self.save_field_setting(record_type, field, setting)
    }

    /// Replaces the global configuration.
    ///
    /// A configured default profile must resolve. An empty one is only
    /// accepted while no record type requires encryption.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidConfig`], [`CoreError::ProfileNotFound`]
    /// or [`CoreError::MissingDefaultProfile`] and leaves the configuration
    /// unchanged; host errors from recomputing cache flags.
    pub fn save_config(&self, config: Config) -> CoreResult<()> {
        config.validate()?;
        match config.default_profile() {
            Some(profile) if !self.service.has_profile(profile) => {
                return Err(CoreError::profile_not_found(profile));
            }
            Some(_) => {}
            None => {
                if self
                    .record_types
                    .record_type_ids()
                    .iter()
                    .any(|t| self.settings.requires_encryption(t))
                {
                    return Err(CoreError::MissingDefaultProfile);
                }
            }
        }

        let cacheability_changed = {
            let mut current = self.config.write();
            let changed = current.make_entities_uncacheable != config.make_entities_uncacheable;
            *current = config;
            changed
        };
        if cacheability_changed {
            self.state.on_cacheability_change()?;
        }
        Ok(())
    }

    /// Queues every record of `record_type` sealed with `from_profile` so
    /// it is re-sealed with the current default profile.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] when `from_profile` is the
    /// default, and lookup, storage or queue errors.
    pub fn queue_profile_update(&self, record_type: &str, from_profile: &str) -> CoreResult<SettingsOutcome> {
        let definition = self.definition(record_type)?;
        let default = self
            .config
            .read()
            .default_profile()
            .map(str::to_string)
            .ok_or(CoreError::MissingDefaultProfile)?;
        if default == from_profile {
            return Err(CoreError::invalid_operation(format!(
                "{from_profile} is already the default encryption profile"
            )));
        }

        let queued = self.enqueue(
            &definition,
            RecordQuery::new(record_type).encryption_profile(from_profile),
        )?;
        let message = if queued == 1 {
            format!("Queued one {} update. {RUN_QUEUE_HINT}", definition.label)
        } else {
            format!("Queued {queued} {} updates. {RUN_QUEUE_HINT}", definition.label)
        };
        Ok(SettingsOutcome {
            queued,
            messages: vec![message],
            schema: None,
        })
    }

    /// Refuses deletion of the default profile and of any profile still
    /// used by a stored blob.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ProfileInUse`], or registry and storage errors.
    pub fn check_profile_deletable(&self, profile: &str) -> CoreResult<()> {
        if self.config.read().encryption_profile == profile {
            return Err(CoreError::ProfileInUse {
                profile: profile.to_string(),
                reason: "it is the default for field encryption".to_string(),
            });
        }
        for record_type in self.state.encrypted_record_types()? {
            let Some(definition) = self.record_types.definition(&record_type) else {
                continue;
            };
            let query = RecordQuery::new(&record_type)
                .encryption_profile(profile)
                .all_revisions(definition.revisionable);
            if !self.storage.query(&query)?.is_empty() {
                return Err(CoreError::ProfileInUse {
                    profile: profile.to_string(),
                    reason: format!("it is in use by {record_type} records"),
                });
            }
        }
        Ok(())
    }

    /// Every encrypted field of every existing record type.
    #[must_use]
    pub fn encrypted_fields(&self) -> Vec<EncryptedFieldSummary> {
        let mut rows = Vec::new();
        for record_type in self.record_types.record_type_ids() {
            let Some(definition) = self.record_types.definition(&record_type) else {
                continue;
            };
            for (field, setting) in self.settings.encrypted_fields(&definition) {
                rows.push(EncryptedFieldSummary {
                    record_type: definition.id.clone(),
                    record_type_label: definition.label.clone(),
                    field: field.name.clone(),
                    base_field: field.base_field,
                    properties: setting.properties,
                });
            }
        }
        rows
    }

    /// An encrypted setting preselecting the default properties configured
    /// for `field_type`.
    #[must_use]
    pub fn default_setting_for(&self, field_type: &str) -> FieldEncryptionSetting {
        let config = self.config.read();
        let properties = config
            .default_properties
            .get(field_type)
            .cloned()
            .unwrap_or_default();
        FieldEncryptionSetting::encrypted(properties)
    }

    fn queue_all_records(&self, record_type: &str, outcome: &mut SettingsOutcome) -> CoreResult<()> {
        let Some(definition) = self.record_types.definition(record_type) else {
            return Ok(());
        };
        if !self.storage.has_data(record_type)? {
            return Ok(());
        }
        outcome.queued += self.enqueue(&definition, RecordQuery::new(record_type))?;
        outcome.messages.push(format!(
            "Updates to {} records with existing data have been queued to be processed. {RUN_QUEUE_HINT}",
            definition.label
        ));
        Ok(())
    }

    fn enqueue(&self, definition: &RecordTypeDefinition, query: RecordQuery) -> CoreResult<usize> {
        let query = query.all_revisions(definition.revisionable);
        let ids = self.storage.query(&query)?;
        let items: Vec<QueueItem> = ids
            .iter()
            .map(|id| QueueItem::new(definition.id.as_str(), id.clone()))
            .collect();
        self.queue.create_items(&items)?;
        if !ids.is_empty() {
            tracing::info!(record_type = %definition.id, count = ids.len(), "records queued for encryption update");
        }
        Ok(ids.len())
    }
}

impl std::fmt::Debug for SettingsManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettingsManager").finish_non_exhaustive()
    }
}
