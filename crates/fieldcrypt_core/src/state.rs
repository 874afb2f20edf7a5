//! Schema reconciliation.
//!
//! Keeps the blob field and the encrypted-types registry in step with the
//! settings. Growth happens right away on every settings change; shrinking
//! waits until the reconciliation queue is empty so no queued record loses
//! its ciphertext before it has been rewritten.

use crate::config::SharedConfig;
use crate::error::CoreResult;
use crate::host::{RecordTypes, SchemaManager};
use crate::queue::ReconciliationQueue;
use crate::record::CacheInformation;
use crate::registry::EncryptedTypesRegistry;
use crate::schema::{plan_cleanup, plan_update, BlobFieldDefinition, SchemaPlan};
use crate::settings::EncryptionSettings;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Applies schema plans against the host.
pub struct StateManager {
    settings: Arc<EncryptionSettings>,
    registry: Arc<EncryptedTypesRegistry>,
    record_types: Arc<dyn RecordTypes>,
    schema: Arc<dyn SchemaManager>,
    queue: Arc<dyn ReconciliationQueue>,
    config: SharedConfig,
}

impl StateManager {
    /// Creates a state manager.
    pub fn new(
        settings: Arc<EncryptionSettings>,
        registry: Arc<EncryptedTypesRegistry>,
        record_types: Arc<dyn RecordTypes>,
        schema: Arc<dyn SchemaManager>,
        queue: Arc<dyn ReconciliationQueue>,
        config: SharedConfig,
    ) -> Self {
        Self {
            settings,
            registry,
            record_types,
            schema,
            queue,
            config,
        }
    }

    /// Existing record types whose settings require encryption.
    #[must_use]
    pub fn required_types(&self) -> BTreeSet<String> {
        self.record_types
            .record_type_ids()
            .into_iter()
            .filter(|id| self.settings.requires_encryption(id))
            .collect()
    }

    /// Types currently in the registry.
    ///
    /// # Errors
    ///
    /// Returns registry read errors.
    pub fn encrypted_record_types(&self) -> CoreResult<BTreeSet<String>> {
        self.registry.get()
    }

    /// Installs the blob field where newly required and grows the
    /// registry. Never removes anything. Returns the applied plan, `None`
    /// if the registry already matched.
    ///
    /// # Errors
    ///
    /// Returns schema, host or registry errors.
    pub fn reconcile(&self) -> CoreResult<Option<SchemaPlan>> {
        let current = self.registry.get()?;
        let required = self.required_types();
        let Some(plan) = plan_update(&current, &required) else {
            return Ok(None);
        };
        self.apply_plan(&plan)?;
        Ok(Some(plan))
    }

    /// Removes the blob field from types that no longer need it, unless
    /// the reconciliation queue has work pending.
    ///
    /// # Errors
    ///
    /// Returns queue, schema, host or registry errors.
    pub fn cleanup(&self) -> CoreResult<SchemaPlan> {
        let current = self.registry.get()?;
        let required = self.required_types();
        let pending = self.queue.number_of_items()?;
        let plan = plan_cleanup(&current, &required, pending);

        if !plan.deferred.is_empty() {
            tracing::info!(
                pending,
                types = ?plan.deferred,
                "blob field removal deferred until the update queue is empty"
            );
            return Ok(plan);
        }
        if !plan.is_noop(&current) {
            self.apply_plan(&plan)?;
        }
        Ok(plan)
    }

    /// Recomputes cache flags for every registered type after the
    /// uncacheable setting changed.
    ///
    /// # Errors
    ///
    /// Returns registry or host errors.
    pub fn on_cacheability_change(&self) -> CoreResult<()> {
        self.record_types.clear_cached_definitions();
        for record_type in self.registry.get()? {
            if self.record_types.definition(&record_type).is_some() {
                self.record_types
                    .set_cache_information(&record_type, self.cache_information(&record_type)?)?;
            }
        }
        Ok(())
    }

    /// Effective cache flags of a type: uncacheable while it is registered
    /// and the global setting asks for it, otherwise its declared flags.
    ///
    /// # Errors
    ///
    /// Returns registry read errors.
    pub fn cache_information(&self, record_type: &str) -> CoreResult<CacheInformation> {
        let declared = self
            .record_types
            .definition(record_type)
            .map_or(CacheInformation::CACHEABLE, |d| d.cache);
        if self.config.read().make_entities_uncacheable && self.registry.contains(record_type)? {
            Ok(CacheInformation::UNCACHEABLE)
        } else {
            Ok(declared)
        }
    }

    /// The blob field definition for a type, `None` unless registered.
    ///
    /// # Errors
    ///
    /// Returns registry read errors.
    pub fn blob_field_definition_for(&self, record_type: &str) -> CoreResult<Option<BlobFieldDefinition>> {
        Ok(self
            .registry
            .contains(record_type)?
            .then(BlobFieldDefinition::standard))
    }

    fn apply_plan(&self, plan: &SchemaPlan) -> CoreResult<()> {
        let definition = BlobFieldDefinition::standard();
        for record_type in &plan.install {
            self.schema.install_blob_field(record_type, &definition)?;
            tracing::info!(record_type = %record_type, "blob field installed");
        }
        for record_type in &plan.uninstall {
            // Types deleted by the host, or whose field is already gone,
            // only leave the registry.
            if self.record_types.definition(record_type).is_none()
                || !self.schema.blob_field_installed(record_type)
            {
                tracing::debug!(record_type = %record_type, "no blob field to uninstall");
                continue;
            }
            self.schema.uninstall_blob_field(record_type)?;
            tracing::info!(record_type = %record_type, "blob field uninstalled");
        }

        self.registry.set(plan.registry.clone())?;
        self.record_types.clear_cached_definitions();

        for record_type in &plan.cache_refresh {
            if self.record_types.definition(record_type).is_some() {
                self.record_types
                    .set_cache_information(record_type, self.cache_information(record_type)?)?;
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for StateManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateManager")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}
