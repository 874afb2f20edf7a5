//! In-memory host platform and engine wiring.
//!
//! [`MemoryRecordStorage`] behaves like a column store: on save it only
//! writes properties whose value differs from the record's `original`
//! snapshot. That is the behaviour the processor's snapshot handling
//! exists for, so tests exercise the real failure mode.

use fieldcrypt_core::{
    BlobFieldDefinition, CacheInformation, Config, CoreError, CoreResult, EncryptedTypesRegistry, EncryptionProfile,
    EncryptionSettings, FieldDefinition, FieldEncryptionProcessor, FieldEncryptionSetting, ProfileRegistry,
    QueueProcessor, Record, RecordId, RecordQuery, RecordStorage, RecordTypeDefinition, RecordTypes, SchemaManager,
    SettingsManager, SettingsOutcome, SharedConfig, StateManager, StoredQueue, UpdateRecordEncryption,
};
use fieldcrypt_core::queue::Clock;
use fieldcrypt_storage::{FileStore, KeyValueStore, MemoryStore};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// A toy profile: XOR with a one-byte key behind a one-byte key tag.
///
/// Opening with the wrong profile fails with a cipher error, which is
/// all the tests need. Never use outside tests.
#[derive(Debug, Clone, Copy)]
pub struct XorTestProfile(pub u8);

impl EncryptionProfile for XorTestProfile {
    fn encrypt(&self, plaintext: &[u8]) -> CoreResult<Vec<u8>> {
        let mut out = Vec::with_capacity(plaintext.len() + 1);
        out.push(self.0);
        out.extend(plaintext.iter().map(|b| b ^ self.0));
        Ok(out)
    }

    fn decrypt(&self, ciphertext: &[u8]) -> CoreResult<Vec<u8>> {
        match ciphertext.split_first() {
            Some((tag, body)) if *tag == self.0 => Ok(body.iter().map(|b| b ^ self.0).collect()),
            _ => Err(CoreError::cipher("ciphertext was not sealed with this profile")),
        }
    }
}

/// A lease clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock(AtomicU64);

impl ManualClock {
    /// A clock standing at `now_ms`.
    pub fn new(now_ms: u64) -> Self {
        Self(AtomicU64::new(now_ms))
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: Duration) {
        let ms = u64::try_from(by.as_millis()).unwrap_or(u64::MAX);
        self.0.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Record types with mutable cache flags.
#[derive(Debug, Default)]
pub struct MemoryRecordTypes {
    definitions: RwLock<BTreeMap<String, Arc<RecordTypeDefinition>>>,
    cache: RwLock<BTreeMap<String, CacheInformation>>,
    clears: AtomicUsize,
}

impl MemoryRecordTypes {
    /// Creates an empty set of types.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a type.
    pub fn insert(&self, definition: RecordTypeDefinition) {
        self.definitions
            .write()
            .insert(definition.id.clone(), Arc::new(definition));
    }

    /// Removes a type.
    pub fn remove(&self, record_type: &str) {
        self.definitions.write().remove(record_type);
    }

    /// Cache flags last set for a type.
    pub fn cache_information(&self, record_type: &str) -> Option<CacheInformation> {
        self.cache.read().get(record_type).copied()
    }

    /// How often cached definitions were cleared.
    pub fn clear_count(&self) -> usize {
        self.clears.load(Ordering::SeqCst)
    }
}

impl RecordTypes for MemoryRecordTypes {
    fn definition(&self, record_type: &str) -> Option<Arc<RecordTypeDefinition>> {
        self.definitions.read().get(record_type).cloned()
    }

    fn record_type_ids(&self) -> Vec<String> {
        self.definitions.read().keys().cloned().collect()
    }

    fn clear_cached_definitions(&self) {
        self.clears.fetch_add(1, Ordering::SeqCst);
    }

    fn set_cache_information(&self, record_type: &str, info: CacheInformation) -> CoreResult<()> {
        self.cache.write().insert(record_type.to_string(), info);
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct StoredRecord {
    current: RecordId,
    revisions: BTreeMap<RecordId, Record>,
}

#[derive(Debug, Default)]
struct Tables {
    records: BTreeMap<String, BTreeMap<RecordId, StoredRecord>>,
    installed: BTreeSet<String>,
    next_id: u64,
    next_revision: u64,
}

fn has_value(record: &Record, field: &str) -> bool {
    record
        .translations
        .values()
        .any(|t| t.fields.get(field).is_some_and(|items| !items.is_empty()))
}

fn sealed_with(record: &Record, profile: &str) -> bool {
    record.translations.values().any(|t| {
        t.blob
            .as_ref()
            .is_some_and(|b| b.value().is_some() && b.encryption_profile() == Some(profile))
    })
}

/// Adds and removes the blob field on the shared tables. Removing a field
/// that is not there fails.
#[derive(Debug)]
pub struct MemorySchemaManager {
    tables: Arc<RwLock<Tables>>,
    installs: AtomicUsize,
    uninstalls: AtomicUsize,
}

impl MemorySchemaManager {
    /// Number of installs performed.
    pub fn install_count(&self) -> usize {
        self.installs.load(Ordering::SeqCst)
    }

    /// Number of uninstalls performed.
    pub fn uninstall_count(&self) -> usize {
        self.uninstalls.load(Ordering::SeqCst)
    }
}

impl SchemaManager for MemorySchemaManager {
    fn install_blob_field(&self, record_type: &str, _definition: &BlobFieldDefinition) -> CoreResult<()> {
        self.tables.write().installed.insert(record_type.to_string());
        self.installs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn uninstall_blob_field(&self, record_type: &str) -> CoreResult<()> {
        let mut tables = self.tables.write();
        if !tables.installed.remove(record_type) {
            return Err(CoreError::host(format!("{record_type} has no blob field to remove")));
        }
        if let Some(records) = tables.records.get_mut(record_type) {
            for stored in records.values_mut() {
                for revision in stored.revisions.values_mut() {
                    revision.detach_blob_field();
                }
            }
        }
        self.uninstalls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn blob_field_installed(&self, record_type: &str) -> bool {
        self.tables.read().installed.contains(record_type)
    }
}

/// A failure the storage returns on a future save.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectedFailure {
    /// A retryable failure.
    Transient,
    /// A non-retryable failure.
    Permanent,
}

type SaveHook = Box<dyn FnMut(&Record) + Send>;

/// Record storage over the shared tables.
///
/// Saves run the processor and write only changed properties. Loads attach
/// the blob field while it is installed and run the processor.
pub struct MemoryRecordStorage {
    tables: Arc<RwLock<Tables>>,
    record_types: Arc<MemoryRecordTypes>,
    processor: Arc<FieldEncryptionProcessor>,
    failures: Mutex<VecDeque<InjectedFailure>>,
    save_hook: Mutex<Option<SaveHook>>,
}

impl MemoryRecordStorage {
    /// Runs `hook` at the start of every later save, before injected
    /// failures are applied.
    pub fn on_save(&self, hook: impl FnMut(&Record) + Send + 'static) {
        *self.save_hook.lock() = Some(Box::new(hook));
    }

    /// Makes the next saves fail, in order.
    pub fn inject_failures(&self, failures: impl IntoIterator<Item = InjectedFailure>) {
        self.failures.lock().extend(failures);
    }

    /// The stored form of the current revision, without decryption.
    pub fn stored(&self, record_type: &str, id: &RecordId) -> Option<Record> {
        let tables = self.tables.read();
        let stored = tables.records.get(record_type)?.get(id)?;
        stored.revisions.get(&stored.current).cloned()
    }

    /// The stored form of one revision, without decryption.
    pub fn stored_revision(&self, record_type: &str, revision_id: &RecordId) -> Option<Record> {
        let tables = self.tables.read();
        tables
            .records
            .get(record_type)?
            .values()
            .find_map(|s| s.revisions.get(revision_id).cloned())
    }

    /// Revision ids of a record, oldest first.
    pub fn revision_ids(&self, record_type: &str, id: &RecordId) -> Vec<RecordId> {
        let tables = self.tables.read();
        tables
            .records
            .get(record_type)
            .and_then(|r| r.get(id))
            .map(|s| s.revisions.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Deletes a record with all its revisions.
    pub fn delete(&self, record_type: &str, id: &RecordId) -> bool {
        self.tables
            .write()
            .records
            .get_mut(record_type)
            .is_some_and(|r| r.remove(id).is_some())
    }

    fn hydrate(&self, mut record: Record) -> CoreResult<Record> {
        if self.tables.read().installed.contains(&record.record_type) {
            record.attach_blob_field();
        }
        self.processor.decrypt_record(&mut record)?;
        Ok(record)
    }
}

/// Keeps the previously stored value of every property the save did not
/// change, the way a column store skips unchanged columns.
fn write_changed(record: &Record, previous: Option<&Record>) -> Record {
    let mut row = record.clone();
    row.original = None;
    let (Some(original), Some(previous)) = (record.original.as_deref(), previous) else {
        return row;
    };
    for (langcode, translation) in &mut row.translations {
        for (field, items) in &mut translation.fields {
            for (delta, item) in items.iter_mut().enumerate() {
                for (property, value) in item.iter_mut() {
                    let unchanged = original
                        .translations
                        .get(langcode)
                        .and_then(|t| t.property(field, delta, property))
                        == Some(&*value);
                    if !unchanged {
                        continue;
                    }
                    if let Some(old) = previous
                        .translations
                        .get(langcode)
                        .and_then(|t| t.property(field, delta, property))
                    {
                        *value = old.clone();
                    }
                }
            }
        }
    }
    row
}

impl RecordStorage for MemoryRecordStorage {
    fn load(&self, record_type: &str, id: &RecordId) -> CoreResult<Option<Record>> {
        self.stored(record_type, id).map(|r| self.hydrate(r)).transpose()
    }

    fn load_revision(&self, record_type: &str, revision_id: &RecordId) -> CoreResult<Option<Record>> {
        self.stored_revision(record_type, revision_id)
            .map(|r| self.hydrate(r))
            .transpose()
    }

    fn save(&self, record: &mut Record) -> CoreResult<()> {
        if let Some(hook) = self.save_hook.lock().as_mut() {
            hook(record);
        }
        if let Some(failure) = self.failures.lock().pop_front() {
            return Err(match failure {
                InjectedFailure::Transient => CoreError::transient("record storage is locked"),
                InjectedFailure::Permanent => CoreError::host("record storage rejected the write"),
            });
        }
        let definition = self
            .record_types
            .definition(&record.record_type)
            .ok_or_else(|| CoreError::record_type_not_found(&record.record_type))?;

        let (installed, previous) = {
            let tables = self.tables.read();
            let previous = record.id.as_ref().and_then(|id| {
                let stored = tables.records.get(&record.record_type)?.get(id)?;
                let revision = record.revision_id.as_ref().unwrap_or(&stored.current);
                stored.revisions.get(revision).cloned()
            });
            (tables.installed.contains(&record.record_type), previous)
        };

        let mut working = record.clone();
        if installed {
            working.attach_blob_field();
        } else {
            working.detach_blob_field();
        }
        working.original = previous
            .clone()
            .map(|p| self.hydrate(p))
            .transpose()?
            .map(Box::new);
        self.processor.encrypt_record(&mut working)?;
        let mut row = write_changed(&working, previous.as_ref());

        let mut tables = self.tables.write();
        let id = match working.id.clone() {
            Some(id) => id,
            None => {
                tables.next_id += 1;
                RecordId::Int(tables.next_id)
            }
        };
        let new_revision = previous.is_none() || (definition.revisionable && working.new_revision);
        let revision_id = if new_revision {
            tables.next_revision += 1;
            RecordId::Int(tables.next_revision)
        } else {
            working
                .revision_id
                .clone()
                .or_else(|| previous.as_ref().and_then(|p| p.revision_id.clone()))
                .unwrap_or(RecordId::Int(0))
        };
        row.id = Some(id.clone());
        row.revision_id = Some(revision_id.clone());
        row.new_revision = false;

        let entry = tables
            .records
            .entry(working.record_type.clone())
            .or_default()
            .entry(id.clone())
            .or_insert_with(|| StoredRecord {
                current: revision_id.clone(),
                revisions: BTreeMap::new(),
            });
        if new_revision || entry.current == revision_id {
            entry.current = revision_id.clone();
        }
        entry.revisions.insert(revision_id.clone(), row);

        working.id = Some(id);
        working.revision_id = Some(revision_id);
        working.new_revision = false;
        working.original = None;
        *record = working;
        Ok(())
    }

    fn query(&self, query: &RecordQuery) -> CoreResult<Vec<RecordId>> {
        let tables = self.tables.read();
        let Some(records) = tables.records.get(&query.record_type) else {
            return Ok(Vec::new());
        };
        let matches = |record: &Record| {
            query.field_exists.as_deref().is_none_or(|f| has_value(record, f))
                && query
                    .encryption_profile
                    .as_deref()
                    .is_none_or(|p| sealed_with(record, p))
        };

        let mut ids = Vec::new();
        for (id, stored) in records {
            if query.all_revisions {
                ids.extend(
                    stored
                        .revisions
                        .iter()
                        .filter(|(_, r)| matches(r))
                        .map(|(rid, _)| rid.clone()),
                );
            } else if stored.revisions.get(&stored.current).is_some_and(|r| matches(r)) {
                ids.push(id.clone());
            }
        }
        Ok(ids)
    }

    fn has_data(&self, record_type: &str) -> CoreResult<bool> {
        Ok(self
            .tables
            .read()
            .records
            .get(record_type)
            .is_some_and(|r| !r.is_empty()))
    }

    fn field_has_data(&self, record_type: &str, field: &str) -> CoreResult<bool> {
        Ok(self.tables.read().records.get(record_type).is_some_and(|records| {
            records
                .values()
                .flat_map(|s| s.revisions.values())
                .any(|r| has_value(r, field))
        }))
    }
}

impl std::fmt::Debug for MemoryRecordStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryRecordStorage").finish_non_exhaustive()
    }
}

/// A revisionable, translatable record type covering the common field
/// shapes.
pub fn article_type() -> RecordTypeDefinition {
    RecordTypeDefinition::new("article", "Article")
        .revisionable(true)
        .translatable(true)
        .field(FieldDefinition::new("title", "string").base().property("value", "string"))
        .field(FieldDefinition::new("created", "created").base().property("value", "timestamp"))
        .field(
            FieldDefinition::new("body", "text_with_summary")
                .property("value", "string")
                .property("summary", "string")
                .property("format", "filter_format"),
        )
        .field(FieldDefinition::new("field_secret", "string").property("value", "string"))
        .field(FieldDefinition::new("field_tags", "string").property("value", "string"))
        .field(FieldDefinition::new("field_age", "integer").property("value", "integer"))
        .field(FieldDefinition::new("field_rating", "decimal").property("value", "string"))
}

/// A plain record type without revisions or translations.
pub fn page_type() -> RecordTypeDefinition {
    RecordTypeDefinition::new("page", "Page")
        .field(FieldDefinition::new("title", "string").base().property("value", "string"))
        .field(FieldDefinition::new("field_secret", "string").property("value", "string"))
}

/// Time the host's [`ManualClock`] starts at.
const START_MS: u64 = 1_700_000_000_000;

/// A host platform wired to every engine component.
///
/// Profiles `p1` and `p2` are registered; `p1` is the default. Claim
/// leases run on a [`ManualClock`].
pub struct TestHost {
    /// Engine state store.
    pub store: Arc<dyn KeyValueStore>,
    /// Global configuration.
    pub config: SharedConfig,
    /// Encryption profiles.
    pub profiles: Arc<ProfileRegistry>,
    /// Encryption settings.
    pub settings: Arc<EncryptionSettings>,
    /// Encrypted-types registry.
    pub registry: Arc<EncryptedTypesRegistry>,
    /// Record types.
    pub record_types: Arc<MemoryRecordTypes>,
    /// Schema manager.
    pub schema: Arc<MemorySchemaManager>,
    /// Record storage.
    pub storage: Arc<MemoryRecordStorage>,
    /// Reconciliation queue.
    pub queue: Arc<StoredQueue>,
    /// Clock behind the queue's claim leases.
    pub clock: Arc<ManualClock>,
    /// The processor used by the storage.
    pub processor: Arc<FieldEncryptionProcessor>,
    /// State manager.
    pub state: Arc<StateManager>,
    /// Settings manager.
    pub manager: SettingsManager,
    /// Queue runner.
    pub runner: QueueProcessor,
    _temp_dir: Option<TempDir>,
}

impl TestHost {
    /// A host over an in-memory state store.
    pub fn new() -> Self {
        Self::with_processor(|p| p)
    }

    /// A host whose processor is customized (predicates, alters).
    pub fn with_processor(customize: impl FnOnce(FieldEncryptionProcessor) -> FieldEncryptionProcessor) -> Self {
        Self::assemble(Arc::new(MemoryStore::new()), None, customize)
    }

    /// A host whose engine state lives in a temporary [`FileStore`].
    pub fn file() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let store = FileStore::open(temp_dir.path()).expect("Failed to open file store");
        Self::assemble(Arc::new(store), Some(temp_dir), |p| p)
    }

    fn assemble(
        store: Arc<dyn KeyValueStore>,
        temp_dir: Option<TempDir>,
        customize: impl FnOnce(FieldEncryptionProcessor) -> FieldEncryptionProcessor,
    ) -> Self {
        let config = Config::new().encryption_profile("p1").shared();
        let profiles = Arc::new(ProfileRegistry::new());
        profiles.register("p1", XorTestProfile(0x11));
        profiles.register("p2", XorTestProfile(0x22));

        let settings = Arc::new(EncryptionSettings::new());
        let registry = Arc::new(EncryptedTypesRegistry::new(Arc::clone(&store)));
        let record_types = Arc::new(MemoryRecordTypes::new());
        record_types.insert(article_type());
        record_types.insert(page_type());

        let tables = Arc::new(RwLock::new(Tables::default()));
        let schema = Arc::new(MemorySchemaManager {
            tables: Arc::clone(&tables),
            installs: AtomicUsize::new(0),
            uninstalls: AtomicUsize::new(0),
        });
        let clock = Arc::new(ManualClock::new(START_MS));
        let queue = Arc::new(StoredQueue::with_clock(Arc::clone(&store), clock.clone()));

        let processor = Arc::new(customize(FieldEncryptionProcessor::new(
            Arc::clone(&settings),
            Arc::clone(&registry),
            record_types.clone(),
            profiles.clone(),
            Arc::clone(&config),
        )));
        let storage = Arc::new(MemoryRecordStorage {
            tables,
            record_types: Arc::clone(&record_types),
            processor: Arc::clone(&processor),
            failures: Mutex::new(VecDeque::new()),
            save_hook: Mutex::new(None),
        });
        let state = Arc::new(StateManager::new(
            Arc::clone(&settings),
            Arc::clone(&registry),
            record_types.clone(),
            schema.clone(),
            queue.clone(),
            Arc::clone(&config),
        ));
        let manager = SettingsManager::new(
            Arc::clone(&settings),
            record_types.clone(),
            storage.clone(),
            queue.clone(),
            Arc::clone(&state),
            profiles.clone(),
            Arc::clone(&config),
        );
        let runner = QueueProcessor::new(
            queue.clone(),
            UpdateRecordEncryption::new(record_types.clone(), storage.clone()),
            Arc::clone(&state),
            Arc::clone(&config),
        );

        Self {
            store,
            config,
            profiles,
            settings,
            registry,
            record_types,
            schema,
            storage,
            queue,
            clock,
            processor,
            state,
            manager,
            runner,
            _temp_dir: temp_dir,
        }
    }

    /// Encrypts the given properties of a configurable field.
    pub fn encrypt_field(&self, record_type: &str, field: &str, properties: &[&str]) -> SettingsOutcome {
        self.manager
            .save_field_setting(record_type, field, FieldEncryptionSetting::encrypted(properties.iter().copied()))
            .expect("Failed to save field setting")
    }

    /// Switches the default profile.
    pub fn set_default_profile(&self, profile: &str) {
        let config = self.config.read().clone().encryption_profile(profile);
        self.manager.save_config(config).expect("Failed to save config");
    }

    /// Saves a record through the host storage.
    pub fn save(&self, record: &mut Record) {
        self.storage.save(record).expect("Failed to save record");
    }

    /// Loads and decrypts the current revision of a record.
    pub fn load(&self, record_type: &str, id: &RecordId) -> Record {
        self.storage
            .load(record_type, id)
            .expect("Failed to load record")
            .expect("Record not found")
    }

    /// The stored form of the current revision.
    pub fn stored(&self, record_type: &str, id: &RecordId) -> Record {
        self.storage.stored(record_type, id).expect("Record not found")
    }

    /// Drains the queue with the batch runner.
    pub fn run_queue(&self) -> fieldcrypt_core::queue::BatchReport {
        self.runner.run().expect("Failed to run queue")
    }
}

impl Default for TestHost {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldcrypt_core::record::item;
    use fieldcrypt_core::{Value, ENCRYPTED_VALUE};

    #[test]
    fn xor_profile_rejects_foreign_ciphertext() {
        let sealed = XorTestProfile(1).encrypt(b"abc").unwrap();
        assert_eq!(XorTestProfile(1).decrypt(&sealed).unwrap(), b"abc");
        assert!(XorTestProfile(2).decrypt(&sealed).is_err());
    }

    #[test]
    fn save_assigns_ids_and_revisions() {
        let host = TestHost::new();
        let mut record = Record::new("article", "en").with_field("title", vec![item("value", "One")]);
        host.save(&mut record);
        let id = record.id.clone().unwrap();

        record.new_revision = true;
        host.save(&mut record);
        assert_eq!(host.storage.revision_ids("article", &id).len(), 2);

        record.new_revision = false;
        host.save(&mut record);
        assert_eq!(host.storage.revision_ids("article", &id).len(), 2);
    }

    #[test]
    fn only_changed_columns_are_written() {
        let host = TestHost::new();
        let mut record = Record::new("page", "en")
            .with_field("title", vec![item("value", "One")])
            .with_field("field_secret", vec![item("value", "Kept")]);
        host.save(&mut record);
        let id = record.id.clone().unwrap();

        let mut edited = host.load("page", &id);
        edited
            .translation_mut("en")
            .fields
            .insert("title".to_string(), vec![item("value", "Two")]);
        host.save(&mut edited);

        let stored = host.stored("page", &id);
        assert_eq!(stored.property("title", 0, "value"), Some(&Value::from("Two")));
        assert_eq!(stored.property("field_secret", 0, "value"), Some(&Value::from("Kept")));
    }

    #[test]
    fn encrypt_field_installs_blob() {
        let host = TestHost::new();
        host.encrypt_field("page", "field_secret", &["value"]);
        assert!(host.schema.blob_field_installed("page"));

        let mut record = Record::new("page", "en").with_field("field_secret", vec![item("value", "Secret")]);
        host.save(&mut record);
        let id = record.id.clone().unwrap();
        assert_eq!(
            host.stored("page", &id).property("field_secret", 0, "value"),
            Some(&Value::from(ENCRYPTED_VALUE))
        );
        assert_eq!(
            host.load("page", &id).property("field_secret", 0, "value"),
            Some(&Value::from("Secret"))
        );
    }
}
