//! # fieldcrypt core
//!
//! Transparent per-field encryption-at-rest for records managed by a host
//! platform.
//!
//! This crate provides:
//! - [`placeholder`] policy for the plaintext left in ordinary storage
//! - The [`EncryptionService`] boundary and an AES-256-GCM reference profile
//! - [`FieldEncryptionProcessor`] for the save and load paths
//! - [`StateManager`] keeping the blob field and registry in step
//! - The reconciliation [`queue`] with its worker and batch runner
//! - [`SettingsManager`] for settings writes and their side effects
//!
//! The host implements the [`host`] traits and calls
//! [`FieldEncryptionProcessor::encrypt_record`] before writing a record and
//! [`FieldEncryptionProcessor::decrypt_record`] after reading one.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod blob;
pub mod config;
pub mod crypto;
mod error;
pub mod host;
pub mod placeholder;
mod processor;
pub mod queue;
pub mod record;
mod registry;
pub mod schema;
pub mod settings;
mod settings_manager;
mod state;
mod types;

pub use blob::{DecryptedPayload, EncryptedBlob};
pub use config::{Config, SharedConfig};
pub use crypto::{EncryptionProfile, EncryptionService, ProfileRegistry};
#[cfg(feature = "aes-profile")]
pub use crypto::{AesGcmProfile, EncryptionKey};
pub use error::{CoreError, CoreResult};
pub use host::{RecordQuery, RecordStorage, RecordTypes, SchemaManager};
pub use processor::{AllowEncryption, FieldEncryptionProcessor, PlaceholderAlter, PlaceholderContext};
pub use queue::{QueueItem, QueueProcessor, ReconciliationQueue, StoredQueue, UpdateRecordEncryption};
pub use record::{
    CacheInformation, FieldDefinition, FieldItems, PropertyMap, Record, RecordTypeDefinition, Translation,
};
pub use registry::EncryptedTypesRegistry;
pub use schema::{BlobFieldDefinition, SchemaPlan};
pub use settings::{EncryptionSettings, FieldEncryptionSetting, RecordTypeSettings};
pub use settings_manager::{validate_field_setting, EncryptedFieldSummary, SettingsManager, SettingsOutcome};
pub use state::StateManager;
pub use types::{
    RecordId, ENCRYPTED_FIELD_STORAGE_NAME, ENCRYPTED_TYPES_KEY, ENCRYPTED_VALUE, QUEUE_NAME, STATE_COLLECTION,
};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-exported so hosts can build property values without a direct dependency.
pub use fieldcrypt_codec::Value;
