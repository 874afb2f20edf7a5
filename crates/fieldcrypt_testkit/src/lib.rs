//! # fieldcrypt testkit
//!
//! Test utilities for fieldcrypt.
//!
//! This crate provides:
//! - An in-memory host platform: record types, schema manager and record
//!   storage with column change detection
//! - [`TestHost`](fixtures::TestHost), wiring the host to every engine component
//! - A toy encryption profile for tests that need several profiles
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust
//! use fieldcrypt_testkit::prelude::*;
//!
//! let host = TestHost::new();
//! host.encrypt_field("article", "field_secret", &["value"]);
//!
//! let mut record = Record::new("article", "en").with_field("field_secret", vec![item("value", "Secret")]);
//! host.save(&mut record);
//!
//! let stored = host.stored("article", record.id.as_ref().unwrap());
//! assert_eq!(stored.property("field_secret", 0, "value"), Some(&Value::from(ENCRYPTED_VALUE)));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use fieldcrypt_core::record::item;
    pub use fieldcrypt_core::{
        Config, CoreError, FieldDefinition, FieldEncryptionSetting, Record, RecordId, RecordTypeDefinition,
        RecordTypeSettings, Value, ENCRYPTED_VALUE,
    };
}

pub use fixtures::*;
pub use generators::*;
