//! Identifiers and well-known names.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of the hidden field that carries the encrypted blob.
pub const ENCRYPTED_FIELD_STORAGE_NAME: &str = "encrypted_field_storage";

/// Placeholder written into text-like plaintext columns.
pub const ENCRYPTED_VALUE: &str = "🔒";

/// Name of the reconciliation queue.
pub const QUEUE_NAME: &str = "field_encrypt_update_entity_encryption";

/// Key/value collection holding engine state.
pub const STATE_COLLECTION: &str = "field_encrypt";

/// Key of the encrypted-types registry entry inside [`STATE_COLLECTION`].
pub const ENCRYPTED_TYPES_KEY: &str = "entity_types";

/// Identity of a record or of one of its revisions.
///
/// Hosts use either numeric serial ids or string ids (UUIDs, machine
/// names); both travel through the queue unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordId {
    /// Numeric id.
    Int(u64),
    /// String id.
    Str(String),
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordId::Int(n) => write!(f, "{n}"),
            RecordId::Str(s) => f.write_str(s),
        }
    }
}

impl From<u64> for RecordId {
    fn from(n: u64) -> Self {
        RecordId::Int(n)
    }
}

impl From<&str> for RecordId {
    fn from(s: &str) -> Self {
        RecordId::Str(s.to_string())
    }
}

impl From<String> for RecordId {
    fn from(s: String) -> Self {
        RecordId::Str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_id_display() {
        assert_eq!(RecordId::from(42).to_string(), "42");
        assert_eq!(RecordId::from("abc").to_string(), "abc");
    }

    #[test]
    fn record_id_is_untagged_on_the_wire() {
        let bytes = fieldcrypt_codec::to_cbor(&RecordId::from(7)).unwrap();
        let as_int: u64 = fieldcrypt_codec::from_cbor(&bytes).unwrap();
        assert_eq!(as_int, 7);

        let bytes = fieldcrypt_codec::to_cbor(&"x7").unwrap();
        let id: RecordId = fieldcrypt_codec::from_cbor(&bytes).unwrap();
        assert_eq!(id, RecordId::Str("x7".into()));
    }
}
