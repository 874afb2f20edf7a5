//! Error types for the fieldcrypt engine.

use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in fieldcrypt core operations.
///
/// Variants fall into three groups. Configuration errors block a settings
/// save. Cryptographic errors abort the encrypt or decrypt of one record.
/// Queue and runtime errors are reported per item by the reconciliation
/// runner; only [`CoreError::is_retryable`] ones put the item back.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] fieldcrypt_storage::StorageError),

    /// CBOR codec error.
    #[error("codec error: {0}")]
    Codec(#[from] fieldcrypt_codec::CodecError),

    /// A configured property has a data type without a placeholder.
    #[error(
        "no placeholder for {record_type}.{field}.{property} (data type `{data_type}`); \
         configure a placeholder override"
    )]
    MissingPlaceholder {
        /// Record type id.
        record_type: String,
        /// Field name.
        field: String,
        /// Property name.
        property: String,
        /// Declared data type of the property.
        data_type: String,
    },

    /// No default encryption profile is configured.
    #[error("no default encryption profile is configured")]
    MissingDefaultProfile,

    /// A configured property does not exist on the field.
    #[error("field {record_type}.{field} has no property `{property}`")]
    UnknownProperty {
        /// Record type id.
        record_type: String,
        /// Field name.
        field: String,
        /// Property name.
        property: String,
    },

    /// Global configuration is invalid.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the problem.
        message: String,
    },

    /// The encryption profile id does not resolve.
    #[error("encryption profile not found: {profile}")]
    ProfileNotFound {
        /// The profile id.
        profile: String,
    },

    /// The profile may not be deleted.
    #[error("cannot delete encryption profile {profile}: {reason}")]
    ProfileInUse {
        /// The profile id.
        profile: String,
        /// Why it is still needed.
        reason: String,
    },

    /// Underlying cipher failure (corrupted ciphertext, key unavailable).
    #[error("cipher error: {message}")]
    Cipher {
        /// Description of the failure.
        message: String,
    },

    /// Invalid key size.
    #[error("invalid key size: expected {expected} bytes, got {actual}")]
    InvalidKeySize {
        /// Expected size in bytes.
        expected: usize,
        /// Actual size in bytes.
        actual: usize,
    },

    /// Key derivation failed.
    #[error("key derivation failed: {message}")]
    KeyDerivationFailed {
        /// Description of the failure.
        message: String,
    },

    /// A retryable condition (lock held, capacity exhausted).
    #[error("transient failure: {message}")]
    Transient {
        /// Description of the condition.
        message: String,
    },

    /// Record type is not known to the host.
    #[error("record type not found: {record_type}")]
    RecordTypeNotFound {
        /// The record type id.
        record_type: String,
    },

    /// Field is not defined on the record type.
    #[error("field not found: {record_type}.{field}")]
    FieldNotFound {
        /// The record type id.
        record_type: String,
        /// The field name.
        field: String,
    },

    /// Failure reported by the host platform.
    #[error("host error: {message}")]
    Host {
        /// Description of the failure.
        message: String,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },
}

impl CoreError {
    /// Creates an invalid configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Creates a profile-not-found error.
    pub fn profile_not_found(profile: impl Into<String>) -> Self {
        Self::ProfileNotFound {
            profile: profile.into(),
        }
    }

    /// Creates a cipher error.
    pub fn cipher(message: impl Into<String>) -> Self {
        Self::Cipher {
            message: message.into(),
        }
    }

    /// Creates an invalid key size error.
    pub fn invalid_key_size(actual: usize, expected: usize) -> Self {
        Self::InvalidKeySize { expected, actual }
    }

    /// Creates a key derivation failed error.
    pub fn key_derivation_failed(message: impl Into<String>) -> Self {
        Self::KeyDerivationFailed {
            message: message.into(),
        }
    }

    /// Creates a transient error.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    /// Creates a record-type-not-found error.
    pub fn record_type_not_found(record_type: impl Into<String>) -> Self {
        Self::RecordTypeNotFound {
            record_type: record_type.into(),
        }
    }

    /// Creates a host error.
    pub fn host(message: impl Into<String>) -> Self {
        Self::Host {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Whether a queue item that failed with this error should be released
    /// for another attempt rather than reported.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transient { .. } | Self::Storage(fieldcrypt_storage::StorageError::Locked)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(CoreError::transient("lock wait timeout").is_retryable());
        assert!(CoreError::Storage(fieldcrypt_storage::StorageError::Locked).is_retryable());
        assert!(!CoreError::cipher("bad tag").is_retryable());
        assert!(!CoreError::MissingDefaultProfile.is_retryable());
    }

    #[test]
    fn messages_name_the_location() {
        let err = CoreError::MissingPlaceholder {
            record_type: "node".into(),
            field: "field_when".into(),
            property: "value".into(),
            data_type: "timestamp".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("node.field_when.value"));
        assert!(msg.contains("timestamp"));
    }
}
