//! Encryption codec boundary.
//!
//! The engine never touches key material. It asks an [`EncryptionService`]
//! to seal or open bytes under a named profile. [`ProfileRegistry`] is the
//! standard service: a map from profile id to [`EncryptionProfile`].

#[cfg(feature = "aes-profile")]
mod aes;

#[cfg(feature = "aes-profile")]
pub use aes::{AesGcmProfile, EncryptionKey, KEY_SIZE, NONCE_SIZE, TAG_SIZE};

use crate::error::{CoreError, CoreResult};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A named cipher configuration with its key material.
pub trait EncryptionProfile: Send + Sync {
    /// Encrypts `plaintext`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Cipher`] on any cipher failure.
    fn encrypt(&self, plaintext: &[u8]) -> CoreResult<Vec<u8>>;

    /// Decrypts bytes produced by [`encrypt`](Self::encrypt).
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Cipher`] for corrupted or foreign ciphertext.
    fn decrypt(&self, ciphertext: &[u8]) -> CoreResult<Vec<u8>>;
}

/// Seals and opens bytes under a profile id.
///
/// Only the field processor calls this.
pub trait EncryptionService: Send + Sync {
    /// Encrypts `plaintext` with the profile named `profile_id`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ProfileNotFound`] if the id does not resolve and
    /// [`CoreError::Cipher`] if encryption fails.
    fn seal(&self, plaintext: &[u8], profile_id: &str) -> CoreResult<Vec<u8>>;

    /// Decrypts `ciphertext` with the profile named `profile_id`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ProfileNotFound`] if the id does not resolve and
    /// [`CoreError::Cipher`] if decryption fails.
    fn open(&self, ciphertext: &[u8], profile_id: &str) -> CoreResult<Vec<u8>>;

    /// Whether `profile_id` resolves.
    fn has_profile(&self, profile_id: &str) -> bool;
}

/// Profiles by id.
#[derive(Default)]
pub struct ProfileRegistry {
    profiles: RwLock<BTreeMap<String, Arc<dyn EncryptionProfile>>>,
}

impl ProfileRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) a profile.
    pub fn register(&self, id: impl Into<String>, profile: impl EncryptionProfile + 'static) {
        self.profiles.write().insert(id.into(), Arc::new(profile));
    }

    /// Removes a profile. Returns whether it existed.
    ///
    /// Callers should run the settings manager's deletion check first.
    pub fn remove(&self, id: &str) -> bool {
        self.profiles.write().remove(id).is_some()
    }

    /// Registered profile ids in ascending order.
    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        self.profiles.read().keys().cloned().collect()
    }

    fn resolve(&self, id: &str) -> CoreResult<Arc<dyn EncryptionProfile>> {
        self.profiles
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| CoreError::profile_not_found(id))
    }
}

impl std::fmt::Debug for ProfileRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProfileRegistry")
            .field("profiles", &self.ids())
            .finish()
    }
}

impl EncryptionService for ProfileRegistry {
    fn seal(&self, plaintext: &[u8], profile_id: &str) -> CoreResult<Vec<u8>> {
        self.resolve(profile_id)?.encrypt(plaintext)
    }

    fn open(&self, ciphertext: &[u8], profile_id: &str) -> CoreResult<Vec<u8>> {
        self.resolve(profile_id)?.decrypt(ciphertext)
    }

    fn has_profile(&self, profile_id: &str) -> bool {
        self.profiles.read().contains_key(profile_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Reverse;

    impl EncryptionProfile for Reverse {
        fn encrypt(&self, plaintext: &[u8]) -> CoreResult<Vec<u8>> {
            Ok(plaintext.iter().rev().copied().collect())
        }

        fn decrypt(&self, ciphertext: &[u8]) -> CoreResult<Vec<u8>> {
            Ok(ciphertext.iter().rev().copied().collect())
        }
    }

    #[test]
    fn resolves_by_id() {
        let registry = ProfileRegistry::new();
        registry.register("rev", Reverse);

        assert!(registry.has_profile("rev"));
        let sealed = registry.seal(b"abc", "rev").unwrap();
        assert_eq!(sealed, b"cba");
        assert_eq!(registry.open(&sealed, "rev").unwrap(), b"abc");
    }

    #[test]
    fn unknown_profile() {
        let registry = ProfileRegistry::new();
        let err = registry.seal(b"abc", "missing").unwrap_err();
        assert!(matches!(err, CoreError::ProfileNotFound { profile } if profile == "missing"));
    }

    #[test]
    fn remove_profile() {
        let registry = ProfileRegistry::new();
        registry.register("a", Reverse);
        registry.register("b", Reverse);
        assert!(registry.remove("a"));
        assert!(!registry.remove("a"));
        assert_eq!(registry.ids(), vec!["b".to_string()]);
    }
}
