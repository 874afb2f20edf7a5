//! The encrypted blob carried by each record translation.

use crate::crypto::EncryptionService;
use crate::error::{CoreError, CoreResult};
use crate::record::PropertyMap;
use std::collections::BTreeMap;

/// Field name to delta to real property values.
pub type DecryptedPayload = BTreeMap<String, BTreeMap<usize, PropertyMap>>;

/// Ciphertext and profile id of one record translation, plus a transient
/// view of the decrypted payload.
///
/// Only `value` and `encryption_profile` are persisted. `decrypted` is
/// filled on load and while the processor collects values during save.
#[derive(Clone, Default, PartialEq)]
pub struct EncryptedBlob {
    value: Option<Vec<u8>>,
    encryption_profile: Option<String>,
    decrypted: Option<DecryptedPayload>,
}

impl EncryptedBlob {
    /// Rebuilds a blob from its two persisted columns.
    #[must_use]
    pub fn from_stored(value: Option<Vec<u8>>, encryption_profile: Option<String>) -> Self {
        Self {
            value,
            encryption_profile,
            decrypted: None,
        }
    }

    /// Persisted ciphertext.
    #[must_use]
    pub fn value(&self) -> Option<&[u8]> {
        self.value.as_deref()
    }

    /// Profile the ciphertext was sealed with.
    #[must_use]
    pub fn encryption_profile(&self) -> Option<&str> {
        self.encryption_profile.as_deref()
    }

    /// Cached decrypted payload, if any.
    #[must_use]
    pub fn decrypted(&self) -> Option<&DecryptedPayload> {
        self.decrypted.as_ref()
    }

    /// Replaces the cached decrypted payload.
    pub fn set_decrypted(&mut self, payload: Option<DecryptedPayload>) {
        self.decrypted = payload;
    }

    /// Empty means no ciphertext and no decrypted payload; a blob holding
    /// values that have not been sealed yet is not empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.value.is_none() && self.decrypted.is_none()
    }

    /// Clears ciphertext, profile and cache.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Seals the decrypted payload with `profile` and drops the cache.
    ///
    /// With no payload the ciphertext is cleared instead. The profile id is
    /// always the configured default, never one recorded on an older blob,
    /// so a profile change re-keys the record on its next save.
    ///
    /// # Errors
    ///
    /// Returns codec errors from serialization and profile or cipher errors
    /// from `service`. The blob is unchanged on error.
    pub fn encrypt(&mut self, service: &dyn EncryptionService, profile: &str) -> CoreResult<()> {
        match &self.decrypted {
            Some(payload) => {
                let plaintext = fieldcrypt_codec::to_cbor(payload)?;
                let ciphertext = service.seal(&plaintext, profile)?;
                self.value = Some(ciphertext);
                self.encryption_profile = Some(profile.to_string());
            }
            None => self.value = None,
        }
        self.decrypted = None;
        Ok(())
    }

    /// Opens the ciphertext without touching the cache.
    ///
    /// Uses the blob's own profile, falling back to `default_profile` for
    /// blobs written without one. Returns `None` when there is no
    /// ciphertext.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::MissingDefaultProfile`] if neither profile is
    /// known, and profile, cipher or codec errors otherwise.
    pub fn decrypt(
        &self,
        service: &dyn EncryptionService,
        default_profile: Option<&str>,
    ) -> CoreResult<Option<DecryptedPayload>> {
        let Some(ciphertext) = &self.value else {
            return Ok(None);
        };
        let profile = self
            .encryption_profile
            .as_deref()
            .filter(|p| !p.is_empty())
            .or(default_profile)
            .ok_or(CoreError::MissingDefaultProfile)?;
        let plaintext = service.open(ciphertext, profile)?;
        Ok(Some(fieldcrypt_codec::from_cbor(&plaintext)?))
    }

    /// Returns the cached payload, decrypting and caching it first if needed.
    ///
    /// # Errors
    ///
    /// Same as [`decrypt`](Self::decrypt).
    pub fn load_decrypted(
        &mut self,
        service: &dyn EncryptionService,
        default_profile: Option<&str>,
    ) -> CoreResult<Option<&DecryptedPayload>> {
        if self.decrypted.is_none() {
            self.decrypted = self.decrypt(service, default_profile)?;
        }
        Ok(self.decrypted.as_ref())
    }
}

impl std::fmt::Debug for EncryptedBlob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptedBlob")
            .field("value_len", &self.value.as_ref().map(Vec::len))
            .field("encryption_profile", &self.encryption_profile)
            .field(
                "decrypted",
                &self.decrypted.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}
