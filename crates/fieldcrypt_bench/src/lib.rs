//! Shared fixtures for the fieldcrypt benchmarks.

use fieldcrypt_core::record::item;
use fieldcrypt_core::{AesGcmProfile, EncryptedBlob, EncryptionKey, Record};
use fieldcrypt_testkit::fixtures::TestHost;
use rand::distributions::Alphanumeric;
use rand::Rng;

/// Profile id registered by [`aes_host`].
pub const AES_PROFILE: &str = "aes";

/// Random alphanumeric text of `len` characters.
pub fn random_text(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// A test host sealing with a freshly generated AES-GCM key, with the
/// article body and `field_secret` encrypted.
pub fn aes_host() -> TestHost {
    let host = TestHost::new();
    host.profiles
        .register(AES_PROFILE, AesGcmProfile::new(&EncryptionKey::generate()));
    host.set_default_profile(AES_PROFILE);
    host.encrypt_field("article", "body", &["value", "summary"]);
    host.encrypt_field("article", "field_secret", &["value"]);
    host
}

/// An unsaved article whose encrypted fields hold `payload_size` characters
/// each, with `items` secret items.
pub fn article(payload_size: usize, items: usize) -> Record {
    let secrets = (0..items.max(1))
        .map(|_| item("value", random_text(payload_size)))
        .collect();
    let mut body = item("value", random_text(payload_size));
    body.insert("summary".to_string(), random_text(payload_size / 4 + 1).into());
    Record::new("article", "en")
        .with_field("title", vec![item("value", random_text(16))])
        .with_field("body", vec![body])
        .with_field("field_secret", secrets)
}

/// `record` as storage returns it: blobs hold ciphertext only.
pub fn as_stored(mut record: Record) -> Record {
    for translation in record.translations.values_mut() {
        if let Some(blob) = translation.blob.take() {
            translation.blob = Some(EncryptedBlob::from_stored(
                blob.value().map(<[u8]>::to_vec),
                blob.encryption_profile().map(str::to_string),
            ));
        }
    }
    record
}
