//! Key generation for the AES-GCM profile.

use fieldcrypt_core::EncryptionKey;

/// Hex-encoded key, random or derived from `passphrase` and `salt`.
pub fn key_hex(passphrase: Option<&str>, salt: Option<&str>) -> Result<String, Box<dyn std::error::Error>> {
    let key = match (passphrase, salt) {
        (Some(passphrase), Some(salt)) => {
            EncryptionKey::derive_from_passphrase(passphrase.as_bytes(), salt.as_bytes())?
        }
        (Some(_), None) => return Err("A salt is required with --passphrase".into()),
        _ => EncryptionKey::generate(),
    };
    Ok(key.to_hex())
}

/// Runs the keygen command.
pub fn run(passphrase: Option<&str>, salt: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", key_hex(passphrase, salt)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_keys_are_stable() {
        let a = key_hex(Some("correct horse"), Some("salt")).unwrap();
        let b = key_hex(Some("correct horse"), Some("salt")).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(EncryptionKey::from_hex(&a).is_ok());
    }

    #[test]
    fn random_keys_differ() {
        assert_ne!(key_hex(None, None).unwrap(), key_hex(None, None).unwrap());
    }
}
