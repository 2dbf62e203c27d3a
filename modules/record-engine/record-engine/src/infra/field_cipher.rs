//! AES-256-GCM encryption of string field values.
//!
//! A sealed value is `aes256gcm:` followed by the hex encoding of
//! `nonce (12 bytes) || ciphertext || tag (16 bytes)`. Every encryption draws
//! a fresh random nonce, so equal plaintexts seal to different values.

use std::fmt;

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit, generic_array::GenericArray},
};
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::domain::error::{ConfigError, DomainError};
use crate::domain::plugins::FieldCipher;

pub const KEY_SIZE: usize = 32;
pub const NONCE_SIZE: usize = 12;
pub const TAG_SIZE: usize = 16;

const SEALED_PREFIX: &str = "aes256gcm:";

/// A 256-bit field encryption key, wiped on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey {
    bytes: [u8; KEY_SIZE],
}

impl EncryptionKey {
    /// Parse a key written as 64 hex digits.
    ///
    /// # Errors
    /// [`ConfigError::Encryption`] when the text is not hex or not 32 bytes long.
    pub fn from_hex(name: &str, secret: &SecretString) -> Result<Self, ConfigError> {
        let invalid = |message: String| ConfigError::Encryption {
            key: name.to_owned(),
            message,
        };
        let mut decoded = hex::decode(secret.expose_secret().trim())
            .map_err(|e| invalid(format!("key is not valid hex: {e}")))?;
        if decoded.len() != KEY_SIZE {
            let len = decoded.len();
            decoded.zeroize();
            return Err(invalid(format!("key must be {KEY_SIZE} bytes, got {len}")));
        }
        let mut bytes = [0u8; KEY_SIZE];
        bytes.copy_from_slice(&decoded);
        decoded.zeroize();
        Ok(Self { bytes })
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EncryptionKey([REDACTED])")
    }
}

pub struct AesGcmCipher {
    cipher: Aes256Gcm,
}

impl AesGcmCipher {
    #[must_use]
    pub fn new(key: &EncryptionKey) -> Self {
        Self {
            cipher: Aes256Gcm::new(GenericArray::from_slice(&key.bytes)),
        }
    }
}

impl fmt::Debug for AesGcmCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AesGcmCipher")
    }
}

impl FieldCipher for AesGcmCipher {
    fn encrypt(&self, plaintext: &str) -> Result<String, DomainError> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::rng().fill_bytes(&mut nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_bytes())
            .map_err(|_| DomainError::internal("field encryption failed"))?;

        let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend(ciphertext);
        Ok(format!("{SEALED_PREFIX}{}", hex::encode(sealed)))
    }

    fn decrypt(&self, sealed: &str) -> Result<String, DomainError> {
        let body = sealed
            .strip_prefix(SEALED_PREFIX)
            .ok_or_else(|| DomainError::internal("stored value is not an encrypted field"))?;
        let raw = hex::decode(body)
            .map_err(|e| DomainError::internal(format!("encrypted field is not valid hex: {e}")))?;
        if raw.len() < NONCE_SIZE + TAG_SIZE {
            return Err(DomainError::internal("encrypted field is too short"));
        }
        let (nonce, ciphertext) = raw.split_at(NONCE_SIZE);
        let plain = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| DomainError::internal("field decryption failed"))?;
        String::from_utf8(plain)
            .map_err(|e| DomainError::internal(format!("decrypted field is not utf-8: {e}")))
    }

    fn is_sealed(&self, value: &str) -> bool {
        value.strip_prefix(SEALED_PREFIX).is_some_and(|body| {
            body.len() >= 2 * (NONCE_SIZE + TAG_SIZE) && body.bytes().all(|b| b.is_ascii_hexdigit())
        })
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    const KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

    fn cipher() -> AesGcmCipher {
        let key = EncryptionKey::from_hex("records", &SecretString::from(KEY)).unwrap();
        AesGcmCipher::new(&key)
    }

    #[test]
    fn sealed_values_hide_the_plaintext() {
        let c = cipher();
        let a = c.encrypt("123-45-6789").unwrap();
        let b = c.encrypt("123-45-6789").unwrap();

        assert!(a.starts_with(SEALED_PREFIX));
        assert!(!a.contains("-45-"));
        assert_ne!(a, b, "nonces must differ");
        assert!(c.is_sealed(&a));
        assert!(!c.is_sealed("123-45-6789"));
        assert_eq!(c.decrypt(&a).unwrap(), "123-45-6789");
        assert_eq!(c.decrypt(&b).unwrap(), "123-45-6789");
    }

    #[test]
    fn tampered_or_foreign_values_fail_to_open() {
        let c = cipher();
        let sealed = c.encrypt("secret").unwrap();

        let mut tampered = sealed.clone();
        let last = tampered.pop().unwrap();
        tampered.push(if last == '0' { '1' } else { '0' });
        assert!(c.decrypt(&tampered).is_err());

        let other_key =
            EncryptionKey::from_hex("other", &SecretString::from("ff".repeat(KEY_SIZE))).unwrap();
        assert!(AesGcmCipher::new(&other_key).decrypt(&sealed).is_err());

        assert!(c.decrypt("secret").is_err());
        assert!(c.decrypt("aes256gcm:abcd").is_err());
    }

    #[test]
    fn keys_must_be_32_hex_bytes() {
        let short = EncryptionKey::from_hex("k", &SecretString::from("abcd")).unwrap_err();
        assert_eq!(short.to_string(), "encryption key 'k': key must be 32 bytes, got 2");

        let garbage = EncryptionKey::from_hex("k", &SecretString::from("zz")).unwrap_err();
        assert!(matches!(garbage, ConfigError::Encryption { .. }));

        let key = EncryptionKey::from_hex("k", &SecretString::from(KEY)).unwrap();
        assert_eq!(format!("{key:?}"), "EncryptionKey([REDACTED])");
    }
}
