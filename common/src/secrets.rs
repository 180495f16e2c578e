// Provider credential decryption

use crate::errors::CredentialError;
use crate::models::StorageProvider;
use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use std::fmt;

/// Marker prefix on encrypted-at-rest values. Unmarked values pass through
/// as plaintext.
pub const ENCRYPTED_PREFIX: &str = "enc:v1:";

const NONCE_LEN: usize = 12;

/// AES-256-GCM cipher over provider credential fields. Encrypted values are
/// `enc:v1:<base64(nonce ‖ ciphertext)>`.
#[derive(Clone)]
pub struct CredentialCipher {
    key: Option<[u8; 32]>,
}

impl CredentialCipher {
    /// Build from an optional base64-encoded 32-byte key. Without a key the
    /// cipher still passes plaintext fields through, but any marked field is
    /// a decryption error.
    pub fn new(key_b64: Option<&str>) -> Result<Self, CredentialError> {
        let key = match key_b64 {
            None => None,
            Some(encoded) => {
                let bytes = BASE64
                    .decode(encoded)
                    .map_err(|e| CredentialError::InvalidKey(e.to_string()))?;
                let key: [u8; 32] = bytes
                    .try_into()
                    .map_err(|_| CredentialError::InvalidKey("key must be 32 bytes".to_string()))?;
                Some(key)
            }
        };
        Ok(Self { key })
    }

    /// Decrypt one field. Values without the marker are returned unchanged.
    pub fn decrypt_field(&self, value: &str) -> Result<String, CredentialError> {
        let Some(blob) = value.strip_prefix(ENCRYPTED_PREFIX) else {
            return Ok(value.to_string());
        };
        let key = self.key.ok_or(CredentialError::NoKey)?;
        let raw = BASE64
            .decode(blob)
            .map_err(|e| CredentialError::Malformed(e.to_string()))?;
        if raw.len() <= NONCE_LEN {
            return Err(CredentialError::Malformed(
                "value shorter than nonce".to_string(),
            ));
        }
        let (nonce, ciphertext) = raw.split_at(NONCE_LEN);
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| CredentialError::InvalidKey(e.to_string()))?;
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CredentialError::DecryptFailed)?;
        String::from_utf8(plaintext).map_err(|e| CredentialError::Malformed(e.to_string()))
    }

    /// Encrypt a field into the marked wire format. Used by management
    /// tooling and tests; the scheduler core only decrypts.
    pub fn encrypt_field(&self, value: &str) -> Result<String, CredentialError> {
        let key = self.key.ok_or(CredentialError::NoKey)?;
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| CredentialError::InvalidKey(e.to_string()))?;
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, value.as_bytes())
            .map_err(|_| CredentialError::DecryptFailed)?;
        let mut raw = nonce.to_vec();
        raw.extend_from_slice(&ciphertext);
        Ok(format!("{ENCRYPTED_PREFIX}{}", BASE64.encode(raw)))
    }

    /// Decrypt all secret fields of a provider into a per-run, memory-only
    /// copy.
    pub fn decrypt_provider(
        &self,
        provider: &StorageProvider,
    ) -> Result<ProviderCredentials, CredentialError> {
        Ok(ProviderCredentials {
            password: self.decrypt_field(&provider.password)?,
            secret_key: self.decrypt_field(&provider.secret_key)?,
            client_secret: self.decrypt_field(&provider.client_secret)?,
            refresh_token: self.decrypt_field(&provider.refresh_token)?,
        })
    }
}

/// Decrypted provider secrets. Lives only inside a single run and never
/// appears in logs, payloads, or on disk.
#[derive(Clone, Default)]
pub struct ProviderCredentials {
    pub password: String,
    pub secret_key: String,
    pub client_secret: String,
    pub refresh_token: String,
}

impl fmt::Debug for ProviderCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderCredentials")
            .field("password", &"<redacted>")
            .field("secret_key", &"<redacted>")
            .field("client_secret", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_cipher() -> CredentialCipher {
        // 32 zero bytes, base64-encoded.
        let key = BASE64.encode([0u8; 32]);
        CredentialCipher::new(Some(&key)).unwrap()
    }

    #[test]
    fn test_plaintext_passes_through() {
        let cipher = CredentialCipher::new(None).unwrap();
        assert_eq!(cipher.decrypt_field("hunter2").unwrap(), "hunter2");
        assert_eq!(cipher.decrypt_field("").unwrap(), "");
    }

    #[test]
    fn test_round_trip() {
        let cipher = test_cipher();
        let encrypted = cipher.encrypt_field("s3cret-value").unwrap();
        assert!(encrypted.starts_with(ENCRYPTED_PREFIX));
        assert_eq!(cipher.decrypt_field(&encrypted).unwrap(), "s3cret-value");
    }

    #[test]
    fn test_marked_value_without_key_fails() {
        let cipher = CredentialCipher::new(None).unwrap();
        let err = cipher.decrypt_field("enc:v1:AAAA").unwrap_err();
        assert!(matches!(err, CredentialError::NoKey));
    }

    #[test]
    fn test_tampered_value_fails() {
        let cipher = test_cipher();
        let encrypted = cipher.encrypt_field("value").unwrap();
        let mut raw = BASE64
            .decode(encrypted.strip_prefix(ENCRYPTED_PREFIX).unwrap())
            .unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0xff;
        let tampered = format!("{ENCRYPTED_PREFIX}{}", BASE64.encode(raw));
        assert!(matches!(
            cipher.decrypt_field(&tampered),
            Err(CredentialError::DecryptFailed)
        ));
    }

    #[test]
    fn test_invalid_key_length_rejected() {
        let short = BASE64.encode([0u8; 16]);
        assert!(matches!(
            CredentialCipher::new(Some(&short)),
            Err(CredentialError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_debug_output_is_redacted() {
        let creds = ProviderCredentials {
            password: "topsecret".to_string(),
            ..ProviderCredentials::default()
        };
        let rendered = format!("{creds:?}");
        assert!(!rendered.contains("topsecret"));
        assert!(rendered.contains("<redacted>"));
    }
}
