// HMAC-SHA256 payload signing

use crate::errors::NotifyError;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// `hex(HMAC-SHA256(secret, body))`, the value carried by
/// `X-Hub-Signature-256` and `X-GoMFT-Signature`.
pub fn sign_sha256_hex(secret: &str, body: &[u8]) -> Result<String, NotifyError> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|e| NotifyError::InvalidFieldValue {
            field: "secret_key".to_string(),
            reason: e.to_string(),
        })?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_matches_independent_computation() {
        let secret = "test-secret";
        let body = br#"{"event_type":"job_execution"}"#;

        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        let expected = hex::encode(mac.finalize().into_bytes());

        assert_eq!(sign_sha256_hex(secret, body).unwrap(), expected);
    }

    #[test]
    fn test_signature_differs_per_body() {
        let a = sign_sha256_hex("s", b"one").unwrap();
        let b = sign_sha256_hex("s", b"two").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_signature_is_hex_of_32_bytes() {
        let sig = sign_sha256_hex("key", b"payload").unwrap();
        assert_eq!(sig.len(), 64);
        assert!(hex::decode(&sig).is_ok());
    }
}
