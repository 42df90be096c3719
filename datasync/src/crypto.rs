//! Encryption of data-source secrets (passwords, API keys) at rest.

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit},
};
use base64::{Engine, engine::general_purpose::STANDARD};
use rand_core::{OsRng, RngCore};
use serde_json::{Map, Value};

const NONCE_LEN: usize = 12;

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("Encryption error: {0}")]
    Encrypt(String),
    #[error("Decryption error: {0}")]
    Decrypt(String),
    #[error("Base64 decode error: {0}")]
    Decode(String),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid master key: {0}")]
    Key(String),
}

/// Encrypt the secret half of a connection config.
/// Returns base64(12-byte nonce ‖ ciphertext+tag), or an empty string when
/// there is nothing to protect.
pub fn seal_secrets(secrets: &Map<String, Value>, key: &[u8; 32]) -> Result<String, CryptoError> {
    if secrets.is_empty() {
        return Ok(String::new());
    }
    let plaintext = serde_json::to_vec(secrets)?;

    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let cipher = Aes256Gcm::new(key.into());
    let ciphertext = cipher
        .encrypt(nonce, plaintext.as_ref())
        .map_err(|e| CryptoError::Encrypt(e.to_string()))?;

    let mut combined = nonce_bytes.to_vec();
    combined.extend_from_slice(&ciphertext);

    Ok(STANDARD.encode(&combined))
}

/// Inverse of [`seal_secrets`]. An empty column decodes to an empty map.
pub fn open_secrets(encoded: &str, key: &[u8; 32]) -> Result<Map<String, Value>, CryptoError> {
    if encoded.is_empty() {
        return Ok(Map::new());
    }
    let data = STANDARD
        .decode(encoded)
        .map_err(|e| CryptoError::Decode(e.to_string()))?;

    if data.len() < NONCE_LEN {
        return Err(CryptoError::Decrypt(
            "Ciphertext too short (< 12 bytes)".to_string(),
        ));
    }

    let (nonce_bytes, ciphertext) = data.split_at(NONCE_LEN);
    let cipher = Aes256Gcm::new(key.into());
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|e| CryptoError::Decrypt(e.to_string()))?;

    Ok(serde_json::from_slice(&plaintext)?)
}

/// Parse a 64-char hex master key.
pub fn parse_hex_key(hex: &str) -> Result<[u8; 32], CryptoError> {
    if hex.len() != 64 {
        return Err(CryptoError::Key(format!(
            "expected 64 hex chars (32 bytes), got {}",
            hex.len()
        )));
    }
    let mut key = [0u8; 32];
    for (i, chunk) in hex.as_bytes().chunks(2).enumerate() {
        let byte_str = std::str::from_utf8(chunk)
            .map_err(|_| CryptoError::Key("invalid UTF-8 in hex string".to_string()))?;
        key[i] = u8::from_str_radix(byte_str, 16)
            .map_err(|_| CryptoError::Key(format!("invalid hex character at byte {i}")))?;
    }
    Ok(key)
}

pub fn random_key() -> [u8; 32] {
    let mut key = [0u8; 32];
    OsRng.fill_bytes(&mut key);
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_key() -> [u8; 32] {
        [42u8; 32]
    }

    fn secrets(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn test_seal_then_open_returns_secrets() {
        let key = test_key();
        let data = secrets(json!({"password": "s3cret", "api_key": "abc"}));
        let sealed = seal_secrets(&data, &key).unwrap();
        assert!(!sealed.contains("s3cret"));
        assert_eq!(open_secrets(&sealed, &key).unwrap(), data);
    }

    #[test]
    fn test_empty_secrets_store_as_empty_string() {
        let key = test_key();
        assert_eq!(seal_secrets(&Map::new(), &key).unwrap(), "");
        assert!(open_secrets("", &key).unwrap().is_empty());
    }

    #[test]
    fn test_wrong_key_fails() {
        let data = secrets(json!({"password": "value"}));
        let sealed = seal_secrets(&data, &[1u8; 32]).unwrap();
        assert!(open_secrets(&sealed, &[2u8; 32]).is_err());
    }

    #[test]
    fn test_corrupted_data_fails() {
        assert!(open_secrets("not-valid-base64!!!", &test_key()).is_err());
        assert!(open_secrets("AAAA", &test_key()).is_err());
    }

    #[test]
    fn test_two_seals_differ() {
        let key = test_key();
        let data = secrets(json!({"password": "value"}));
        assert_ne!(
            seal_secrets(&data, &key).unwrap(),
            seal_secrets(&data, &key).unwrap(),
            "Random nonce should produce different ciphertext each time"
        );
    }

    #[test]
    fn test_parse_hex_key() {
        let key = parse_hex_key(&"ab".repeat(32)).unwrap();
        assert_eq!(key, [0xab; 32]);
        assert!(parse_hex_key("abcd").is_err());
        assert!(parse_hex_key(&"zz".repeat(32)).is_err());
    }
}
