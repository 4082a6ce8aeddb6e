//! AES-256-CBC decryption pipeline for encrypted channels.
//!
//! Event payloads on `private-encrypted-` channels arrive as
//! `{"ciphertext":"<base64>","nonce":"<base64 16-byte IV>"}` envelopes.
//! Decryption failures stay inside this module as [`DecryptError`] values;
//! the channel converts them to `pusher:decryption_error` events instead of
//! letting them escape into the dispatch loop.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, KeyIvInit};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde_json::Value;

use crate::error::{ReverbError, Result};

type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// Master key length after base64 decoding.
pub const KEY_LENGTH: usize = 32;

/// Initialization vector length for AES-CBC.
pub const IV_LENGTH: usize = 16;

/// Why a single envelope failed to decrypt. Never surfaced as a
/// [`ReverbError`]; callers turn it into a synthetic channel event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecryptError {
    /// Payload is not an object with string `ciphertext` and `nonce` fields
    MalformedEnvelope,
    /// `ciphertext` or `nonce` is not valid base64, or the IV length is wrong
    InvalidEncoding,
    /// The cipher rejected the ciphertext (wrong key, corrupt padding)
    CipherFailure,
    /// The plaintext is not valid JSON
    InvalidPlaintext,
}

impl std::fmt::Display for DecryptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MalformedEnvelope => write!(f, "malformed encrypted envelope"),
            Self::InvalidEncoding => write!(f, "invalid base64 or IV length"),
            Self::CipherFailure => write!(f, "cipher rejected payload"),
            Self::InvalidPlaintext => write!(f, "plaintext is not valid JSON"),
        }
    }
}

/// Symmetric cipher for one encrypted channel, keyed at construction.
#[derive(Clone)]
pub struct EventCipher {
    key: [u8; KEY_LENGTH],
}

impl EventCipher {
    /// Build a cipher from a base64-encoded 32-byte master key.
    ///
    /// Key shape problems are configuration errors raised here, never at
    /// subscribe or dispatch time.
    pub fn new(master_key_b64: &str) -> Result<Self> {
        let bytes = BASE64
            .decode(master_key_b64)
            .map_err(|e| ReverbError::config(format!("Encryption master key is not valid base64: {}", e)))?;

        if bytes.len() != KEY_LENGTH {
            return Err(ReverbError::config(format!(
                "Encryption master key must decode to {} bytes, got {}",
                KEY_LENGTH,
                bytes.len()
            )));
        }

        let mut key = [0u8; KEY_LENGTH];
        key.copy_from_slice(&bytes);
        Ok(Self { key })
    }

    /// Decrypt one `{ciphertext, nonce}` envelope back into the original
    /// JSON event payload.
    pub fn decrypt(&self, data: &Value) -> std::result::Result<Value, DecryptError> {
        let envelope = data.as_object().ok_or(DecryptError::MalformedEnvelope)?;
        let ciphertext_b64 = envelope
            .get("ciphertext")
            .and_then(|v| v.as_str())
            .ok_or(DecryptError::MalformedEnvelope)?;
        let nonce_b64 = envelope
            .get("nonce")
            .and_then(|v| v.as_str())
            .ok_or(DecryptError::MalformedEnvelope)?;

        let ciphertext = BASE64
            .decode(ciphertext_b64)
            .map_err(|_| DecryptError::InvalidEncoding)?;
        let iv = BASE64
            .decode(nonce_b64)
            .map_err(|_| DecryptError::InvalidEncoding)?;
        if iv.len() != IV_LENGTH {
            return Err(DecryptError::InvalidEncoding);
        }

        let mut iv_arr = [0u8; IV_LENGTH];
        iv_arr.copy_from_slice(&iv);

        let plaintext = Aes256CbcDec::new(&self.key.into(), &iv_arr.into())
            .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
            .map_err(|_| DecryptError::CipherFailure)?;

        serde_json::from_slice(&plaintext).map_err(|_| DecryptError::InvalidPlaintext)
    }
}

impl std::fmt::Debug for EventCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print key material
        f.debug_struct("EventCipher").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aes::cipher::BlockEncryptMut;

    type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;

    const KEY_B64: &str = "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=";

    fn encrypt_envelope(key_b64: &str, iv: [u8; IV_LENGTH], payload: &Value) -> Value {
        let key_bytes = BASE64.decode(key_b64).unwrap();
        let mut key = [0u8; KEY_LENGTH];
        key.copy_from_slice(&key_bytes);

        let plaintext = serde_json::to_vec(payload).unwrap();
        let ciphertext = Aes256CbcEnc::new(&key.into(), &iv.into())
            .encrypt_padded_vec_mut::<Pkcs7>(&plaintext);

        serde_json::json!({
            "ciphertext": BASE64.encode(ciphertext),
            "nonce": BASE64.encode(iv),
        })
    }

    #[test]
    fn test_round_trip() {
        let cipher = EventCipher::new(KEY_B64).unwrap();
        let payload = serde_json::json!({"message": "hello", "count": 3});

        let envelope = encrypt_envelope(KEY_B64, [7u8; IV_LENGTH], &payload);
        let decrypted = cipher.decrypt(&envelope).unwrap();

        assert_eq!(decrypted, payload);
    }

    #[test]
    fn test_key_must_be_32_bytes() {
        let short = BASE64.encode([0u8; 16]);
        assert!(matches!(
            EventCipher::new(&short),
            Err(ReverbError::ConfigurationError { .. })
        ));
    }

    #[test]
    fn test_key_must_be_base64() {
        assert!(matches!(
            EventCipher::new("not base64 !!!"),
            Err(ReverbError::ConfigurationError { .. })
        ));
    }

    #[test]
    fn test_missing_fields_are_malformed() {
        let cipher = EventCipher::new(KEY_B64).unwrap();

        assert_eq!(
            cipher.decrypt(&serde_json::json!("just a string")),
            Err(DecryptError::MalformedEnvelope)
        );
        assert_eq!(
            cipher.decrypt(&serde_json::json!({"nonce": "AAAA"})),
            Err(DecryptError::MalformedEnvelope)
        );
        assert_eq!(
            cipher.decrypt(&serde_json::json!({"ciphertext": "AAAA"})),
            Err(DecryptError::MalformedEnvelope)
        );
    }

    #[test]
    fn test_bad_base64_is_invalid_encoding() {
        let cipher = EventCipher::new(KEY_B64).unwrap();
        let envelope = serde_json::json!({"ciphertext": "$$$", "nonce": "$$$"});
        assert_eq!(cipher.decrypt(&envelope), Err(DecryptError::InvalidEncoding));
    }

    #[test]
    fn test_wrong_key_is_cipher_failure() {
        let other_key = BASE64.encode([9u8; KEY_LENGTH]);
        let payload = serde_json::json!({"secret": true});
        let envelope = encrypt_envelope(&other_key, [1u8; IV_LENGTH], &payload);

        // A wrong key surfaces as a padding failure or, rarely, as garbage
        // plaintext that fails the JSON decode. Either way it is contained.
        let cipher = EventCipher::new(KEY_B64).unwrap();
        assert!(matches!(
            cipher.decrypt(&envelope),
            Err(DecryptError::CipherFailure | DecryptError::InvalidPlaintext)
        ));
    }
}
