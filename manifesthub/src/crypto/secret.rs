//! AES-256-CBC encryption of account secrets.
//!
//! Passwords and refresh tokens are encrypted at rest with a process-wide
//! 256-bit key supplied by configuration. The IV is per-record: generated on
//! first encryption and stored plaintext next to the ciphertext. Empty or
//! absent secrets pass through both operations unchanged.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::prelude::{Engine as _, BASE64_STANDARD};
use rand::rngs::OsRng;
use rand::RngCore;
use thiserror::Error;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// Errors from secret encryption and decryption.
#[derive(Debug, Error)]
pub enum SecretError {
    /// The configured key does not decode to exactly 32 bytes
    #[error("AES key must decode to exactly 32 bytes")]
    InvalidKeyLength,

    /// The stored IV does not decode to exactly 16 bytes
    #[error("AES IV must decode to exactly 16 bytes")]
    InvalidIvLength,

    /// Base64 decoding of a stored value failed
    #[error("base64 decode failed: {0}")]
    Base64(#[from] base64::DecodeError),

    /// Ciphertext padding did not verify, which means the wrong key or IV
    #[error("ciphertext padding is invalid")]
    InvalidPadding,

    /// Decrypted bytes were not valid UTF-8
    #[error("decrypted secret is not valid UTF-8")]
    NotUtf8,
}

/// The process-wide AES-256 key.
///
/// Read-only after startup; shared by every vault operation in the run.
#[derive(Clone)]
pub struct SecretKey([u8; 32]);

impl SecretKey {
    /// Wrap raw key bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Decode a base64 key as supplied on the command line.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not valid base64 or does not decode
    /// to exactly 32 bytes.
    pub fn from_base64(encoded: &str) -> Result<Self, SecretError> {
        let bytes = BASE64_STANDARD.decode(encoded.trim())?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| SecretError::InvalidKeyLength)?;
        Ok(Self(bytes))
    }

    fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print key material.
        f.write_str("SecretKey(..)")
    }
}

/// Generate a fresh random 16-byte IV for a record's first encryption.
pub fn generate_iv() -> [u8; 16] {
    let mut iv = [0u8; 16];
    OsRng.fill_bytes(&mut iv);
    iv
}

/// Decode a base64 IV stored in an account record.
///
/// # Errors
///
/// Returns an error if the input is not valid base64 or is not 16 bytes.
pub fn decode_iv(encoded: &str) -> Result<[u8; 16], SecretError> {
    let bytes = BASE64_STANDARD.decode(encoded)?;
    bytes.try_into().map_err(|_| SecretError::InvalidIvLength)
}

/// Encode an IV for storage in an account record.
pub fn encode_iv(iv: &[u8; 16]) -> String {
    BASE64_STANDARD.encode(iv)
}

/// Encrypt a secret string, returning base64 ciphertext.
pub fn encrypt(plaintext: &str, key: &SecretKey, iv: &[u8; 16]) -> Result<String, SecretError> {
    let cipher = Aes256CbcEnc::new_from_slices(key.as_bytes(), iv)
        .map_err(|_| SecretError::InvalidKeyLength)?;
    let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());
    Ok(BASE64_STANDARD.encode(ciphertext))
}

/// Decrypt base64 ciphertext back to the secret string.
pub fn decrypt(encoded: &str, key: &SecretKey, iv: &[u8; 16]) -> Result<String, SecretError> {
    let ciphertext = BASE64_STANDARD.decode(encoded)?;
    let cipher = Aes256CbcDec::new_from_slices(key.as_bytes(), iv)
        .map_err(|_| SecretError::InvalidKeyLength)?;
    let plaintext = cipher
        .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
        .map_err(|_| SecretError::InvalidPadding)?;
    String::from_utf8(plaintext).map_err(|_| SecretError::NotUtf8)
}

/// Encrypt an optional secret. Empty and absent values pass through.
pub fn encrypt_opt(
    secret: Option<&str>,
    key: &SecretKey,
    iv: &[u8; 16],
) -> Result<Option<String>, SecretError> {
    match secret {
        Some(s) if !s.is_empty() => Ok(Some(encrypt(s, key, iv)?)),
        Some(s) => Ok(Some(s.to_string())),
        None => Ok(None),
    }
}

/// Decrypt an optional secret. Empty and absent values pass through.
pub fn decrypt_opt(
    secret: Option<&str>,
    key: &SecretKey,
    iv: &[u8; 16],
) -> Result<Option<String>, SecretError> {
    match secret {
        Some(s) if !s.is_empty() => Ok(Some(decrypt(s, key, iv)?)),
        Some(s) => Ok(Some(s.to_string())),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> SecretKey {
        SecretKey::from_bytes([7u8; 32])
    }

    #[test]
    fn test_roundtrip() {
        let key = test_key();
        let iv = generate_iv();

        for secret in ["hunter2", "a", "refresh-token-with-✓-unicode", &"x".repeat(300)] {
            let ct = encrypt(secret, &key, &iv).expect("encrypt");
            assert_ne!(ct, secret);
            let pt = decrypt(&ct, &key, &iv).expect("decrypt");
            assert_eq!(pt, secret);
        }
    }

    #[test]
    fn test_empty_and_absent_are_identity() {
        let key = test_key();
        let iv = generate_iv();

        assert_eq!(encrypt_opt(None, &key, &iv).unwrap(), None);
        assert_eq!(decrypt_opt(None, &key, &iv).unwrap(), None);
        assert_eq!(
            encrypt_opt(Some(""), &key, &iv).unwrap(),
            Some(String::new())
        );
        assert_eq!(
            decrypt_opt(Some(""), &key, &iv).unwrap(),
            Some(String::new())
        );
    }

    #[test]
    fn test_wrong_key_fails_padding() {
        let iv = generate_iv();
        let ct = encrypt("secret", &test_key(), &iv).unwrap();

        let other = SecretKey::from_bytes([8u8; 32]);
        assert!(matches!(
            decrypt(&ct, &other, &iv),
            Err(SecretError::InvalidPadding) | Err(SecretError::NotUtf8)
        ));
    }

    #[test]
    fn test_iv_roundtrip() {
        let iv = generate_iv();
        let decoded = decode_iv(&encode_iv(&iv)).expect("decode");
        assert_eq!(decoded, iv);
    }

    #[test]
    fn test_key_from_base64_rejects_bad_lengths() {
        use base64::prelude::{Engine as _, BASE64_STANDARD};

        let short = BASE64_STANDARD.encode([0u8; 16]);
        assert!(matches!(
            SecretKey::from_base64(&short),
            Err(SecretError::InvalidKeyLength)
        ));

        let exact = BASE64_STANDARD.encode([0u8; 32]);
        assert!(SecretKey::from_base64(&exact).is_ok());

        assert!(SecretKey::from_base64("not base64 !!").is_err());
    }

    #[test]
    fn test_debug_redacts_key() {
        let rendered = format!("{:?}", test_key());
        assert!(!rendered.contains('7'));
    }
}
