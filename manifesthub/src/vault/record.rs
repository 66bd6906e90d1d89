//! The account record stored on an account's branch.

use crate::crypto::secret::{self, SecretError, SecretKey};
use serde::{Deserialize, Serialize};

/// One Steam account, as serialized to `AccountInfo.json`.
///
/// `aes_encrypted` is tri-state on the wire: `true`, `false` or `null`,
/// with `null` read as "not encrypted". Password and refresh token are
/// AES-CBC encrypted at rest under the process key; the IV is per-record,
/// generated on first encryption and stored plaintext alongside.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRecord {
    pub account_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_password: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// Unix seconds of the last refresh-token rotation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_refresh: Option<i64>,

    /// Branch index derived from the Steam id; doubles as the branch name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<String>,

    /// Tri-state: `null` means "not encrypted".
    #[serde(default)]
    pub aes_encrypted: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aes_iv: Option<String>,
}

impl AccountRecord {
    /// A fresh record with no secrets.
    pub fn new(account_name: impl Into<String>) -> Self {
        Self {
            account_name: account_name.into(),
            account_password: None,
            refresh_token: None,
            last_refresh: None,
            index: None,
            aes_encrypted: None,
            aes_iv: None,
        }
    }

    /// A fresh record carrying a password, as ingested in `account` mode.
    pub fn with_password(account_name: impl Into<String>, password: Option<String>) -> Self {
        Self {
            account_password: password,
            ..Self::new(account_name)
        }
    }

    /// Whether the stored secrets are ciphertext.
    pub fn is_encrypted(&self) -> bool {
        self.aes_encrypted.unwrap_or(false)
    }

    /// Whether the record carries any secret worth encrypting.
    fn has_secret(&self) -> bool {
        let non_empty = |s: &Option<String>| s.as_deref().is_some_and(|v| !v.is_empty());
        non_empty(&self.account_password) || non_empty(&self.refresh_token)
    }

    /// Encrypt secrets for storage, minting an IV on first use.
    ///
    /// Records without secrets come back marked `aes_encrypted: false`.
    pub fn encrypted_for_storage(&self, key: &SecretKey) -> Result<Self, SecretError> {
        let mut stored = self.clone();
        if !self.has_secret() {
            stored.aes_encrypted = Some(false);
            return Ok(stored);
        }

        let iv = match &self.aes_iv {
            Some(encoded) => secret::decode_iv(encoded)?,
            None => secret::generate_iv(),
        };
        stored.account_password = secret::encrypt_opt(self.account_password.as_deref(), key, &iv)?;
        stored.refresh_token = secret::encrypt_opt(self.refresh_token.as_deref(), key, &iv)?;
        stored.aes_iv = Some(secret::encode_iv(&iv));
        stored.aes_encrypted = Some(true);
        Ok(stored)
    }

    /// Decrypt secrets read from storage.
    ///
    /// Unencrypted records pass through unchanged.
    pub fn decrypted_from_storage(&self, key: &SecretKey) -> Result<Self, SecretError> {
        if !self.is_encrypted() {
            return Ok(self.clone());
        }
        let iv = match &self.aes_iv {
            Some(encoded) => secret::decode_iv(encoded)?,
            None => return Err(SecretError::InvalidIvLength),
        };
        let mut record = self.clone();
        record.account_password = secret::decrypt_opt(self.account_password.as_deref(), key, &iv)?;
        record.refresh_token = secret::decrypt_opt(self.refresh_token.as_deref(), key, &iv)?;
        record.aes_encrypted = Some(false);
        Ok(record)
    }

    /// Serialize for storage, pretty-printed the way the forge renders it.
    pub fn to_pretty_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
