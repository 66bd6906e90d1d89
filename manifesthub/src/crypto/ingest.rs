//! Unsealing and decoding of externally supplied account files.
//!
//! `account` mode ingests a file that is either raw JSON of shape
//! `{"<account_name>": ["<password>", ...], ...}` or a sealed envelope
//! `{"payload": "<base64>"}` whose payload is the same JSON encrypted with
//! RSA-OAEP under the operator's public key. The private key arrives as PEM
//! in the `RSA_PRIVATE_KEY` environment variable.

use base64::prelude::{Engine as _, BASE64_STANDARD};
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::{Oaep, RsaPrivateKey};
use serde::Deserialize;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::debug;

/// Errors from account-file ingestion.
#[derive(Debug, Error)]
pub enum IngestError {
    /// The account list was not valid JSON of the expected shape
    #[error("account list is not valid JSON: {0}")]
    InvalidAccountList(#[from] serde_json::Error),
}

#[derive(Debug, Deserialize)]
struct SealedEnvelope {
    payload: String,
}

/// Recover the account-list text from an ingestion file.
///
/// Attempts the sealed-envelope interpretation first; on any failure along
/// that path (not JSON, no payload, bad base64, no key, decrypt failure,
/// non-UTF-8 plaintext) the raw file text is used instead.
pub fn unseal(file_text: &str, private_key_pem: Option<&str>) -> String {
    match try_unseal(file_text, private_key_pem) {
        Some(plaintext) => plaintext,
        None => {
            debug!("ingestion file treated as raw account list");
            file_text.to_string()
        }
    }
}

fn try_unseal(file_text: &str, private_key_pem: Option<&str>) -> Option<String> {
    let envelope: SealedEnvelope = serde_json::from_str(file_text).ok()?;
    let ciphertext = BASE64_STANDARD.decode(envelope.payload.trim()).ok()?;
    let pem = private_key_pem?;

    let key = RsaPrivateKey::from_pkcs8_pem(pem)
        .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
        .ok()?;
    let plaintext = key.decrypt(Oaep::new::<sha2::Sha256>(), &ciphertext).ok()?;
    String::from_utf8(plaintext).ok()
}

/// Parse the account-list JSON into `(name, password)` pairs.
///
/// Passwords are optional: an account entry with an empty list still yields
/// a record (it may carry a refresh token from an earlier run). Only the
/// first password of each list is used. Entries come out in name order so
/// instance partitioning is stable.
///
/// # Errors
///
/// Returns an error if the text is not a JSON object of string lists.
pub fn parse_accounts(text: &str) -> Result<Vec<(String, Option<String>)>, IngestError> {
    let raw: BTreeMap<String, Vec<String>> = serde_json::from_str(text)?;
    Ok(raw
        .into_iter()
        .map(|(name, passwords)| {
            let password = passwords.into_iter().find(|p| !p.is_empty());
            (name, password)
        })
        .collect())
}
