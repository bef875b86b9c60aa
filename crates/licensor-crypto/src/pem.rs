//! Public key export blocks.
//!
//! ```text
//! -----BEGIN LICENSOR PUBLIC KEY-----
//! Key-Id: SIGN-2024
//! Key-Type: SIGNING
//! Algorithm: ED25519
//! Expires: 2025-12-31
//! Thumbprint: 3F0A...
//!
//! <base64 public key>
//! -----END LICENSOR PUBLIC KEY-----
//! ```
//!
//! `Expires` is omitted for keys without an expiry date. The thumbprint is
//! checked on parse.

use chrono::NaiveDate;
use licensor_core::temporal::{format_date, parse_date};
use licensor_core::{CryptoError, KeyId};

use crate::certificate::thumbprint;
use crate::ed25519::Ed25519PublicKey;
use crate::key_store::{KeyAlgorithm, KeyType};

const BEGIN: &str = "-----BEGIN LICENSOR PUBLIC KEY-----";
const END: &str = "-----END LICENSOR PUBLIC KEY-----";

/// Contents of an exported public key block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKeyBlock {
    /// Key identifier at the exporting side.
    pub key_id: KeyId,
    /// Role of the key at the exporting side.
    pub key_type: KeyType,
    /// Signature algorithm.
    pub algorithm: KeyAlgorithm,
    /// Expiry date, if any.
    pub expires: Option<NaiveDate>,
    /// The public key.
    pub public_key: Ed25519PublicKey,
}

impl PublicKeyBlock {
    /// Render the block.
    pub fn render(&self) -> String {
        let mut out = format!(
            "{BEGIN}\nKey-Id: {}\nKey-Type: {}\nAlgorithm: {}\n",
            self.key_id,
            self.key_type.as_str(),
            self.algorithm.as_str()
        );
        if let Some(expires) = self.expires {
            out.push_str(&format!("Expires: {}\n", format_date(expires)));
        }
        out.push_str(&format!(
            "Thumbprint: {}\n\n{}\n{END}\n",
            thumbprint(&self.public_key),
            self.public_key.to_base64()
        ));
        out
    }

    /// Parse a block.
    pub fn parse(text: &str) -> Result<Self, CryptoError> {
        let body = text
            .trim()
            .strip_prefix(BEGIN)
            .and_then(|rest| rest.strip_suffix(END))
            .ok_or_else(|| key_error("missing public key markers"))?;

        let mut key_id = None;
        let mut key_type = None;
        let mut algorithm = None;
        let mut expires = None;
        let mut expected_thumbprint = None;
        let mut encoded = String::new();

        for line in body.lines().map(str::trim).filter(|l| !l.is_empty()) {
            match line.split_once(':') {
                Some((name, value)) => {
                    let value = value.trim();
                    match name {
                        "Key-Id" => {
                            key_id = Some(KeyId::new(value).map_err(|e| key_error(e.to_string()))?)
                        }
                        "Key-Type" => key_type = Some(KeyType::parse(value)?),
                        "Algorithm" => algorithm = Some(KeyAlgorithm::parse(value)?),
                        "Expires" => {
                            expires =
                                Some(parse_date(value).map_err(|e| key_error(e.to_string()))?)
                        }
                        "Thumbprint" => expected_thumbprint = Some(value.to_ascii_uppercase()),
                        other => return Err(key_error(format!("unknown header {other:?}"))),
                    }
                }
                None => encoded.push_str(line),
            }
        }

        let public_key = Ed25519PublicKey::from_base64(&encoded)?;
        if let Some(expected) = expected_thumbprint {
            if expected != thumbprint(&public_key) {
                return Err(key_error("thumbprint does not match public key"));
            }
        }

        Ok(Self {
            key_id: key_id.ok_or_else(|| key_error("missing Key-Id header"))?,
            key_type: key_type.unwrap_or(KeyType::Validation),
            algorithm: algorithm.unwrap_or(KeyAlgorithm::Ed25519),
            expires,
            public_key,
        })
    }
}

fn key_error(msg: impl Into<String>) -> CryptoError {
    CryptoError::KeyError(msg.into())
}
