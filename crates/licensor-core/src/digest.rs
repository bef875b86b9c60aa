//! # Content Digest
//!
//! `ContentDigest` is the SHA-256 hash of canonical license content. It is
//! carried in the `DIGEST` field of every signature string and compared by
//! the verifier before the Ed25519 check.
//!
//! The digest can only be computed from [`CanonicalText`], so every digest in
//! the system covers bytes that went through [`crate::canonical::encode`] or
//! were stored as canonical content.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::canonical::CanonicalText;
use crate::error::LicensingError;

/// The hash algorithm that produced a digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DigestAlgorithm {
    /// SHA-256.
    Sha256,
}

impl DigestAlgorithm {
    /// Identifier used in signature headers.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sha256 => "SHA256",
        }
    }
}

impl std::fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A 32-byte digest with its algorithm tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentDigest {
    /// The hash algorithm that produced this digest.
    pub algorithm: DigestAlgorithm,
    /// The raw digest value.
    pub bytes: [u8; 32],
}

impl ContentDigest {
    /// Create a digest from raw bytes and algorithm.
    pub fn new(algorithm: DigestAlgorithm, bytes: [u8; 32]) -> Self {
        Self { algorithm, bytes }
    }

    /// Render the digest as a lowercase hex string.
    pub fn to_hex(&self) -> String {
        self.bytes.iter().map(|b| format!("{b:02x}")).collect()
    }

    /// Parse a 64-character hex SHA-256 digest. Either case is accepted.
    pub fn from_hex(hex: &str) -> Result<Self, LicensingError> {
        if hex.len() != 64 || !hex.is_ascii() {
            return Err(LicensingError::Validation(format!(
                "digest must be 64 hex characters, got {} characters",
                hex.len()
            )));
        }
        let mut bytes = [0u8; 32];
        for (i, chunk) in hex.as_bytes().chunks(2).enumerate() {
            let pair = std::str::from_utf8(chunk)
                .map_err(|e| LicensingError::Validation(format!("invalid digest hex: {e}")))?;
            bytes[i] = u8::from_str_radix(pair, 16).map_err(|e| {
                LicensingError::Validation(format!("invalid hex at position {}: {e}", i * 2))
            })?;
        }
        Ok(Self::new(DigestAlgorithm::Sha256, bytes))
    }
}

impl std::fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.to_hex())
    }
}

/// Compute the SHA-256 digest of canonical content.
pub fn sha256_digest(data: &CanonicalText) -> ContentDigest {
    let hash = Sha256::digest(data.as_bytes());
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&hash);
    ContentDigest::new(DigestAlgorithm::Sha256, bytes)
}
