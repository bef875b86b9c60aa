//! # Identity Newtypes
//!
//! Newtype wrappers for Licensor identifiers. You cannot pass a `LicenseId`
//! where an `ApplicationId` is expected, and string identifiers are validated
//! once at construction.
//!
//! `KeyId` and `DocumentNo` appear inside canonical content and signature
//! headers, so their alphabet excludes the `|` and `:` delimiters.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::LicensingError;

/// Globally unique identifier of an issued license.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LicenseId(pub Uuid);

/// Identifier of an application in the catalog.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ApplicationId(pub Uuid);

impl LicenseId {
    /// Generate a new random license identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Access the inner UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Parse from the hyphenated UUID form used in canonical content.
    pub fn parse(s: &str) -> Result<Self, LicensingError> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|e| LicensingError::Validation(format!("invalid license id {s:?}: {e}")))
    }
}

impl ApplicationId {
    /// Generate a new random application identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Access the inner UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Parse from the hyphenated UUID form used in canonical content.
    pub fn parse(s: &str) -> Result<Self, LicensingError> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|e| LicensingError::Validation(format!("invalid application id {s:?}: {e}")))
    }
}

impl std::fmt::Display for LicenseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl std::fmt::Display for ApplicationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

/// Maximum length of a key identifier.
pub const KEY_ID_MAX_LEN: usize = 64;

/// Maximum length of a document number.
pub const DOCUMENT_NO_MAX_LEN: usize = 20;

/// Identifier of a cryptographic key in the key store.
///
/// Allowed characters: ASCII letters, digits, `-`, `_`, `.`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct KeyId(String);

impl KeyId {
    /// Validate and wrap a key identifier.
    pub fn new(s: impl Into<String>) -> Result<Self, LicensingError> {
        let s = s.into();
        validate_code(&s, KEY_ID_MAX_LEN, "key id")?;
        Ok(Self(s))
    }

    /// The identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for KeyId {
    type Error = LicensingError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<KeyId> for String {
    fn from(value: KeyId) -> Self {
        value.0
    }
}

impl std::fmt::Display for KeyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Number of a customer license document.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DocumentNo(String);

impl DocumentNo {
    /// Validate and wrap a document number. Letters are upper-cased.
    pub fn new(s: impl Into<String>) -> Result<Self, LicensingError> {
        let s = s.into().to_ascii_uppercase();
        validate_code(&s, DOCUMENT_NO_MAX_LEN, "document no")?;
        Ok(Self(s))
    }

    /// The document number as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for DocumentNo {
    type Error = LicensingError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<DocumentNo> for String {
    fn from(value: DocumentNo) -> Self {
        value.0
    }
}

impl std::fmt::Display for DocumentNo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Back-reference from a license to the document line that produced it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LineRef {
    /// Owning document.
    pub document_no: DocumentNo,
    /// Line number within the document.
    pub line_no: u32,
}

impl std::fmt::Display for LineRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.document_no, self.line_no)
    }
}

fn validate_code(s: &str, max_len: usize, what: &str) -> Result<(), LicensingError> {
    if s.is_empty() {
        return Err(LicensingError::Validation(format!("{what} must not be empty")));
    }
    if s.len() > max_len {
        return Err(LicensingError::Validation(format!(
            "{what} {s:?} exceeds {max_len} characters"
        )));
    }
    if let Some(c) = s
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
    {
        return Err(LicensingError::Validation(format!(
            "{what} {s:?} contains invalid character {c:?}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_license_id_display_is_hyphenated() {
        let id = LicenseId::new();
        let s = id.to_string();
        assert_eq!(s.len(), 36);
        assert_eq!(LicenseId::parse(&s).unwrap(), id);
    }

    #[test]
    fn test_application_id_parse_rejects_garbage() {
        assert!(ApplicationId::parse("not-a-guid").is_err());
    }

    #[test]
    fn test_key_id_rejects_delimiters() {
        assert!(KeyId::new("SIGN-2024").is_ok());
        assert!(KeyId::new("bad|key").is_err());
        assert!(KeyId::new("bad:key").is_err());
        assert!(KeyId::new("has space").is_err());
        assert!(KeyId::new("").is_err());
        assert!(KeyId::new("k".repeat(65)).is_err());
    }

    #[test]
    fn test_document_no_uppercases() {
        let no = DocumentNo::new("lic-0001").unwrap();
        assert_eq!(no.as_str(), "LIC-0001");
    }

    #[test]
    fn test_key_id_serde_validates() {
        let ok: KeyId = serde_json::from_str("\"K1\"").unwrap();
        assert_eq!(ok.as_str(), "K1");
        assert!(serde_json::from_str::<KeyId>("\"a|b\"").is_err());
    }

    #[test]
    fn test_key_ids_order_lexicographically() {
        let a = KeyId::new("A-KEY").unwrap();
        let b = KeyId::new("B-KEY").unwrap();
        assert!(a < b);
    }
}
