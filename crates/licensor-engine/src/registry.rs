//! # License Registry
//!
//! Arena of issued licenses keyed by [`LicenseId`], plus the validation
//! history. Licenses enter either from the generation pipeline or by
//! importing a license file produced elsewhere.
//!
//! Import checks format only: the file must frame correctly, the content
//! must decode completely and re-encode to the same bytes, and the
//! signature must be well formed. Cryptographic verification is the
//! validation pipeline's job.

use std::collections::{BTreeMap, VecDeque};

use chrono::NaiveDate;
use licensor_core::{
    decode, encode, ApplicationId, CanonicalText, KeyId, LicenseFields, LicenseFile, LicenseId,
    LicensingError, LicensingResult, LineRef, Timestamp,
};
use licensor_crypto::LicenseSignature;
use licensor_state::{LicenseLifecycle, LicenseStatus};
use serde::{Deserialize, Serialize};

use crate::validation::ValidationResult;

/// Validation records retained per license; older ones are dropped.
pub const HISTORY_LIMIT: usize = 100;

/// How a license entered the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LicenseSource {
    /// Issued by this installation.
    Generated,
    /// Read from a license file.
    Imported,
}

/// An issued license.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct License {
    /// Identifier.
    pub license_id: LicenseId,
    /// Licensed application.
    pub application_id: ApplicationId,
    /// Application name at issuance.
    pub application_name: String,
    /// Customer name at issuance.
    pub customer_name: String,
    /// First valid day.
    pub valid_from: NaiveDate,
    /// Last valid day.
    pub valid_to: NaiveDate,
    /// Licensed features.
    pub features: String,
    /// Issuance instant.
    pub issued_at: Timestamp,
    /// Signed canonical text.
    pub canonical_content: String,
    /// Signature string.
    pub signature: String,
    /// Key named by the signature.
    pub key_id: KeyId,
    /// Status and its history.
    pub lifecycle: LicenseLifecycle,
    /// Last validation instant.
    pub last_validated: Option<Timestamp>,
    /// Last validation verdict.
    pub last_validation_result: Option<ValidationResult>,
    /// Provenance.
    pub source: LicenseSource,
    /// Producing document line, for generated licenses.
    pub origin: Option<LineRef>,
    /// Replacement issued by explicit regeneration.
    #[serde(default)]
    pub superseded_by: Option<LicenseId>,
}

impl License {
    /// Current status.
    pub fn status(&self) -> LicenseStatus {
        self.lifecycle.status()
    }

    /// The stored fields in canonical form.
    pub fn fields(&self) -> LicenseFields {
        LicenseFields {
            license_id: self.license_id,
            application_id: self.application_id,
            application_name: self.application_name.clone(),
            customer_name: self.customer_name.clone(),
            valid_from: self.valid_from,
            valid_to: self.valid_to,
            features: self.features.clone(),
            issued_at: self.issued_at,
        }
    }

    /// Stored canonical content.
    pub fn canonical(&self) -> CanonicalText {
        CanonicalText::from_stored(self.canonical_content.clone())
    }

    /// Whether the stored fields re-encode to the stored content.
    pub fn fields_match_content(&self) -> bool {
        encode(&self.fields()).as_str() == self.canonical_content
    }

    /// Framed license file.
    pub fn to_file(&self) -> LicenseFile {
        LicenseFile::new(self.canonical_content.clone(), self.signature.clone())
    }

    /// Status active and `today` inside the window. No cryptography.
    pub fn is_currently_valid(&self, today: NaiveDate) -> bool {
        self.status() == LicenseStatus::Active
            && self.valid_from <= today
            && today <= self.valid_to
    }
}

/// One validation run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationRecord {
    /// Validated license.
    pub license_id: LicenseId,
    /// When.
    pub validated_at: Timestamp,
    /// Verdict.
    pub result: ValidationResult,
}

/// Durable store of licenses and validation history.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LicenseRegistry {
    licenses: BTreeMap<LicenseId, License>,
    #[serde(default)]
    history: BTreeMap<LicenseId, VecDeque<ValidationRecord>>,
}

impl LicenseRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a license. Identifiers are never reused.
    pub fn insert(&mut self, license: License) -> LicensingResult<()> {
        if self.licenses.contains_key(&license.license_id) {
            return Err(LicensingError::Validation(format!(
                "license {} is already registered",
                license.license_id
            )));
        }
        self.licenses.insert(license.license_id, license);
        Ok(())
    }

    /// Look up a license.
    pub fn get(&self, id: &LicenseId) -> Option<&License> {
        self.licenses.get(id)
    }

    /// Look up a license for update.
    pub fn get_mut(&mut self, id: &LicenseId) -> Option<&mut License> {
        self.licenses.get_mut(id)
    }

    /// Look up a license or fail with `NotFound`.
    pub fn require(&self, id: &LicenseId) -> LicensingResult<&License> {
        self.get(id)
            .ok_or_else(|| LicensingError::not_found("license", id))
    }

    /// All licenses in id order.
    pub fn iter(&self) -> impl Iterator<Item = &License> {
        self.licenses.values()
    }

    /// All license ids in order.
    pub fn ids(&self) -> Vec<LicenseId> {
        self.licenses.keys().copied().collect()
    }

    /// Number of licenses.
    pub fn len(&self) -> usize {
        self.licenses.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.licenses.is_empty()
    }

    /// Licenses produced by `line`.
    pub fn by_origin<'a>(&'a self, line: &'a LineRef) -> impl Iterator<Item = &'a License> + 'a {
        self.licenses
            .values()
            .filter(move |l| l.origin.as_ref() == Some(line))
    }

    /// Remove a license. Validation history is kept.
    pub fn remove(&mut self, id: &LicenseId) -> Option<License> {
        self.licenses.remove(id)
    }

    /// Append to the validation history, keeping the newest
    /// [`HISTORY_LIMIT`] records of the license.
    pub fn record_validation(&mut self, license_id: LicenseId, result: ValidationResult, at: Timestamp) {
        let records = self.history.entry(license_id).or_default();
        records.push_back(ValidationRecord {
            license_id,
            validated_at: at,
            result,
        });
        while records.len() > HISTORY_LIMIT {
            records.pop_front();
        }
    }

    /// Validation history of one license, oldest first.
    pub fn history_for(&self, id: &LicenseId) -> Vec<&ValidationRecord> {
        self.history
            .get(id)
            .map(|records| records.iter().collect())
            .unwrap_or_default()
    }

    /// Import a license file.
    pub fn import_file(&mut self, text: &str, now: Timestamp) -> LicensingResult<LicenseId> {
        let file = LicenseFile::parse(text)?;
        let decoded = decode(&file.content);
        if !decoded.complete {
            return Err(LicensingError::Tamper(
                "license content does not decode".to_string(),
            ));
        }
        if encode(&decoded.fields).as_str() != file.content {
            return Err(LicensingError::Tamper(
                "license content is not in canonical form".to_string(),
            ));
        }
        let signature = LicenseSignature::parse(&file.signature)
            .map_err(|e| LicensingError::Validation(format!("license signature: {e}")))?;

        let fields = decoded.fields;
        let status = LicenseStatus::from_window(now.date(), fields.valid_from, fields.valid_to);
        let license = License {
            license_id: fields.license_id,
            application_id: fields.application_id,
            application_name: fields.application_name,
            customer_name: fields.customer_name,
            valid_from: fields.valid_from,
            valid_to: fields.valid_to,
            features: fields.features,
            issued_at: fields.issued_at,
            canonical_content: file.content,
            signature: file.signature,
            key_id: signature.key_id,
            lifecycle: LicenseLifecycle::new(status),
            last_validated: None,
            last_validation_result: None,
            source: LicenseSource::Imported,
            origin: None,
            superseded_by: None,
        };
        let id = license.license_id;
        self.insert(license)?;
        tracing::info!(license_id = %id, "imported license file");
        Ok(id)
    }

    /// Render the license file of `id`.
    pub fn export_file(&self, id: &LicenseId) -> LicensingResult<String> {
        Ok(self.require(id)?.to_file().render())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use licensor_crypto::{sign, InMemorySecretStore, KeyStore, KeyType};
    use std::sync::Arc;

    fn now() -> Timestamp {
        Timestamp::parse("2024-03-01T00:00:00Z").unwrap()
    }

    fn signed_file() -> (String, LicenseId) {
        let mut ks = KeyStore::new(Arc::new(InMemorySecretStore::new()));
        let key_id = KeyId::new("K1").unwrap();
        ks.generate_key_pair(key_id.clone(), KeyType::Signing, None, now())
            .unwrap();
        let fields = LicenseFields {
            license_id: LicenseId::new(),
            application_id: ApplicationId::new(),
            application_name: "Payroll".to_string(),
            customer_name: "Contoso".to_string(),
            valid_from: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            valid_to: NaiveDate::from_ymd_opt(2024, 12, 31).unwrap(),
            features: "BASIC".to_string(),
            issued_at: now(),
        };
        let content = encode(&fields);
        let sig = sign(&ks, &key_id, &content, now()).unwrap();
        let text = LicenseFile::new(content.into_string(), sig.render()).render();
        (text, fields.license_id)
    }

    #[test]
    fn test_import_then_export() {
        let (text, id) = signed_file();
        let mut reg = LicenseRegistry::new();
        assert_eq!(reg.import_file(&text, now()).unwrap(), id);
        let license = reg.get(&id).unwrap();
        assert_eq!(license.source, LicenseSource::Imported);
        assert_eq!(license.key_id.as_str(), "K1");
        assert_eq!(license.status(), LicenseStatus::Active);
        assert!(license.fields_match_content());
        assert_eq!(reg.export_file(&id).unwrap(), text);
    }

    #[test]
    fn test_import_duplicate_rejected() {
        let (text, _) = signed_file();
        let mut reg = LicenseRegistry::new();
        reg.import_file(&text, now()).unwrap();
        assert!(matches!(
            reg.import_file(&text, now()),
            Err(LicensingError::Validation(_))
        ));
    }

    #[test]
    fn test_import_rejects_undecodable_content() {
        let (text, _) = signed_file();
        let broken = text.replace("|FEATURES:BASIC", "");
        let mut reg = LicenseRegistry::new();
        assert!(matches!(
            reg.import_file(&broken, now()),
            Err(LicensingError::Tamper(_))
        ));
    }

    #[test]
    fn test_import_rejects_bad_framing_and_signature() {
        let (text, _) = signed_file();
        let mut reg = LicenseRegistry::new();
        let unframed = text.replace("--- END LICENSE ---", "");
        assert!(matches!(
            reg.import_file(&unframed, now()),
            Err(LicensingError::Validation(_))
        ));
        let bad_sig = text.replace("ALG:ED25519", "ALG:NONE");
        assert!(matches!(
            reg.import_file(&bad_sig, now()),
            Err(LicensingError::Validation(_))
        ));
        assert!(reg.is_empty());
    }

    #[test]
    fn test_import_sets_window_status() {
        let (text, id) = signed_file();
        let mut reg = LicenseRegistry::new();
        let later = Timestamp::parse("2025-02-01T00:00:00Z").unwrap();
        reg.import_file(&text, later).unwrap();
        assert_eq!(reg.get(&id).unwrap().status(), LicenseStatus::Expired);
    }

    #[test]
    fn test_history_and_missing_export() {
        let mut reg = LicenseRegistry::new();
        let id = LicenseId::new();
        reg.record_validation(id, ValidationResult::Valid, now());
        reg.record_validation(LicenseId::new(), ValidationResult::Expired, now());
        assert_eq!(reg.history_for(&id).len(), 1);
        assert!(matches!(
            reg.export_file(&id),
            Err(LicensingError::NotFound { .. })
        ));
    }

    #[test]
    fn test_history_is_capped_per_license() {
        let mut reg = LicenseRegistry::new();
        let busy = LicenseId::new();
        let quiet = LicenseId::new();
        reg.record_validation(quiet, ValidationResult::Valid, now());
        for _ in 0..HISTORY_LIMIT {
            reg.record_validation(busy, ValidationResult::Valid, now());
        }
        let last = Timestamp::parse("2024-06-01T00:00:00Z").unwrap();
        reg.record_validation(busy, ValidationResult::Expired, last);

        let history = reg.history_for(&busy);
        assert_eq!(history.len(), HISTORY_LIMIT);
        assert_eq!(history.last().unwrap().result, ValidationResult::Expired);
        assert_eq!(history.last().unwrap().validated_at, last);
        assert_eq!(reg.history_for(&quiet).len(), 1);

        let json = serde_json::to_string(&reg).unwrap();
        let back: LicenseRegistry = serde_json::from_str(&json).unwrap();
        assert_eq!(back.history_for(&busy).len(), HISTORY_LIMIT);
    }
}
