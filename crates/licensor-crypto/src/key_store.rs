//! # Key Store
//!
//! Owns the lifecycle of signing and validation keys: generation,
//! certificate import, public key import/export, deactivation and deletion,
//! and selection of the active signing key.
//!
//! ## Structure
//!
//! - [`KeyRecords`] holds public metadata only. It has no reference to any
//!   secret store, so every path that reads public keys (export,
//!   verification) is unable to touch private material.
//! - [`KeyStore`] pairs the records with an injected [`SecretStore`]. Private
//!   key seeds are written under a fresh [`SecretHandle`] and read back only
//!   for signing.
//!
//! ## Selection
//!
//! A key is eligible for signing when its type is `Signing` or
//! `Certificate`, it is active, and it has no expiry date or one strictly
//! after today. The configured default key wins when eligible; otherwise the
//! first eligible key in ascending `KeyId` order is chosen. Selection is
//! deterministic for unchanged state.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::NaiveDate;
use licensor_core::{CryptoError, KeyId, LicensingError, LicensingResult, StateError, Timestamp};
use serde::{Deserialize, Serialize};

use crate::certificate::{thumbprint, CertificateBundle};
use crate::ed25519::{Ed25519KeyPair, Ed25519PublicKey};
use crate::pem::PublicKeyBlock;
use crate::secret_store::{SecretHandle, SecretStore};

/// Role of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KeyType {
    /// Generated key used to sign licenses.
    Signing,
    /// Public key used only to verify.
    Validation,
    /// Root key; never selected for license signing.
    Master,
    /// Imported certificate key; may sign.
    Certificate,
}

impl KeyType {
    /// Upper-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Signing => "SIGNING",
            Self::Validation => "VALIDATION",
            Self::Master => "MASTER",
            Self::Certificate => "CERTIFICATE",
        }
    }

    /// Parse a name, case-insensitively.
    pub fn parse(s: &str) -> Result<Self, CryptoError> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SIGNING" => Ok(Self::Signing),
            "VALIDATION" => Ok(Self::Validation),
            "MASTER" => Ok(Self::Master),
            "CERTIFICATE" => Ok(Self::Certificate),
            other => Err(CryptoError::KeyError(format!("unknown key type {other:?}"))),
        }
    }

    /// Whether keys of this type may sign licenses.
    pub fn can_sign(&self) -> bool {
        matches!(self, Self::Signing | Self::Certificate)
    }
}

impl std::fmt::Display for KeyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Signature algorithm of a key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KeyAlgorithm {
    /// Ed25519 (RFC 8032).
    #[default]
    Ed25519,
}

impl KeyAlgorithm {
    /// Identifier used in signature strings and key blocks.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ed25519 => "ED25519",
        }
    }

    /// Parse an identifier, case-insensitively.
    pub fn parse(s: &str) -> Result<Self, CryptoError> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ED25519" => Ok(Self::Ed25519),
            other => Err(CryptoError::KeyError(format!("unsupported algorithm {other:?}"))),
        }
    }
}

impl std::fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata kept for keys imported from a certificate bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateMeta {
    /// Uppercase hex SHA-256 of the public key.
    pub thumbprint: String,
    /// Issuer name.
    pub issuer: String,
    /// Subject name.
    pub subject: String,
    /// Display name.
    pub friendly_name: String,
    /// Whether the certificate carried a private key.
    pub has_private_key: bool,
}

/// A key record. Private material is referenced by handle only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CryptoKey {
    /// Unique identifier.
    pub key_id: KeyId,
    /// Role.
    pub key_type: KeyType,
    /// Algorithm.
    pub algorithm: KeyAlgorithm,
    /// Public key material.
    pub public_key: Ed25519PublicKey,
    /// Handle of the private key in the secret store, if one exists.
    pub secret: Option<SecretHandle>,
    /// Soft-enable flag.
    pub active: bool,
    /// Creation instant.
    pub created_at: Timestamp,
    /// Last day before which the key may be used; `None` never expires.
    pub expires: Option<NaiveDate>,
    /// Times this key was selected for signing.
    pub usage_count: u64,
    /// Last selection instant.
    pub last_used_at: Option<Timestamp>,
    /// First deactivation instant.
    pub deactivated_at: Option<Timestamp>,
    /// Present for imported certificates.
    pub certificate: Option<CertificateMeta>,
}

impl CryptoKey {
    /// Whether this key was imported from a certificate bundle.
    pub fn imported_certificate(&self) -> bool {
        self.certificate.is_some()
    }

    /// Whether the key has expired as of `today`.
    pub fn is_expired(&self, today: NaiveDate) -> bool {
        self.expires.is_some_and(|e| e <= today)
    }

    /// The signing selection predicate.
    pub fn is_signing_eligible(&self, today: NaiveDate) -> bool {
        self.key_type.can_sign() && self.active && !self.is_expired(today)
    }
}

/// The key chosen by [`KeyStore::get_active_signing_key`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveSigningKey {
    /// Selected key.
    pub key_id: KeyId,
    /// Its public key.
    pub public_key: Ed25519PublicKey,
    /// Handle of its private key.
    pub handle: SecretHandle,
}

/// Public key records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRecords {
    keys: BTreeMap<KeyId, CryptoKey>,
    #[serde(default)]
    default_signing_key: Option<KeyId>,
}

impl KeyRecords {
    /// Look up a key.
    pub fn get(&self, key_id: &KeyId) -> Option<&CryptoKey> {
        self.keys.get(key_id)
    }

    /// Whether a key exists.
    pub fn contains(&self, key_id: &KeyId) -> bool {
        self.keys.contains_key(key_id)
    }

    /// All keys in `KeyId` order.
    pub fn iter(&self) -> impl Iterator<Item = &CryptoKey> {
        self.keys.values()
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether there are no keys.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Preferred signing key, if configured.
    pub fn default_signing_key(&self) -> Option<&KeyId> {
        self.default_signing_key.as_ref()
    }

    /// Public key of `key_id`.
    pub fn public_key(&self, key_id: &KeyId) -> Option<&Ed25519PublicKey> {
        self.keys.get(key_id).map(|k| &k.public_key)
    }

    /// The key selection would return, without side effects.
    pub fn select_signing_key(&self, today: NaiveDate) -> Option<&CryptoKey> {
        let preferred = self
            .default_signing_key
            .as_ref()
            .and_then(|id| self.keys.get(id))
            .filter(|k| k.is_signing_eligible(today));
        preferred.or_else(|| self.keys.values().find(|k| k.is_signing_eligible(today)))
    }

    /// Whether any key is eligible for signing.
    pub fn is_signing_key_available(&self, today: NaiveDate) -> bool {
        self.select_signing_key(today).is_some()
    }

    /// Render the public key block of `key_id`.
    pub fn export_public_key(&self, key_id: &KeyId) -> LicensingResult<String> {
        let key = self
            .keys
            .get(key_id)
            .ok_or_else(|| LicensingError::not_found("key", key_id))?;
        Ok(PublicKeyBlock {
            key_id: key.key_id.clone(),
            key_type: key.key_type,
            algorithm: key.algorithm,
            expires: key.expires,
            public_key: key.public_key.clone(),
        }
        .render())
    }

    fn insert_new(&mut self, key: CryptoKey) -> LicensingResult<&CryptoKey> {
        use std::collections::btree_map::Entry;
        match self.keys.entry(key.key_id.clone()) {
            Entry::Occupied(e) => Err(LicensingError::DuplicateKey(e.key().to_string())),
            Entry::Vacant(v) => Ok(v.insert(key)),
        }
    }

    fn find_by_thumbprint(&self, thumbprint: &str) -> Option<&CryptoKey> {
        self.keys.values().find(|k| {
            k.certificate
                .as_ref()
                .is_some_and(|c| c.thumbprint == thumbprint)
        })
    }
}

/// Key records plus the secret store holding their private halves.
pub struct KeyStore {
    records: KeyRecords,
    secrets: Arc<dyn SecretStore>,
}

impl std::fmt::Debug for KeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyStore")
            .field("keys", &self.records.len())
            .field("secrets", &self.secrets.backend_name())
            .finish()
    }
}

impl KeyStore {
    /// Empty store over `secrets`.
    pub fn new(secrets: Arc<dyn SecretStore>) -> Self {
        Self::with_records(KeyRecords::default(), secrets)
    }

    /// Store over previously persisted records.
    pub fn with_records(records: KeyRecords, secrets: Arc<dyn SecretStore>) -> Self {
        Self { records, secrets }
    }

    /// Public records.
    pub fn records(&self) -> &KeyRecords {
        &self.records
    }

    /// Set or clear the preferred signing key. The key must exist.
    pub fn set_default_signing_key(&mut self, key_id: Option<KeyId>) -> LicensingResult<()> {
        if let Some(id) = &key_id {
            if !self.records.contains(id) {
                return Err(LicensingError::not_found("key", id));
            }
        }
        self.records.default_signing_key = key_id;
        Ok(())
    }

    /// Generate an Ed25519 key pair under `key_id`.
    ///
    /// Certificate keys come only from [`KeyStore::import_certificate`].
    pub fn generate_key_pair(
        &mut self,
        key_id: KeyId,
        key_type: KeyType,
        expires: Option<NaiveDate>,
        now: Timestamp,
    ) -> LicensingResult<&CryptoKey> {
        if key_type == KeyType::Certificate {
            return Err(LicensingError::Validation(
                "certificate keys must be imported, not generated".to_string(),
            ));
        }
        if self.records.contains(&key_id) {
            return Err(LicensingError::DuplicateKey(key_id.to_string()));
        }

        let pair = Ed25519KeyPair::generate();
        let handle = SecretHandle::generate();
        self.secrets.set(&handle, pair.seed().as_slice())?;

        tracing::info!(key_id = %key_id, key_type = %key_type, "generated key pair");
        self.records.insert_new(CryptoKey {
            key_id,
            key_type,
            algorithm: KeyAlgorithm::Ed25519,
            public_key: pair.public_key(),
            secret: Some(handle),
            active: true,
            created_at: now,
            expires,
            usage_count: 0,
            last_used_at: None,
            deactivated_at: None,
            certificate: None,
        })
    }

    /// Import a password-protected certificate bundle as a signing key.
    ///
    /// The key id defaults to `CERT-` plus the first 12 thumbprint
    /// characters. Fails with [`CryptoError::MissingPrivateKey`] or
    /// [`CryptoError::WrongPassword`] before anything is stored.
    pub fn import_certificate(
        &mut self,
        material: &str,
        password: &str,
        key_id: Option<KeyId>,
        now: Timestamp,
    ) -> LicensingResult<KeyId> {
        let bundle = CertificateBundle::parse(material)?;
        let pair = bundle.unlock(password)?;
        let thumbprint = bundle.thumbprint();

        if let Some(existing) = self.records.find_by_thumbprint(&thumbprint) {
            return Err(LicensingError::DuplicateKey(format!(
                "certificate {thumbprint} already imported as {}",
                existing.key_id
            )));
        }
        let key_id = match key_id {
            Some(id) => id,
            None => KeyId::new(format!("CERT-{}", &thumbprint[..12]))?,
        };
        if self.records.contains(&key_id) {
            return Err(LicensingError::DuplicateKey(key_id.to_string()));
        }

        let handle = SecretHandle::generate();
        self.secrets.set(&handle, pair.seed().as_slice())?;

        tracing::info!(key_id = %key_id, thumbprint = %thumbprint, "imported certificate");
        let key = self.records.insert_new(CryptoKey {
            key_id,
            key_type: KeyType::Certificate,
            algorithm: KeyAlgorithm::Ed25519,
            public_key: pair.public_key(),
            secret: Some(handle),
            active: true,
            created_at: now,
            expires: bundle.meta.not_after,
            usage_count: 0,
            last_used_at: None,
            deactivated_at: None,
            certificate: Some(CertificateMeta {
                thumbprint,
                issuer: bundle.meta.issuer.clone(),
                subject: bundle.meta.subject.clone(),
                friendly_name: bundle.meta.friendly_name.clone(),
                has_private_key: true,
            }),
        })?;
        Ok(key.key_id.clone())
    }

    /// Import an exported public key block as a validation key.
    pub fn import_public_key(
        &mut self,
        block: &str,
        key_id: Option<KeyId>,
        now: Timestamp,
    ) -> LicensingResult<KeyId> {
        let block = PublicKeyBlock::parse(block)?;
        let key_id = key_id.unwrap_or(block.key_id);
        tracing::info!(key_id = %key_id, "imported public key");
        let key = self.records.insert_new(CryptoKey {
            key_id,
            key_type: KeyType::Validation,
            algorithm: block.algorithm,
            public_key: block.public_key,
            secret: None,
            active: true,
            created_at: now,
            expires: block.expires,
            usage_count: 0,
            last_used_at: None,
            deactivated_at: None,
            certificate: None,
        })?;
        Ok(key.key_id.clone())
    }

    /// Render the public key block of `key_id`.
    pub fn export_public_key(&self, key_id: &KeyId) -> LicensingResult<String> {
        self.records.export_public_key(key_id)
    }

    /// Select the active signing key and record its use.
    pub fn get_active_signing_key(
        &mut self,
        today: NaiveDate,
        now: Timestamp,
    ) -> LicensingResult<ActiveSigningKey> {
        let key_id = self
            .records
            .select_signing_key(today)
            .map(|k| k.key_id.clone())
            .ok_or_else(|| LicensingError::not_found("active signing key", today))?;

        let key = self
            .records
            .keys
            .get_mut(&key_id)
            .ok_or_else(|| LicensingError::not_found("key", &key_id))?;
        let handle = key
            .secret
            .clone()
            .ok_or(CryptoError::MissingPrivateKey)?;
        key.usage_count += 1;
        key.last_used_at = Some(now);

        tracing::debug!(key_id = %key_id, usage_count = key.usage_count, "selected signing key");
        Ok(ActiveSigningKey {
            key_id,
            public_key: key.public_key.clone(),
            handle,
        })
    }

    /// Whether any key is eligible for signing. No side effects.
    pub fn is_signing_key_available(&self, today: NaiveDate) -> bool {
        self.records.is_signing_key_available(today)
    }

    /// Soft-disable a key. Repeated calls keep the first deactivation time.
    pub fn deactivate_key(&mut self, key_id: &KeyId, now: Timestamp) -> LicensingResult<()> {
        let key = self
            .records
            .keys
            .get_mut(key_id)
            .ok_or_else(|| LicensingError::not_found("key", key_id))?;
        if key.active {
            key.active = false;
            key.deactivated_at.get_or_insert(now);
            tracing::info!(key_id = %key_id, "deactivated key");
        }
        Ok(())
    }

    /// Remove a never-used key record and its private material.
    ///
    /// Keys that have signed anything are kept for audit; deactivate them.
    pub fn delete_key(&mut self, key_id: &KeyId) -> LicensingResult<()> {
        let key = self
            .records
            .keys
            .get(key_id)
            .ok_or_else(|| LicensingError::not_found("key", key_id))?;
        if key.usage_count > 0 {
            return Err(StateError::Locked {
                record: format!("key {key_id}"),
                status: format!("used {} times", key.usage_count),
                field: "key".to_string(),
            }
            .into());
        }
        if let Some(handle) = &key.secret {
            self.secrets.delete(handle)?;
        }
        self.records.keys.remove(key_id);
        if self.records.default_signing_key.as_ref() == Some(key_id) {
            self.records.default_signing_key = None;
        }
        tracing::warn!(key_id = %key_id, "deleted key");
        Ok(())
    }

    /// Load the private key of `key_id` for signing on `today`.
    pub(crate) fn signing_pair(
        &self,
        key_id: &KeyId,
        today: NaiveDate,
    ) -> LicensingResult<(&CryptoKey, Ed25519KeyPair)> {
        let key = self
            .records
            .get(key_id)
            .ok_or_else(|| LicensingError::not_found("key", key_id))?;
        if !key.is_signing_eligible(today) {
            return Err(CryptoError::SigningFailed(format!(
                "key {key_id} is not eligible for signing"
            ))
            .into());
        }
        let handle = key.secret.as_ref().ok_or(CryptoError::MissingPrivateKey)?;
        let secret = self.secrets.get(handle)?;
        let pair = Ed25519KeyPair::from_secret(&secret)?;
        if pair.public_key() != key.public_key {
            return Err(CryptoError::KeyError(format!(
                "stored private key for {key_id} does not match its public key"
            ))
            .into());
        }
        Ok((key, pair))
    }
}

/// Thumbprint of a key record's public key.
pub fn key_thumbprint(key: &CryptoKey) -> String {
    thumbprint(&key.public_key)
}
