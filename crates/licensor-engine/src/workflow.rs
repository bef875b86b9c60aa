//! # Document Workflow Service
//!
//! [`LicenseEngine`] owns the key store, license registry and documents, and
//! drives them through the document workflow:
//!
//! ```text
//! create_document ─▶ set_customer / add_line ─▶ release ─▶ (generation)
//!                                                  │
//!                          reopen ◀────────────────┤
//!                          expire / archive ◀──────┘
//! ```
//!
//! Every operation reads the current instant from the injected [`Clock`],
//! and configuration is passed in at construction. Licenses are owned by at
//! most one line; deleting a line or document removes a license only after a
//! scan finds no other line referencing it.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Days, NaiveDate};
use licensor_core::{
    Clock, DocumentNo, KeyId, LicenseId, LicensingError, LicensingResult, LineRef, Timestamp,
};
use licensor_crypto::KeyStore;
use licensor_state::{DocumentStatus, LicenseDocument, LicenseStatus, LineType, NewLine};
use serde::Serialize;

use crate::catalog::{ApplicationCatalog, CustomerDirectory};
use crate::config::LicensingConfig;
use crate::generation::{self, CancellationFlag, GenerationContext, GenerationReport};
use crate::registry::{License, LicenseRegistry};
use crate::validation::{self, ValidationContext, ValidationResult, ValidationSummary};

/// Outcome of a release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReleaseReport {
    /// Released document.
    pub document_no: DocumentNo,
    /// Generation run, when generation ran during release.
    pub generation: Option<GenerationReport>,
}

/// The licensing engine.
pub struct LicenseEngine {
    config: LicensingConfig,
    keys: KeyStore,
    registry: LicenseRegistry,
    documents: BTreeMap<DocumentNo, LicenseDocument>,
    catalog: Arc<dyn ApplicationCatalog>,
    customers: Arc<dyn CustomerDirectory>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for LicenseEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LicenseEngine")
            .field("config", &self.config)
            .field("keys", &self.keys)
            .field("licenses", &self.registry.len())
            .field("documents", &self.documents.len())
            .finish()
    }
}

impl LicenseEngine {
    /// Engine over empty registry and documents.
    pub fn new(
        config: LicensingConfig,
        keys: KeyStore,
        catalog: Arc<dyn ApplicationCatalog>,
        customers: Arc<dyn CustomerDirectory>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::with_state(
            config,
            keys,
            LicenseRegistry::new(),
            BTreeMap::new(),
            catalog,
            customers,
            clock,
        )
    }

    /// Engine over previously persisted state.
    ///
    /// A configured default signing key is applied when the key exists.
    pub fn with_state(
        config: LicensingConfig,
        mut keys: KeyStore,
        registry: LicenseRegistry,
        documents: BTreeMap<DocumentNo, LicenseDocument>,
        catalog: Arc<dyn ApplicationCatalog>,
        customers: Arc<dyn CustomerDirectory>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        if let Some(key_id) = config.default_signing_key.clone() {
            if let Err(e) = keys.set_default_signing_key(Some(key_id.clone())) {
                tracing::warn!(key_id = %key_id, error = %e, "configured default signing key ignored");
            }
        }
        Self {
            config,
            keys,
            registry,
            documents,
            catalog,
            customers,
            clock,
        }
    }

    /// Configuration.
    pub fn config(&self) -> &LicensingConfig {
        &self.config
    }

    /// Key store.
    pub fn keys(&self) -> &KeyStore {
        &self.keys
    }

    /// Key store for key management.
    pub fn keys_mut(&mut self) -> &mut KeyStore {
        &mut self.keys
    }

    /// License registry.
    pub fn registry(&self) -> &LicenseRegistry {
        &self.registry
    }

    /// All documents in number order.
    pub fn documents(&self) -> &BTreeMap<DocumentNo, LicenseDocument> {
        &self.documents
    }

    /// Look up a document or fail with `NotFound`.
    pub fn document(&self, document_no: &DocumentNo) -> LicensingResult<&LicenseDocument> {
        self.documents
            .get(document_no)
            .ok_or_else(|| LicensingError::not_found("document", document_no))
    }

    /// Look up a license or fail with `NotFound`.
    pub fn license(&self, license_id: &LicenseId) -> LicensingResult<&License> {
        self.registry.require(license_id)
    }

    /// Current instant according to the engine clock.
    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    /// Current date according to the engine clock.
    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    fn document_mut(&mut self, document_no: &DocumentNo) -> LicensingResult<&mut LicenseDocument> {
        self.documents
            .get_mut(document_no)
            .ok_or_else(|| LicensingError::not_found("document", document_no))
    }

    // ── Documents ───────────────────────────────────────────────────

    /// Create an open document.
    ///
    /// Without a number, the next free `<prefix>-NNNNNN` is assigned. Without
    /// dates, the window runs from today for `default_duration_days`.
    pub fn create_document(
        &mut self,
        document_no: Option<DocumentNo>,
        window: Option<(NaiveDate, NaiveDate)>,
    ) -> LicensingResult<DocumentNo> {
        let document_no = match document_no {
            Some(no) => {
                if self.documents.contains_key(&no) {
                    return Err(LicensingError::Validation(format!(
                        "document {no} already exists"
                    )));
                }
                no
            }
            None => self.next_document_no()?,
        };
        let now = self.clock.now();
        let (start, end) = match window {
            Some(w) => w,
            None => {
                let today = now.date();
                let end = today
                    .checked_add_days(Days::new(u64::from(self.config.default_duration_days)))
                    .ok_or_else(|| {
                        LicensingError::Config("default duration overflows the calendar".to_string())
                    })?;
                (today, end)
            }
        };
        let doc = LicenseDocument::new(document_no.clone(), start, end, now);
        self.documents.insert(document_no.clone(), doc);
        tracing::info!(document_no = %document_no, start = %start, end = %end, "created document");
        Ok(document_no)
    }

    fn next_document_no(&self) -> LicensingResult<DocumentNo> {
        let prefix = &self.config.document_no_prefix;
        let mut seq = self.documents.len() + 1;
        loop {
            let candidate = DocumentNo::new(format!("{prefix}-{seq:06}"))?;
            if !self.documents.contains_key(&candidate) {
                return Ok(candidate);
            }
            seq += 1;
        }
    }

    /// Set the customer from the customer directory.
    pub fn set_customer(&mut self, document_no: &DocumentNo, customer_id: &str) -> LicensingResult<()> {
        let customer = self
            .customers
            .lookup(customer_id)
            .ok_or_else(|| LicensingError::not_found("customer", customer_id))?;
        self.document_mut(document_no)?
            .set_customer(customer_id, customer.name)?;
        Ok(())
    }

    /// Set the validity window.
    pub fn set_dates(
        &mut self,
        document_no: &DocumentNo,
        start: NaiveDate,
        end: NaiveDate,
    ) -> LicensingResult<()> {
        self.document_mut(document_no)?.set_dates(start, end)?;
        Ok(())
    }

    /// Set the free-text description. Allowed in every state.
    pub fn set_description(&mut self, document_no: &DocumentNo, text: impl Into<String>) -> LicensingResult<()> {
        self.document_mut(document_no)?.description = text.into();
        Ok(())
    }

    /// Set the external reference. Allowed in every state.
    pub fn set_external_reference(
        &mut self,
        document_no: &DocumentNo,
        reference: impl Into<String>,
    ) -> LicensingResult<()> {
        self.document_mut(document_no)?.external_reference = reference.into();
        Ok(())
    }

    /// Add a line. Application lines need an active catalog application.
    pub fn add_line(&mut self, document_no: &DocumentNo, line: NewLine) -> LicensingResult<u32> {
        if line.line_type == LineType::Application {
            if let Some(app_id) = line.application_id {
                let app = self
                    .catalog
                    .lookup(&app_id)
                    .ok_or_else(|| LicensingError::not_found("application", app_id))?;
                if !app.active {
                    return Err(LicensingError::Validation(format!(
                        "application {app_id} is inactive"
                    )));
                }
            }
        }
        let line_no = self.document_mut(document_no)?.add_line(line)?;
        tracing::debug!(document_no = %document_no, line_no, "added line");
        Ok(line_no)
    }

    /// Change a line's licensed features.
    pub fn set_line_features(
        &mut self,
        document_no: &DocumentNo,
        line_no: u32,
        features: impl Into<String>,
    ) -> LicensingResult<()> {
        self.document_mut(document_no)?
            .set_line_features(line_no, features)
    }

    /// Change a line's quantity.
    pub fn set_line_quantity(&mut self, document_no: &DocumentNo, line_no: u32, quantity: u32) -> LicensingResult<()> {
        self.document_mut(document_no)?
            .set_line_quantity(line_no, quantity)
    }

    /// Change a line's description. Allowed in every state.
    pub fn set_line_description(
        &mut self,
        document_no: &DocumentNo,
        line_no: u32,
        description: impl Into<String>,
    ) -> LicensingResult<()> {
        self.document_mut(document_no)?
            .set_line_description(line_no, description)
    }

    /// Delete a line of an open document, and its license if no other line
    /// references it.
    pub fn delete_line(&mut self, document_no: &DocumentNo, line_no: u32) -> LicensingResult<()> {
        let line_ref = self.document(document_no)?.line_ref(line_no);
        let line = self.document_mut(document_no)?.remove_line(line_no)?;
        if let Some(license_id) = line.license_id {
            self.release_unreferenced(license_id);
        }
        self.detach_origin(&line_ref);
        tracing::info!(document_no = %document_no, line_no, "deleted line");
        Ok(())
    }

    /// Delete an open document with its lines and unreferenced licenses.
    pub fn delete_document(&mut self, document_no: &DocumentNo) -> LicensingResult<()> {
        self.document(document_no)?.ensure_deletable()?;
        let Some(doc) = self.documents.remove(document_no) else {
            return Err(LicensingError::not_found("document", document_no));
        };
        for license_id in doc.lines().iter().filter_map(|l| l.license_id) {
            self.release_unreferenced(license_id);
        }
        for line in doc.lines() {
            self.detach_origin(&doc.line_ref(line.line_no));
        }
        tracing::info!(document_no = %document_no, "deleted document");
        Ok(())
    }

    /// Lines across all documents linked to `license_id`.
    pub fn referencing_lines(&self, license_id: &LicenseId) -> Vec<LineRef> {
        self.documents
            .values()
            .flat_map(|doc| {
                doc.lines()
                    .iter()
                    .filter(|l| l.license_id.as_ref() == Some(license_id))
                    .map(|l| doc.line_ref(l.line_no))
            })
            .collect()
    }

    fn release_unreferenced(&mut self, license_id: LicenseId) {
        if self.referencing_lines(&license_id).is_empty()
            && self.registry.remove(&license_id).is_some()
        {
            tracing::info!(license_id = %license_id, "removed unreferenced license");
        }
    }

    /// Superseded licenses outlive their line; drop the dangling origin.
    fn detach_origin(&mut self, line_ref: &LineRef) {
        let ids: Vec<LicenseId> = self
            .registry
            .by_origin(line_ref)
            .map(|l| l.license_id)
            .collect();
        for id in ids {
            if let Some(license) = self.registry.get_mut(&id) {
                license.origin = None;
                tracing::debug!(license_id = %id, line = %line_ref, "cleared license origin");
            }
        }
    }

    // ── Transitions ─────────────────────────────────────────────────

    /// Release a document.
    pub fn release(&mut self, document_no: &DocumentNo, released_by: Option<String>) -> LicensingResult<ReleaseReport> {
        self.release_with(document_no, released_by, &CancellationFlag::new())
    }

    /// Release a document with a cancellable generation run.
    ///
    /// Per-line generation failures are reported, not raised; the document
    /// is released either way and the remaining lines can be generated later.
    pub fn release_with(
        &mut self,
        document_no: &DocumentNo,
        released_by: Option<String>,
        cancel: &CancellationFlag,
    ) -> LicensingResult<ReleaseReport> {
        let now = self.clock.now();
        self.document(document_no)?.check_release_ready()?;
        if !self.keys.is_signing_key_available(now.date()) {
            return Err(LicensingError::not_found("active signing key", now.date()));
        }

        let doc = self
            .documents
            .get_mut(document_no)
            .ok_or_else(|| LicensingError::not_found("document", document_no))?;
        let generation = if self.config.auto_generate_on_release {
            let mut ctx = GenerationContext {
                keys: &mut self.keys,
                registry: &mut self.registry,
                catalog: self.catalog.as_ref(),
                now,
            };
            Some(generation::generate_document(&mut ctx, doc, cancel))
        } else {
            None
        };
        doc.release(released_by.clone(), now)?;

        tracing::info!(
            document_no = %document_no,
            released_by = released_by.as_deref().unwrap_or("-"),
            "released document"
        );
        Ok(ReleaseReport {
            document_no: document_no.clone(),
            generation,
        })
    }

    /// Generate licenses for the ungenerated lines of an open or released
    /// document.
    pub fn generate_document(
        &mut self,
        document_no: &DocumentNo,
        cancel: &CancellationFlag,
    ) -> LicensingResult<GenerationReport> {
        let now = self.clock.now();
        let doc = self
            .documents
            .get_mut(document_no)
            .ok_or_else(|| LicensingError::not_found("document", document_no))?;
        if !matches!(doc.status(), DocumentStatus::Open | DocumentStatus::Released) {
            return Err(LicensingError::Precondition(format!(
                "document {document_no} is {}",
                doc.status()
            )));
        }
        let mut ctx = GenerationContext {
            keys: &mut self.keys,
            registry: &mut self.registry,
            catalog: self.catalog.as_ref(),
            now,
        };
        Ok(generation::generate_document(&mut ctx, doc, cancel))
    }

    /// Issue a replacement license for a line.
    pub fn regenerate_line(&mut self, document_no: &DocumentNo, line_no: u32) -> LicensingResult<LicenseId> {
        let now = self.clock.now();
        let doc = self
            .documents
            .get_mut(document_no)
            .ok_or_else(|| LicensingError::not_found("document", document_no))?;
        let mut ctx = GenerationContext {
            keys: &mut self.keys,
            registry: &mut self.registry,
            catalog: self.catalog.as_ref(),
            now,
        };
        generation::regenerate_line(&mut ctx, doc, line_no)
    }

    /// Return a released document to open. Issued licenses remain.
    pub fn reopen(&mut self, document_no: &DocumentNo, actor: Option<String>) -> LicensingResult<()> {
        let now = self.clock.now();
        self.document_mut(document_no)?.reopen(actor, now)?;
        tracing::info!(document_no = %document_no, "reopened document");
        Ok(())
    }

    /// Mark a released document expired.
    pub fn expire(&mut self, document_no: &DocumentNo) -> LicensingResult<()> {
        let now = self.clock.now();
        self.document_mut(document_no)?.expire(now)?;
        tracing::info!(document_no = %document_no, "expired document");
        Ok(())
    }

    /// Archive a released or expired document.
    pub fn archive(&mut self, document_no: &DocumentNo, actor: Option<String>) -> LicensingResult<()> {
        let now = self.clock.now();
        self.document_mut(document_no)?.archive(actor, now)?;
        tracing::info!(document_no = %document_no, "archived document");
        Ok(())
    }

    /// Expire every released document whose end date has passed.
    pub fn expire_overdue(&mut self) -> Vec<DocumentNo> {
        let now = self.clock.now();
        let today = now.date();
        let mut expired = Vec::new();
        for doc in self.documents.values_mut() {
            if doc.status() == DocumentStatus::Released
                && doc.end_date() < today
                && doc.expire(now).is_ok()
            {
                expired.push(doc.document_no().clone());
            }
        }
        if !expired.is_empty() {
            tracing::info!(count = expired.len(), "expired overdue documents");
        }
        expired
    }

    // ── Licenses ────────────────────────────────────────────────────

    /// Validate one license and mirror its status to its lines.
    pub fn validate_license(&mut self, license_id: &LicenseId) -> LicensingResult<ValidationResult> {
        let now = self.clock.now();
        let ctx = ValidationContext {
            catalog: self.catalog.as_ref(),
            keys: self.keys.records(),
            today: now.date(),
            now,
        };
        let result = validation::validate_registered(&ctx, &mut self.registry, license_id)?;
        if result == ValidationResult::InvalidSignature {
            tracing::warn!(license_id = %license_id, "license failed signature check");
        }
        self.mirror(license_id);
        Ok(result)
    }

    /// Validate every license and mirror statuses.
    pub fn validate_all(&mut self) -> ValidationSummary {
        let now = self.clock.now();
        let ctx = ValidationContext {
            catalog: self.catalog.as_ref(),
            keys: self.keys.records(),
            today: now.date(),
            now,
        };
        let summary = validation::validate_all(&ctx, &mut self.registry);
        for id in self.registry.ids() {
            self.mirror(&id);
        }
        summary
    }

    /// Validate a license file without registering it.
    pub fn validate_file(&self, text: &str) -> LicensingResult<ValidationResult> {
        let now = self.clock.now();
        let ctx = ValidationContext {
            catalog: self.catalog.as_ref(),
            keys: self.keys.records(),
            today: now.date(),
            now,
        };
        validation::validate_file(&ctx, text)
    }

    /// Status `Active` and today inside the window. No cryptography.
    pub fn is_currently_valid(&self, license_id: &LicenseId) -> LicensingResult<bool> {
        Ok(self.registry.require(license_id)?.is_currently_valid(self.today()))
    }

    /// Manually hold an active license.
    pub fn suspend_license(&mut self, license_id: &LicenseId, reason: &str) -> LicensingResult<()> {
        let now = self.clock.now();
        self.registry_entry(license_id)?.lifecycle.suspend(now, reason)?;
        tracing::info!(license_id = %license_id, reason, "suspended license");
        self.mirror(license_id);
        Ok(())
    }

    /// Lift a manual hold.
    pub fn reinstate_license(&mut self, license_id: &LicenseId, reason: &str) -> LicensingResult<()> {
        let now = self.clock.now();
        self.registry_entry(license_id)?.lifecycle.reinstate(now, reason)?;
        tracing::info!(license_id = %license_id, reason, "reinstated license");
        self.mirror(license_id);
        Ok(())
    }

    /// Revoke a license permanently.
    pub fn revoke_license(&mut self, license_id: &LicenseId, reason: &str) -> LicensingResult<()> {
        let now = self.clock.now();
        self.registry_entry(license_id)?.lifecycle.revoke(now, reason)?;
        tracing::warn!(license_id = %license_id, reason, "revoked license");
        self.mirror(license_id);
        Ok(())
    }

    /// Import a license file into the registry.
    pub fn import_license(&mut self, text: &str) -> LicensingResult<LicenseId> {
        let now = self.clock.now();
        self.registry.import_file(text, now)
    }

    /// Render a license file.
    pub fn export_license(&self, license_id: &LicenseId) -> LicensingResult<String> {
        self.registry.export_file(license_id)
    }

    /// Select the signing key the next generation would use.
    pub fn signing_key_for_today(&self) -> Option<KeyId> {
        self.keys
            .records()
            .select_signing_key(self.today())
            .map(|k| k.key_id.clone())
    }

    /// Decompose into persisted parts.
    pub fn into_parts(self) -> (KeyStore, LicenseRegistry, BTreeMap<DocumentNo, LicenseDocument>) {
        (self.keys, self.registry, self.documents)
    }

    fn registry_entry(&mut self, license_id: &LicenseId) -> LicensingResult<&mut License> {
        self.registry
            .get_mut(license_id)
            .ok_or_else(|| LicensingError::not_found("license", license_id))
    }

    fn mirror(&mut self, license_id: &LicenseId) {
        let Some(status) = self.registry.get(license_id).map(License::status) else {
            return;
        };
        mirror_into(&mut self.documents, *license_id, status);
    }
}

fn mirror_into(
    documents: &mut BTreeMap<DocumentNo, LicenseDocument>,
    license_id: LicenseId,
    status: LicenseStatus,
) {
    for doc in documents.values_mut() {
        doc.mirror_license_status(license_id, status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{AppInfo, CustomerInfo, StaticCatalog};
    use licensor_core::{ApplicationId, FixedClock};
    use licensor_crypto::{InMemorySecretStore, KeyType};

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    struct Harness {
        engine: LicenseEngine,
        clock: Arc<FixedClock>,
        app: ApplicationId,
    }

    fn harness(config: LicensingConfig, with_key: bool) -> Harness {
        let clock = Arc::new(FixedClock::on(day(2024, 1, 1)));
        let app = ApplicationId::new();
        let mut catalog = StaticCatalog::new();
        catalog.add_application(
            app,
            AppInfo {
                name: "Payroll".to_string(),
                publisher: "Contoso".to_string(),
                version: "1.0".to_string(),
                active: true,
            },
        );
        catalog.add_customer(
            "C10000",
            CustomerInfo {
                name: "Contoso Ltd.".to_string(),
                address: String::new(),
                contact: String::new(),
            },
        );
        let catalog = Arc::new(catalog);
        let mut keys = KeyStore::new(Arc::new(InMemorySecretStore::new()));
        if with_key {
            keys.generate_key_pair(
                KeyId::new("K1").unwrap(),
                KeyType::Signing,
                None,
                Timestamp::start_of(day(2023, 1, 1)),
            )
            .unwrap();
        }
        let engine = LicenseEngine::new(config, keys, catalog.clone(), catalog, clock.clone());
        Harness { engine, clock, app }
    }

    fn ready_document(h: &mut Harness) -> (DocumentNo, u32) {
        let no = h
            .engine
            .create_document(None, Some((day(2024, 1, 1), day(2024, 12, 31))))
            .unwrap();
        h.engine.set_customer(&no, "C10000").unwrap();
        let line = h
            .engine
            .add_line(&no, NewLine::application(h.app, "BASIC"))
            .unwrap();
        (no, line)
    }

    #[test]
    fn test_create_document_defaults() {
        let mut h = harness(LicensingConfig::default(), true);
        let no = h.engine.create_document(None, None).unwrap();
        assert_eq!(no.as_str(), "LIC-000001");
        let doc = h.engine.document(&no).unwrap();
        assert_eq!(doc.start_date(), day(2024, 1, 1));
        assert_eq!(doc.end_date(), day(2024, 12, 31));
        assert_eq!(doc.status(), DocumentStatus::Open);

        let next = h.engine.create_document(None, None).unwrap();
        assert_eq!(next.as_str(), "LIC-000002");
        assert!(h.engine.create_document(Some(no), None).is_err());
    }

    #[test]
    fn test_add_line_checks_catalog() {
        let mut h = harness(LicensingConfig::default(), true);
        let no = h.engine.create_document(None, None).unwrap();
        assert!(matches!(
            h.engine.add_line(&no, NewLine::application(ApplicationId::new(), "")),
            Err(LicensingError::NotFound { kind: "application", .. })
        ));
        assert!(h.engine.set_customer(&no, "C99999").is_err());
    }

    #[test]
    fn test_release_generates_and_locks() {
        let mut h = harness(LicensingConfig::default(), true);
        let (no, line) = ready_document(&mut h);
        let report = h.engine.release(&no, Some("alice".to_string())).unwrap();
        let generation = report.generation.unwrap();
        assert!(generation.is_complete());
        assert_eq!(generation.generated.len(), 1);

        let doc = h.engine.document(&no).unwrap();
        assert_eq!(doc.status(), DocumentStatus::Released);
        let license_id = doc.line(line).unwrap().license_id.unwrap();
        assert_eq!(
            h.engine.validate_license(&license_id).unwrap(),
            ValidationResult::Valid
        );
        assert!(h.engine.is_currently_valid(&license_id).unwrap());
        assert!(h.engine.set_line_quantity(&no, line, 3).is_err());
        h.engine.set_line_description(&no, line, "renewal").unwrap();
    }

    #[test]
    fn test_release_without_key_is_not_found() {
        let mut h = harness(LicensingConfig::default(), false);
        let (no, _) = ready_document(&mut h);
        assert!(matches!(
            h.engine.release(&no, None),
            Err(LicensingError::NotFound { .. })
        ));
        assert_eq!(h.engine.document(&no).unwrap().status(), DocumentStatus::Open);
    }

    #[test]
    fn test_deferred_generation() {
        let config = LicensingConfig {
            auto_generate_on_release: false,
            ..LicensingConfig::default()
        };
        let mut h = harness(config, true);
        let (no, line) = ready_document(&mut h);
        let report = h.engine.release(&no, None).unwrap();
        assert!(report.generation.is_none());
        assert!(h.engine.registry().is_empty());

        let run = h
            .engine
            .generate_document(&no, &CancellationFlag::new())
            .unwrap();
        assert_eq!(run.generated.len(), 1);
        assert!(h.engine.document(&no).unwrap().line(line).unwrap().license_generated);
    }

    #[test]
    fn test_reopen_keeps_licenses() {
        let mut h = harness(LicensingConfig::default(), true);
        let (no, _) = ready_document(&mut h);
        h.engine.release(&no, None).unwrap();
        h.engine.reopen(&no, None).unwrap();
        assert_eq!(h.engine.registry().len(), 1);

        let report = h.engine.release(&no, None).unwrap();
        assert!(report.generation.unwrap().generated.is_empty());
        assert_eq!(h.engine.registry().len(), 1);
    }

    #[test]
    fn test_delete_line_removes_unreferenced_license() {
        let mut h = harness(LicensingConfig::default(), true);
        let (no, line) = ready_document(&mut h);
        h.engine.release(&no, None).unwrap();
        assert!(h.engine.delete_line(&no, line).is_err());

        h.engine.reopen(&no, None).unwrap();
        let license_id = h
            .engine
            .document(&no)
            .unwrap()
            .line(line)
            .unwrap()
            .license_id
            .unwrap();
        assert_eq!(h.engine.referencing_lines(&license_id).len(), 1);
        h.engine.delete_line(&no, line).unwrap();
        assert!(h.engine.license(&license_id).is_err());
    }

    #[test]
    fn test_delete_line_detaches_superseded_license() {
        let mut h = harness(LicensingConfig::default(), true);
        let (no, line) = ready_document(&mut h);
        h.engine.release(&no, None).unwrap();
        let old = h.engine.registry().ids()[0];
        let new = h.engine.regenerate_line(&no, line).unwrap();
        h.engine.reopen(&no, None).unwrap();

        h.engine.delete_line(&no, line).unwrap();
        assert!(h.engine.license(&new).is_err());
        let kept = h.engine.license(&old).unwrap();
        assert_eq!(kept.superseded_by, Some(new));
        assert!(kept.origin.is_none());
        assert_eq!(h.engine.registry().len(), 1);
    }

    #[test]
    fn test_failed_regeneration_keeps_key_deletable() {
        let mut h = harness(LicensingConfig::default(), true);
        let (no, line) = ready_document(&mut h);
        h.engine.release(&no, None).unwrap();
        h.engine.archive(&no, None).unwrap();

        let k1 = KeyId::new("K1").unwrap();
        let now = h.engine.now();
        h.engine.keys_mut().deactivate_key(&k1, now).unwrap();
        let k2 = KeyId::new("K2").unwrap();
        h.engine
            .keys_mut()
            .generate_key_pair(k2.clone(), KeyType::Signing, None, now)
            .unwrap();

        assert!(h.engine.regenerate_line(&no, line).is_err());
        assert_eq!(h.engine.registry().len(), 1);
        assert_eq!(h.engine.keys().records().get(&k2).unwrap().usage_count, 0);
        h.engine.keys_mut().delete_key(&k2).unwrap();
    }

    #[test]
    fn test_delete_document_only_while_open() {
        let mut h = harness(LicensingConfig::default(), true);
        let (no, _) = ready_document(&mut h);
        h.engine.release(&no, None).unwrap();
        assert!(h.engine.delete_document(&no).is_err());
        h.engine.reopen(&no, None).unwrap();
        h.engine.delete_document(&no).unwrap();
        assert!(h.engine.documents().is_empty());
        assert!(h.engine.registry().is_empty());
    }

    #[test]
    fn test_expire_overdue_and_archive() {
        let mut h = harness(LicensingConfig::default(), true);
        let (no, _) = ready_document(&mut h);
        h.engine.release(&no, None).unwrap();
        assert!(h.engine.expire_overdue().is_empty());

        h.clock.set_date(day(2025, 1, 1));
        assert_eq!(h.engine.expire_overdue(), vec![no.clone()]);
        assert_eq!(h.engine.document(&no).unwrap().status(), DocumentStatus::Expired);
        h.engine.archive(&no, Some("ops".to_string())).unwrap();
        assert!(h.engine.expire(&no).is_err());
    }

    #[test]
    fn test_status_changes_are_mirrored() {
        let mut h = harness(LicensingConfig::default(), true);
        let (no, line) = ready_document(&mut h);
        h.engine.release(&no, None).unwrap();
        let license_id = h.engine.registry().ids()[0];

        h.engine.suspend_license(&license_id, "payment overdue").unwrap();
        let status = |h: &Harness| h.engine.document(&no).unwrap().line(line).unwrap().license_status;
        assert_eq!(status(&h), Some(LicenseStatus::Suspended));
        assert_eq!(
            h.engine.validate_license(&license_id).unwrap(),
            ValidationResult::Valid
        );
        assert_eq!(status(&h), Some(LicenseStatus::Suspended));

        h.engine.reinstate_license(&license_id, "paid").unwrap();
        h.clock.set_date(day(2025, 1, 1));
        assert_eq!(
            h.engine.validate_license(&license_id).unwrap(),
            ValidationResult::Expired
        );
        assert_eq!(status(&h), Some(LicenseStatus::Expired));

        h.engine.revoke_license(&license_id, "refund").unwrap();
        assert_eq!(status(&h), Some(LicenseStatus::Revoked));
        assert!(h.engine.revoke_license(&license_id, "again").is_err());
    }

    #[test]
    fn test_regenerate_line_keeps_old_license() {
        let mut h = harness(LicensingConfig::default(), true);
        let (no, line) = ready_document(&mut h);
        h.engine.release(&no, None).unwrap();
        let old = h.engine.registry().ids()[0];
        let new = h.engine.regenerate_line(&no, line).unwrap();
        assert_eq!(h.engine.registry().len(), 2);
        assert_eq!(h.engine.license(&old).unwrap().superseded_by, Some(new));
    }

    #[test]
    fn test_export_import_between_engines() {
        let mut h = harness(LicensingConfig::default(), true);
        let (no, _) = ready_document(&mut h);
        h.engine.release(&no, None).unwrap();
        let id = h.engine.registry().ids()[0];
        let text = h.engine.export_license(&id).unwrap();
        assert_eq!(h.engine.validate_file(&text).unwrap(), ValidationResult::Valid);

        let mut other = harness(LicensingConfig::default(), false);
        let public = h.engine.keys().export_public_key(&KeyId::new("K1").unwrap()).unwrap();
        let now = Timestamp::start_of(day(2024, 1, 1));
        other.engine.keys_mut().import_public_key(&public, None, now).unwrap();
        let imported = other.engine.import_license(&text).unwrap();
        assert_eq!(imported, id);
        // separate catalog: the application is unknown there
        assert_eq!(
            other.engine.validate_license(&imported).unwrap(),
            ValidationResult::ApplicationNotFound
        );
    }

    #[test]
    fn test_default_signing_key_from_config() {
        let config = LicensingConfig {
            default_signing_key: Some(KeyId::new("K1").unwrap()),
            ..LicensingConfig::default()
        };
        let h = harness(config, true);
        assert_eq!(
            h.engine.keys().records().default_signing_key().map(KeyId::as_str),
            Some("K1")
        );
        assert_eq!(h.engine.signing_key_for_today().unwrap().as_str(), "K1");
    }
}
