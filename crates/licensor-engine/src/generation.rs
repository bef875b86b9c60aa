//! # Generation Pipeline
//!
//! Issues a signed license for a document line:
//!
//! ```text
//! line + header ─▶ encode ─▶ select signing key ─▶ sign ─▶ registry ─▶ link line
//! ```
//!
//! Registry insert and line linkage happen together or not at all: if the
//! link is refused the new license is removed again. Bulk runs isolate
//! per-line failures and stop early when cancelled.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use licensor_core::{
    encode, LicenseFields, LicenseId, LicensingError, LicensingResult, Timestamp,
};
use licensor_crypto::{sign, KeyStore};
use licensor_state::{LicenseDocument, LicenseLifecycle, LicenseStatus, LineType};
use serde::Serialize;

use crate::catalog::ApplicationCatalog;
use crate::registry::{License, LicenseRegistry, LicenseSource};

/// Shared cancellation signal for bulk runs.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    /// A flag that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Lines already started finish.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A line that could not be generated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LineFailure {
    /// Line number.
    pub line_no: u32,
    /// Rendered error.
    pub error: String,
}

/// Outcome of a bulk generation run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GenerationReport {
    /// Lines that received a license.
    pub generated: Vec<(u32, LicenseId)>,
    /// Lines that failed.
    pub failed: Vec<LineFailure>,
    /// Lines not reached because the run was cancelled.
    pub skipped: Vec<u32>,
}

impl GenerationReport {
    /// Whether every eligible line received a license.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty()
    }
}

/// Mutable state one generation run works against.
pub struct GenerationContext<'a> {
    /// Signing keys.
    pub keys: &'a mut KeyStore,
    /// Destination of issued licenses.
    pub registry: &'a mut LicenseRegistry,
    /// Application lookup.
    pub catalog: &'a dyn ApplicationCatalog,
    /// Issuance instant.
    pub now: Timestamp,
}

/// Generate a license for one ungenerated application line.
pub fn generate_line(
    ctx: &mut GenerationContext<'_>,
    doc: &mut LicenseDocument,
    line_no: u32,
) -> LicensingResult<LicenseId> {
    let line = doc
        .line(line_no)
        .ok_or_else(|| LicensingError::not_found("line", doc.line_ref(line_no)))?;
    if line.license_generated {
        return Err(LicensingError::Precondition(format!(
            "line {} already has license {}",
            doc.line_ref(line_no),
            line.license_id.map(|id| id.to_string()).unwrap_or_default()
        )));
    }
    issue(ctx, doc, line_no)
}

/// Issue a fresh license for a line, replacing its current linkage.
///
/// The superseded license stays in the registry and is marked with its
/// replacement.
pub fn regenerate_line(
    ctx: &mut GenerationContext<'_>,
    doc: &mut LicenseDocument,
    line_no: u32,
) -> LicensingResult<LicenseId> {
    let previous = doc
        .line(line_no)
        .ok_or_else(|| LicensingError::not_found("line", doc.line_ref(line_no)))?
        .license_id;
    let id = issue(ctx, doc, line_no)?;
    if let Some(old) = previous.and_then(|old| ctx.registry.get_mut(&old)) {
        old.superseded_by = Some(id);
        tracing::info!(license_id = %old.license_id, superseded_by = %id, "license superseded");
    }
    Ok(id)
}

/// Generate licenses for every ungenerated application line of `doc`.
pub fn generate_document(
    ctx: &mut GenerationContext<'_>,
    doc: &mut LicenseDocument,
    cancel: &CancellationFlag,
) -> GenerationReport {
    let mut report = GenerationReport::default();
    for line_no in doc.ungenerated_lines() {
        if cancel.is_cancelled() {
            report.skipped.push(line_no);
            continue;
        }
        match issue(ctx, doc, line_no) {
            Ok(id) => report.generated.push((line_no, id)),
            Err(e) => {
                tracing::warn!(line = %doc.line_ref(line_no), error = %e, "license generation failed");
                report.failed.push(LineFailure {
                    line_no,
                    error: e.to_string(),
                });
            }
        }
    }
    tracing::info!(
        document_no = %doc.document_no(),
        generated = report.generated.len(),
        failed = report.failed.len(),
        skipped = report.skipped.len(),
        "generation run finished"
    );
    report
}

fn issue(
    ctx: &mut GenerationContext<'_>,
    doc: &mut LicenseDocument,
    line_no: u32,
) -> LicensingResult<LicenseId> {
    doc.ensure_linkable(line_no)?;
    let line = doc
        .line(line_no)
        .ok_or_else(|| LicensingError::not_found("line", doc.line_ref(line_no)))?;
    let application_id = match (line.line_type, line.application_id) {
        (LineType::Application, Some(app)) => app,
        _ => {
            return Err(LicensingError::Validation(format!(
                "line {} is not an application line",
                doc.line_ref(line_no)
            )))
        }
    };
    let app = ctx
        .catalog
        .lookup(&application_id)
        .ok_or_else(|| LicensingError::not_found("application", application_id))?;
    if !app.active {
        return Err(LicensingError::Precondition(format!(
            "application {application_id} is inactive"
        )));
    }

    let fields = LicenseFields {
        license_id: LicenseId::new(),
        application_id,
        application_name: app.name,
        customer_name: doc.customer_name().to_string(),
        valid_from: doc.start_date(),
        valid_to: doc.end_date(),
        features: line.licensed_features.clone(),
        issued_at: ctx.now,
    };
    let content = encode(&fields);
    let key = ctx.keys.get_active_signing_key(ctx.now.date(), ctx.now)?;
    let signature = sign(ctx.keys, &key.key_id, &content, ctx.now)?;

    let status = LicenseStatus::from_window(ctx.now.date(), fields.valid_from, fields.valid_to);
    let license_id = fields.license_id;
    ctx.registry.insert(License {
        license_id,
        application_id,
        application_name: fields.application_name,
        customer_name: fields.customer_name,
        valid_from: fields.valid_from,
        valid_to: fields.valid_to,
        features: fields.features,
        issued_at: fields.issued_at,
        canonical_content: content.into_string(),
        signature: signature.render(),
        key_id: key.key_id.clone(),
        lifecycle: LicenseLifecycle::new(status),
        last_validated: None,
        last_validation_result: None,
        source: LicenseSource::Generated,
        origin: Some(doc.line_ref(line_no)),
        superseded_by: None,
    })?;

    if let Err(e) = doc.link_license(line_no, license_id, status) {
        ctx.registry.remove(&license_id);
        return Err(e);
    }

    tracing::info!(
        license_id = %license_id,
        line = %doc.line_ref(line_no),
        key_id = %key.key_id,
        status = %status,
        "issued license"
    );
    Ok(license_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{AppInfo, StaticCatalog};
    use chrono::NaiveDate;
    use licensor_core::{ApplicationId, DocumentNo, KeyId};
    use licensor_crypto::{verify_with_keys, InMemorySecretStore, KeyType};
    use licensor_state::NewLine;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn now() -> Timestamp {
        Timestamp::parse("2024-01-01T09:00:00Z").unwrap()
    }

    fn app_info(name: &str, active: bool) -> AppInfo {
        AppInfo {
            name: name.to_string(),
            publisher: "Contoso".to_string(),
            version: "1.0".to_string(),
            active,
        }
    }

    struct Fixture {
        keys: KeyStore,
        registry: LicenseRegistry,
        catalog: StaticCatalog,
        doc: LicenseDocument,
    }

    impl Fixture {
        fn ctx(&mut self) -> (GenerationContext<'_>, &mut LicenseDocument) {
            (
                GenerationContext {
                    keys: &mut self.keys,
                    registry: &mut self.registry,
                    catalog: &self.catalog,
                    now: now(),
                },
                &mut self.doc,
            )
        }
    }

    fn fixture(with_key: bool) -> (Fixture, Vec<u32>) {
        let mut keys = KeyStore::new(Arc::new(InMemorySecretStore::new()));
        if with_key {
            keys.generate_key_pair(KeyId::new("K1").unwrap(), KeyType::Signing, None, now())
                .unwrap();
        }
        let mut catalog = StaticCatalog::new();
        let mut doc = LicenseDocument::new(
            DocumentNo::new("H1").unwrap(),
            day(2024, 1, 1),
            day(2024, 12, 31),
            now(),
        );
        doc.set_customer("C10000", "Contoso Ltd.").unwrap();

        let mut lines = Vec::new();
        for (name, active) in [("Payroll", true), ("Ledger", true)] {
            let app = ApplicationId::new();
            catalog.add_application(app, app_info(name, active));
            lines.push(doc.add_line(NewLine::application(app, "BASIC")).unwrap());
        }
        (
            Fixture {
                keys,
                registry: LicenseRegistry::new(),
                catalog,
                doc,
            },
            lines,
        )
    }

    #[test]
    fn test_generate_document_links_every_line() {
        let (mut fx, lines) = fixture(true);
        let (mut ctx, doc) = fx.ctx();
        let report = generate_document(&mut ctx, doc, &CancellationFlag::new());
        assert!(report.is_complete());
        assert_eq!(report.generated.len(), 2);

        for line_no in lines {
            let line = fx.doc.line(line_no).unwrap();
            assert!(line.license_generated);
            assert_eq!(line.license_status, Some(LicenseStatus::Active));
            let license = fx.registry.get(&line.license_id.unwrap()).unwrap();
            assert_eq!(license.origin, Some(fx.doc.line_ref(line_no)));
            assert_eq!(license.customer_name, "Contoso Ltd.");
            assert!(verify_with_keys(
                &license.canonical(),
                &license.signature,
                fx.keys.records()
            ));
        }
        assert_eq!(fx.keys.records().get(&KeyId::new("K1").unwrap()).unwrap().usage_count, 2);
    }

    #[test]
    fn test_no_signing_key_fails_every_line() {
        let (mut fx, _) = fixture(false);
        let (mut ctx, doc) = fx.ctx();
        let report = generate_document(&mut ctx, doc, &CancellationFlag::new());
        assert!(report.generated.is_empty());
        assert_eq!(report.failed.len(), 2);
        assert!(fx.registry.is_empty());
        assert_eq!(fx.doc.ungenerated_lines().len(), 2);
    }

    #[test]
    fn test_failure_is_isolated_per_line() {
        let (mut fx, lines) = fixture(true);
        let app = fx.doc.line(lines[0]).unwrap().application_id.unwrap();
        fx.catalog.set_application_active(&app, false);
        let (mut ctx, doc) = fx.ctx();
        let report = generate_document(&mut ctx, doc, &CancellationFlag::new());
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].line_no, lines[0]);
        assert_eq!(report.generated.len(), 1);
        assert_eq!(fx.registry.len(), 1);
    }

    #[test]
    fn test_cancelled_run_skips_lines() {
        let (mut fx, lines) = fixture(true);
        let cancel = CancellationFlag::new();
        cancel.cancel();
        let (mut ctx, doc) = fx.ctx();
        let report = generate_document(&mut ctx, doc, &cancel);
        assert_eq!(report.skipped, lines);
        assert!(!report.is_complete());
        assert!(fx.registry.is_empty());
    }

    #[test]
    fn test_generate_line_twice_is_rejected() {
        let (mut fx, lines) = fixture(true);
        let (mut ctx, doc) = fx.ctx();
        generate_line(&mut ctx, doc, lines[0]).unwrap();
        assert!(matches!(
            generate_line(&mut ctx, doc, lines[0]),
            Err(LicensingError::Precondition(_))
        ));
        assert!(generate_line(&mut ctx, doc, 99).is_err());
    }

    #[test]
    fn test_regenerate_supersedes() {
        let (mut fx, lines) = fixture(true);
        let (mut ctx, doc) = fx.ctx();
        let first = generate_line(&mut ctx, doc, lines[0]).unwrap();
        let second = regenerate_line(&mut ctx, doc, lines[0]).unwrap();
        assert_ne!(first, second);
        assert_eq!(fx.doc.line(lines[0]).unwrap().license_id, Some(second));
        assert_eq!(fx.registry.get(&first).unwrap().superseded_by, Some(second));
        assert!(fx.registry.get(&second).unwrap().superseded_by.is_none());
    }

    #[test]
    fn test_locked_document_leaves_key_untouched() {
        let (mut fx, lines) = fixture(true);
        let (mut ctx, doc) = fx.ctx();
        let first = generate_line(&mut ctx, doc, lines[0]).unwrap();
        fx.doc.release(None, now()).unwrap();
        fx.doc.archive(None, now()).unwrap();
        let k1 = KeyId::new("K1").unwrap();
        assert_eq!(fx.keys.records().get(&k1).unwrap().usage_count, 1);

        let (mut ctx, doc) = fx.ctx();
        assert!(matches!(
            regenerate_line(&mut ctx, doc, lines[0]),
            Err(LicensingError::State(_))
        ));
        assert!(generate_line(&mut ctx, doc, lines[1]).is_err());

        assert_eq!(fx.keys.records().get(&k1).unwrap().usage_count, 1);
        assert_eq!(fx.registry.len(), 1);
        assert!(fx.registry.get(&first).unwrap().superseded_by.is_none());
        assert_eq!(fx.doc.line(lines[0]).unwrap().license_id, Some(first));
    }

    #[test]
    fn test_future_window_links_suspended() {
        let (mut fx, lines) = fixture(true);
        fx.doc.set_dates(day(2024, 6, 1), day(2024, 12, 31)).unwrap();
        let (mut ctx, doc) = fx.ctx();
        generate_line(&mut ctx, doc, lines[0]).unwrap();
        assert_eq!(
            fx.doc.line(lines[0]).unwrap().license_status,
            Some(LicenseStatus::Suspended)
        );
    }
}
