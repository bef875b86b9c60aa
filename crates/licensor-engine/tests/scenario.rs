//! # End-to-End Licensing Scenario
//!
//! Drives a data directory through the full workflow: key generation,
//! document H1 with one application line, release, validation, tampering
//! with persisted content, and the expiry boundary.

use std::sync::Arc;

use chrono::NaiveDate;
use licensor_core::{ApplicationId, DocumentNo, FixedClock, KeyId, LicensingError, Timestamp};
use licensor_crypto::{verify_with_keys, KeyType};
use licensor_engine::{
    AppInfo, CustomerInfo, DataDir, StaticCatalog, ValidationResult,
};
use licensor_state::{DocumentStatus, LicenseStatus, NewLine};

fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

struct Setup {
    _dir: tempfile::TempDir,
    data: DataDir,
    clock: Arc<FixedClock>,
    app: ApplicationId,
}

fn setup() -> Setup {
    let dir = tempfile::tempdir().unwrap();
    let data = DataDir::open(dir.path()).unwrap();
    let app = ApplicationId::new();
    let mut catalog = StaticCatalog::new();
    catalog.add_application(
        app,
        AppInfo {
            name: "Payroll Suite".to_string(),
            publisher: "Contoso".to_string(),
            version: "2.1".to_string(),
            active: true,
        },
    );
    catalog.add_customer(
        "C10000",
        CustomerInfo {
            name: "Contoso Ltd.".to_string(),
            address: "1 Main St".to_string(),
            contact: "ops@contoso.example".to_string(),
        },
    );
    data.save_catalog(&catalog).unwrap();
    Setup {
        _dir: dir,
        data,
        clock: Arc::new(FixedClock::on(day(2024, 1, 1))),
        app,
    }
}

/// Releases H1 with line A1 and returns the issued license id.
fn release_h1(s: &Setup) -> licensor_core::LicenseId {
    let mut engine = s.data.open_engine(s.clock.clone()).unwrap();
    engine
        .keys_mut()
        .generate_key_pair(
            KeyId::new("SIGN-2024").unwrap(),
            KeyType::Signing,
            Some(day(2026, 1, 1)),
            Timestamp::start_of(day(2023, 12, 1)),
        )
        .unwrap();

    let h1 = DocumentNo::new("H1").unwrap();
    engine
        .create_document(Some(h1.clone()), Some((day(2024, 1, 1), day(2024, 12, 31))))
        .unwrap();
    engine.set_customer(&h1, "C10000").unwrap();
    let a1 = engine
        .add_line(&h1, NewLine::application(s.app, "BASIC,REPORTS"))
        .unwrap();

    let report = engine.release(&h1, Some("alice".to_string())).unwrap();
    assert!(report.generation.unwrap().is_complete());

    let doc = engine.document(&h1).unwrap();
    assert_eq!(doc.status(), DocumentStatus::Released);
    let line = doc.line(a1).unwrap();
    assert!(line.license_generated);
    assert_eq!(line.license_status, Some(LicenseStatus::Active));
    let id = line.license_id.unwrap();

    s.data.save_engine(&engine).unwrap();
    id
}

#[test]
fn release_issues_one_verifiable_license() {
    let s = setup();
    let id = release_h1(&s);

    let mut engine = s.data.open_engine(s.clock.clone()).unwrap();
    assert_eq!(engine.registry().len(), 1);
    let license = engine.license(&id).unwrap();
    assert_eq!(license.status(), LicenseStatus::Active);
    assert_eq!(license.key_id.as_str(), "SIGN-2024");
    assert_eq!(license.customer_name, "Contoso Ltd.");
    assert!(verify_with_keys(
        &license.canonical(),
        &license.signature,
        engine.keys().records()
    ));

    assert_eq!(engine.validate_license(&id).unwrap(), ValidationResult::Valid);
    assert_eq!(engine.validate_license(&id).unwrap(), ValidationResult::Valid);
    assert_eq!(engine.registry().history_for(&id).len(), 2);
}

#[test]
fn flipped_byte_in_stored_content_is_invalid_signature() {
    let s = setup();
    let id = release_h1(&s);

    let path = s.data.root().join("licenses.json");
    let mut json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    let content = json["licenses"][id.to_string()]["canonical_content"]
        .as_str()
        .unwrap()
        .replacen("Contoso", "Contosp", 1);
    json["licenses"][id.to_string()]["canonical_content"] = serde_json::Value::String(content);
    std::fs::write(&path, serde_json::to_string_pretty(&json).unwrap()).unwrap();

    let mut engine = s.data.open_engine(s.clock.clone()).unwrap();
    assert_eq!(
        engine.validate_license(&id).unwrap(),
        ValidationResult::InvalidSignature
    );
    assert_eq!(engine.license(&id).unwrap().status(), LicenseStatus::Invalid);
    let doc = engine.document(&DocumentNo::new("H1").unwrap()).unwrap();
    assert_eq!(doc.lines()[0].license_status, Some(LicenseStatus::Invalid));
    assert!(!engine.is_currently_valid(&id).unwrap());
}

#[test]
fn exported_file_tamper_is_detected() {
    let s = setup();
    let id = release_h1(&s);
    let engine = s.data.open_engine(s.clock.clone()).unwrap();

    let text = engine.export_license(&id).unwrap();
    assert_eq!(engine.validate_file(&text).unwrap(), ValidationResult::Valid);
    let tampered = text.replacen("REPORTS", "REPORTZ", 1);
    assert_eq!(
        engine.validate_file(&tampered).unwrap(),
        ValidationResult::InvalidSignature
    );
}

#[test]
fn valid_to_boundary() {
    let s = setup();
    let id = release_h1(&s);

    s.clock.set_date(day(2024, 12, 31));
    let mut engine = s.data.open_engine(s.clock.clone()).unwrap();
    assert_eq!(engine.validate_license(&id).unwrap(), ValidationResult::Valid);

    s.clock.set_date(day(2025, 1, 1));
    assert_eq!(engine.validate_license(&id).unwrap(), ValidationResult::Expired);
    assert_eq!(engine.license(&id).unwrap().status(), LicenseStatus::Expired);
}

#[test]
fn release_without_application_lines_fails() {
    let s = setup();
    let mut engine = s.data.open_engine(s.clock.clone()).unwrap();
    engine
        .keys_mut()
        .generate_key_pair(
            KeyId::new("K1").unwrap(),
            KeyType::Signing,
            None,
            Timestamp::start_of(day(2023, 12, 1)),
        )
        .unwrap();
    let no = engine.create_document(None, None).unwrap();
    engine.set_customer(&no, "C10000").unwrap();
    engine.add_line(&no, NewLine::comment("terms attached")).unwrap();

    assert!(matches!(
        engine.release(&no, None),
        Err(LicensingError::Precondition(_))
    ));
    assert_eq!(engine.document(&no).unwrap().status(), DocumentStatus::Open);
    assert!(engine.registry().is_empty());
}
