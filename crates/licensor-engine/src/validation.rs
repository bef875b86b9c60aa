//! # Validation Pipeline
//!
//! Ordered, short-circuiting checks of a stored license:
//!
//! 1. the application exists and is active in the catalog;
//! 2. `valid_from <= valid_to`;
//! 3. today lies inside the window (before it: `NotYetValid`, status
//!    `Suspended`; after it: `Expired`, status `Expired`);
//! 4. the stored fields re-encode to the stored canonical content and the
//!    signature verifies against the key it names (else
//!    `InvalidSignature`, status `Invalid`).
//!
//! A `Valid` verdict sets status `Active` unless the license is revoked or
//! manually held. Every call stamps `last_validated` and
//! `last_validation_result`, whatever the outcome. Tamper and expiry are
//! verdicts, never errors, so batches always run to completion.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use licensor_core::{decode, LicenseFile, LicenseId, LicensingResult, Timestamp};
use licensor_crypto::{verify_with_keys, KeyRecords, LicenseSignature};
use licensor_state::{LicenseLifecycle, LicenseStatus};
use serde::{Deserialize, Serialize};

use crate::catalog::ApplicationCatalog;
use crate::registry::{License, LicenseRegistry, LicenseSource};

/// Verdict of one validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationResult {
    /// All checks passed.
    Valid,
    /// The application is not in the catalog.
    ApplicationNotFound,
    /// The application is inactive.
    ApplicationInactive,
    /// The window ends before it starts.
    DateRangeInvalid,
    /// Today is before the window.
    NotYetValid,
    /// Today is after the window.
    Expired,
    /// Content and signature do not agree.
    InvalidSignature,
}

impl ValidationResult {
    /// Whether the verdict is `Valid`.
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }

    /// Upper-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Valid => "VALID",
            Self::ApplicationNotFound => "APPLICATION_NOT_FOUND",
            Self::ApplicationInactive => "APPLICATION_INACTIVE",
            Self::DateRangeInvalid => "DATE_RANGE_INVALID",
            Self::NotYetValid => "NOT_YET_VALID",
            Self::Expired => "EXPIRED",
            Self::InvalidSignature => "INVALID_SIGNATURE",
        }
    }

    /// License status this verdict implies, if any.
    fn implied_status(&self) -> Option<LicenseStatus> {
        match self {
            Self::Valid => Some(LicenseStatus::Active),
            Self::NotYetValid => Some(LicenseStatus::Suspended),
            Self::Expired => Some(LicenseStatus::Expired),
            Self::InvalidSignature => Some(LicenseStatus::Invalid),
            Self::ApplicationNotFound | Self::ApplicationInactive | Self::DateRangeInvalid => None,
        }
    }
}

impl std::fmt::Display for ValidationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inputs shared by every validation in a run.
#[derive(Clone, Copy)]
pub struct ValidationContext<'a> {
    /// Application lookup.
    pub catalog: &'a dyn ApplicationCatalog,
    /// Public keys for signature checks.
    pub keys: &'a KeyRecords,
    /// The date validity is judged on.
    pub today: NaiveDate,
    /// Stamp for `last_validated`.
    pub now: Timestamp,
}

/// Aggregate of a batch run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationSummary {
    /// Licenses checked.
    pub total: usize,
    /// Count per verdict.
    pub by_result: BTreeMap<ValidationResult, usize>,
}

impl ValidationSummary {
    /// Number of `Valid` verdicts.
    pub fn valid(&self) -> usize {
        self.by_result
            .get(&ValidationResult::Valid)
            .copied()
            .unwrap_or(0)
    }
}

fn evaluate(ctx: &ValidationContext<'_>, license: &License) -> ValidationResult {
    match ctx.catalog.lookup(&license.application_id) {
        None => return ValidationResult::ApplicationNotFound,
        Some(app) if !app.active => return ValidationResult::ApplicationInactive,
        Some(_) => {}
    }

    if license.valid_from > license.valid_to {
        return ValidationResult::DateRangeInvalid;
    }
    if ctx.today < license.valid_from {
        return ValidationResult::NotYetValid;
    }
    if ctx.today > license.valid_to {
        return ValidationResult::Expired;
    }

    if !license.fields_match_content()
        || !verify_with_keys(&license.canonical(), &license.signature, ctx.keys)
    {
        return ValidationResult::InvalidSignature;
    }
    ValidationResult::Valid
}

/// Validate one license, applying status side effects and stamps.
pub fn validate_license(ctx: &ValidationContext<'_>, license: &mut License) -> ValidationResult {
    let result = evaluate(ctx, license);
    if let Some(status) = result.implied_status() {
        if license
            .lifecycle
            .observe(status, ctx.now, &format!("validation: {result}"))
        {
            tracing::info!(
                license_id = %license.license_id,
                status = %license.status(),
                "license status changed by validation"
            );
        }
    }
    license.last_validated = Some(ctx.now);
    license.last_validation_result = Some(result);
    tracing::debug!(license_id = %license.license_id, result = %result, "validated license");
    result
}

/// Validate a registered license and append to its history.
pub fn validate_registered(
    ctx: &ValidationContext<'_>,
    registry: &mut LicenseRegistry,
    id: &LicenseId,
) -> LicensingResult<ValidationResult> {
    let license = registry
        .get_mut(id)
        .ok_or_else(|| licensor_core::LicensingError::not_found("license", id))?;
    let result = validate_license(ctx, license);
    registry.record_validation(*id, result, ctx.now);
    Ok(result)
}

/// Validate every registered license.
pub fn validate_all(ctx: &ValidationContext<'_>, registry: &mut LicenseRegistry) -> ValidationSummary {
    let mut summary = ValidationSummary::default();
    for id in registry.ids() {
        if let Ok(result) = validate_registered(ctx, registry, &id) {
            summary.total += 1;
            *summary.by_result.entry(result).or_insert(0) += 1;
        }
    }
    tracing::info!(total = summary.total, valid = summary.valid(), "validated all licenses");
    summary
}

/// Validate a license file without registering it.
///
/// Framing errors are returned as errors; undecodable content is reported
/// as `InvalidSignature`.
pub fn validate_file(ctx: &ValidationContext<'_>, text: &str) -> LicensingResult<ValidationResult> {
    let file = LicenseFile::parse(text)?;
    let decoded = decode(&file.content);
    if !decoded.complete {
        return Ok(ValidationResult::InvalidSignature);
    }
    let Ok(signature) = LicenseSignature::parse(&file.signature) else {
        return Ok(ValidationResult::InvalidSignature);
    };

    let fields = decoded.fields;
    let mut license = License {
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
        lifecycle: LicenseLifecycle::new(LicenseStatus::Active),
        last_validated: None,
        last_validation_result: None,
        source: LicenseSource::Imported,
        origin: None,
        superseded_by: None,
    };
    Ok(validate_license(ctx, &mut license))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{AppInfo, StaticCatalog};
    use licensor_core::{encode, ApplicationId, KeyId, LicenseFields};
    use licensor_crypto::{sign, InMemorySecretStore, KeyStore, KeyType};
    use std::sync::Arc;

    struct Fixture {
        catalog: StaticCatalog,
        keys: KeyStore,
        app: ApplicationId,
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn issued() -> Timestamp {
        Timestamp::parse("2023-12-20T10:00:00Z").unwrap()
    }

    fn fixture() -> Fixture {
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
        let mut keys = KeyStore::new(Arc::new(InMemorySecretStore::new()));
        keys.generate_key_pair(KeyId::new("K1").unwrap(), KeyType::Signing, None, issued())
            .unwrap();
        Fixture { catalog, keys, app }
    }

    fn license(fx: &Fixture) -> License {
        let fields = LicenseFields {
            license_id: LicenseId::new(),
            application_id: fx.app,
            application_name: "Payroll".to_string(),
            customer_name: "Contoso".to_string(),
            valid_from: day(2024, 1, 1),
            valid_to: day(2024, 12, 31),
            features: "BASIC".to_string(),
            issued_at: issued(),
        };
        let content = encode(&fields);
        let key_id = KeyId::new("K1").unwrap();
        let sig = sign(&fx.keys, &key_id, &content, issued()).unwrap();
        License {
            license_id: fields.license_id,
            application_id: fields.application_id,
            application_name: fields.application_name,
            customer_name: fields.customer_name,
            valid_from: fields.valid_from,
            valid_to: fields.valid_to,
            features: fields.features,
            issued_at: fields.issued_at,
            canonical_content: content.into_string(),
            signature: sig.render(),
            key_id,
            lifecycle: LicenseLifecycle::new(LicenseStatus::Active),
            last_validated: None,
            last_validation_result: None,
            source: LicenseSource::Generated,
            origin: None,
            superseded_by: None,
        }
    }

    fn ctx(fx: &Fixture, today: NaiveDate) -> ValidationContext<'_> {
        ValidationContext {
            catalog: &fx.catalog,
            keys: fx.keys.records(),
            today,
            now: Timestamp::start_of(today),
        }
    }

    #[test]
    fn test_valid_license() {
        let fx = fixture();
        let mut lic = license(&fx);
        let c = ctx(&fx, day(2024, 6, 1));
        assert_eq!(validate_license(&c, &mut lic), ValidationResult::Valid);
        assert_eq!(lic.status(), LicenseStatus::Active);
        assert_eq!(lic.last_validated, Some(c.now));
        assert_eq!(lic.last_validation_result, Some(ValidationResult::Valid));
        assert!(lic.is_currently_valid(c.today));
    }

    #[test]
    fn test_window_boundaries() {
        let fx = fixture();
        let mut lic = license(&fx);
        assert_eq!(
            validate_license(&ctx(&fx, day(2024, 12, 31)), &mut lic),
            ValidationResult::Valid
        );
        assert_eq!(
            validate_license(&ctx(&fx, day(2025, 1, 1)), &mut lic),
            ValidationResult::Expired
        );
        assert_eq!(lic.status(), LicenseStatus::Expired);

        let mut early = license(&fx);
        assert_eq!(
            validate_license(&ctx(&fx, day(2023, 12, 31)), &mut early),
            ValidationResult::NotYetValid
        );
        assert_eq!(early.status(), LicenseStatus::Suspended);
        assert!(!early.is_currently_valid(day(2023, 12, 31)));
    }

    #[test]
    fn test_catalog_checks_come_first() {
        let mut fx = fixture();
        let mut lic = license(&fx);
        lic.canonical_content.push('x');
        fx.catalog.set_application_active(&fx.app, false);
        assert_eq!(
            validate_license(&ctx(&fx, day(2024, 6, 1)), &mut lic),
            ValidationResult::ApplicationInactive
        );
        assert_eq!(lic.status(), LicenseStatus::Active);

        lic.application_id = ApplicationId::new();
        assert_eq!(
            validate_license(&ctx(&fx, day(2024, 6, 1)), &mut lic),
            ValidationResult::ApplicationNotFound
        );
    }

    #[test]
    fn test_inverted_window() {
        let fx = fixture();
        let mut lic = license(&fx);
        lic.valid_from = day(2025, 1, 1);
        assert_eq!(
            validate_license(&ctx(&fx, day(2024, 6, 1)), &mut lic),
            ValidationResult::DateRangeInvalid
        );
    }

    #[test]
    fn test_tampered_content_is_invalid_signature() {
        let fx = fixture();
        let mut lic = license(&fx);
        lic.canonical_content = lic.canonical_content.replace("Contoso", "Contosx");
        lic.customer_name = "Contosx".to_string();
        assert_eq!(
            validate_license(&ctx(&fx, day(2024, 6, 1)), &mut lic),
            ValidationResult::InvalidSignature
        );
        assert_eq!(lic.status(), LicenseStatus::Invalid);
    }

    #[test]
    fn test_tampered_fields_are_invalid_signature() {
        let fx = fixture();
        let mut lic = license(&fx);
        lic.features = "BASIC,ENTERPRISE".to_string();
        assert_eq!(
            validate_license(&ctx(&fx, day(2024, 6, 1)), &mut lic),
            ValidationResult::InvalidSignature
        );
    }

    #[test]
    fn test_revoked_license_stays_revoked() {
        let fx = fixture();
        let mut lic = license(&fx);
        lic.lifecycle.revoke(issued(), "refund").unwrap();
        assert_eq!(
            validate_license(&ctx(&fx, day(2024, 6, 1)), &mut lic),
            ValidationResult::Valid
        );
        assert_eq!(lic.status(), LicenseStatus::Revoked);
        assert!(!lic.is_currently_valid(day(2024, 6, 1)));
    }

    #[test]
    fn test_validation_is_idempotent() {
        let fx = fixture();
        let mut lic = license(&fx);
        lic.canonical_content.push('!');
        let c = ctx(&fx, day(2024, 6, 1));
        let first = validate_license(&c, &mut lic);
        let snapshot = lic.clone();
        let second = validate_license(&c, &mut lic);
        assert_eq!(first, second);
        assert_eq!(lic, snapshot);
    }

    #[test]
    fn test_validate_all_and_history() {
        let fx = fixture();
        let mut reg = LicenseRegistry::new();
        let good = license(&fx);
        let mut bad = license(&fx);
        bad.canonical_content.push('!');
        let good_id = good.license_id;
        reg.insert(good).unwrap();
        reg.insert(bad).unwrap();

        let summary = validate_all(&ctx(&fx, day(2024, 6, 1)), &mut reg);
        assert_eq!(summary.total, 2);
        assert_eq!(summary.valid(), 1);
        assert_eq!(summary.by_result[&ValidationResult::InvalidSignature], 1);
        assert_eq!(reg.history_for(&good_id).len(), 1);

        assert!(validate_registered(&ctx(&fx, day(2024, 6, 1)), &mut reg, &LicenseId::new()).is_err());
    }

    #[test]
    fn test_validate_file() {
        let fx = fixture();
        let lic = license(&fx);
        let text = lic.to_file().render();
        let c = ctx(&fx, day(2024, 6, 1));
        assert_eq!(validate_file(&c, &text).unwrap(), ValidationResult::Valid);

        let tampered = text.replace("BASIC", "BASIX");
        assert_eq!(
            validate_file(&c, &tampered).unwrap(),
            ValidationResult::InvalidSignature
        );
        assert!(validate_file(&c, "no markers").is_err());
    }

    mod window {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(48))]

            #[test]
            fn verdict_follows_window(offset in -400i64..800) {
                let fx = fixture();
                let mut lic = license(&fx);
                let today = day(2024, 1, 1) + chrono::Duration::days(offset);
                let result = validate_license(&ctx(&fx, today), &mut lic);
                let expected = if today < lic.valid_from {
                    ValidationResult::NotYetValid
                } else if today > lic.valid_to {
                    ValidationResult::Expired
                } else {
                    ValidationResult::Valid
                };
                prop_assert_eq!(result, expected);
                prop_assert_eq!(lic.is_currently_valid(today), expected.is_valid());
            }
        }
    }
}
