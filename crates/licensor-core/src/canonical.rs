//! # Canonical License Content
//!
//! Deterministic encoding of license fields into the fixed-format text over
//! which signatures are computed:
//!
//! ```text
//! LICENSE-V1|ID:<guid>|APP-ID:<guid>|APP-NAME:<text>|CUSTOMER:<text>|VALID-FROM:<YYYY-MM-DD>|VALID-TO:<YYYY-MM-DD>|FEATURES:<text>|ISSUED:<YYYY-MM-DDTHH:MM:SSZ>
//! ```
//!
//! ## Invariants
//!
//! - Field order is fixed. [`encode`] is a pure function of its input, so the
//!   verifier can re-derive the exact bytes that were signed.
//! - Text values escape `\`, `|`, CR and LF. Any string round-trips and the
//!   content is always a single line.
//! - [`decode`] never fails. Missing or malformed fields fall back to
//!   defaults and clear [`DecodedLicense::complete`].

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::identity::{ApplicationId, LicenseId};
use crate::temporal::{format_date, parse_date, Timestamp};

/// Leading tag of every canonical license.
pub const LICENSE_TAG: &str = "LICENSE-V1";

const FIELD_SEPARATOR: char = '|';
const KEY_SEPARATOR: char = ':';

const KEY_ID: &str = "ID";
const KEY_APP_ID: &str = "APP-ID";
const KEY_APP_NAME: &str = "APP-NAME";
const KEY_CUSTOMER: &str = "CUSTOMER";
const KEY_VALID_FROM: &str = "VALID-FROM";
const KEY_VALID_TO: &str = "VALID-TO";
const KEY_FEATURES: &str = "FEATURES";
const KEY_ISSUED: &str = "ISSUED";

/// Canonical field order.
const FIELD_ORDER: [&str; 8] = [
    KEY_ID,
    KEY_APP_ID,
    KEY_APP_NAME,
    KEY_CUSTOMER,
    KEY_VALID_FROM,
    KEY_VALID_TO,
    KEY_FEATURES,
    KEY_ISSUED,
];

/// The fields bound by a license signature.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LicenseFields {
    /// License identifier.
    pub license_id: LicenseId,
    /// Licensed application.
    pub application_id: ApplicationId,
    /// Application display name at issuance.
    pub application_name: String,
    /// Customer display name at issuance.
    pub customer_name: String,
    /// First valid day (inclusive).
    pub valid_from: NaiveDate,
    /// Last valid day (inclusive).
    pub valid_to: NaiveDate,
    /// Licensed feature set (free text, conventionally comma separated).
    pub features: String,
    /// Issuance instant.
    pub issued_at: Timestamp,
}

impl LicenseFields {
    /// Feature names, trimmed, empty entries dropped.
    pub fn feature_list(&self) -> Vec<&str> {
        self.features
            .split(',')
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .collect()
    }
}

/// Text produced by [`encode`], or received text that claims to be canonical.
///
/// Signing APIs accept only `&CanonicalText`. Freshly issued content can only
/// come from [`encode`]; stored or imported content is wrapped with
/// [`CanonicalText::from_stored`] and is trusted only after verification.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CanonicalText(String);

impl CanonicalText {
    /// Wrap previously stored or imported canonical content.
    pub fn from_stored(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    /// The content as text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The content as the exact bytes that are hashed and signed.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// Consume into the owned string.
    pub fn into_string(self) -> String {
        self.0
    }
}

impl AsRef<[u8]> for CanonicalText {
    fn as_ref(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl std::fmt::Display for CanonicalText {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of tolerant decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedLicense {
    /// Decoded fields; defaults where input was missing or malformed.
    pub fields: LicenseFields,
    /// True only when the tag and every field were present and well formed.
    pub complete: bool,
}

/// Encode license fields into canonical text.
pub fn encode(fields: &LicenseFields) -> CanonicalText {
    let values = [
        fields.license_id.to_string(),
        fields.application_id.to_string(),
        escape(&fields.application_name),
        escape(&fields.customer_name),
        format_date(fields.valid_from),
        format_date(fields.valid_to),
        escape(&fields.features),
        fields.issued_at.to_iso8601(),
    ];

    let mut out = String::from(LICENSE_TAG);
    for (key, value) in FIELD_ORDER.iter().zip(values.iter()) {
        out.push(FIELD_SEPARATOR);
        out.push_str(key);
        out.push(KEY_SEPARATOR);
        out.push_str(value);
    }
    CanonicalText(out)
}

/// Decode canonical text back into fields.
pub fn decode(text: &str) -> DecodedLicense {
    let mut fields = LicenseFields::default();
    let segments = split_segments(text.trim());
    let mut complete = segments.first().map(String::as_str) == Some(LICENSE_TAG);
    let mut seen = [false; FIELD_ORDER.len()];

    for segment in segments.iter().skip(1) {
        let Some((key, raw)) = segment.split_once(KEY_SEPARATOR) else {
            complete = false;
            continue;
        };
        let Some(slot) = FIELD_ORDER.iter().position(|k| *k == key) else {
            complete = false;
            continue;
        };
        if seen[slot] {
            complete = false;
            continue;
        }
        seen[slot] = true;

        let parsed = match key {
            KEY_ID => LicenseId::parse(raw).map(|v| fields.license_id = v).is_ok(),
            KEY_APP_ID => ApplicationId::parse(raw)
                .map(|v| fields.application_id = v)
                .is_ok(),
            KEY_APP_NAME => unescape(raw).map(|v| fields.application_name = v).is_some(),
            KEY_CUSTOMER => unescape(raw).map(|v| fields.customer_name = v).is_some(),
            KEY_VALID_FROM => parse_date(raw).map(|v| fields.valid_from = v).is_ok(),
            KEY_VALID_TO => parse_date(raw).map(|v| fields.valid_to = v).is_ok(),
            KEY_FEATURES => unescape(raw).map(|v| fields.features = v).is_some(),
            KEY_ISSUED => Timestamp::parse(raw).map(|v| fields.issued_at = v).is_ok(),
            _ => false,
        };
        complete &= parsed;
    }

    complete &= seen.iter().all(|s| *s);
    DecodedLicense { fields, complete }
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '|' => out.push_str("\\|"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
    out
}

/// Returns `None` on a dangling or unknown escape.
fn unescape(value: &str) -> Option<String> {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next()? {
            '\\' => out.push('\\'),
            '|' => out.push('|'),
            'n' => out.push('\n'),
            'r' => out.push('\r'),
            _ => return None,
        }
    }
    Some(out)
}

/// Split on unescaped separators, keeping escapes in place.
fn split_segments(text: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                current.push(c);
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            FIELD_SEPARATOR => segments.push(std::mem::take(&mut current)),
            other => current.push(other),
        }
    }
    segments.push(current);
    segments
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn date_strategy() -> impl Strategy<Value = NaiveDate> {
        (1990i32..2100, 1u32..=12, 1u32..=28)
            .prop_map(|(y, m, d)| NaiveDate::from_ymd_opt(y, m, d).unwrap())
    }

    fn fields_strategy() -> impl Strategy<Value = LicenseFields> {
        (
            any::<u128>(),
            any::<u128>(),
            any::<String>(),
            any::<String>(),
            date_strategy(),
            date_strategy(),
            any::<String>(),
            0i64..4_000_000_000,
        )
            .prop_map(|(lid, aid, app, cust, from, to, features, secs)| LicenseFields {
                license_id: LicenseId(uuid::Uuid::from_u128(lid)),
                application_id: ApplicationId(uuid::Uuid::from_u128(aid)),
                application_name: app,
                customer_name: cust,
                valid_from: from,
                valid_to: to,
                features,
                issued_at: Timestamp::from_utc(
                    chrono::DateTime::from_timestamp(secs, 0).unwrap(),
                ),
            })
    }

    proptest! {
        #[test]
        fn decode_inverts_encode(fields in fields_strategy()) {
            let decoded = decode(encode(&fields).as_str());
            prop_assert!(decoded.complete);
            prop_assert_eq!(decoded.fields, fields);
        }

        #[test]
        fn decode_never_panics(input in any::<String>()) {
            let _ = decode(&input);
        }
    }
}
