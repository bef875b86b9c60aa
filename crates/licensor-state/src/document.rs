//! # License Document State Machine
//!
//! A license document is the customer-facing aggregate: a header naming the
//! customer and validity window, and lines naming the licensed applications.
//!
//! ## States
//!
//! ```text
//! Open ──release──▶ Released ──expire──▶ Expired
//!  ▲                  │   │                 │
//!  └─────reopen───────┘   └────archive──────┴──archive──▶ Archived (terminal)
//! ```
//!
//! ## Mutation guard
//!
//! Lines may be added, removed or edited only while `Open`. Outside `Open`,
//! only the header `description` and `external_reference` and each line's
//! `description` may change; every other mutation fails with
//! [`StateError::Locked`]. License linkage is written by the generation
//! pipeline while `Open` or `Released` (explicit regeneration).

use chrono::NaiveDate;
use licensor_core::{
    ApplicationId, DocumentNo, LicenseId, LicensingError, LicensingResult, LineRef, StateError,
    Timestamp,
};
use serde::{Deserialize, Serialize};

use crate::license::LicenseStatus;

/// Spacing between consecutive line numbers.
pub const LINE_NO_INCREMENT: u32 = 10_000;

/// Workflow status of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentStatus {
    /// Editable; initial state.
    Open,
    /// Licenses issued; locked.
    Released,
    /// Validity window has passed.
    Expired,
    /// Retired (terminal).
    Archived,
}

impl DocumentStatus {
    /// Upper-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::Released => "RELEASED",
            Self::Expired => "EXPIRED",
            Self::Archived => "ARCHIVED",
        }
    }

    /// Whether this state is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Archived)
    }
}

impl std::fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of document line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LineType {
    /// Licenses one application.
    Application,
    /// Free text.
    Comment,
}

/// A document line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LicenseLine {
    /// Line number, unique within the document.
    pub line_no: u32,
    /// Kind of line.
    pub line_type: LineType,
    /// Licensed application (application lines only).
    pub application_id: Option<ApplicationId>,
    /// Linked license, once generated.
    pub license_id: Option<LicenseId>,
    /// Whether a license has been generated for this line.
    pub license_generated: bool,
    /// Mirror of the linked license's status.
    pub license_status: Option<LicenseStatus>,
    /// Licensed features (comma separated).
    pub licensed_features: String,
    /// Seats or units.
    pub quantity: u32,
    /// Free text.
    pub description: String,
}

impl LicenseLine {
    /// Whether this line still needs a license.
    pub fn needs_license(&self) -> bool {
        self.line_type == LineType::Application && !self.license_generated
    }
}

/// Record of a document status change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentTransitionRecord {
    /// Status before.
    pub from_state: DocumentStatus,
    /// Status after.
    pub to_state: DocumentStatus,
    /// When.
    pub timestamp: Timestamp,
    /// Who, when known.
    pub actor: Option<String>,
}

/// Values for a new line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLine {
    /// Kind of line.
    pub line_type: LineType,
    /// Application, required for application lines.
    pub application_id: Option<ApplicationId>,
    /// Licensed features.
    pub licensed_features: String,
    /// Seats or units.
    pub quantity: u32,
    /// Free text.
    pub description: String,
}

impl NewLine {
    /// An application line with a quantity of one.
    pub fn application(application_id: ApplicationId, features: impl Into<String>) -> Self {
        Self {
            line_type: LineType::Application,
            application_id: Some(application_id),
            licensed_features: features.into(),
            quantity: 1,
            description: String::new(),
        }
    }

    /// A comment line.
    pub fn comment(text: impl Into<String>) -> Self {
        Self {
            line_type: LineType::Comment,
            application_id: None,
            licensed_features: String::new(),
            quantity: 0,
            description: text.into(),
        }
    }
}

/// A customer license document with its lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LicenseDocument {
    document_no: DocumentNo,
    customer_id: Option<String>,
    customer_name: String,
    start_date: NaiveDate,
    end_date: NaiveDate,
    status: DocumentStatus,
    released_at: Option<Timestamp>,
    released_by: Option<String>,
    /// Free text; editable in every state.
    pub description: String,
    /// Caller's reference; editable in every state.
    pub external_reference: String,
    created_at: Timestamp,
    lines: Vec<LicenseLine>,
    #[serde(default)]
    transitions: Vec<DocumentTransitionRecord>,
}

impl LicenseDocument {
    /// A new, empty, open document.
    pub fn new(
        document_no: DocumentNo,
        start_date: NaiveDate,
        end_date: NaiveDate,
        now: Timestamp,
    ) -> Self {
        Self {
            document_no,
            customer_id: None,
            customer_name: String::new(),
            start_date,
            end_date,
            status: DocumentStatus::Open,
            released_at: None,
            released_by: None,
            description: String::new(),
            external_reference: String::new(),
            created_at: now,
            lines: Vec::new(),
            transitions: Vec::new(),
        }
    }

    /// Document number.
    pub fn document_no(&self) -> &DocumentNo {
        &self.document_no
    }

    /// Customer identifier, once set.
    pub fn customer_id(&self) -> Option<&str> {
        self.customer_id.as_deref()
    }

    /// Customer display name.
    pub fn customer_name(&self) -> &str {
        &self.customer_name
    }

    /// First licensed day.
    pub fn start_date(&self) -> NaiveDate {
        self.start_date
    }

    /// Last licensed day.
    pub fn end_date(&self) -> NaiveDate {
        self.end_date
    }

    /// Workflow status.
    pub fn status(&self) -> DocumentStatus {
        self.status
    }

    /// Release instant, while released.
    pub fn released_at(&self) -> Option<Timestamp> {
        self.released_at
    }

    /// Releasing user, while released.
    pub fn released_by(&self) -> Option<&str> {
        self.released_by.as_deref()
    }

    /// Creation instant.
    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }

    /// Lines in line-number order.
    pub fn lines(&self) -> &[LicenseLine] {
        &self.lines
    }

    /// Status change log.
    pub fn transitions(&self) -> &[DocumentTransitionRecord] {
        &self.transitions
    }

    /// Look up a line.
    pub fn line(&self, line_no: u32) -> Option<&LicenseLine> {
        self.lines.iter().find(|l| l.line_no == line_no)
    }

    /// Back-reference for `line_no`.
    pub fn line_ref(&self, line_no: u32) -> LineRef {
        LineRef {
            document_no: self.document_no.clone(),
            line_no,
        }
    }

    /// Application lines without a license, in line order.
    pub fn ungenerated_lines(&self) -> Vec<u32> {
        self.lines
            .iter()
            .filter(|l| l.needs_license())
            .map(|l| l.line_no)
            .collect()
    }

    /// Number of application lines.
    pub fn application_line_count(&self) -> usize {
        self.lines
            .iter()
            .filter(|l| l.line_type == LineType::Application)
            .count()
    }

    // ── Header mutations ────────────────────────────────────────────

    /// Set the customer.
    pub fn set_customer(
        &mut self,
        customer_id: impl Into<String>,
        customer_name: impl Into<String>,
    ) -> Result<(), StateError> {
        self.require_open("customer_id")?;
        self.customer_id = Some(customer_id.into());
        self.customer_name = customer_name.into();
        Ok(())
    }

    /// Set the validity window. Ordering is checked at release.
    pub fn set_dates(&mut self, start_date: NaiveDate, end_date: NaiveDate) -> Result<(), StateError> {
        self.require_open("license_dates")?;
        self.start_date = start_date;
        self.end_date = end_date;
        Ok(())
    }

    // ── Line mutations ──────────────────────────────────────────────

    /// Append a line and return its number.
    ///
    /// Application lines require an application id that is not already
    /// licensed by another line of this document.
    pub fn add_line(&mut self, line: NewLine) -> LicensingResult<u32> {
        self.require_open("lines")?;
        match (line.line_type, line.application_id) {
            (LineType::Application, None) => {
                return Err(LicensingError::Validation(
                    "application line requires an application id".to_string(),
                ))
            }
            (LineType::Comment, Some(_)) => {
                return Err(LicensingError::Validation(
                    "comment line cannot carry an application id".to_string(),
                ))
            }
            (LineType::Application, Some(app)) => {
                if self.lines.iter().any(|l| l.application_id == Some(app)) {
                    return Err(LicensingError::Validation(format!(
                        "application {app} is already licensed on document {}",
                        self.document_no
                    )));
                }
            }
            (LineType::Comment, None) => {}
        }

        let line_no = self
            .lines
            .iter()
            .map(|l| l.line_no)
            .max()
            .unwrap_or(0)
            .checked_add(LINE_NO_INCREMENT)
            .ok_or_else(|| LicensingError::Validation("line numbers exhausted".to_string()))?;

        self.lines.push(LicenseLine {
            line_no,
            line_type: line.line_type,
            application_id: line.application_id,
            license_id: None,
            license_generated: false,
            license_status: None,
            licensed_features: line.licensed_features,
            quantity: line.quantity,
            description: line.description,
        });
        Ok(line_no)
    }

    /// Change a line's licensed features.
    pub fn set_line_features(&mut self, line_no: u32, features: impl Into<String>) -> LicensingResult<()> {
        self.require_open("licensed_features")?;
        self.line_mut(line_no)?.licensed_features = features.into();
        Ok(())
    }

    /// Change a line's quantity.
    pub fn set_line_quantity(&mut self, line_no: u32, quantity: u32) -> LicensingResult<()> {
        self.require_open("quantity")?;
        self.line_mut(line_no)?.quantity = quantity;
        Ok(())
    }

    /// Change a line's description. Allowed in every state.
    pub fn set_line_description(&mut self, line_no: u32, description: impl Into<String>) -> LicensingResult<()> {
        self.line_mut(line_no)?.description = description.into();
        Ok(())
    }

    /// Remove a line and return it.
    pub fn remove_line(&mut self, line_no: u32) -> LicensingResult<LicenseLine> {
        self.require_open("lines")?;
        let idx = self
            .lines
            .iter()
            .position(|l| l.line_no == line_no)
            .ok_or_else(|| LicensingError::not_found("line", self.line_ref(line_no)))?;
        Ok(self.lines.remove(idx))
    }

    /// Check that a license could be linked to `line_no` right now: the
    /// document is Open or Released and the line is an application line.
    pub fn ensure_linkable(&self, line_no: u32) -> LicensingResult<()> {
        if !matches!(self.status, DocumentStatus::Open | DocumentStatus::Released) {
            return Err(self.locked("license_id").into());
        }
        let line = self
            .line(line_no)
            .ok_or_else(|| LicensingError::not_found("line", self.line_ref(line_no)))?;
        if line.line_type != LineType::Application {
            return Err(LicensingError::Validation(format!(
                "line {line_no} is not an application line"
            )));
        }
        Ok(())
    }

    /// Link a generated license to a line.
    pub fn link_license(
        &mut self,
        line_no: u32,
        license_id: LicenseId,
        status: LicenseStatus,
    ) -> LicensingResult<()> {
        self.ensure_linkable(line_no)?;
        let line = self.line_mut(line_no)?;
        line.license_id = Some(license_id);
        line.license_generated = true;
        line.license_status = Some(status);
        Ok(())
    }

    /// Refresh the mirrored status of every line linked to `license_id`.
    /// Returns the number of lines updated.
    pub fn mirror_license_status(&mut self, license_id: LicenseId, status: LicenseStatus) -> usize {
        let mut n = 0;
        for line in self.lines.iter_mut().filter(|l| l.license_id == Some(license_id)) {
            line.license_status = Some(status);
            n += 1;
        }
        n
    }

    // ── Transitions ─────────────────────────────────────────────────

    /// Check release preconditions that depend only on the document.
    pub fn check_release_ready(&self) -> LicensingResult<()> {
        if self.status != DocumentStatus::Open {
            return Err(StateError::InvalidTransition {
                from: self.status.to_string(),
                to: DocumentStatus::Released.to_string(),
                reason: "only open documents can be released".to_string(),
            }
            .into());
        }
        if self.customer_id.as_deref().map_or(true, str::is_empty) {
            return Err(LicensingError::Precondition(format!(
                "document {} has no customer",
                self.document_no
            )));
        }
        if self.start_date > self.end_date {
            return Err(LicensingError::Precondition(format!(
                "document {} starts {} after it ends {}",
                self.document_no, self.start_date, self.end_date
            )));
        }
        if self.application_line_count() == 0 {
            return Err(LicensingError::Precondition(format!(
                "document {} has no application lines",
                self.document_no
            )));
        }
        Ok(())
    }

    /// OPEN → RELEASED, stamping release metadata.
    pub fn release(&mut self, released_by: Option<String>, now: Timestamp) -> Result<(), StateError> {
        self.require_state(&[DocumentStatus::Open], DocumentStatus::Released)?;
        self.released_at = Some(now);
        self.released_by = released_by.clone();
        self.do_transition(DocumentStatus::Released, now, released_by);
        Ok(())
    }

    /// RELEASED → OPEN, clearing release metadata. Issued licenses remain.
    pub fn reopen(&mut self, actor: Option<String>, now: Timestamp) -> Result<(), StateError> {
        self.require_state(&[DocumentStatus::Released], DocumentStatus::Open)?;
        self.released_at = None;
        self.released_by = None;
        self.do_transition(DocumentStatus::Open, now, actor);
        Ok(())
    }

    /// RELEASED → EXPIRED.
    pub fn expire(&mut self, now: Timestamp) -> Result<(), StateError> {
        self.require_state(&[DocumentStatus::Released], DocumentStatus::Expired)?;
        self.do_transition(DocumentStatus::Expired, now, None);
        Ok(())
    }

    /// RELEASED or EXPIRED → ARCHIVED.
    pub fn archive(&mut self, actor: Option<String>, now: Timestamp) -> Result<(), StateError> {
        self.require_state(
            &[DocumentStatus::Released, DocumentStatus::Expired],
            DocumentStatus::Archived,
        )?;
        self.do_transition(DocumentStatus::Archived, now, actor);
        Ok(())
    }

    /// Deletion is allowed only while open.
    pub fn ensure_deletable(&self) -> Result<(), StateError> {
        if self.status != DocumentStatus::Open {
            return Err(StateError::InvalidTransition {
                from: self.status.to_string(),
                to: "DELETED".to_string(),
                reason: "only open documents can be deleted".to_string(),
            });
        }
        Ok(())
    }

    fn line_mut(&mut self, line_no: u32) -> LicensingResult<&mut LicenseLine> {
        let line_ref = self.line_ref(line_no);
        self.lines
            .iter_mut()
            .find(|l| l.line_no == line_no)
            .ok_or_else(|| LicensingError::not_found("line", line_ref))
    }

    fn require_open(&self, field: &str) -> Result<(), StateError> {
        if self.status == DocumentStatus::Open {
            Ok(())
        } else {
            Err(self.locked(field))
        }
    }

    fn locked(&self, field: &str) -> StateError {
        StateError::Locked {
            record: format!("document {}", self.document_no),
            status: self.status.to_string(),
            field: field.to_string(),
        }
    }

    fn require_state(&self, allowed: &[DocumentStatus], target: DocumentStatus) -> Result<(), StateError> {
        if self.status.is_terminal() {
            return Err(StateError::Terminal {
                record: format!("document {}", self.document_no),
                state: self.status.to_string(),
            });
        }
        if !allowed.contains(&self.status) {
            return Err(StateError::InvalidTransition {
                from: self.status.to_string(),
                to: target.to_string(),
                reason: format!(
                    "requires {}",
                    allowed.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(" or ")
                ),
            });
        }
        Ok(())
    }

    fn do_transition(&mut self, to: DocumentStatus, at: Timestamp, actor: Option<String>) {
        self.transitions.push(DocumentTransitionRecord {
            from_state: self.status,
            to_state: to,
            timestamp: at,
            actor,
        });
        self.status = to;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn now() -> Timestamp {
        Timestamp::parse("2024-01-01T09:00:00Z").unwrap()
    }

    fn doc() -> LicenseDocument {
        LicenseDocument::new(
            DocumentNo::new("LIC-000001").unwrap(),
            day(2024, 1, 1),
            day(2024, 12, 31),
            now(),
        )
    }

    fn ready_doc() -> (LicenseDocument, u32) {
        let mut d = doc();
        d.set_customer("C10000", "Contoso Ltd.").unwrap();
        let line = d.add_line(NewLine::application(ApplicationId::new(), "BASIC")).unwrap();
        (d, line)
    }

    #[test]
    fn test_new_document_is_open() {
        let d = doc();
        assert_eq!(d.status(), DocumentStatus::Open);
        assert!(d.lines().is_empty());
        assert!(d.released_at().is_none());
    }

    #[test]
    fn test_line_numbers_increment() {
        let mut d = doc();
        let a = d.add_line(NewLine::application(ApplicationId::new(), "")).unwrap();
        let b = d.add_line(NewLine::comment("note")).unwrap();
        let c = d.add_line(NewLine::application(ApplicationId::new(), "")).unwrap();
        assert_eq!((a, b, c), (10_000, 20_000, 30_000));

        d.remove_line(b).unwrap();
        let e = d.add_line(NewLine::comment("again")).unwrap();
        assert_eq!(e, 40_000);
    }

    #[test]
    fn test_duplicate_application_rejected() {
        let mut d = doc();
        let app = ApplicationId::new();
        d.add_line(NewLine::application(app, "BASIC")).unwrap();
        let err = d.add_line(NewLine::application(app, "PRO")).unwrap_err();
        assert!(matches!(err, LicensingError::Validation(_)));
    }

    #[test]
    fn test_line_shape_is_validated() {
        let mut d = doc();
        let mut bad = NewLine::comment("x");
        bad.application_id = Some(ApplicationId::new());
        assert!(d.add_line(bad).is_err());
        let mut bad = NewLine::application(ApplicationId::new(), "");
        bad.application_id = None;
        assert!(d.add_line(bad).is_err());
    }

    #[test]
    fn test_release_preconditions() {
        let mut d = doc();
        assert!(matches!(d.check_release_ready(), Err(LicensingError::Precondition(_))));

        d.set_customer("C1", "Contoso").unwrap();
        d.add_line(NewLine::comment("only a comment")).unwrap();
        let err = d.check_release_ready().unwrap_err();
        assert!(err.to_string().contains("no application lines"));

        d.add_line(NewLine::application(ApplicationId::new(), "")).unwrap();
        d.set_dates(day(2025, 1, 1), day(2024, 1, 1)).unwrap();
        assert!(matches!(d.check_release_ready(), Err(LicensingError::Precondition(_))));

        d.set_dates(day(2024, 1, 1), day(2024, 1, 1)).unwrap();
        assert!(d.check_release_ready().is_ok());
    }

    #[test]
    fn test_release_locks_license_fields() {
        let (mut d, line) = ready_doc();
        d.release(Some("alice".to_string()), now()).unwrap();
        assert_eq!(d.status(), DocumentStatus::Released);
        assert_eq!(d.released_by(), Some("alice"));

        assert!(matches!(d.set_customer("C2", "Other"), Err(StateError::Locked { .. })));
        assert!(matches!(d.set_dates(day(2024, 1, 1), day(2025, 1, 1)), Err(StateError::Locked { .. })));
        assert!(matches!(
            d.add_line(NewLine::comment("late")),
            Err(LicensingError::State(StateError::Locked { .. }))
        ));
        assert!(d.set_line_features(line, "PRO").is_err());
        assert!(d.set_line_quantity(line, 5).is_err());
        assert!(d.remove_line(line).is_err());

        d.description = "renewal".to_string();
        d.external_reference = "PO-42".to_string();
        d.set_line_description(line, "seat bundle").unwrap();
        assert_eq!(d.line(line).unwrap().description, "seat bundle");
    }

    #[test]
    fn test_reopen_clears_release_metadata() {
        let (mut d, line) = ready_doc();
        d.link_license(line, LicenseId::new(), LicenseStatus::Active).unwrap();
        d.release(Some("alice".to_string()), now()).unwrap();
        d.reopen(None, now()).unwrap();
        assert_eq!(d.status(), DocumentStatus::Open);
        assert!(d.released_at().is_none());
        assert!(d.released_by().is_none());
        assert!(d.line(line).unwrap().license_generated);
        assert!(d.ungenerated_lines().is_empty());
    }

    #[test]
    fn test_reopen_requires_released() {
        let mut d = doc();
        assert!(matches!(d.reopen(None, now()), Err(StateError::InvalidTransition { .. })));
    }

    #[test]
    fn test_expire_and_archive() {
        let (mut d, _) = ready_doc();
        assert!(d.expire(now()).is_err());
        assert!(d.archive(None, now()).is_err());
        d.release(None, now()).unwrap();
        d.expire(now()).unwrap();
        assert!(d.reopen(None, now()).is_err());
        d.archive(None, now()).unwrap();
        assert!(matches!(d.archive(None, now()), Err(StateError::Terminal { .. })));
        assert_eq!(d.transitions().len(), 3);
    }

    #[test]
    fn test_delete_only_while_open() {
        let (mut d, _) = ready_doc();
        assert!(d.ensure_deletable().is_ok());
        d.release(None, now()).unwrap();
        assert!(d.ensure_deletable().is_err());
    }

    #[test]
    fn test_link_license_and_mirror() {
        let (mut d, line) = ready_doc();
        assert_eq!(d.ungenerated_lines(), vec![line]);
        let id = LicenseId::new();
        d.link_license(line, id, LicenseStatus::Active).unwrap();
        assert!(d.ungenerated_lines().is_empty());
        assert_eq!(d.mirror_license_status(id, LicenseStatus::Expired), 1);
        assert_eq!(d.line(line).unwrap().license_status, Some(LicenseStatus::Expired));

        d.release(None, now()).unwrap();
        d.expire(now()).unwrap();
        assert!(d.link_license(line, LicenseId::new(), LicenseStatus::Active).is_err());
    }

    #[test]
    fn test_missing_line_is_not_found() {
        let mut d = doc();
        assert!(matches!(
            d.set_line_description(123, "x"),
            Err(LicensingError::NotFound { kind: "line", .. })
        ));
    }

    #[test]
    fn test_serde_roundtrip_preserves_state() {
        let (mut d, _) = ready_doc();
        d.release(Some("bob".to_string()), now()).unwrap();
        let json = serde_json::to_string(&d).unwrap();
        assert!(json.contains("\"RELEASED\""));
        let back: LicenseDocument = serde_json::from_str(&json).unwrap();
        assert_eq!(back, d);
    }
}
