//! # licensor-state — Lifecycle State Machines
//!
//! - **Document** (`document.rs`): the customer license document,
//!   `Open → Released → Expired → Archived` with `Released → Open` via
//!   reopen, plus the mutation guard that locks license-defining fields
//!   outside `Open`.
//!
//! - **License** (`license.rs`): status of an issued license, driven by
//!   validation observations and manual suspend/reinstate/revoke.
//!
//! Both machines keep an ordered transition log and report rejected
//! transitions as [`licensor_core::StateError`].

pub mod document;
pub mod license;

pub use document::{
    DocumentStatus, DocumentTransitionRecord, LicenseDocument, LicenseLine, LineType, NewLine,
    LINE_NO_INCREMENT,
};
pub use license::{LicenseLifecycle, LicenseStatus, StatusTransitionRecord};
