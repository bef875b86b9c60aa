//! # licensor-engine — Registry, Pipelines and Document Workflow
//!
//! Composes the lower crates into the licensing engine:
//!
//! - **Catalog** ([`catalog`]): read-only application and customer lookups.
//! - **Registry** ([`registry`]): issued and imported licenses, validation
//!   history, license file import/export.
//! - **Generation** ([`generation`]): line → canonical content → signature →
//!   registry → line linkage.
//! - **Validation** ([`validation`]): ordered checks producing a typed
//!   [`ValidationResult`].
//! - **Workflow** ([`workflow`]): the [`LicenseEngine`] service driving
//!   documents through release, reopen, expiry and archival.
//! - **Configuration** ([`config`]) and **persistence** ([`storage`]).
//!
//! ## Crate Policy
//!
//! - Configuration and the clock are passed in; nothing reads ambient state
//!   during generation or validation.
//! - Bulk operations isolate per-item failures and report counts.
//! - Tamper and expiry are validation verdicts, never errors.

pub mod catalog;
pub mod config;
pub mod generation;
pub mod registry;
pub mod storage;
pub mod validation;
pub mod workflow;

pub use catalog::{AppInfo, ApplicationCatalog, CustomerDirectory, CustomerInfo, StaticCatalog};
pub use config::{ConfigError, LicensingConfig};
pub use generation::{CancellationFlag, GenerationReport, LineFailure};
pub use registry::{License, LicenseRegistry, LicenseSource, ValidationRecord};
pub use storage::DataDir;
pub use validation::{ValidationResult, ValidationSummary};
pub use workflow::{LicenseEngine, ReleaseReport};
