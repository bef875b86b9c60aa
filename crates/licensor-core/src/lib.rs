//! # licensor-core — Foundational Types for Licensor
//!
//! The leaf crate of the Licensor workspace. Every other crate depends on
//! `licensor-core`; it depends on nothing internal.
//!
//! ## Key Design Principles
//!
//! 1. **Newtype wrappers for identifiers.** `LicenseId`, `ApplicationId`,
//!    `KeyId`, `DocumentNo` are distinct types with validated constructors.
//!
//! 2. **`CanonicalText` newtype.** Every signature in the system is computed
//!    over text produced by [`canonical::encode`]. Signing APIs accept only
//!    `&CanonicalText`, so a license cannot be signed over ad-hoc bytes.
//!
//! 3. **Tolerant decoding.** [`canonical::decode`] never fails: a corrupted
//!    license must surface as an invalid license, not as a crash.
//!
//! 4. **UTC-only timestamps.** [`Timestamp`] is UTC, seconds precision, and
//!    renders with a `Z` suffix so the `ISSUED` field is reproducible.
//!
//! ## Crate Policy
//!
//! - No dependencies on other `licensor-*` crates.
//! - No `unsafe` code.
//! - No `panic!()` or `.unwrap()` outside tests.

pub mod canonical;
pub mod digest;
pub mod envelope;
pub mod error;
pub mod identity;
pub mod temporal;

pub use canonical::{decode, encode, CanonicalText, DecodedLicense, LicenseFields, LICENSE_TAG};
pub use digest::{sha256_digest, ContentDigest, DigestAlgorithm};
pub use envelope::LicenseFile;
pub use error::{
    CryptoError, LicensingError, LicensingResult, SecretStoreError, StateError,
};
pub use identity::{ApplicationId, DocumentNo, KeyId, LicenseId, LineRef};
pub use temporal::{Clock, FixedClock, SystemClock, Timestamp};
