//! # Error Types — Structured Error Hierarchy
//!
//! Defines the error taxonomy shared by every Licensor crate. All errors use
//! `thiserror` for derive-based `Display` and `Error` implementations.
//!
//! ## Policy
//!
//! - Single-item operations (release, generate, import) surface the error
//!   immediately.
//! - Bulk operations catch per-item errors and report aggregate counts.
//! - Validation never returns an error for tamper or expiry; it produces a
//!   typed verdict instead. `Tamper` exists for paths that must refuse
//!   outright, such as importing a file whose content does not decode.
//! - Secret store failures are always fatal to the operation that needed them.

use thiserror::Error;

/// Top-level error type for Licensor operations.
#[derive(Error, Debug)]
pub enum LicensingError {
    /// Malformed input (bad identifier, bad date, bad file framing).
    #[error("validation error: {0}")]
    Validation(String),

    /// A required field or condition is missing before an operation.
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// A key, application, customer, document, line or license is absent.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Kind of record that was looked up.
        kind: &'static str,
        /// Identifier that was looked up.
        id: String,
    },

    /// A key with the same identifier already exists.
    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    /// Key generation, import or signing failed.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Mutation attempted in the wrong lifecycle state.
    #[error("state error: {0}")]
    State(#[from] StateError),

    /// Content and signature do not agree.
    #[error("tamper detected: {0}")]
    Tamper(String),

    /// The secret store could not serve a request.
    #[error("secret store error: {0}")]
    SecretStore(#[from] SecretStoreError),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl LicensingError {
    /// Shorthand for [`LicensingError::NotFound`].
    pub fn not_found(kind: &'static str, id: impl std::fmt::Display) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}

/// Result alias used across the workspace.
pub type LicensingResult<T> = Result<T, LicensingError>;

/// Error in cryptographic operations.
#[derive(Error, Debug)]
pub enum CryptoError {
    /// Signature verification failed.
    #[error("signature verification failed: {0}")]
    VerificationFailed(String),

    /// Key generation or parsing failed.
    #[error("key error: {0}")]
    KeyError(String),

    /// Signing failed.
    #[error("signing failed: {0}")]
    SigningFailed(String),

    /// Certificate material is malformed.
    #[error("invalid certificate: {0}")]
    InvalidCertificate(String),

    /// Certificate carries no private key.
    #[error("certificate has no private key")]
    MissingPrivateKey,

    /// Password does not unlock the certificate's private key.
    #[error("wrong certificate password")]
    WrongPassword,
}

/// Error in lifecycle transitions and mutation guards.
#[derive(Error, Debug)]
pub enum StateError {
    /// Attempted an invalid state transition.
    #[error("invalid transition from {from} to {to}: {reason}")]
    InvalidTransition {
        /// Current state name.
        from: String,
        /// Attempted target state name.
        to: String,
        /// Reason the transition was rejected.
        reason: String,
    },

    /// A field was modified while the record is locked by its status.
    #[error("{record} is {status}; field '{field}' cannot be modified")]
    Locked {
        /// Record being mutated, e.g. `document LIC-000001`.
        record: String,
        /// Current status name.
        status: String,
        /// Field that was rejected.
        field: String,
    },

    /// The record is in a terminal state.
    #[error("{record} is in terminal state {state}")]
    Terminal {
        /// Record being mutated.
        record: String,
        /// The terminal state.
        state: String,
    },
}

/// Error from a secret store backend.
#[derive(Error, Debug)]
pub enum SecretStoreError {
    /// No secret is stored under the handle.
    #[error("no secret stored for handle {0}")]
    Missing(String),

    /// The backend failed.
    #[error("secret backend failure: {0}")]
    Backend(String),

    /// IO failure in a file-backed store.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
