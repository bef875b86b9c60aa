//! # licensor-crypto — Keys, Secrets and Signatures
//!
//! - **Key Store** ([`key_store`]): key lifecycle and deterministic
//!   selection of the active signing key.
//! - **Secret Store** ([`secret_store`]): private key material behind an
//!   opaque handle.
//! - **Signer/Verifier** ([`signer`]): the trust boundary. Ed25519 over a
//!   header that binds the SHA-256 digest of canonical content.
//! - **Certificates** ([`certificate`]) and **public key blocks** ([`pem`]):
//!   text formats for moving keys between installations.
//!
//! ## Crate Policy
//!
//! - Depends only on `licensor-core` internally.
//! - No mocking of cryptographic operations in tests. All tests use real
//!   SHA-256, Ed25519, Argon2id and ChaCha20-Poly1305.
//! - Secret bytes are held in `Zeroizing` buffers and never serialized
//!   alongside public metadata.

pub mod certificate;
pub mod ed25519;
pub mod key_store;
pub mod pem;
pub mod secret_store;
pub mod signer;

pub use certificate::{CertificateBundle, CertificateSubject, KdfParams};
pub use ed25519::{Ed25519KeyPair, Ed25519PublicKey, Ed25519Signature};
pub use key_store::{
    ActiveSigningKey, CertificateMeta, CryptoKey, KeyAlgorithm, KeyRecords, KeyStore, KeyType,
};
pub use pem::PublicKeyBlock;
pub use secret_store::{FileSecretStore, InMemorySecretStore, SecretHandle, SecretStore};
pub use signer::{sign, verify, verify_with_keys, LicenseSignature};
