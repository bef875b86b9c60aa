//! # Certificate Bundles
//!
//! Password-protected bundles carrying an Ed25519 key pair plus descriptive
//! metadata. They are the import format for externally issued signing keys.
//!
//! ```text
//! -----BEGIN LICENSOR CERTIFICATE-----
//! Subject: CN=Contoso Licensing
//! Issuer: CN=Contoso Root
//! Friendly-Name: Contoso 2024
//! Not-After: 2025-12-31
//! Public-Key: <base64>
//! Kdf: argon2id;m=19456;t=2;p=1
//! Encrypted-Private-Key: <base64(salt || nonce || ciphertext)>
//! -----END LICENSOR CERTIFICATE-----
//! ```
//!
//! The private key is a 32-byte Ed25519 seed encrypted with
//! ChaCha20-Poly1305 under a key derived from the password with Argon2id.
//! `Kdf` and `Encrypted-Private-Key` are absent in public-only bundles.
//! This is a key transport format; no chain validation is performed.

use argon2::{Argon2, Params, Version};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use chrono::NaiveDate;
use licensor_core::temporal::{format_date, parse_date};
use licensor_core::CryptoError;
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::ed25519::{Ed25519KeyPair, Ed25519PublicKey};

const BEGIN: &str = "-----BEGIN LICENSOR CERTIFICATE-----";
const END: &str = "-----END LICENSOR CERTIFICATE-----";

const SALT_SIZE: usize = 16;
const NONCE_SIZE: usize = 12;
const KEY_SIZE: usize = 32;

/// Upper bounds on bundle-supplied Argon2id costs (memory in KiB).
const MAX_MEMORY_COST: u32 = 1024 * 1024;
const MAX_TIME_COST: u32 = 16;
const MAX_PARALLELISM: u32 = 16;

/// Argon2id cost parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    /// Memory cost in KiB.
    pub memory_cost: u32,
    /// Iterations.
    pub time_cost: u32,
    /// Parallelism.
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_cost: 19 * 1024,
            time_cost: 2,
            parallelism: 1,
        }
    }
}

impl KdfParams {
    /// Minimal parameters for tests.
    pub fn fast() -> Self {
        Self {
            memory_cost: 1024,
            time_cost: 1,
            parallelism: 1,
        }
    }

    fn render(&self) -> String {
        format!(
            "argon2id;m={};t={};p={}",
            self.memory_cost, self.time_cost, self.parallelism
        )
    }

    fn parse(value: &str) -> Result<Self, CryptoError> {
        let mut parts = value.split(';');
        if parts.next() != Some("argon2id") {
            return Err(invalid(format!("unsupported KDF {value:?}")));
        }
        let mut params = Self::default();
        for part in parts {
            let (k, v) = part
                .split_once('=')
                .ok_or_else(|| invalid(format!("malformed KDF parameter {part:?}")))?;
            let n: u32 = v
                .parse()
                .map_err(|_| invalid(format!("KDF parameter {k} is not a number")))?;
            match k {
                "m" => params.memory_cost = n,
                "t" => params.time_cost = n,
                "p" => params.parallelism = n,
                other => return Err(invalid(format!("unknown KDF parameter {other:?}"))),
            }
        }
        if params.memory_cost > MAX_MEMORY_COST
            || params.time_cost > MAX_TIME_COST
            || params.parallelism > MAX_PARALLELISM
        {
            return Err(invalid(format!(
                "KDF parameters {value:?} exceed m={MAX_MEMORY_COST};t={MAX_TIME_COST};p={MAX_PARALLELISM}"
            )));
        }
        Ok(params)
    }
}

/// Descriptive metadata for a new bundle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CertificateSubject {
    /// Subject name.
    pub subject: String,
    /// Issuer name.
    pub issuer: String,
    /// Display name.
    pub friendly_name: String,
    /// Last day the certificate may be used.
    pub not_after: Option<NaiveDate>,
}

/// A parsed certificate bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateBundle {
    /// Descriptive metadata.
    pub meta: CertificateSubject,
    /// Public half of the key pair.
    pub public_key: Ed25519PublicKey,
    kdf: Option<KdfParams>,
    encrypted_private_key: Option<Vec<u8>>,
}

impl CertificateBundle {
    /// Create a bundle whose private key is sealed under `password`.
    pub fn seal(
        meta: CertificateSubject,
        key_pair: &Ed25519KeyPair,
        password: &str,
        params: KdfParams,
    ) -> Result<Self, CryptoError> {
        let mut salt = [0u8; SALT_SIZE];
        let mut nonce = [0u8; NONCE_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut salt);
        rand::rngs::OsRng.fill_bytes(&mut nonce);

        let key = derive_key(password, &salt, &params)?;
        let cipher = ChaCha20Poly1305::new(key.as_slice().into());
        let seed = key_pair.seed();
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), seed.as_slice())
            .map_err(|e| CryptoError::KeyError(format!("certificate encryption failed: {e}")))?;

        let mut blob = Vec::with_capacity(SALT_SIZE + NONCE_SIZE + ciphertext.len());
        blob.extend_from_slice(&salt);
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&ciphertext);

        Ok(Self {
            meta,
            public_key: key_pair.public_key(),
            kdf: Some(params),
            encrypted_private_key: Some(blob),
        })
    }

    /// Create a bundle with no private key.
    pub fn public_only(meta: CertificateSubject, public_key: Ed25519PublicKey) -> Self {
        Self {
            meta,
            public_key,
            kdf: None,
            encrypted_private_key: None,
        }
    }

    /// Whether the bundle carries a private key.
    pub fn has_private_key(&self) -> bool {
        self.encrypted_private_key.is_some()
    }

    /// Uppercase hex SHA-256 of the public key.
    pub fn thumbprint(&self) -> String {
        thumbprint(&self.public_key)
    }

    /// Decrypt the private key.
    ///
    /// Fails with [`CryptoError::MissingPrivateKey`] for public-only bundles
    /// and [`CryptoError::WrongPassword`] when authentication fails.
    pub fn unlock(&self, password: &str) -> Result<Ed25519KeyPair, CryptoError> {
        let blob = self
            .encrypted_private_key
            .as_deref()
            .ok_or(CryptoError::MissingPrivateKey)?;
        if blob.len() < SALT_SIZE + NONCE_SIZE + 16 {
            return Err(invalid("encrypted private key is truncated"));
        }
        let (salt, rest) = blob.split_at(SALT_SIZE);
        let (nonce, ciphertext) = rest.split_at(NONCE_SIZE);

        let params = self.kdf.unwrap_or_default();
        let key = derive_key(password, salt, &params)?;
        let cipher = ChaCha20Poly1305::new(key.as_slice().into());
        let seed = cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map(Zeroizing::new)
            .map_err(|_| CryptoError::WrongPassword)?;

        let key_pair = Ed25519KeyPair::from_secret(&seed)?;
        if key_pair.public_key() != self.public_key {
            return Err(invalid("private key does not match public key"));
        }
        Ok(key_pair)
    }

    /// Render as bundle text.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(BEGIN);
        out.push('\n');
        push_header(&mut out, "Subject", &self.meta.subject);
        push_header(&mut out, "Issuer", &self.meta.issuer);
        push_header(&mut out, "Friendly-Name", &self.meta.friendly_name);
        if let Some(date) = self.meta.not_after {
            push_header(&mut out, "Not-After", &format_date(date));
        }
        push_header(&mut out, "Public-Key", &self.public_key.to_base64());
        if let (Some(kdf), Some(blob)) = (&self.kdf, &self.encrypted_private_key) {
            push_header(&mut out, "Kdf", &kdf.render());
            push_header(&mut out, "Encrypted-Private-Key", &STANDARD.encode(blob));
        }
        out.push_str(END);
        out.push('\n');
        out
    }

    /// Parse bundle text.
    pub fn parse(text: &str) -> Result<Self, CryptoError> {
        let body = text
            .trim()
            .strip_prefix(BEGIN)
            .and_then(|rest| rest.strip_suffix(END))
            .ok_or_else(|| invalid("missing certificate markers"))?;

        let mut meta = CertificateSubject::default();
        let mut public_key = None;
        let mut kdf = None;
        let mut encrypted = None;

        for line in body.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| invalid(format!("malformed header line {line:?}")))?;
            let value = value.trim();
            match name.trim() {
                "Subject" => meta.subject = value.to_string(),
                "Issuer" => meta.issuer = value.to_string(),
                "Friendly-Name" => meta.friendly_name = value.to_string(),
                "Not-After" => {
                    meta.not_after = Some(
                        parse_date(value).map_err(|e| invalid(format!("Not-After: {e}")))?,
                    )
                }
                "Public-Key" => public_key = Some(Ed25519PublicKey::from_base64(value)?),
                "Kdf" => kdf = Some(KdfParams::parse(value)?),
                "Encrypted-Private-Key" => {
                    encrypted = Some(STANDARD.decode(value).map_err(|e| {
                        invalid(format!("Encrypted-Private-Key is not base64: {e}"))
                    })?)
                }
                other => return Err(invalid(format!("unknown header {other:?}"))),
            }
        }

        let public_key = public_key.ok_or_else(|| invalid("missing Public-Key header"))?;
        Ok(Self {
            meta,
            public_key,
            kdf,
            encrypted_private_key: encrypted,
        })
    }
}

/// Uppercase hex SHA-256 of a public key.
pub fn thumbprint(public_key: &Ed25519PublicKey) -> String {
    Sha256::digest(public_key.as_bytes())
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect()
}

fn derive_key(
    password: &str,
    salt: &[u8],
    params: &KdfParams,
) -> Result<Zeroizing<[u8; KEY_SIZE]>, CryptoError> {
    let argon2_params = Params::new(
        params.memory_cost,
        params.time_cost,
        params.parallelism,
        Some(KEY_SIZE),
    )
    .map_err(|e| CryptoError::KeyError(format!("invalid KDF parameters: {e}")))?;
    let argon2 = Argon2::new(argon2::Algorithm::Argon2id, Version::V0x13, argon2_params);

    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    argon2
        .hash_password_into(password.as_bytes(), salt, key.as_mut_slice())
        .map_err(|e| CryptoError::KeyError(format!("key derivation failed: {e}")))?;
    Ok(key)
}

fn push_header(out: &mut String, name: &str, value: &str) {
    out.push_str(name);
    out.push_str(": ");
    out.push_str(&value.replace(['\r', '\n'], " "));
    out.push('\n');
}

fn invalid(msg: impl Into<String>) -> CryptoError {
    CryptoError::InvalidCertificate(msg.into())
}
