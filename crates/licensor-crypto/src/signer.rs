//! # Signer / Verifier
//!
//! Produces and checks license signature strings:
//!
//! ```text
//! ALG:ED25519|HASH:SHA256|KEY:<key id>|TS:<YYYY-MM-DDTHH:MM:SSZ>|DIGEST:<hex sha256>|SIG:<base64>
//! ```
//!
//! The Ed25519 signature covers the header, everything before `|SIG:`. The
//! header binds the SHA-256 digest of the canonical content, so the content,
//! the signing key id and the signing time are all covered.
//!
//! ## Security Invariant
//!
//! [`verify`] returns `true` only when all three checks pass: the string is
//! well formed, the recomputed digest matches the embedded one, and the
//! Ed25519 signature is valid for the supplied public key. It never errors
//! or panics. There is no hash-only fallback.

use licensor_core::{
    sha256_digest, CanonicalText, ContentDigest, CryptoError, DigestAlgorithm, KeyId,
    LicensingResult, Timestamp,
};
use subtle::ConstantTimeEq;

use crate::ed25519::{self, Ed25519PublicKey, Ed25519Signature};
use crate::key_store::{KeyAlgorithm, KeyRecords, KeyStore};

const FIELD_ALG: &str = "ALG";
const FIELD_HASH: &str = "HASH";
const FIELD_KEY: &str = "KEY";
const FIELD_TS: &str = "TS";
const FIELD_DIGEST: &str = "DIGEST";
const FIELD_SIG: &str = "SIG";

/// A parsed license signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LicenseSignature {
    /// Signature algorithm.
    pub algorithm: KeyAlgorithm,
    /// Key that produced the signature.
    pub key_id: KeyId,
    /// Signing instant.
    pub signed_at: Timestamp,
    /// Digest of the canonical content.
    pub digest: ContentDigest,
    /// Ed25519 signature over the header.
    pub signature: Ed25519Signature,
}

impl LicenseSignature {
    /// The signed portion of the string.
    pub fn header(&self) -> String {
        signed_header(
            self.algorithm,
            &self.key_id,
            self.signed_at,
            &self.digest,
        )
    }

    /// Render the full signature string.
    pub fn render(&self) -> String {
        format!("{}|{FIELD_SIG}:{}", self.header(), self.signature.to_base64())
    }

    /// Parse a signature string. Field order is fixed.
    pub fn parse(s: &str) -> Result<Self, CryptoError> {
        let malformed =
            |what: &str| CryptoError::VerificationFailed(format!("malformed signature: {what}"));

        let parts: Vec<&str> = s.trim().split('|').collect();
        let &[alg, hash, key, ts, digest, sig] = parts.as_slice() else {
            return Err(malformed("expected 6 fields"));
        };

        let field = |part: &str, name: &str| -> Result<String, CryptoError> {
            part.strip_prefix(name)
                .and_then(|rest| rest.strip_prefix(':'))
                .map(str::to_string)
                .ok_or_else(|| malformed(&format!("expected {name} field")))
        };

        let algorithm = KeyAlgorithm::parse(&field(alg, FIELD_ALG)?)
            .map_err(|e| malformed(&e.to_string()))?;
        if field(hash, FIELD_HASH)? != DigestAlgorithm::Sha256.as_str() {
            return Err(malformed("unsupported hash algorithm"));
        }
        let key_id = KeyId::new(field(key, FIELD_KEY)?).map_err(|e| malformed(&e.to_string()))?;
        let signed_at =
            Timestamp::parse(&field(ts, FIELD_TS)?).map_err(|e| malformed(&e.to_string()))?;
        let digest = ContentDigest::from_hex(&field(digest, FIELD_DIGEST)?)
            .map_err(|e| malformed(&e.to_string()))?;
        let signature = Ed25519Signature::from_base64(&field(sig, FIELD_SIG)?)?;

        Ok(Self {
            algorithm,
            key_id,
            signed_at,
            digest,
            signature,
        })
    }
}

impl std::fmt::Display for LicenseSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.render())
    }
}

fn signed_header(
    algorithm: KeyAlgorithm,
    key_id: &KeyId,
    signed_at: Timestamp,
    digest: &ContentDigest,
) -> String {
    format!(
        "{FIELD_ALG}:{}|{FIELD_HASH}:{}|{FIELD_KEY}:{}|{FIELD_TS}:{}|{FIELD_DIGEST}:{}",
        algorithm.as_str(),
        digest.algorithm.as_str(),
        key_id,
        signed_at.to_iso8601(),
        digest.to_hex()
    )
}

/// Sign canonical content with `key_id`.
///
/// The key must exist, be eligible for signing on `now`'s date, and have its
/// private half in the secret store.
pub fn sign(
    store: &KeyStore,
    key_id: &KeyId,
    content: &CanonicalText,
    now: Timestamp,
) -> LicensingResult<LicenseSignature> {
    let (key, pair) = store.signing_pair(key_id, now.date())?;
    let digest = sha256_digest(content);
    let header = signed_header(key.algorithm, key_id, now, &digest);
    let signature = pair.sign(header.as_bytes());

    tracing::debug!(key_id = %key_id, digest = %digest.to_hex(), "signed license content");
    Ok(LicenseSignature {
        algorithm: key.algorithm,
        key_id: key_id.clone(),
        signed_at: now,
        digest,
        signature,
    })
}

/// Check a signature string, reporting the first failing check.
pub fn check(
    content: &CanonicalText,
    signature: &str,
    public_key: &Ed25519PublicKey,
) -> Result<LicenseSignature, CryptoError> {
    let parsed = LicenseSignature::parse(signature)?;

    let actual = sha256_digest(content);
    if !bool::from(actual.bytes.ct_eq(&parsed.digest.bytes)) {
        return Err(CryptoError::VerificationFailed(
            "content digest does not match signature".to_string(),
        ));
    }

    ed25519::verify(parsed.header().as_bytes(), &parsed.signature, public_key)?;
    Ok(parsed)
}

/// Verify a signature string against `public_key`.
pub fn verify(content: &CanonicalText, signature: &str, public_key: &Ed25519PublicKey) -> bool {
    match check(content, signature, public_key) {
        Ok(_) => true,
        Err(e) => {
            tracing::debug!(error = %e, "signature rejected");
            false
        }
    }
}

/// Verify using the key named in the signature, resolved from `keys`.
///
/// Deactivated and expired keys still verify what they signed earlier.
pub fn verify_with_keys(content: &CanonicalText, signature: &str, keys: &KeyRecords) -> bool {
    let Ok(parsed) = LicenseSignature::parse(signature) else {
        tracing::debug!("signature rejected: malformed");
        return false;
    };
    match keys.public_key(&parsed.key_id) {
        Some(public_key) => verify(content, signature, public_key),
        None => {
            tracing::debug!(key_id = %parsed.key_id, "signature rejected: unknown key");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key_store::KeyType;
    use crate::secret_store::InMemorySecretStore;
    use chrono::NaiveDate;
    use std::sync::Arc;

    fn now() -> Timestamp {
        Timestamp::parse("2024-01-01T12:00:00Z").unwrap()
    }

    fn id(s: &str) -> KeyId {
        KeyId::new(s).unwrap()
    }

    fn setup() -> KeyStore {
        let mut ks = KeyStore::new(Arc::new(InMemorySecretStore::new()));
        ks.generate_key_pair(id("K1"), KeyType::Signing, None, now())
            .unwrap();
        ks.generate_key_pair(id("K2"), KeyType::Signing, None, now())
            .unwrap();
        ks
    }

    fn content() -> CanonicalText {
        CanonicalText::from_stored("LICENSE-V1|ID:x|APP-NAME:Payroll|CUSTOMER:Contoso")
    }

    #[test]
    fn test_sign_then_verify() {
        let ks = setup();
        let sig = sign(&ks, &id("K1"), &content(), now()).unwrap().render();
        assert!(sig.starts_with("ALG:ED25519|HASH:SHA256|KEY:K1|TS:2024-01-01T12:00:00Z|DIGEST:"));
        let pk = ks.records().public_key(&id("K1")).unwrap();
        assert!(verify(&content(), &sig, pk));
        assert!(verify_with_keys(&content(), &sig, ks.records()));
    }

    #[test]
    fn test_wrong_key_fails() {
        let ks = setup();
        let sig = sign(&ks, &id("K1"), &content(), now()).unwrap().render();
        let pk2 = ks.records().public_key(&id("K2")).unwrap();
        assert!(!verify(&content(), &sig, pk2));
    }

    #[test]
    fn test_tampered_content_fails() {
        let ks = setup();
        let sig = sign(&ks, &id("K1"), &content(), now()).unwrap().render();
        let pk = ks.records().public_key(&id("K1")).unwrap();
        let tampered = CanonicalText::from_stored(content().as_str().replace("Contoso", "Contosa"));
        assert!(matches!(
            check(&tampered, &sig, pk),
            Err(CryptoError::VerificationFailed(_))
        ));
        assert!(!verify(&tampered, &sig, pk));
    }

    #[test]
    fn test_tampered_header_fails() {
        let ks = setup();
        let sig = sign(&ks, &id("K1"), &content(), now()).unwrap().render();
        let pk = ks.records().public_key(&id("K1")).unwrap();
        let moved = sig.replace("TS:2024-01-01T12:00:00Z", "TS:2023-01-01T12:00:00Z");
        assert!(!verify(&content(), &moved, pk));
    }

    #[test]
    fn test_rehashed_forgery_fails() {
        let ks = setup();
        let pk = ks.records().public_key(&id("K1")).unwrap();
        let sig = sign(&ks, &id("K1"), &content(), now()).unwrap();
        let forged_content = CanonicalText::from_stored("LICENSE-V1|ID:forged");
        let forged = LicenseSignature {
            digest: sha256_digest(&forged_content),
            ..sig
        };
        assert!(!verify(&forged_content, &forged.render(), pk));
    }

    #[test]
    fn test_malformed_signatures_return_false() {
        let ks = setup();
        let pk = ks.records().public_key(&id("K1")).unwrap();
        for s in [
            "",
            "garbage",
            "ALG:ED25519|HASH:SHA256",
            "ALG:RSA|HASH:SHA256|KEY:K1|TS:2024-01-01T12:00:00Z|DIGEST:00|SIG:AA==",
            "HASH:SHA256|ALG:ED25519|KEY:K1|TS:x|DIGEST:y|SIG:z",
        ] {
            assert!(!verify(&content(), s, pk), "{s:?}");
            assert!(!verify_with_keys(&content(), s, ks.records()), "{s:?}");
        }
    }

    #[test]
    fn test_unknown_key_fails() {
        let ks = setup();
        let sig = sign(&ks, &id("K1"), &content(), now()).unwrap().render();
        let other = KeyStore::new(Arc::new(InMemorySecretStore::new()));
        assert!(!verify_with_keys(&content(), &sig, other.records()));
    }

    #[test]
    fn test_parse_roundtrip() {
        let ks = setup();
        let sig = sign(&ks, &id("K2"), &content(), now()).unwrap();
        assert_eq!(LicenseSignature::parse(&sig.render()).unwrap(), sig);
    }

    #[test]
    fn test_signing_with_deactivated_or_expired_key_fails() {
        let mut ks = setup();
        ks.deactivate_key(&id("K1"), now()).unwrap();
        assert!(sign(&ks, &id("K1"), &content(), now()).is_err());

        ks.generate_key_pair(
            id("K3"),
            KeyType::Signing,
            NaiveDate::from_ymd_opt(2024, 1, 1),
            now(),
        )
        .unwrap();
        assert!(sign(&ks, &id("K3"), &content(), now()).is_err());
        assert!(sign(&ks, &id("MISSING"), &content(), now()).is_err());
    }

    #[test]
    fn test_deactivated_key_still_verifies() {
        let mut ks = setup();
        let sig = sign(&ks, &id("K1"), &content(), now()).unwrap().render();
        ks.deactivate_key(&id("K1"), now()).unwrap();
        assert!(verify_with_keys(&content(), &sig, ks.records()));
    }
}
