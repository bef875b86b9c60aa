//! # License File Framing
//!
//! A license file carries canonical content and its signature between fixed
//! markers:
//!
//! ```text
//! --- BEGIN LICENSE ---
//! <canonical content>
//! --- BEGIN SIGNATURE ---
//! <signature string>
//! --- END LICENSE ---
//! ```
//!
//! Parsing is positional. Each marker must appear exactly once, in order,
//! and both sections must be non-empty. Surrounding whitespace inside a
//! section is trimmed; canonical content is a single line so no meaningful
//! bytes are lost.

use crate::canonical::CanonicalText;
use crate::error::LicensingError;

/// Opening marker of a license file.
pub const BEGIN_LICENSE: &str = "--- BEGIN LICENSE ---";
/// Separator between content and signature.
pub const BEGIN_SIGNATURE: &str = "--- BEGIN SIGNATURE ---";
/// Closing marker of a license file.
pub const END_LICENSE: &str = "--- END LICENSE ---";

/// Parsed contents of a license file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LicenseFile {
    /// Canonical content, as received.
    pub content: String,
    /// Signature string, as received.
    pub signature: String,
}

impl LicenseFile {
    /// Frame content and signature.
    pub fn new(content: impl Into<String>, signature: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            signature: signature.into(),
        }
    }

    /// Render the file text. Output ends with a newline.
    pub fn render(&self) -> String {
        format!(
            "{BEGIN_LICENSE}\n{}\n{BEGIN_SIGNATURE}\n{}\n{END_LICENSE}\n",
            self.content, self.signature
        )
    }

    /// Parse file text.
    pub fn parse(text: &str) -> Result<Self, LicensingError> {
        let begin = find_once(text, BEGIN_LICENSE)?;
        let sig = find_once(text, BEGIN_SIGNATURE)?;
        let end = find_once(text, END_LICENSE)?;

        if !(begin < sig && sig < end) {
            return Err(LicensingError::Validation(
                "license file markers are out of order".to_string(),
            ));
        }

        let content = text[begin + BEGIN_LICENSE.len()..sig].trim();
        let signature = text[sig + BEGIN_SIGNATURE.len()..end].trim();

        if content.is_empty() {
            return Err(LicensingError::Validation(
                "license file has an empty content section".to_string(),
            ));
        }
        if signature.is_empty() {
            return Err(LicensingError::Validation(
                "license file has an empty signature section".to_string(),
            ));
        }

        Ok(Self::new(content, signature))
    }

    /// The content section as canonical text awaiting verification.
    pub fn canonical(&self) -> CanonicalText {
        CanonicalText::from_stored(self.content.clone())
    }
}

fn find_once(text: &str, marker: &str) -> Result<usize, LicensingError> {
    let first = text
        .find(marker)
        .ok_or_else(|| LicensingError::Validation(format!("license file is missing {marker:?}")))?;
    if text[first + marker.len()..].contains(marker) {
        return Err(LicensingError::Validation(format!(
            "license file repeats {marker:?}"
        )));
    }
    Ok(first)
}
