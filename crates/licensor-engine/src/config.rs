//! Engine configuration.
//!
//! Passed explicitly into the engine; nothing reads ambient settings at
//! generation time. Values come from a YAML file, then `LICENSOR_*`
//! environment variables override individual fields:
//!
//! - `LICENSOR_DEFAULT_DURATION_DAYS` (default: 365)
//! - `LICENSOR_AUTO_GENERATE_ON_RELEASE` (default: true)
//! - `LICENSOR_DEFAULT_SIGNING_KEY` (default: unset)
//! - `LICENSOR_DOCUMENT_NO_PREFIX` (default: `LIC`)

use std::path::Path;

use licensor_core::KeyId;
use serde::{Deserialize, Serialize};

/// Longest allowed default license duration.
pub const MAX_DURATION_DAYS: u32 = 36_500;

/// Licensing engine settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LicensingConfig {
    /// Length of a new document's window, in days.
    pub default_duration_days: u32,
    /// Generate licenses during release.
    pub auto_generate_on_release: bool,
    /// Preferred signing key.
    pub default_signing_key: Option<KeyId>,
    /// Prefix of auto-assigned document numbers.
    pub document_no_prefix: String,
}

impl Default for LicensingConfig {
    fn default() -> Self {
        Self {
            default_duration_days: 365,
            auto_generate_on_release: true,
            default_signing_key: None,
            document_no_prefix: "LIC".to_string(),
        }
    }
}

impl LicensingConfig {
    /// Load from a YAML file, apply environment overrides, validate.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Read(path.display().to_string(), e.to_string()))?;
        let mut config = Self::from_yaml(&text)?;
        config.apply_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse YAML. Missing fields take defaults.
    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Apply `LICENSOR_*` overrides from `lookup`.
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(v) = lookup("LICENSOR_DEFAULT_DURATION_DAYS") {
            self.default_duration_days = v
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue("LICENSOR_DEFAULT_DURATION_DAYS", v))?;
        }
        if let Some(v) = lookup("LICENSOR_AUTO_GENERATE_ON_RELEASE") {
            self.auto_generate_on_release = parse_bool(&v)
                .ok_or(ConfigError::InvalidValue("LICENSOR_AUTO_GENERATE_ON_RELEASE", v))?;
        }
        if let Some(v) = lookup("LICENSOR_DEFAULT_SIGNING_KEY") {
            self.default_signing_key = if v.trim().is_empty() {
                None
            } else {
                Some(
                    KeyId::new(v.trim())
                        .map_err(|_| ConfigError::InvalidValue("LICENSOR_DEFAULT_SIGNING_KEY", v))?,
                )
            };
        }
        if let Some(v) = lookup("LICENSOR_DOCUMENT_NO_PREFIX") {
            self.document_no_prefix = v.trim().to_string();
        }
        Ok(())
    }

    /// Check ranges and formats.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_duration_days == 0 || self.default_duration_days > MAX_DURATION_DAYS {
            return Err(ConfigError::InvalidValue(
                "default_duration_days",
                self.default_duration_days.to_string(),
            ));
        }
        let prefix = &self.document_no_prefix;
        if prefix.is_empty()
            || prefix.len() > 8
            || !prefix.chars().all(|c| c.is_ascii_alphanumeric())
        {
            return Err(ConfigError::InvalidValue("document_no_prefix", prefix.clone()));
        }
        Ok(())
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("cannot read config {0}: {1}")]
    Read(String, String),
    /// The file is not valid YAML for this schema.
    #[error("invalid config: {0}")]
    Parse(String),
    /// A value is out of range or malformed.
    #[error("invalid value for {0}: {1:?}")]
    InvalidValue(&'static str, String),
}

impl From<ConfigError> for licensor_core::LicensingError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e.to_string())
    }
}
