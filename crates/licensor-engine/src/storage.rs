//! Data-directory persistence.
//!
//! Layout:
//!
//! ```text
//! <root>/
//!   licensor.yaml     configuration (optional)
//!   catalog.yaml      applications and customers (optional)
//!   keys.json         public key records
//!   licenses.json     license registry and validation history
//!   documents.json    license documents
//!   secrets/          one file per secret handle
//! ```
//!
//! JSON files are written to a temporary sibling and renamed into place.
//! [`DataDir::save_engine`] writes them in reference order: `keys.json`,
//! then `licenses.json`, then `documents.json`. Each file only refers to
//! records in files written before it, so an interrupted save leaves at
//! worst a key usage count that runs ahead, or a registered license whose
//! line was never linked. Both load cleanly, and the line is generated
//! again on the next run.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use licensor_core::{Clock, LicensingError, LicensingResult};
use licensor_crypto::{FileSecretStore, KeyRecords, KeyStore};
use licensor_state::LicenseDocument;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::catalog::StaticCatalog;
use crate::config::LicensingConfig;
use crate::registry::LicenseRegistry;
use crate::workflow::LicenseEngine;

const CONFIG_FILE: &str = "licensor.yaml";
const CATALOG_FILE: &str = "catalog.yaml";
const KEYS_FILE: &str = "keys.json";
const LICENSES_FILE: &str = "licenses.json";
const DOCUMENTS_FILE: &str = "documents.json";
const SECRETS_DIR: &str = "secrets";

/// A Licensor data directory.
#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    /// Open `root`, creating it if needed.
    pub fn open(root: impl Into<PathBuf>) -> LicensingResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Root path.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Configuration from `licensor.yaml` if present, else defaults, with
    /// environment overrides either way.
    pub fn load_config(&self) -> LicensingResult<LicensingConfig> {
        let path = self.root.join(CONFIG_FILE);
        let config = if path.exists() {
            LicensingConfig::load(&path)?
        } else {
            LicensingConfig::from_env()?
        };
        Ok(config)
    }

    /// Catalog from `catalog.yaml`; empty if absent.
    pub fn load_catalog(&self) -> LicensingResult<StaticCatalog> {
        let path = self.root.join(CATALOG_FILE);
        if !path.exists() {
            return Ok(StaticCatalog::new());
        }
        StaticCatalog::from_yaml(&std::fs::read_to_string(path)?)
    }

    /// Write `catalog.yaml`.
    pub fn save_catalog(&self, catalog: &StaticCatalog) -> LicensingResult<()> {
        write_atomic(&self.root.join(CATALOG_FILE), catalog.to_yaml()?.as_bytes())
    }

    /// Key store over `keys.json` and `secrets/`.
    pub fn load_keys(&self) -> LicensingResult<KeyStore> {
        let secrets = FileSecretStore::open(self.root.join(SECRETS_DIR))?;
        let records: KeyRecords = self.read_json(KEYS_FILE)?.unwrap_or_default();
        Ok(KeyStore::with_records(records, Arc::new(secrets)))
    }

    /// Write `keys.json`. Secrets are already on disk.
    pub fn save_keys(&self, keys: &KeyStore) -> LicensingResult<()> {
        self.write_json(KEYS_FILE, keys.records())
    }

    /// Registry from `licenses.json`; empty if absent.
    pub fn load_registry(&self) -> LicensingResult<LicenseRegistry> {
        Ok(self.read_json(LICENSES_FILE)?.unwrap_or_default())
    }

    /// Write `licenses.json`.
    pub fn save_registry(&self, registry: &LicenseRegistry) -> LicensingResult<()> {
        self.write_json(LICENSES_FILE, registry)
    }

    /// Write `documents.json`.
    pub fn save_documents<'a>(
        &self,
        documents: impl IntoIterator<Item = &'a LicenseDocument>,
    ) -> LicensingResult<()> {
        let documents: Vec<&LicenseDocument> = documents.into_iter().collect();
        self.write_json(DOCUMENTS_FILE, &documents)
    }

    /// Documents from `documents.json`; empty if absent.
    pub fn load_documents(&self) -> LicensingResult<Vec<LicenseDocument>> {
        Ok(self.read_json(DOCUMENTS_FILE)?.unwrap_or_default())
    }

    /// Assemble an engine over everything in the directory.
    pub fn open_engine(&self, clock: Arc<dyn Clock>) -> LicensingResult<LicenseEngine> {
        let config = self.load_config()?;
        let catalog = Arc::new(self.load_catalog()?);
        let documents: BTreeMap<_, _> = self
            .load_documents()?
            .into_iter()
            .map(|d| (d.document_no().clone(), d))
            .collect();
        let registry = self.load_registry()?;
        for doc in documents.values() {
            for line in doc.lines() {
                if let Some(id) = line.license_id.filter(|id| registry.get(id).is_none()) {
                    tracing::warn!(
                        line = %doc.line_ref(line.line_no),
                        license_id = %id,
                        "line links a license missing from the registry"
                    );
                }
            }
        }
        Ok(LicenseEngine::with_state(
            config,
            self.load_keys()?,
            registry,
            documents,
            catalog.clone(),
            catalog,
            clock,
        ))
    }

    /// Persist key records, registry and documents.
    pub fn save_engine(&self, engine: &LicenseEngine) -> LicensingResult<()> {
        self.save_keys(engine.keys())?;
        self.save_registry(engine.registry())?;
        self.save_documents(engine.documents().values())?;
        tracing::debug!(root = %self.root.display(), "saved data directory");
        Ok(())
    }

    fn read_json<T: DeserializeOwned>(&self, name: &str) -> LicensingResult<Option<T>> {
        let path = self.root.join(name);
        if !path.exists() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(&path)?;
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| LicensingError::Serialization(format!("{}: {e}", path.display())))
    }

    fn write_json<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> LicensingResult<()> {
        let json = serde_json::to_string_pretty(value)
            .map_err(|e| LicensingError::Serialization(e.to_string()))?;
        write_atomic(&self.root.join(name), json.as_bytes())
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> LicensingResult<()> {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}
