//! # licensor-cli — Command-Line Interface for Licensor
//!
//! Provides the `licensor` binary. Every command opens the data directory,
//! runs one engine operation and saves the directory again.
//!
//! ## Subcommands
//!
//! - `licensor key` — generate, import, export, deactivate and list keys.
//! - `licensor document` — create documents, add lines, release, reopen.
//! - `licensor license` — validate, verify files, import, export, revoke.
//!
//! ```bash
//! licensor --data-dir ./data key generate --id SIGN-2024 --type signing
//! licensor --data-dir ./data document apply h1.yaml
//! licensor --data-dir ./data license verify customer.lic
//! ```
//!
//! ## Crate Policy
//!
//! - Argument parsing is separated from the handlers.
//! - Handlers delegate to `licensor-engine`; no licensing logic here.
//! - Handlers return the process exit code; errors carry `anyhow` context.

pub mod document;
pub mod key;
pub mod license;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use licensor_core::{Clock, FixedClock, SystemClock};
use licensor_engine::{DataDir, LicenseEngine};

/// Environment variable naming the data directory.
pub const DATA_DIR_ENV: &str = "LICENSOR_DATA_DIR";

/// Data directory used when neither the flag nor the variable is set.
pub const DEFAULT_DATA_DIR: &str = ".licensor";

/// Shared state of one CLI invocation.
pub struct Session {
    data: DataDir,
    clock: Arc<dyn Clock>,
}

impl Session {
    /// Open the data directory. `today` pins the clock to midnight UTC.
    pub fn open(data_dir: Option<&Path>, today: Option<NaiveDate>) -> Result<Self> {
        let root = data_dir.map(Path::to_path_buf).unwrap_or_else(|| {
            std::env::var_os(DATA_DIR_ENV)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR))
        });
        let data = DataDir::open(&root)
            .with_context(|| format!("cannot open data directory {}", root.display()))?;
        let clock: Arc<dyn Clock> = match today {
            Some(date) => Arc::new(FixedClock::on(date)),
            None => Arc::new(SystemClock),
        };
        tracing::debug!(root = %root.display(), "opened data directory");
        Ok(Self { data, clock })
    }

    /// The data directory.
    pub fn data(&self) -> &DataDir {
        &self.data
    }

    /// Load the engine.
    pub fn engine(&self) -> Result<LicenseEngine> {
        self.data
            .open_engine(self.clock.clone())
            .with_context(|| format!("cannot load {}", self.data.root().display()))
    }

    /// Persist the engine.
    pub fn save(&self, engine: &LicenseEngine) -> Result<()> {
        self.data
            .save_engine(engine)
            .with_context(|| format!("cannot save {}", self.data.root().display()))
    }
}

/// Write `text` to `out`, or print it.
pub fn emit(text: &str, out: Option<&Path>) -> Result<()> {
    match out {
        Some(path) => std::fs::write(path, text)
            .with_context(|| format!("cannot write {}", path.display())),
        None => {
            print!("{text}");
            Ok(())
        }
    }
}

/// Read a UTF-8 text file.
pub fn read_text(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("cannot read {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_creates_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("nested").join("data");
        let session = Session::open(Some(&root), NaiveDate::from_ymd_opt(2024, 1, 1)).unwrap();
        assert!(root.is_dir());
        let engine = session.engine().unwrap();
        assert_eq!(engine.today(), NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        session.save(&engine).unwrap();
        assert!(root.join("keys.json").exists());
    }

    #[test]
    fn test_emit_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        emit("hello\n", Some(&path)).unwrap();
        assert_eq!(read_text(&path).unwrap(), "hello\n");
        assert!(read_text(&dir.path().join("missing")).is_err());
    }
}
