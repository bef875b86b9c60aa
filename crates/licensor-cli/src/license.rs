//! # License Subcommand
//!
//! Registry queries, validation, license file exchange and manual status
//! changes. `validate` and `verify` exit non-zero unless the verdict is
//! `VALID`.

use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::{Args, Subcommand};
use licensor_core::{temporal::format_date, LicenseId};
use licensor_engine::{LicenseEngine, ValidationResult};

use crate::{emit, read_text, Session};

/// Exit code for a completed check with a non-valid verdict.
pub const EXIT_NOT_VALID: u8 = 3;

/// Arguments for `licensor license`.
#[derive(Args, Debug)]
pub struct LicenseArgs {
    #[command(subcommand)]
    pub command: LicenseCommand,
}

/// License subcommands.
#[derive(Subcommand, Debug)]
pub enum LicenseCommand {
    /// List licenses in the registry.
    List,

    /// Show one license with its status history.
    Show {
        /// License identifier.
        #[arg(long)]
        id: String,
    },

    /// Validate registered licenses and record the verdicts.
    Validate {
        /// License identifier.
        #[arg(long, conflicts_with = "all", required_unless_present = "all")]
        id: Option<String>,
        /// Validate every license.
        #[arg(long)]
        all: bool,
    },

    /// Check a license file against the known keys without importing it.
    Verify {
        /// License file.
        file: PathBuf,
    },

    /// Import a license file into the registry.
    Import {
        /// License file.
        file: PathBuf,
    },

    /// Render a license file.
    Export {
        /// License identifier.
        #[arg(long)]
        id: String,
        /// Output file.
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Place a manual hold on a license.
    Suspend {
        /// License identifier.
        #[arg(long)]
        id: String,
        /// Recorded reason.
        #[arg(long)]
        reason: String,
    },

    /// Lift a manual hold.
    Reinstate {
        /// License identifier.
        #[arg(long)]
        id: String,
        /// Recorded reason.
        #[arg(long)]
        reason: String,
    },

    /// Permanently revoke a license.
    Revoke {
        /// License identifier.
        #[arg(long)]
        id: String,
        /// Recorded reason.
        #[arg(long)]
        reason: String,
    },
}

/// Execute a license subcommand.
pub fn run_license(args: &LicenseArgs, session: &Session) -> Result<u8> {
    let mut engine = session.engine()?;
    let code = match &args.command {
        LicenseCommand::List => {
            list(&engine);
            return Ok(0);
        }
        LicenseCommand::Show { id } => {
            show(&engine, &LicenseId::parse(id)?)?;
            return Ok(0);
        }
        LicenseCommand::Verify { file } => {
            let result = engine.validate_file(&read_text(file)?)?;
            println!("{}: {result}", file.display());
            return Ok(verdict_code(result));
        }
        LicenseCommand::Export { id, out } => {
            let text = engine.export_license(&LicenseId::parse(id)?)?;
            emit(&text, out.as_deref())?;
            return Ok(0);
        }
        LicenseCommand::Validate { id: Some(id), .. } => {
            let result = engine.validate_license(&LicenseId::parse(id)?)?;
            println!("{id}: {result}");
            verdict_code(result)
        }
        LicenseCommand::Validate { id: None, all } => {
            if !all {
                bail!("pass --id or --all");
            }
            let summary = engine.validate_all();
            for (result, count) in &summary.by_result {
                println!("{:<20} {count}", result.as_str());
            }
            println!("{} of {} valid", summary.valid(), summary.total);
            if summary.valid() == summary.total {
                0
            } else {
                EXIT_NOT_VALID
            }
        }
        LicenseCommand::Import { file } => {
            let id = engine.import_license(&read_text(file)?)?;
            let license = engine.license(&id)?;
            println!("Imported {id} ({})", license.status());
            0
        }
        LicenseCommand::Suspend { id, reason } => {
            engine.suspend_license(&LicenseId::parse(id)?, reason)?;
            println!("Suspended {id}");
            0
        }
        LicenseCommand::Reinstate { id, reason } => {
            engine.reinstate_license(&LicenseId::parse(id)?, reason)?;
            println!("Reinstated {id}");
            0
        }
        LicenseCommand::Revoke { id, reason } => {
            engine.revoke_license(&LicenseId::parse(id)?, reason)?;
            println!("Revoked {id}");
            0
        }
    };
    session.save(&engine)?;
    Ok(code)
}

fn verdict_code(result: ValidationResult) -> u8 {
    if result.is_valid() {
        0
    } else {
        EXIT_NOT_VALID
    }
}

fn list(engine: &LicenseEngine) {
    if engine.registry().is_empty() {
        println!("No licenses.");
        return;
    }
    for license in engine.registry().iter() {
        println!(
            "{}  {:<9} {} .. {}  {:<24} {}",
            license.license_id,
            license.status().as_str(),
            format_date(license.valid_from),
            format_date(license.valid_to),
            license.application_name,
            license.customer_name
        );
    }
}

fn show(engine: &LicenseEngine, id: &LicenseId) -> Result<()> {
    let license = engine.license(id)?;
    println!("License: {id}");
    println!("  Status: {}", license.status());
    println!("  Source: {:?}", license.source);
    println!("  Application: {} ({})", license.application_name, license.application_id);
    println!("  Customer: {}", license.customer_name);
    println!(
        "  Valid: {} .. {}",
        format_date(license.valid_from),
        format_date(license.valid_to)
    );
    println!("  Features: {}", license.features);
    println!("  Issued: {}", license.issued_at);
    println!("  Key: {}", license.key_id);
    if let Some(origin) = &license.origin {
        println!("  Origin: {origin}");
    }
    if let Some(next) = &license.superseded_by {
        println!("  Superseded by: {next}");
    }
    if let (Some(at), Some(result)) = (license.last_validated, license.last_validation_result) {
        println!("  Last validated: {at} {result}");
    }
    for t in license.lifecycle.transitions() {
        println!("  {} -> {} at {}: {}", t.from_state, t.to_state, t.timestamp, t.reason);
    }
    Ok(())
}
