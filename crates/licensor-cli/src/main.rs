//! # licensor CLI entry point
//!
//! Parses command-line arguments and dispatches to subcommand handlers.

use std::path::PathBuf;
use std::process::ExitCode;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use licensor_cli::document::{run_document, DocumentArgs};
use licensor_cli::key::{run_key, KeyArgs};
use licensor_cli::license::{run_license, LicenseArgs};
use licensor_cli::Session;

/// Licensor: signed software entitlements.
///
/// Manages signing keys, license documents and the license registry kept
/// in a data directory.
#[derive(Parser, Debug)]
#[command(name = "licensor", version, about, long_about = None)]
struct Cli {
    /// Enable verbose output. Repeat for more verbosity (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Data directory; defaults to $LICENSOR_DATA_DIR or ./.licensor.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Evaluate as of this date instead of the system clock.
    #[arg(long, global = true)]
    today: Option<NaiveDate>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Signing and validation keys.
    Key(KeyArgs),

    /// License documents and their release workflow.
    Document(DocumentArgs),

    /// Issued licenses: validation, files and status changes.
    License(LicenseArgs),
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => EnvFilter::new("warn"),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let result = Session::open(cli.data_dir.as_deref(), cli.today).and_then(|session| {
        match &cli.command {
            Commands::Key(args) => run_key(args, &session),
            Commands::Document(args) => run_document(args, &session),
            Commands::License(args) => run_license(args, &session),
        }
    });

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::from(1)
        }
    }
}
