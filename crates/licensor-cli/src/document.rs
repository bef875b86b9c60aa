//! # Document Subcommand
//!
//! License document workflow. `apply` builds a document from a YAML
//! description and optionally releases it:
//!
//! ```yaml
//! document_no: H1
//! customer: C10000
//! start: 2024-01-01
//! end: 2024-12-31
//! description: Annual renewal
//! lines:
//!   - application: 0e9d8c7b-6a5f-4e3d-8c2b-1a0f9e8d7c6b
//!     features: BASIC,REPORTS
//!     quantity: 25
//!   - comment: Pricing per master agreement
//! release: true
//! released_by: alice
//! ```

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Args, Subcommand};
use licensor_core::{temporal::format_date, ApplicationId, DocumentNo};
use licensor_engine::{CancellationFlag, GenerationReport, LicenseEngine, ReleaseReport};
use licensor_state::{LineType, NewLine};
use serde::Deserialize;

use crate::{read_text, Session};

/// Arguments for `licensor document`.
#[derive(Args, Debug)]
pub struct DocumentArgs {
    #[command(subcommand)]
    pub command: DocumentCommand,
}

/// Document subcommands.
#[derive(Subcommand, Debug)]
pub enum DocumentCommand {
    /// Create and optionally release a document from YAML.
    Apply {
        /// Document description file.
        file: PathBuf,
    },

    /// Create an open document.
    Create {
        /// Document number; assigned from the configured prefix if omitted.
        #[arg(long)]
        no: Option<String>,
        /// Customer identifier.
        #[arg(long)]
        customer: Option<String>,
        /// First licensed day.
        #[arg(long, requires = "end")]
        start: Option<NaiveDate>,
        /// Last licensed day.
        #[arg(long, requires = "start")]
        end: Option<NaiveDate>,
    },

    /// Add an application line.
    AddLine {
        /// Document number.
        #[arg(long)]
        no: String,
        /// Application identifier.
        #[arg(long)]
        application: String,
        /// Licensed features, comma separated.
        #[arg(long, default_value = "")]
        features: String,
        /// Seats or units.
        #[arg(long, default_value_t = 1)]
        quantity: u32,
    },

    /// Add a comment line.
    AddComment {
        /// Document number.
        #[arg(long)]
        no: String,
        /// Comment text.
        #[arg(long)]
        text: String,
    },

    /// Delete a line from an open document.
    DeleteLine {
        /// Document number.
        #[arg(long)]
        no: String,
        /// Line number.
        #[arg(long)]
        line: u32,
    },

    /// Assign the customer of an open document.
    SetCustomer {
        /// Document number.
        #[arg(long)]
        no: String,
        /// Customer identifier.
        #[arg(long)]
        customer: String,
    },

    /// Release a document, generating licenses.
    Release {
        /// Document number.
        #[arg(long)]
        no: String,
        /// Releasing user.
        #[arg(long)]
        by: Option<String>,
    },

    /// Generate licenses for lines that have none.
    Generate {
        /// Document number.
        #[arg(long)]
        no: String,
    },

    /// Issue a replacement license for one line.
    RegenerateLine {
        /// Document number.
        #[arg(long)]
        no: String,
        /// Line number.
        #[arg(long)]
        line: u32,
    },

    /// Return a released document to open.
    Reopen {
        /// Document number.
        #[arg(long)]
        no: String,
    },

    /// Mark a released document expired.
    Expire {
        /// Document number.
        #[arg(long)]
        no: String,
    },

    /// Archive a released or expired document.
    Archive {
        /// Document number.
        #[arg(long)]
        no: String,
    },

    /// Delete an open document.
    Delete {
        /// Document number.
        #[arg(long)]
        no: String,
    },

    /// Expire released documents whose end date has passed.
    ExpireOverdue,

    /// Show a document and its lines.
    Show {
        /// Document number.
        #[arg(long)]
        no: String,
    },

    /// List documents.
    List,
}

/// YAML form accepted by `apply`.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DocumentSpec {
    /// Document number; assigned if absent.
    #[serde(default)]
    pub document_no: Option<String>,
    /// Customer identifier.
    pub customer: String,
    /// First licensed day.
    #[serde(default)]
    pub start: Option<NaiveDate>,
    /// Last licensed day.
    #[serde(default)]
    pub end: Option<NaiveDate>,
    /// Free text.
    #[serde(default)]
    pub description: String,
    /// Caller's reference.
    #[serde(default)]
    pub external_reference: String,
    /// Lines in order.
    #[serde(default)]
    pub lines: Vec<LineSpec>,
    /// Release after building.
    #[serde(default)]
    pub release: bool,
    /// Releasing user.
    #[serde(default)]
    pub released_by: Option<String>,
}

/// One line of a [`DocumentSpec`].
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum LineSpec {
    /// Application line.
    Application {
        /// Application identifier.
        application: String,
        /// Licensed features.
        #[serde(default)]
        features: String,
        /// Seats or units.
        #[serde(default = "one")]
        quantity: u32,
        /// Free text.
        #[serde(default)]
        description: String,
    },
    /// Comment line.
    Comment {
        /// Text.
        comment: String,
    },
}

fn one() -> u32 {
    1
}

impl LineSpec {
    fn to_new_line(&self) -> Result<NewLine> {
        Ok(match self {
            Self::Application {
                application,
                features,
                quantity,
                description,
            } => NewLine {
                quantity: *quantity,
                description: description.clone(),
                ..NewLine::application(ApplicationId::parse(application)?, features.clone())
            },
            Self::Comment { comment } => NewLine::comment(comment.clone()),
        })
    }
}

/// Execute a document subcommand.
pub fn run_document(args: &DocumentArgs, session: &Session) -> Result<u8> {
    let mut engine = session.engine()?;
    let code = match &args.command {
        DocumentCommand::Apply { file } => {
            let spec: DocumentSpec = serde_yaml::from_str(&read_text(file)?)
                .with_context(|| format!("invalid document file {}", file.display()))?;
            apply(&mut engine, &spec)?
        }
        DocumentCommand::Create {
            no,
            customer,
            start,
            end,
        } => {
            let no = no.as_deref().map(DocumentNo::new).transpose()?;
            let window = (*start).zip(*end);
            let no = engine.create_document(no, window)?;
            if let Some(customer) = customer {
                engine.set_customer(&no, customer)?;
            }
            println!("Created document {no}");
            0
        }
        DocumentCommand::AddLine {
            no,
            application,
            features,
            quantity,
        } => {
            let no = DocumentNo::new(no.as_str())?;
            let line = NewLine {
                quantity: *quantity,
                ..NewLine::application(ApplicationId::parse(application)?, features.clone())
            };
            let line_no = engine.add_line(&no, line)?;
            println!("Added line {no}/{line_no}");
            0
        }
        DocumentCommand::AddComment { no, text } => {
            let no = DocumentNo::new(no.as_str())?;
            let line_no = engine.add_line(&no, NewLine::comment(text.clone()))?;
            println!("Added comment {no}/{line_no}");
            0
        }
        DocumentCommand::DeleteLine { no, line } => {
            let no = DocumentNo::new(no.as_str())?;
            engine.delete_line(&no, *line)?;
            println!("Deleted line {no}/{line}");
            0
        }
        DocumentCommand::SetCustomer { no, customer } => {
            let no = DocumentNo::new(no.as_str())?;
            engine.set_customer(&no, customer)?;
            println!("Customer of {no}: {customer}");
            0
        }
        DocumentCommand::Release { no, by } => {
            let no = DocumentNo::new(no.as_str())?;
            let report = engine.release(&no, by.clone())?;
            print_release(&report)
        }
        DocumentCommand::Generate { no } => {
            let no = DocumentNo::new(no.as_str())?;
            let report = engine.generate_document(&no, &CancellationFlag::new())?;
            print_generation(&report)
        }
        DocumentCommand::RegenerateLine { no, line } => {
            let no = DocumentNo::new(no.as_str())?;
            let license_id = engine.regenerate_line(&no, *line)?;
            println!("  line {line}: license {license_id}");
            0
        }
        DocumentCommand::Reopen { no } => {
            let no = DocumentNo::new(no.as_str())?;
            engine.reopen(&no, None)?;
            println!("Reopened {no}");
            0
        }
        DocumentCommand::Expire { no } => {
            let no = DocumentNo::new(no.as_str())?;
            engine.expire(&no)?;
            println!("Expired {no}");
            0
        }
        DocumentCommand::Archive { no } => {
            let no = DocumentNo::new(no.as_str())?;
            engine.archive(&no, None)?;
            println!("Archived {no}");
            0
        }
        DocumentCommand::Delete { no } => {
            let no = DocumentNo::new(no.as_str())?;
            engine.delete_document(&no)?;
            println!("Deleted {no}");
            0
        }
        DocumentCommand::ExpireOverdue => {
            let expired = engine.expire_overdue();
            for no in &expired {
                println!("Expired {no}");
            }
            println!("{} document(s) expired", expired.len());
            0
        }
        DocumentCommand::Show { no } => {
            show(&engine, &DocumentNo::new(no.as_str())?)?;
            return Ok(0);
        }
        DocumentCommand::List => {
            if engine.documents().is_empty() {
                println!("No documents.");
            }
            for (no, doc) in engine.documents() {
                println!(
                    "{:<20} {:<9} {} .. {}  {}",
                    no.as_str(),
                    doc.status().as_str(),
                    format_date(doc.start_date()),
                    format_date(doc.end_date()),
                    doc.customer_name()
                );
            }
            return Ok(0);
        }
    };
    session.save(&engine)?;
    Ok(code)
}

/// Build a document from `spec`; release it when asked.
pub fn apply(engine: &mut LicenseEngine, spec: &DocumentSpec) -> Result<u8> {
    let no = spec.document_no.as_deref().map(DocumentNo::new).transpose()?;
    let window = match (spec.start, spec.end) {
        (Some(start), Some(end)) => Some((start, end)),
        (None, None) => None,
        _ => bail!("start and end must be given together"),
    };
    let no = engine.create_document(no, window)?;
    engine.set_customer(&no, &spec.customer)?;
    engine.set_description(&no, spec.description.clone())?;
    engine.set_external_reference(&no, spec.external_reference.clone())?;
    for line in &spec.lines {
        let line_no = engine
            .add_line(&no, line.to_new_line()?)
            .with_context(|| format!("cannot add line to {no}"))?;
        tracing::debug!(document_no = %no, line_no, "applied line");
    }
    println!("Created document {no} with {} line(s)", spec.lines.len());

    if !spec.release {
        return Ok(0);
    }
    let report = engine.release(&no, spec.released_by.clone())?;
    Ok(print_release(&report))
}

fn print_release(report: &ReleaseReport) -> u8 {
    println!("Released {}", report.document_no);
    match &report.generation {
        Some(generation) => print_generation(generation),
        None => {
            println!("  Generation deferred");
            0
        }
    }
}

fn print_generation(report: &GenerationReport) -> u8 {
    for (line_no, license_id) in &report.generated {
        println!("  line {line_no}: license {license_id}");
    }
    for failure in &report.failed {
        println!("  line {}: FAILED {}", failure.line_no, failure.error);
    }
    for line_no in &report.skipped {
        println!("  line {line_no}: skipped");
    }
    println!(
        "  {} generated, {} failed, {} skipped",
        report.generated.len(),
        report.failed.len(),
        report.skipped.len()
    );
    if report.is_complete() {
        0
    } else {
        2
    }
}

fn show(engine: &LicenseEngine, no: &DocumentNo) -> Result<()> {
    let doc = engine.document(no)?;
    println!("Document: {no}");
    println!("  Status: {}", doc.status());
    println!(
        "  Customer: {} ({})",
        doc.customer_name(),
        doc.customer_id().unwrap_or("-")
    );
    println!(
        "  Window: {} .. {}",
        format_date(doc.start_date()),
        format_date(doc.end_date())
    );
    if let Some(at) = doc.released_at() {
        println!("  Released: {at} by {}", doc.released_by().unwrap_or("-"));
    }
    if !doc.description.is_empty() {
        println!("  Description: {}", doc.description);
    }
    if !doc.external_reference.is_empty() {
        println!("  Reference: {}", doc.external_reference);
    }
    for line in doc.lines() {
        match line.line_type {
            LineType::Application => println!(
                "  {:>6} app={} features={} qty={} license={} status={}",
                line.line_no,
                line.application_id.map(|a| a.to_string()).unwrap_or_default(),
                line.licensed_features,
                line.quantity,
                line.license_id.map(|l| l.to_string()).unwrap_or_else(|| "-".to_string()),
                line.license_status.map(|s| s.as_str()).unwrap_or("-"),
            ),
            LineType::Comment => println!("  {:>6} # {}", line.line_no, line.description),
        }
    }
    for t in doc.transitions() {
        println!("  {} -> {} at {}", t.from_state, t.to_state, t.timestamp);
    }
    Ok(())
}
