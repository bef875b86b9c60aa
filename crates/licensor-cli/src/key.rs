//! # Key Subcommand
//!
//! Key lifecycle against the data directory's key store.
//!
//! - `generate` — new Ed25519 key pair.
//! - `create-cert` — new key pair sealed into a password-protected
//!   certificate bundle file (not imported).
//! - `import-cert` — import a certificate bundle with its private key.
//! - `import-pub` — register an exported public key for verification.
//! - `export` — render a key's public block.
//! - `deactivate`, `delete`, `default`, `list`.
//!
//! Certificate passwords are read from an environment variable, never argv.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Args, Subcommand, ValueEnum};
use licensor_core::{temporal::format_date, KeyId};
use licensor_crypto::key_store::key_thumbprint;
use licensor_crypto::{CertificateBundle, CertificateSubject, Ed25519KeyPair, KdfParams, KeyType};

use crate::{emit, read_text, Session};

/// Default variable holding certificate passwords.
pub const PASSWORD_ENV: &str = "LICENSOR_CERT_PASSWORD";

/// Arguments for `licensor key`.
#[derive(Args, Debug)]
pub struct KeyArgs {
    #[command(subcommand)]
    pub command: KeyCommand,
}

/// Generatable key roles.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum KeyRole {
    /// Signs licenses.
    Signing,
    /// Verifies only.
    Validation,
    /// Root key, never selected for signing.
    Master,
}

impl From<KeyRole> for KeyType {
    fn from(role: KeyRole) -> Self {
        match role {
            KeyRole::Signing => KeyType::Signing,
            KeyRole::Validation => KeyType::Validation,
            KeyRole::Master => KeyType::Master,
        }
    }
}

/// Key subcommands.
#[derive(Subcommand, Debug)]
pub enum KeyCommand {
    /// Generate an Ed25519 key pair.
    Generate {
        /// Key identifier.
        #[arg(long)]
        id: String,
        /// Key role.
        #[arg(long = "type", value_enum, default_value = "signing")]
        key_type: KeyRole,
        /// Expiry date (YYYY-MM-DD); the key is unusable from this day on.
        #[arg(long)]
        expires: Option<NaiveDate>,
        /// Make this the default signing key.
        #[arg(long)]
        default: bool,
    },

    /// Create a password-protected certificate bundle file.
    CreateCert {
        /// Subject name.
        #[arg(long)]
        subject: String,
        /// Issuer name; defaults to the subject.
        #[arg(long)]
        issuer: Option<String>,
        /// Display name.
        #[arg(long, default_value = "")]
        friendly_name: String,
        /// Last valid day.
        #[arg(long)]
        not_after: Option<NaiveDate>,
        /// Variable holding the password.
        #[arg(long, default_value = PASSWORD_ENV)]
        password_env: String,
        /// Output file.
        #[arg(long)]
        out: PathBuf,
    },

    /// Import a certificate bundle including its private key.
    ImportCert {
        /// Bundle file.
        file: PathBuf,
        /// Key identifier; defaults to one derived from the thumbprint.
        #[arg(long)]
        id: Option<String>,
        /// Variable holding the password.
        #[arg(long, default_value = PASSWORD_ENV)]
        password_env: String,
    },

    /// Register an exported public key.
    ImportPub {
        /// Public key block file.
        file: PathBuf,
        /// Key identifier; defaults to the one in the block.
        #[arg(long)]
        id: Option<String>,
    },

    /// Print a key's public block.
    Export {
        /// Key identifier.
        #[arg(long)]
        id: String,
        /// Output file.
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Deactivate a key. Licenses it signed still verify.
    Deactivate {
        /// Key identifier.
        #[arg(long)]
        id: String,
    },

    /// Delete a key that never signed anything.
    Delete {
        /// Key identifier.
        #[arg(long)]
        id: String,
    },

    /// Set or clear the default signing key.
    Default {
        /// Key identifier; omit to clear.
        #[arg(long)]
        id: Option<String>,
    },

    /// List keys.
    List,
}

/// Execute a key subcommand.
pub fn run_key(args: &KeyArgs, session: &Session) -> Result<u8> {
    match &args.command {
        KeyCommand::CreateCert {
            subject,
            issuer,
            friendly_name,
            not_after,
            password_env,
            out,
        } => {
            let password = read_password(password_env)?;
            let meta = CertificateSubject {
                subject: subject.clone(),
                issuer: issuer.clone().unwrap_or_else(|| subject.clone()),
                friendly_name: friendly_name.clone(),
                not_after: *not_after,
            };
            let pair = Ed25519KeyPair::generate();
            let bundle = CertificateBundle::seal(meta, &pair, &password, KdfParams::default())?;
            emit(&bundle.render(), Some(out))?;
            println!("Certificate {} written to {}", bundle.thumbprint(), out.display());
            return Ok(0);
        }
        KeyCommand::List => return cmd_list(session),
        _ => {}
    }

    let mut engine = session.engine()?;
    let now = engine.now();
    let code = match &args.command {
        KeyCommand::Generate {
            id,
            key_type,
            expires,
            default,
        } => {
            let key_id = KeyId::new(id.as_str())?;
            let key = engine
                .keys_mut()
                .generate_key_pair(key_id.clone(), (*key_type).into(), *expires, now)?;
            println!("Generated {} key {}", key.key_type, key.key_id);
            println!("  Thumbprint: {}", key_thumbprint(key));
            if *default {
                engine.keys_mut().set_default_signing_key(Some(key_id))?;
                println!("  Default signing key");
            }
            0
        }
        KeyCommand::ImportCert {
            file,
            id,
            password_env,
        } => {
            let material = read_text(file)?;
            let password = read_password(password_env)?;
            let key_id = id.as_deref().map(KeyId::new).transpose()?;
            let key_id = engine
                .keys_mut()
                .import_certificate(&material, &password, key_id, now)
                .with_context(|| format!("cannot import {}", file.display()))?;
            println!("Imported certificate as {key_id}");
            0
        }
        KeyCommand::ImportPub { file, id } => {
            let block = read_text(file)?;
            let key_id = id.as_deref().map(KeyId::new).transpose()?;
            let key_id = engine.keys_mut().import_public_key(&block, key_id, now)?;
            println!("Imported public key as {key_id}");
            0
        }
        KeyCommand::Export { id, out } => {
            let block = engine.keys().export_public_key(&KeyId::new(id.as_str())?)?;
            emit(&block, out.as_deref())?;
            return Ok(0);
        }
        KeyCommand::Deactivate { id } => {
            engine.keys_mut().deactivate_key(&KeyId::new(id.as_str())?, now)?;
            println!("Deactivated {id}");
            0
        }
        KeyCommand::Delete { id } => {
            engine.keys_mut().delete_key(&KeyId::new(id.as_str())?)?;
            println!("Deleted {id}");
            0
        }
        KeyCommand::Default { id } => {
            let key_id = id.as_deref().map(KeyId::new).transpose()?;
            engine.keys_mut().set_default_signing_key(key_id)?;
            match id {
                Some(id) => println!("Default signing key: {id}"),
                None => println!("Default signing key cleared"),
            }
            0
        }
        KeyCommand::CreateCert { .. } | KeyCommand::List => 0,
    };
    session.save(&engine)?;
    Ok(code)
}

fn cmd_list(session: &Session) -> Result<u8> {
    let engine = session.engine()?;
    let records = engine.keys().records();
    if records.is_empty() {
        println!("No keys.");
        return Ok(0);
    }
    let today = engine.today();
    let selected = engine.signing_key_for_today();
    for key in records.iter() {
        let mut flags = Vec::new();
        if !key.active {
            flags.push("inactive".to_string());
        }
        if key.is_expired(today) {
            flags.push("expired".to_string());
        }
        if records.default_signing_key() == Some(&key.key_id) {
            flags.push("default".to_string());
        }
        if selected.as_ref() == Some(&key.key_id) {
            flags.push("selected".to_string());
        }
        if key.secret.is_none() {
            flags.push("public-only".to_string());
        }
        println!(
            "{:<24} {:<11} expires={:<10} used={:<5} {}",
            key.key_id.as_str(),
            key.key_type.as_str(),
            key.expires.map(format_date).unwrap_or_else(|| "-".to_string()),
            key.usage_count,
            flags.join(",")
        );
    }
    Ok(0)
}

fn read_password(var: &str) -> Result<String> {
    match std::env::var(var) {
        Ok(p) if !p.is_empty() => Ok(p),
        _ => bail!("certificate password expected in ${var}"),
    }
}
