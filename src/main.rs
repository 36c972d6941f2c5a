//! CloudVault - CLI
//!
//! Command-line interface over a SQLite-backed vault.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use cloud_vault::record::format_bytes;
use cloud_vault::{CloudVault, Decision, SqliteStore, VaultConfig, VaultError};

#[derive(Parser)]
#[command(name = "cloudvault")]
#[command(version = cloud_vault::VERSION)]
#[command(about = "CloudVault - encrypted personal file vault with rotating keys")]
struct Cli {
    /// Configuration file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Database path; overrides the configuration
    #[arg(long)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an account
    Register {
        id: String,
        /// Display name shown to token holders
        #[arg(short, long)]
        username: Option<String>,
    },

    /// Start a new session (rotates the session salt and the token)
    Login { id: String },

    /// Show the current token and when it expires
    Token { id: String },

    /// Encrypt and store a file
    Upload {
        id: String,
        path: PathBuf,
        /// Media type recorded with the file
        #[arg(short = 't', long = "type", default_value = "application/octet-stream")]
        media_type: String,
    },

    /// Decrypt a file to disk
    Download {
        id: String,
        file_id: String,
        output: PathBuf,
    },

    /// List files
    List { id: String },

    /// Delete a file
    Delete { id: String, file_id: String },

    /// Browse someone's public files with their token
    Shared { token: String },

    /// Ask for access to a shared file
    Request { token: String, file_id: String },

    /// Approve an access request
    Approve { id: String, request_id: String },

    /// Deny an access request
    Deny { id: String, request_id: String },

    /// List access requests against your files
    Requests {
        id: String,
        /// Only pending requests
        #[arg(long)]
        pending: bool,
    },

    /// Show who looked up your shared listing
    AccessLog { id: String },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        // Vault errors carry a user-facing message; everything else prints its chain
        match e.downcast_ref::<VaultError>() {
            Some(vault_err) => eprintln!("Error: {}", vault_err.user_message()),
            None => eprintln!("Error: {:#}", e),
        }
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let mut config = VaultConfig::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(db) = cli.db {
        config.db_path = db;
    }

    let store = SqliteStore::open(&config.db_path)
        .with_context(|| format!("opening database {}", config.db_path.display()))?;
    let vault = CloudVault::new(Arc::new(store), &config)?;

    match cli.command {
        Commands::Register { id, username } => {
            let identity = vault.register(&id, username.as_deref())?;
            println!("✅ Registered {} ({})", identity.id, identity.display_name());
            println!("🔑 Token: {}", vault.current_token(&id)?);
        }

        Commands::Login { id } => {
            vault.login(&id)?;
            println!("🔄 New session started");
            println!("🔑 Token: {}", vault.current_token(&id)?);
        }

        Commands::Token { id } => {
            let status = vault.rotation_status(&id)?;
            println!("🔑 Token:  {}", status.token);
            println!("   Policy: {}", status.policy);
            match (status.valid_until, status.seconds_remaining) {
                (Some(until), Some(secs)) => {
                    println!("   Valid until {} ({}m left)", until.to_rfc3339(), secs / 60)
                }
                _ => println!("   Valid until your next login"),
            }
        }

        Commands::Upload { id, path, media_type } => {
            let content =
                std::fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
            let name = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("unnamed")
                .to_string();

            let record = vault.upload(&id, &name, &media_type, &content, None)?;
            println!("✅ Uploaded {} with ID: {}", record.name, record.id);
        }

        Commands::Download { id, file_id, output } => {
            let content = vault.download(&id, &file_id)?;
            std::fs::write(&output, content.data())
                .with_context(|| format!("writing {}", output.display()))?;
            println!("✅ Saved {} ({}) to {}", file_id, content.media_type(), output.display());
        }

        Commands::List { id } => {
            let files = vault.list(&id)?;
            if files.is_empty() {
                println!("📭 No files in vault");
            } else {
                println!("📁 Files ({}):", files.len());
                println!("{:-<72}", "");
                for file in files {
                    let lock = if file.is_encrypted() { "🔒" } else { "  " };
                    println!(
                        "{} {} - {} ({}, {})",
                        lock,
                        file.id,
                        file.name,
                        file.media_type,
                        format_bytes(file.size, 2)
                    );
                }
            }
        }

        Commands::Delete { id, file_id } => {
            vault.delete(&id, &file_id)?;
            println!("🗑️ Deleted {}", file_id);
        }

        Commands::Shared { token } => {
            let listing = vault.shared_files(&token)?;
            println!("📂 Shared by {} ({} files)", listing.owner, listing.files.len());
            for file in listing.files {
                println!("   {} - {} ({})", file.id, file.name, format_bytes(file.size, 2));
            }
        }

        Commands::Request { token, file_id } => {
            let request = vault.request_access(&token, &file_id)?;
            println!("📨 Request {} is {}", request.id, request.status);
        }

        Commands::Approve { id, request_id } => {
            let request = vault.decide(&id, &request_id, Decision::Approve)?;
            println!("✅ Request {} {}", request.id, request.status);
        }

        Commands::Deny { id, request_id } => {
            let request = vault.decide(&id, &request_id, Decision::Deny)?;
            println!("⛔ Request {} {}", request.id, request.status);
        }

        Commands::Requests { id, pending } => {
            let requests = if pending {
                vault.pending_requests(&id)?
            } else {
                vault.list_requests(&id)?
            };
            if requests.is_empty() {
                println!("📭 No access requests");
            }
            for request in requests {
                println!(
                    "{} {} file={} token={} at {}",
                    request.id,
                    request.status,
                    request.file_id,
                    request.requester_token,
                    request.created_at.to_rfc3339()
                );
            }
        }

        Commands::AccessLog { id } => {
            let entries = vault.access_log(&id)?;
            println!("👁️ Shared listing lookups ({}):", entries.len());
            for entry in entries {
                println!("   {} with key {}", entry.accessed_at.to_rfc3339(), entry.access_key);
            }
        }
    }

    Ok(())
}
