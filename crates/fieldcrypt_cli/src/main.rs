//! fieldcrypt CLI
//!
//! Operator tools for the engine state a host keeps in a fieldcrypt
//! [`FileStore`](fieldcrypt_storage::FileStore).
//!
//! # Commands
//!
//! - `status` - Show the encrypted-types registry and the reconciliation queue
//! - `validate` - Check a settings document
//! - `keygen` - Generate or derive a key for the AES-GCM profile
//! - `purge-queue` - Drop every queued reconciliation item

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// fieldcrypt command-line tools.
#[derive(Parser)]
#[command(name = "fieldcrypt")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the engine state directory
    #[arg(global = true, short, long)]
    store: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the encrypted-types registry and pending queue items
    Status {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Check a JSON settings document
    Validate {
        /// Settings document
        config: PathBuf,
    },

    /// Generate a random key, or derive one from a passphrase
    Keygen {
        /// Passphrase to derive the key from
        #[arg(short, long, requires = "salt")]
        passphrase: Option<String>,

        /// Salt for key derivation
        #[arg(long)]
        salt: Option<String>,
    },

    /// Drop every queued reconciliation item
    PurgeQueue {
        /// Confirm the purge
        #[arg(long)]
        yes: bool,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Status { format } => {
            let store = cli.store.ok_or("State directory required for status")?;
            commands::status::run(&store, &format)?;
        }
        Commands::Validate { config } => {
            commands::validate::run(&config)?;
        }
        Commands::Keygen { passphrase, salt } => {
            commands::keygen::run(passphrase.as_deref(), salt.as_deref())?;
        }
        Commands::PurgeQueue { yes } => {
            let store = cli.store.ok_or("State directory required for purge-queue")?;
            commands::status::purge_queue(&store, yes)?;
        }
        Commands::Version => {
            println!("fieldcrypt CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("fieldcrypt core v{}", fieldcrypt_core::VERSION);
        }
    }

    Ok(())
}
