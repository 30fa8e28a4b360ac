//! vaultsync CLI
//!
//! Keeps a vault directory in sync with a directory-backed remote.
//!
//! # Commands
//!
//! - `status` - Show pending operations and the sync checkpoint
//! - `track` - Record a local change in the operation log
//! - `push` - Push pending changes (pulls first)
//! - `pull` - Pull remote changes

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Sync a vault with a remote store.
#[derive(Parser)]
#[command(name = "vaultsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the vault directory
    #[arg(global = true, long)]
    vault: Option<PathBuf>,

    /// Path to the remote store directory
    #[arg(global = true, long)]
    remote: Option<PathBuf>,

    /// Settings file (defaults to `.vaultsync-state.json` in the vault)
    #[arg(global = true, long)]
    state: Option<PathBuf>,

    /// JSON sync configuration file
    #[arg(global = true, long)]
    config: Option<PathBuf>,

    /// How removed entries are disposed of (local-trash, system-trash, permanent)
    #[arg(global = true, long, default_value = "local-trash")]
    trash: String,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show pending operations and the sync checkpoint
    Status {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Record a local change
    Track {
        #[command(subcommand)]
        event: TrackEvent,
    },

    /// Push pending changes, pulling remote changes first
    Push {
        /// List what would be pushed without pushing
        #[arg(short, long)]
        dry_run: bool,

        /// Undo the pending change at this path instead of pushing it
        #[arg(long = "revert")]
        revert: Vec<String>,

        /// Undo every pending change at or below this path
        #[arg(long = "revert-tree")]
        revert_tree: Vec<String>,
    },

    /// Pull remote changes
    Pull,

    /// Show version information
    Version,
}

#[derive(Subcommand)]
enum TrackEvent {
    /// A file or folder was created
    Create {
        /// Vault path
        path: String,
        /// The entry is a folder
        #[arg(long)]
        folder: bool,
    },
    /// A file changed
    Modify {
        /// Vault path
        path: String,
    },
    /// A file or folder was deleted
    Delete {
        /// Vault path
        path: String,
        /// The entry was a folder
        #[arg(long)]
        folder: bool,
    },
    /// An entry moved
    Rename {
        /// Previous vault path
        from: String,
        /// New vault path
        to: String,
        /// The entry is a folder
        #[arg(long)]
        folder: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Commands::Version = cli.command {
        println!("vaultsync CLI v{}", env!("CARGO_PKG_VERSION"));
        println!("vaultsync core v{}", vaultsync_core::VERSION);
        return Ok(());
    }

    let vault = cli.vault.ok_or("--vault is required")?;
    let remote = cli.remote.ok_or("--remote is required")?;
    let session = commands::Session {
        state: cli
            .state
            .unwrap_or_else(|| vault.join(commands::DEFAULT_STATE_FILE)),
        vault,
        remote,
        config: cli.config,
        policy: cli.trash.parse()?,
    };

    match cli.command {
        Commands::Status { format } => commands::status::run(&session, &format)?,
        Commands::Track { event } => {
            let event = match event {
                TrackEvent::Create { path, folder } => commands::track::Change::Create { path, folder },
                TrackEvent::Modify { path } => commands::track::Change::Modify { path },
                TrackEvent::Delete { path, folder } => commands::track::Change::Delete { path, folder },
                TrackEvent::Rename { from, to, folder } => {
                    commands::track::Change::Rename { from, to, folder }
                }
            };
            commands::track::run(&session, event)?;
        }
        Commands::Push {
            dry_run,
            revert,
            revert_tree,
        } => commands::push::run(&session, dry_run, revert, revert_tree).await?,
        Commands::Pull => commands::pull::run(&session).await?,
        Commands::Version => {}
    }

    Ok(())
}
