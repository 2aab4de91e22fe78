use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about = "tvdev: time-locked vault CLI (alpha)", long_about = None)]
pub struct Cli {
    /// Settings file (default: $TIMEVAULT_SETTINGS, else the per-user data directory)
    #[arg(long, global = true)]
    pub settings: Option<PathBuf>,

    /// 32-byte hex key for the local engine (default: $TIMEVAULT_ENGINE_KEY, else engine.key)
    #[arg(long = "engine-key", global = true)]
    pub engine_key_hex: Option<String>,

    /// More log output on stderr (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Lock files or directories until a point in time
    Lock {
        /// Sources to lock; each becomes `<vault>/<name>.tlock`
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// `5m`, `2 hours`, `30d`, `1y`, or `YYYY-MM-DD [HH:MM[:SS]]` (local time)
        #[arg(long = "unlock-at", short = 'u')]
        unlock_at: String,

        /// Vault directory (default: first configured vault)
        #[arg(long)]
        vault: Option<PathBuf>,

        /// Remove each original once its locked copy is verified
        #[arg(long)]
        delete_original: bool,

        /// Print progress events on stderr
        #[arg(long)]
        progress: bool,
    },

    /// Unlock an item whose time has come
    Unlock {
        /// `.tlock` file, legacy key file or legacy archive
        path: PathBuf,

        /// Output directory (default: `unlocked_<name>` next to the item)
        #[arg(long, short)]
        output: Option<PathBuf>,

        #[arg(long)]
        progress: bool,
    },

    /// Show the metadata and state of one item
    Info { path: PathBuf },

    /// List items in the configured vaults
    List {
        /// Scan these directories instead
        #[arg(long)]
        vault: Vec<PathBuf>,
    },

    /// Repackage a legacy key file + archive pair as one `.tlock` file
    Migrate {
        /// Legacy key file or archive
        path: PathBuf,

        /// Remove the legacy files after a verified migration
        #[arg(long)]
        delete_old: bool,

        /// Refuse items whose unlock time has not passed
        #[arg(long)]
        require_unlockable: bool,
    },

    #[command(subcommand)]
    /// Manage the configured vault directories
    Vaults(VaultCommands),
}

#[derive(Subcommand)]
pub enum VaultCommands {
    /// Print the configured vault directories
    Show,
    /// Add a vault directory
    Add { dir: String },
    /// Remove a vault directory
    Remove { dir: String },
}
