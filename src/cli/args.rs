use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::types::ConflictStrategy;

#[derive(Parser, Debug)]
#[command(name = "fileshare", version, about = "Peer-to-peer file transfer over TCP")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v for verbose, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode: suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Receive files from other peers until interrupted
    Listen(ListenArgs),

    /// Send one or more files to a listening peer
    Send(SendArgs),

    /// View transfer history
    History(HistoryArgs),

    /// Generate a random shared key (base64)
    Keygen,

    /// Generate shell completions
    Completions(CompletionsArgs),
}

/// Key material shared by `listen` and `send`.
#[derive(clap::Args, Debug, Default)]
pub struct KeyArgs {
    /// Pre-shared key, base64 (see `fileshare keygen`)
    #[arg(long, conflicts_with = "passphrase")]
    pub key: Option<String>,

    /// Derive the shared key from a passphrase
    #[arg(long)]
    pub passphrase: Option<String>,
}

/// Arguments for the `fileshare listen` command.
#[derive(clap::Args, Debug)]
pub struct ListenArgs {
    /// Interface to bind (default from config: 0.0.0.0)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to listen on (default from config: 5000)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Directory to save received files
    #[arg(short = 'd', long)]
    pub download_dir: Option<PathBuf>,

    /// Accept only these extensions (can be repeated, e.g. --allow txt --allow .pdf)
    #[arg(long, action = clap::ArgAction::Append)]
    pub allow: Vec<String>,

    #[command(flatten)]
    pub key: KeyArgs,

    /// Refuse files that are not encrypted
    #[arg(long)]
    pub require_encryption: bool,

    /// What to do when a received file already exists: overwrite, rename
    #[arg(long, value_enum)]
    pub on_conflict: Option<ConflictStrategy>,
}

/// Arguments for the `fileshare send` command.
#[derive(clap::Args, Debug)]
pub struct SendArgs {
    /// Recipient (host, host:port or [ipv6]:port)
    pub recipient: String,

    /// Files to send
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Send without encryption
    #[arg(long)]
    pub no_encrypt: bool,

    #[command(flatten)]
    pub key: KeyArgs,

    /// Send only these extensions (can be repeated)
    #[arg(long, action = clap::ArgAction::Append)]
    pub allow: Vec<String>,
}

/// Arguments for the `fileshare history` command.
#[derive(clap::Args, Debug)]
pub struct HistoryArgs {
    /// Maximum number of entries to show
    #[arg(short = 'n', long, default_value = "20")]
    pub count: usize,
    /// Clear all history
    #[arg(long)]
    pub clear: bool,
}

/// Arguments for the `fileshare completions` command.
#[derive(clap::Args, Debug)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: clap_complete::Shell,
}
