mod commands;
mod config;
mod progress;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{
    backup::BackupCommand, init::InitCommand, restore::RestoreCommand, snapshots::SnapshotsCommand,
};
use config::Config;
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(
    name = "veilsnap",
    about = "Encrypted, deduplicating directory backups",
    long_about = "Veilsnap snapshots a directory into an object store as encrypted pieces. \
                  Unchanged files are carried over between snapshots without re-upload, and \
                  the store never sees a plaintext name or byte."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, env = "VEILSNAP_CONFIG", help = "Config file path")]
    config: Option<PathBuf>,

    #[arg(short, long, help = "Enable verbose output")]
    verbose: bool,

    #[arg(short, long, help = "Enable quiet mode")]
    quiet: bool,
}

impl Cli {
    fn config_path(&self) -> Result<PathBuf> {
        match &self.config {
            Some(path) => Ok(path.clone()),
            None => Config::default_path(),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Create a config file by answering a few questions")]
    Init(InitCommand),

    #[command(about = "Snapshot the configured directory into the store")]
    Backup(BackupCommand),

    #[command(about = "List snapshots")]
    Snapshots(SnapshotsCommand),

    #[command(about = "Browse a snapshot and restore files from it")]
    Restore(RestoreCommand),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.verbose, cli.quiet);

    match cli.command {
        Commands::Init(ref cmd) => cmd.run(&cli).await,
        Commands::Backup(ref cmd) => cmd.run(&cli).await,
        Commands::Snapshots(ref cmd) => cmd.run(&cli).await,
        Commands::Restore(ref cmd) => cmd.run(&cli).await,
    }
}

fn init_tracing(verbose: bool, quiet: bool) {
    let level = if quiet {
        "warn"
    } else if verbose {
        "debug"
    } else {
        "info"
    };

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::new(format!("veilsnap={}", level)))
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .expect("Setting default subscriber failed");
}
