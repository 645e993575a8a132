use crate::commands::{Session, ensure_root, format_bytes};
use crate::config::Config;
use crate::progress::TransferBar;
use anyhow::{Result, anyhow};
use clap::Args;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};
use veilsnap_core::BackupOptions;

#[derive(Args)]
pub struct BackupCommand {
    #[arg(long, help = "Treat every file as new, skipping the previous-snapshot check")]
    unique: bool,

    #[arg(long, help = "Byte limit for newly uploaded files this run")]
    limit: Option<u64>,

    #[arg(
        long,
        help = "Deduplicate against this snapshot (index from `snapshots`) instead of the most recent one"
    )]
    reuse_from: Option<usize>,

    #[arg(long, help = "Back up this directory instead of the configured one")]
    source: Option<PathBuf>,
}

impl BackupCommand {
    pub async fn run(&self, cli: &crate::Cli) -> Result<()> {
        let config_path = cli.config_path()?;
        let mut config = Config::load(&config_path)?;
        let session = Session::open(&config)?;
        let root = ensure_root(&session, &mut config, &config_path).await?;

        let reuse_from = match self.reuse_from {
            Some(index) => {
                let mut snapshots = session.orchestrator.list_snapshots(&root).await?;
                if index >= snapshots.len() {
                    return Err(anyhow!(
                        "No snapshot with index {} (have {})",
                        index,
                        snapshots.len()
                    ));
                }
                Some(snapshots.swap_remove(index))
            }
            None => None,
        };

        // First interrupt stops queuing new files; the file in flight
        // finishes and the partial manifest is still published.
        let cancel = Arc::new(AtomicBool::new(false));
        {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("interrupt received, finishing the current file");
                    cancel.store(true, Ordering::Relaxed);
                }
            });
        }

        let options = BackupOptions {
            source_dir: self
                .source
                .clone()
                .unwrap_or_else(|| config.backup_path.clone()),
            exclude: config.exclude.clone(),
            size_limit: self.limit.or(config.size_limit),
            force_unique: self.unique,
        };

        info!(source = %options.source_dir.display(), "starting backup");
        let bar = TransferBar::new("Uploading");
        let outcome = session
            .orchestrator
            .run_backup(&root, options, reuse_from, &bar, &cancel)
            .await?;
        bar.finish(if outcome.cancelled {
            "Interrupted"
        } else {
            "Uploaded"
        });

        if outcome.cancelled {
            println!("Backup interrupted - a partial snapshot was still published");
        } else {
            println!("Backup completed successfully!");
        }
        println!(
            "Files: {} ({} carried over from the previous snapshot)",
            outcome.manifest.files.len(),
            outcome.reused_files
        );
        println!("Uploaded: {}", format_bytes(outcome.uploaded_bytes));
        Ok(())
    }
}
