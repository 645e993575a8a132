use crate::commands::{Session, ensure_root, format_bytes};
use crate::config::Config;
use anyhow::Result;
use clap::Args;

#[derive(Args)]
pub struct SnapshotsCommand {
    #[arg(long, help = "Show latest N snapshots")]
    latest: Option<usize>,
}

impl SnapshotsCommand {
    pub async fn run(&self, cli: &crate::Cli) -> Result<()> {
        let config_path = cli.config_path()?;
        let mut config = Config::load(&config_path)?;
        let session = Session::open(&config)?;
        let root = ensure_root(&session, &mut config, &config_path).await?;

        let mut snapshots = session.orchestrator.list_snapshots(&root).await?;
        if let Some(latest) = self.latest {
            snapshots.truncate(latest);
        }

        if snapshots.is_empty() {
            println!("No snapshots found");
            return Ok(());
        }

        println!("{:<5} {:<20} {:<40} {:>12}", "#", "Date", "Source", "Stored");
        println!("{:-<80}", "");

        for (index, snapshot) in snapshots.iter_mut().enumerate() {
            // A snapshot whose manifest is missing or unreadable still
            // lists; its size column just stays empty.
            let stored = match snapshot.stored_size(session.orchestrator.manifests()).await {
                Ok(Some(bytes)) => format_bytes(bytes),
                _ => "-".to_string(),
            };
            println!(
                "{:<5} {:<20} {:<40} {:>12}",
                index,
                snapshot.created_at().format("%Y-%m-%d %H:%M:%S"),
                snapshot.source.display(),
                stored
            );
        }

        Ok(())
    }
}
