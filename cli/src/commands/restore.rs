use crate::commands::{Session, ensure_root, format_bytes};
use crate::config::Config;
use crate::progress::TransferBar;
use anyhow::{Result, anyhow};
use clap::Args;
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use veilsnap_core::{FileRecord, FileTree, NodeId, RestoreNavigator, Snapshot};

#[derive(Args)]
pub struct RestoreCommand {
    #[arg(long, help = "Snapshot index from `snapshots` (defaults to the most recent)")]
    snapshot: Option<usize>,

    #[arg(long, help = "Write restored files here instead of the configured path")]
    target: Option<PathBuf>,

    #[arg(long, help = "Restore this file or directory non-interactively and exit")]
    path: Option<String>,
}

impl RestoreCommand {
    pub async fn run(&self, cli: &crate::Cli) -> Result<()> {
        let config_path = cli.config_path()?;
        let mut config = Config::load(&config_path)?;
        let session = Session::open(&config)?;
        let root = ensure_root(&session, &mut config, &config_path).await?;

        let snapshots = session.orchestrator.list_snapshots(&root).await?;
        if snapshots.is_empty() {
            return Err(anyhow!("No snapshots found"));
        }
        let mut snapshot = self.pick_snapshot(&session, snapshots).await?;

        println!(
            "Restoring from the snapshot of {} taken {}",
            snapshot.source.display(),
            snapshot.created_at().format("%Y-%m-%d %H:%M:%S")
        );

        let files = snapshot
            .files_map(session.orchestrator.manifests())
            .await?
            .ok_or_else(|| anyhow!("Snapshot has no manifest; pick another with --snapshot"))?
            .clone();

        let dest = self
            .target
            .clone()
            .unwrap_or_else(|| config.restore_path.clone());
        let navigator = RestoreNavigator::new(session.transfer());
        let tree = RestoreNavigator::build_tree(&files);

        if let Some(path) = &self.path {
            let node = find_node(&tree, path)
                .ok_or_else(|| anyhow!("No entry named {} in this snapshot", path))?;
            restore_node(&navigator, &files, &tree, node, &dest).await?;
            println!("Restored into {}", dest.display());
            return Ok(());
        }

        self.browse(&navigator, &files, &tree, &dest).await
    }

    async fn pick_snapshot(&self, session: &Session, snapshots: Vec<Snapshot>) -> Result<Snapshot> {
        match self.snapshot {
            Some(index) => {
                let mut snapshots = snapshots;
                if index >= snapshots.len() {
                    return Err(anyhow!(
                        "No snapshot with index {} (have {})",
                        index,
                        snapshots.len()
                    ));
                }
                Ok(snapshots.swap_remove(index))
            }
            None => {
                for mut snapshot in snapshots {
                    if snapshot
                        .has_usable_manifest(session.orchestrator.manifests())
                        .await?
                    {
                        return Ok(snapshot);
                    }
                }
                Err(anyhow!("No snapshot with a readable manifest"))
            }
        }
    }

    /// Numbered-menu walk of the snapshot's file tree.
    async fn browse(
        &self,
        navigator: &RestoreNavigator,
        files: &HashMap<String, FileRecord>,
        tree: &FileTree,
        dest: &Path,
    ) -> Result<()> {
        let mut current = tree.root();
        loop {
            let children = tree.children(current).to_vec();
            let here = tree.full_path(current);
            println!();
            println!("{}/", if here.is_empty() { "." } else { here.as_str() });
            for (i, &child) in children.iter().enumerate() {
                let node = tree.node(child);
                if node.is_dir {
                    println!(
                        "  [{}] {}/ ({})",
                        i,
                        node.name,
                        format_bytes(tree.subtree_size(child, files))
                    );
                } else {
                    let size = files
                        .get(&tree.full_path(child))
                        .map(|r| r.total_size)
                        .unwrap_or(0);
                    println!("  [{}] {} ({})", i, node.name, format_bytes(size));
                }
            }
            println!("  [a] restore everything under this directory");
            if tree.node(current).parent.is_some() {
                println!("  [u] up one directory");
            }
            println!("  [q] quit");
            print!("> ");
            io::stdout().flush()?;

            let mut line = String::new();
            if io::stdin().read_line(&mut line)? == 0 {
                break;
            }
            let choice = line.trim();
            match choice {
                "q" => break,
                "a" => {
                    restore_node(navigator, files, tree, current, dest).await?;
                    println!("Restored into {}", dest.display());
                }
                "u" => {
                    if let Some(parent) = tree.node(current).parent {
                        current = parent;
                    }
                }
                _ => match choice.parse::<usize>() {
                    Ok(i) if i < children.len() => {
                        let child = children[i];
                        if tree.node(child).is_dir {
                            current = child;
                        } else {
                            restore_node(navigator, files, tree, child, dest).await?;
                            println!("Restored into {}", dest.display());
                        }
                    }
                    _ => println!("Unrecognized choice: {}", choice),
                },
            }
        }
        Ok(())
    }
}

async fn restore_node(
    navigator: &RestoreNavigator,
    files: &HashMap<String, FileRecord>,
    tree: &FileTree,
    node: NodeId,
    dest: &Path,
) -> Result<()> {
    let bar = TransferBar::new("Downloading");
    if tree.node(node).is_dir {
        navigator
            .download_subtree(files, tree, node, dest, &bar)
            .await?;
    } else {
        navigator.download_file(files, tree, node, dest, &bar).await?;
    }
    bar.finish("Downloaded");
    Ok(())
}

/// Descends the tree along a '/'-separated manifest path.
fn find_node(tree: &FileTree, path: &str) -> Option<NodeId> {
    let mut current = tree.root();
    for segment in path.split('/').filter(|s| !s.is_empty() && *s != ".") {
        current = *tree
            .children(current)
            .iter()
            .find(|&&c| tree.node(c).name == segment)?;
    }
    Some(current)
}
