use crate::config::Config;
use anyhow::{Result, anyhow};
use clap::Args;
use std::io::{self, Write};
use std::path::PathBuf;

#[derive(Args)]
pub struct InitCommand {
    #[arg(long, help = "Accept the default answer for every question")]
    defaults: bool,

    #[arg(long, help = "Overwrite an existing config file")]
    force: bool,
}

impl InitCommand {
    pub async fn run(&self, cli: &crate::Cli) -> Result<()> {
        let config_path = cli.config_path()?;
        if config_path.exists() && !self.force {
            return Err(anyhow!(
                "Config already exists at {} (use --force to overwrite)",
                config_path.display()
            ));
        }

        let data_dir = Config::data_dir()?;
        let cwd = std::env::current_dir()?;

        let backup_path = self.ask("Directory to back up", &cwd.display().to_string())?;
        let restore_path = self.ask(
            "Directory to restore into",
            &data_dir.join("restored").display().to_string(),
        )?;
        let store_path = self.ask(
            "Object store directory",
            &data_dir.join("store").display().to_string(),
        )?;
        let key_path = self.ask(
            "Key file (generated on first backup if absent)",
            &data_dir.join("key").display().to_string(),
        )?;

        let config = Config {
            backup_path: PathBuf::from(backup_path),
            restore_path: PathBuf::from(restore_path),
            key_path: PathBuf::from(key_path),
            store_path: PathBuf::from(store_path),
            exclude: Vec::new(),
            size_limit: None,
            root_id: None,
        };
        config.save(&config_path)?;

        println!("Wrote config to {}", config_path.display());
        println!("Edit it to add `exclude` entries or a `size_limit` before your first backup.");
        Ok(())
    }

    fn ask(&self, question: &str, default: &str) -> Result<String> {
        if self.defaults {
            return Ok(default.to_string());
        }
        print!("{} [{}]: ", question, default);
        io::stdout().flush()?;
        let mut line = String::new();
        io::stdin().read_line(&mut line)?;
        let answer = line.trim();
        if answer.is_empty() {
            Ok(default.to_string())
        } else {
            Ok(answer.to_string())
        }
    }
}
