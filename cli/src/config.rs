use anyhow::{Context, Result, anyhow};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// On-disk configuration, stored as TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory that `backup` snapshots.
    pub backup_path: PathBuf,

    /// Directory that `restore` writes into.
    pub restore_path: PathBuf,

    /// Raw 32-byte key file. Generated on first use if absent.
    pub key_path: PathBuf,

    /// Base directory of the local object store.
    pub store_path: PathBuf,

    /// Subtrees of `backup_path` to skip, relative paths.
    #[serde(default)]
    pub exclude: Vec<PathBuf>,

    /// Byte budget for newly uploaded files per run.
    #[serde(default)]
    pub size_limit: Option<u64>,

    /// Id of the root container, recorded after the first backup so
    /// later runs skip the listing round-trip.
    #[serde(default)]
    pub root_id: Option<String>,
}

impl Config {
    pub fn default_path() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("", "", "veilsnap")
            .ok_or_else(|| anyhow!("Cannot determine config directory"))?;
        Ok(dirs.config_dir().join("config.toml"))
    }

    pub fn data_dir() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("", "", "veilsnap")
            .ok_or_else(|| anyhow!("Cannot determine data directory"))?;
        Ok(dirs.data_dir().to_path_buf())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).with_context(|| {
            format!(
                "Cannot read config at {} (run `veilsnap init` first?)",
                path.display()
            )
        })?;
        toml::from_str(&text).with_context(|| format!("Invalid config at {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = toml::to_string_pretty(self)?;
        std::fs::write(path, text)
            .with_context(|| format!("Cannot write config to {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_toml() {
        let config = Config {
            backup_path: "/home/me/docs".into(),
            restore_path: "/home/me/restored".into(),
            key_path: "/home/me/.veilsnap/key".into(),
            store_path: "/mnt/backup/store".into(),
            exclude: vec!["cache".into()],
            size_limit: Some(1024),
            root_id: None,
        };

        let text = toml::to_string_pretty(&config).unwrap();
        let back: Config = toml::from_str(&text).unwrap();
        assert_eq!(back.backup_path, config.backup_path);
        assert_eq!(back.exclude, config.exclude);
        assert_eq!(back.size_limit, Some(1024));
        assert_eq!(back.root_id, None);
    }

    #[test]
    fn optional_fields_default_when_absent() {
        let text = r#"
            backup_path = "/data"
            restore_path = "/restored"
            key_path = "/key"
            store_path = "/store"
        "#;
        let config: Config = toml::from_str(text).unwrap();
        assert!(config.exclude.is_empty());
        assert_eq!(config.size_limit, None);
        assert_eq!(config.root_id, None);
    }
}
