pub mod backup;
pub mod init;
pub mod restore;
pub mod snapshots;

use crate::config::Config;
use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use veilsnap_backends::LocalStore;
use veilsnap_core::{BackupOrchestrator, CryptoEngine, ObjectId, ObjectStore, PieceTransfer, RetryPolicy};

/// Key, store and orchestrator opened from a loaded config.
pub(crate) struct Session {
    store: Arc<LocalStore>,
    crypto: Arc<CryptoEngine>,
    pub orchestrator: BackupOrchestrator,
}

impl Session {
    pub fn open(config: &Config) -> Result<Self> {
        let crypto = Arc::new(CryptoEngine::load_or_generate(&config.key_path)?);
        let store = Arc::new(LocalStore::new(&config.store_path));
        let orchestrator = BackupOrchestrator::new(
            store.clone() as Arc<dyn ObjectStore>,
            crypto.clone(),
            RetryPolicy::default(),
        );
        Ok(Self {
            store,
            crypto,
            orchestrator,
        })
    }

    pub fn transfer(&self) -> PieceTransfer {
        PieceTransfer::new(
            self.store.clone() as Arc<dyn ObjectStore>,
            self.crypto.clone(),
            RetryPolicy::default(),
        )
    }
}

/// Resolves the snapshot-root container, persisting a freshly created id
/// back into the config so later runs skip the creation round-trip.
pub(crate) async fn ensure_root(
    session: &Session,
    config: &mut Config,
    config_path: &Path,
) -> Result<ObjectId> {
    let existing = config.root_id.clone().map(ObjectId);
    let root = session.orchestrator.ensure_root(existing).await?;
    if config.root_id.as_deref() != Some(root.as_str()) {
        config.root_id = Some(root.as_str().to_string());
        config.save(config_path)?;
    }
    Ok(root)
}

pub(crate) fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.2} MB", bytes as f64 / 1024.0 / 1024.0)
    }
}
