use crate::crypto::CryptoEngine;
use crate::manifest::ManifestStore;
use crate::record::FileRecord;
use crate::store::{ObjectEntry, ObjectId, ObjectStore};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, warn};

/// Decrypted container name: the only metadata a snapshot carries.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct ContainerMeta {
    pub dir: String,
    pub time: f64,
}

pub fn epoch_seconds(t: SystemTime) -> f64 {
    t.duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

pub fn now_epoch() -> f64 {
    epoch_seconds(SystemTime::now())
}

/// One backup run: a remote container of piece objects plus its manifest.
///
/// The manifest and its digest-sorted view are loaded lazily and memoized
/// per instance.
pub struct Snapshot {
    pub id: ObjectId,
    pub source: PathBuf,
    pub time: f64,
    files: Option<HashMap<String, FileRecord>>,
    by_digest: Option<Vec<FileRecord>>,
}

impl Snapshot {
    /// Creates this run's container under the snapshot root; its encrypted
    /// name encodes the source directory and creation timestamp.
    pub async fn create(
        store: &dyn ObjectStore,
        crypto: &CryptoEngine,
        root: &ObjectId,
        source: &Path,
        time: f64,
    ) -> Result<Self> {
        let meta = ContainerMeta {
            dir: source.display().to_string(),
            time,
        };
        let name = crypto.encrypt_name(&serde_json::to_string(&meta)?)?;
        let id = store.create_container(&name, Some(root)).await?;
        debug!(id = %id, source = %source.display(), "created snapshot container");
        Ok(Self {
            id,
            source: source.to_path_buf(),
            time,
            files: None,
            by_digest: None,
        })
    }

    /// Decodes a listed child of the snapshot root. Returns `None` for
    /// entries whose name does not decrypt to container metadata.
    pub fn from_entry(crypto: &CryptoEngine, entry: &ObjectEntry) -> Option<Self> {
        let name = crypto.decrypt_name(&entry.name).ok()?;
        let meta: ContainerMeta = serde_json::from_str(&name).ok()?;
        Some(Self {
            id: entry.id.clone(),
            source: PathBuf::from(meta.dir),
            time: meta.time,
            files: None,
            by_digest: None,
        })
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis((self.time * 1000.0) as i64).unwrap_or_default()
    }

    /// The manifest's file list indexed by source path, loaded on first
    /// use. `None` when no manifest object exists under this container.
    pub async fn files_map(
        &mut self,
        manifests: &ManifestStore,
    ) -> Result<Option<&HashMap<String, FileRecord>>> {
        if self.files.is_none() {
            self.files = manifests.load(&self.id).await?;
        }
        Ok(self.files.as_ref())
    }

    pub async fn find_by_path(
        &mut self,
        manifests: &ManifestStore,
        path: &str,
    ) -> Result<Option<FileRecord>> {
        Ok(self
            .files_map(manifests)
            .await?
            .and_then(|map| map.get(path).cloned()))
    }

    /// Binary search over the lazily built, digest-sorted file list.
    pub async fn find_by_digest(
        &mut self,
        manifests: &ManifestStore,
        digest: &str,
    ) -> Result<Option<FileRecord>> {
        if self.by_digest.is_none() {
            let Some(map) = self.files_map(manifests).await? else {
                return Ok(None);
            };
            let mut sorted: Vec<FileRecord> = map.values().cloned().collect();
            sorted.sort_by(|a, b| a.digest.cmp(&b.digest));
            self.by_digest = Some(sorted);
        }
        let Some(sorted) = self.by_digest.as_ref() else {
            return Ok(None);
        };
        Ok(sorted
            .binary_search_by(|record| record.digest.as_str().cmp(digest))
            .ok()
            .map(|i| sorted[i].clone()))
    }

    /// Total bytes this snapshot occupies remotely (ciphertext sizes).
    pub async fn stored_size(&mut self, manifests: &ManifestStore) -> Result<Option<u64>> {
        Ok(self
            .files_map(manifests)
            .await?
            .map(|map| map.values().map(FileRecord::stored_size).sum()))
    }

    /// True when this snapshot's manifest exists and decodes. Decode
    /// failures are reported as unusable rather than propagated, so a
    /// single corrupt snapshot cannot break snapshot selection.
    pub async fn has_usable_manifest(&mut self, manifests: &ManifestStore) -> Result<bool> {
        match self.files_map(manifests).await {
            Ok(Some(_)) => Ok(true),
            Ok(None) => Ok(false),
            Err(Error::ManifestDecode(reason)) => {
                warn!(id = %self.id, %reason, "skipping snapshot with undecodable manifest");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}

/// Lists all snapshots under the root container, most recent first.
/// Children whose names don't decode as snapshot metadata are skipped.
pub async fn list_snapshots(
    store: &dyn ObjectStore,
    crypto: &CryptoEngine,
    root: &ObjectId,
) -> Result<Vec<Snapshot>> {
    let mut snapshots: Vec<Snapshot> = store
        .list_children(Some(root))
        .await?
        .iter()
        .filter_map(|entry| Snapshot::from_entry(crypto, entry))
        .collect();
    snapshots.sort_by(|a, b| b.time.total_cmp(&a.time));
    Ok(snapshots)
}
