use crate::crypto::CryptoEngine;
use crate::dedup::{DedupResolver, is_excluded};
use crate::manifest::ManifestStore;
use crate::progress::ProgressReporter;
use crate::record::{FileRecord, Manifest};
use crate::retry::RetryPolicy;
use crate::snapshot::{Snapshot, list_snapshots, now_epoch};
use crate::store::{ObjectId, ObjectStore};
use crate::transfer::PieceTransfer;
use crate::{Error, Result};
use rand::seq::SliceRandom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Plaintext name of the root container that groups all snapshots; stored
/// name-encrypted like everything else.
const ROOT_CONTAINER_NAME: &str = "backups";

pub struct BackupOptions {
    pub source_dir: PathBuf,
    pub exclude: Vec<PathBuf>,
    /// Byte budget for *new* files this run; reused records don't count.
    pub size_limit: Option<u64>,
    /// Skip the previous-snapshot check entirely (first-time backups).
    pub force_unique: bool,
}

pub struct BackupOutcome {
    pub manifest: Manifest,
    pub snapshot_id: ObjectId,
    pub uploaded_bytes: u64,
    pub reused_files: usize,
    pub cancelled: bool,
}

/// Walks the source tree, resolves per-file reuse, uploads what is new and
/// publishes the snapshot manifest.
pub struct BackupOrchestrator {
    store: Arc<dyn ObjectStore>,
    crypto: Arc<CryptoEngine>,
    manifests: ManifestStore,
    transfer: PieceTransfer,
    dedup: DedupResolver,
}

impl BackupOrchestrator {
    pub fn new(store: Arc<dyn ObjectStore>, crypto: Arc<CryptoEngine>, retry: RetryPolicy) -> Self {
        let manifests = ManifestStore::new(store.clone(), crypto.clone(), retry.clone());
        let transfer = PieceTransfer::new(store.clone(), crypto.clone(), retry);
        let dedup = DedupResolver::new(manifests.clone());
        Self {
            store,
            crypto,
            manifests,
            transfer,
            dedup,
        }
    }

    pub fn with_piece_size(mut self, piece_size: usize) -> Self {
        self.transfer = self.transfer.with_piece_size(piece_size);
        self
    }

    pub fn manifests(&self) -> &ManifestStore {
        &self.manifests
    }

    pub fn transfer(&self) -> &PieceTransfer {
        &self.transfer
    }

    pub fn dedup(&self) -> &DedupResolver {
        &self.dedup
    }

    /// Returns the existing snapshot-root container id, creating the
    /// container on first use. The caller persists the returned id.
    pub async fn ensure_root(&self, existing: Option<ObjectId>) -> Result<ObjectId> {
        if let Some(id) = existing {
            return Ok(id);
        }
        let name = self.crypto.encrypt_name(ROOT_CONTAINER_NAME)?;
        let id = self.store.create_container(&name, None).await?;
        info!(id = %id, "created snapshot root container");
        Ok(id)
    }

    pub async fn list_snapshots(&self, root: &ObjectId) -> Result<Vec<Snapshot>> {
        list_snapshots(self.store.as_ref(), &self.crypto, root).await
    }

    /// Picks the most recent snapshot of `source_dir` with a usable
    /// manifest, unless the caller supplied one explicitly.
    async fn choose_previous(
        &self,
        root: &ObjectId,
        source_dir: &Path,
        supplied: Option<Snapshot>,
    ) -> Result<Option<Snapshot>> {
        if let Some(snapshot) = supplied {
            return Ok(Some(snapshot));
        }
        for mut snapshot in self.list_snapshots(root).await? {
            if snapshot.source != source_dir {
                continue;
            }
            if snapshot.has_usable_manifest(&self.manifests).await? {
                info!(id = %snapshot.id, time = snapshot.time, "reusing previous snapshot");
                return Ok(Some(snapshot));
            }
        }
        Ok(None)
    }

    /// Runs one backup. A cancellation observed between file uploads stops
    /// further uploads but still publishes a valid partial manifest.
    pub async fn run_backup(
        &self,
        root: &ObjectId,
        options: BackupOptions,
        reuse_from: Option<Snapshot>,
        progress: &dyn ProgressReporter,
        cancel: &AtomicBool,
    ) -> Result<BackupOutcome> {
        let source_dir = options
            .source_dir
            .canonicalize()
            .map_err(|e| Error::Config(format!("source dir {}: {e}", options.source_dir.display())))?;

        let mut previous = if options.force_unique {
            None
        } else {
            self.choose_previous(root, &source_dir, reuse_from).await?
        };
        if previous.is_none() && !options.force_unique {
            debug!("no usable previous snapshot, treating all files as new");
        }

        let started = now_epoch();
        let snapshot =
            Snapshot::create(self.store.as_ref(), &self.crypto, root, &source_dir, started).await?;

        let mut records: Vec<FileRecord> = Vec::new();
        let mut reused_files = 0usize;
        let mut queue: Vec<(PathBuf, String)> = Vec::new();
        let mut queued_bytes = 0u64;
        let mut budget_exhausted = false;

        let mut walker = WalkDir::new(&source_dir).follow_links(false).into_iter();
        while let Some(entry) = walker.next() {
            let entry = entry.map_err(|e| Error::Other(format!("walk failed: {e}")))?;
            let rel = entry
                .path()
                .strip_prefix(&source_dir)
                .unwrap_or(entry.path())
                .to_path_buf();
            if entry.file_type().is_dir() {
                if is_excluded(&rel, &options.exclude) {
                    debug!(path = %rel.display(), "pruning excluded subtree");
                    walker.skip_current_dir();
                }
                continue;
            }
            if !entry.file_type().is_file() || is_excluded(&rel, &options.exclude) {
                continue;
            }
            let rel_str = source_path_string(&rel);

            if let Some(prev) = previous.as_mut() {
                if let Some(record) = self.dedup.fast_lookup(entry.path(), &rel_str, prev).await? {
                    debug!(path = rel_str, "carried over from previous snapshot");
                    records.push(record);
                    reused_files += 1;
                    continue;
                }
            }

            if budget_exhausted {
                continue;
            }
            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            if let Some(limit) = options.size_limit {
                if queued_bytes + size > limit {
                    warn!(
                        path = rel_str,
                        limit, "size budget reached, omitting further new files"
                    );
                    budget_exhausted = true;
                    continue;
                }
            }
            queued_bytes += size;
            queue.push((entry.path().to_path_buf(), rel_str));
        }

        // Upload order must not reveal local directory structure or size
        // ordering to an observer of the remote store.
        queue.shuffle(&mut rand::thread_rng());

        info!(
            new_files = queue.len(),
            new_bytes = queued_bytes,
            reused_files,
            "beginning upload"
        );
        progress.begin(queued_bytes);

        let mut uploaded_bytes = 0u64;
        let mut cancelled = false;
        for (abs_path, rel_str) in queue {
            if cancel.load(Ordering::Relaxed) {
                warn!("cancellation requested, finalizing partial snapshot");
                cancelled = true;
                break;
            }
            let uploaded = self
                .transfer
                .upload_file(&abs_path, &rel_str, &snapshot.id, progress)
                .await?;
            uploaded_bytes += uploaded.total_size;
            records.push(FileRecord {
                source: rel_str,
                digest: uploaded.digest,
                total_size: uploaded.total_size,
                uploaded: now_epoch(),
                pieces: uploaded.pieces,
            });
        }

        let manifest = self.manifests.publish(&snapshot.id, records).await?;
        info!(
            snapshot = %snapshot.id,
            files = manifest.files.len(),
            uploaded_bytes,
            cancelled,
            "backup complete"
        );
        Ok(BackupOutcome {
            manifest,
            snapshot_id: snapshot.id,
            uploaded_bytes,
            reused_files,
            cancelled,
        })
    }
}

/// Relative path as stored in the manifest: '/'-separated regardless of
/// platform.
fn source_path_string(rel: &Path) -> String {
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
