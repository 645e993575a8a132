use crate::manifest::ManifestStore;
use crate::record::FileRecord;
use crate::snapshot::{Snapshot, epoch_seconds};
use crate::transfer::{PIECE_SIZE, file_digest};
use crate::{Error, Result};
use std::path::Path;
use tracing::debug;

/// Decides whether a local file can reuse a record from a prior snapshot
/// instead of being re-uploaded.
pub struct DedupResolver {
    manifests: ManifestStore,
}

impl DedupResolver {
    pub fn new(manifests: ManifestStore) -> Self {
        Self { manifests }
    }

    /// Path-and-mtime fast path against a single previous snapshot of the
    /// same source directory.
    ///
    /// A file modified after the snapshot was created is never reused; an
    /// exact path match below that cutoff is carried over verbatim with no
    /// content check. Correctness rests on unchanged mtime implying
    /// unchanged content.
    pub async fn fast_lookup(
        &self,
        abs_path: &Path,
        rel_path: &str,
        previous: &mut Snapshot,
    ) -> Result<Option<FileRecord>> {
        let modified = tokio::fs::metadata(abs_path).await?.modified()?;
        if epoch_seconds(modified) > previous.time {
            debug!(path = rel_path, "modified after previous snapshot");
            return Ok(None);
        }
        Ok(previous
            .find_by_path(&self.manifests, rel_path)
            .await?
            .map(|record| record.carried_over(rel_path)))
    }

    /// Content-addressed lookup across all known snapshots, catching moved
    /// or renamed files at the cost of hashing the candidate up front.
    /// Snapshots without a usable manifest are skipped.
    pub async fn digest_lookup(
        &self,
        abs_path: &Path,
        rel_path: &str,
        snapshots: &mut [Snapshot],
    ) -> Result<Option<FileRecord>> {
        let digest = file_digest(abs_path, PIECE_SIZE).await?;
        for snapshot in snapshots {
            match snapshot.find_by_digest(&self.manifests, &digest).await {
                Ok(Some(record)) => {
                    debug!(path = rel_path, snapshot = %snapshot.id, "digest match");
                    return Ok(Some(record.carried_over(rel_path)));
                }
                Ok(None) => {}
                Err(Error::ManifestDecode(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }
}

/// True when an excluded root is a non-trivial path prefix of `rel_path`.
/// Excluded files are neither reused nor uploaded; they are simply absent
/// from the new snapshot.
pub fn is_excluded(rel_path: &Path, exclude: &[impl AsRef<Path>]) -> bool {
    exclude.iter().any(|root| {
        let root = root.as_ref();
        !root.as_os_str().is_empty() && rel_path.starts_with(root)
    })
}
