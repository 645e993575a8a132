use crate::store::ObjectId;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Manifest format version; bumped on incompatible layout changes.
pub const FORMAT_VERSION: u32 = 1;

/// Plaintext name of the manifest object within a snapshot container.
pub fn manifest_object_name() -> String {
    format!("backup_{FORMAT_VERSION}.json")
}

/// One remote object holding one independently-encrypted slice of a file.
/// `size` is the ciphertext size in bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PieceRecord {
    pub id: ObjectId,
    pub size: u64,
}

/// One logical file within a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileRecord {
    /// Path relative to the backed-up source directory, '/'-separated.
    pub source: String,
    /// Base64 SHA-256 over the plaintext content.
    pub digest: String,
    /// Reconstructed (plaintext) size in bytes.
    #[serde(rename = "totalSize")]
    pub total_size: u64,
    /// Epoch seconds of upload or original upload when carried over.
    pub uploaded: f64,
    pub pieces: Vec<PieceRecord>,
}

impl FileRecord {
    /// Reuses this record for a new snapshot, rewriting only the source
    /// path. Pieces keep pointing at the already-uploaded objects.
    pub fn carried_over(&self, source: &str) -> FileRecord {
        let mut record = self.clone();
        record.source = source.to_string();
        record
    }

    /// Sum of piece ciphertext sizes: what the file occupies remotely.
    pub fn stored_size(&self) -> u64 {
        self.pieces.iter().map(|p| p.size).sum()
    }
}

/// Wire form of a file record. Older manifests wrote the reconstructed
/// size under `size`; `normalize` migrates it to `totalSize`.
#[derive(Debug, Deserialize)]
pub(crate) struct RawFileRecord {
    source: String,
    digest: String,
    #[serde(rename = "totalSize")]
    total_size: Option<u64>,
    size: Option<u64>,
    uploaded: Option<f64>,
    pieces: Vec<PieceRecord>,
}

impl RawFileRecord {
    pub(crate) fn normalize(self) -> Result<FileRecord> {
        let total_size = self.total_size.or(self.size).ok_or_else(|| {
            Error::ManifestDecode(format!("record for {} carries no size field", self.source))
        })?;
        Ok(FileRecord {
            source: self.source,
            digest: self.digest,
            total_size,
            uploaded: self.uploaded.unwrap_or(0.0),
            pieces: self.pieces,
        })
    }
}

/// The encrypted, versioned file list published once per snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct Manifest {
    pub version: u32,
    pub files: Vec<FileRecord>,
}

impl Manifest {
    pub fn new(files: Vec<FileRecord>) -> Self {
        Self {
            version: FORMAT_VERSION,
            files,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawManifest {
    #[allow(dead_code)]
    pub(crate) version: u32,
    pub(crate) files: Vec<RawFileRecord>,
}
