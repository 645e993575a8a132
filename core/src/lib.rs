pub mod backup;
pub mod crypto;
pub mod dedup;
pub mod error;
pub mod manifest;
pub mod progress;
pub mod record;
pub mod restore;
pub mod retry;
pub mod snapshot;
pub mod store;
pub mod transfer;

pub use backup::{BackupOptions, BackupOrchestrator, BackupOutcome};
pub use crypto::CryptoEngine;
pub use dedup::DedupResolver;
pub use error::{Error, Result};
pub use manifest::ManifestStore;
pub use progress::{NullProgress, ProgressReporter};
pub use record::{FileRecord, Manifest, PieceRecord};
pub use restore::{FileTree, NodeId, RestoreNavigator};
pub use retry::RetryPolicy;
pub use snapshot::{Snapshot, list_snapshots};
pub use store::{ObjectEntry, ObjectId, ObjectStore};
pub use transfer::{PieceTransfer, UploadedFile};
