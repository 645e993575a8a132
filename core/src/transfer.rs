use crate::crypto::CryptoEngine;
use crate::progress::ProgressReporter;
use crate::record::{FileRecord, PieceRecord};
use crate::retry::{RetryPolicy, retry_transient};
use crate::store::{ObjectId, ObjectStore};
use crate::{Error, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info};

/// Fixed plaintext slice size; every piece becomes one remote object.
pub const PIECE_SIZE: usize = 8 * 1024 * 1024;

/// Application-internal metadata carried in each piece's encrypted name.
#[derive(Serialize)]
struct PieceMeta<'a> {
    path: &'a str,
    index: usize,
}

/// Result of uploading one file: everything the manifest needs to record.
pub struct UploadedFile {
    /// Base64 SHA-256 over the whole plaintext.
    pub digest: String,
    pub pieces: Vec<PieceRecord>,
    /// Plaintext bytes read from disk.
    pub total_size: u64,
}

/// Splits files into fixed-size pieces for encrypted upload, and reverses
/// the process on restore. Transient transport failures are retried per
/// piece; memory use is bounded by one piece in either direction.
pub struct PieceTransfer {
    store: Arc<dyn ObjectStore>,
    crypto: Arc<CryptoEngine>,
    retry: RetryPolicy,
    piece_size: usize,
}

impl PieceTransfer {
    pub fn new(store: Arc<dyn ObjectStore>, crypto: Arc<CryptoEngine>, retry: RetryPolicy) -> Self {
        Self {
            store,
            crypto,
            retry,
            piece_size: PIECE_SIZE,
        }
    }

    pub fn with_piece_size(mut self, piece_size: usize) -> Self {
        self.piece_size = piece_size;
        self
    }

    /// Uploads `path` into `container` as a sequence of independently
    /// encrypted pieces. The content digest for each piece is computed on a
    /// background task while that same piece is encrypted and uploaded, and
    /// joined before the next piece is read.
    pub async fn upload_file(
        &self,
        path: &Path,
        source: &str,
        container: &ObjectId,
        progress: &dyn ProgressReporter,
    ) -> Result<UploadedFile> {
        let mut file = fs::File::open(path).await?;
        let mut hasher = Sha256::new();
        let mut pieces = Vec::new();
        let mut total_size = 0u64;
        debug!(source, "uploading file");

        for index in 0.. {
            let chunk = read_piece(&mut file, self.piece_size).await?;
            if chunk.is_empty() {
                break;
            }
            let plaintext_len = chunk.len() as u64;

            let hash_input = chunk.clone();
            let hash_state = std::mem::take(&mut hasher);
            let hash_task = tokio::task::spawn_blocking(move || {
                let mut state = hash_state;
                state.update(&hash_input);
                state
            });

            let name = self
                .crypto
                .encrypt_name(&serde_json::to_string(&PieceMeta {
                    path: source,
                    index,
                })?)?;
            let payload = Bytes::from(self.crypto.encrypt(&chunk)?);
            let size = payload.len() as u64;
            let id = retry_transient(&self.retry, "upload piece", || {
                let payload = payload.clone();
                let name = &name;
                async move { self.store.put_object(name, container, payload).await }
            })
            .await?;
            debug!(source, index, size, "uploaded piece");
            pieces.push(PieceRecord { id, size });
            total_size += plaintext_len;
            progress.advance(plaintext_len);

            hasher = hash_task
                .await
                .map_err(|e| Error::Other(format!("hash task failed: {e}")))?;
        }

        info!(source, pieces = pieces.len(), total_size, "uploaded file");
        Ok(UploadedFile {
            digest: STANDARD.encode(hasher.finalize()),
            pieces,
            total_size,
        })
    }

    /// Restores one file under `dest_root`, streaming piece by piece.
    ///
    /// If the destination already exists with matching content the download
    /// is skipped entirely, which makes whole-subtree restores resumable.
    /// The reassembled plaintext is digest-checked against the record.
    pub async fn download_file(
        &self,
        record: &FileRecord,
        dest_root: &Path,
        progress: &dyn ProgressReporter,
    ) -> Result<()> {
        let dest = join_source_path(dest_root, &record.source);
        if dest.is_file() && file_digest(&dest, self.piece_size).await? == record.digest {
            debug!(source = record.source, "already restored, skipping");
            progress.advance(record.total_size);
            return Ok(());
        }
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut out = fs::File::create(&dest).await?;
        let mut hasher = Sha256::new();
        for piece in &record.pieces {
            let data = retry_transient(&self.retry, "download piece", || async {
                self.store.get_object(&piece.id).await
            })
            .await?;
            let plaintext = self.crypto.decrypt(&data)?;
            hasher.update(&plaintext);
            out.write_all(&plaintext).await?;
            progress.advance(plaintext.len() as u64);
        }
        out.flush().await?;

        let digest = STANDARD.encode(hasher.finalize());
        if digest != record.digest {
            return Err(Error::Integrity(format!(
                "restored {} does not match its recorded digest",
                record.source
            )));
        }
        info!(source = record.source, "restored file");
        Ok(())
    }
}

/// Maps a '/'-separated manifest source path under a destination root.
pub fn join_source_path(dest_root: &Path, source: &str) -> PathBuf {
    source
        .split('/')
        .filter(|s| !s.is_empty() && *s != ".")
        .fold(dest_root.to_path_buf(), |p, segment| p.join(segment))
}

/// Base64 SHA-256 of a file's content, read in piece-sized chunks.
pub async fn file_digest(path: &Path, piece_size: usize) -> Result<String> {
    let mut file = fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    loop {
        let chunk = read_piece(&mut file, piece_size).await?;
        if chunk.is_empty() {
            break;
        }
        hasher.update(&chunk);
    }
    Ok(STANDARD.encode(hasher.finalize()))
}

async fn read_piece(file: &mut fs::File, capacity: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; capacity];
    let mut filled = 0;
    while filled < capacity {
        let n = file.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    buf.truncate(filled);
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KEY_LENGTH;
    use crate::progress::NullProgress;
    use crate::record::manifest_object_name;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// In-memory store with transient-failure injection.
    #[derive(Default)]
    struct MockStore {
        objects: Mutex<HashMap<String, Bytes>>,
        next_id: AtomicU32,
        fail_puts: AtomicU32,
        fail_gets: AtomicU32,
        put_calls: AtomicU32,
        get_calls: AtomicU32,
    }

    #[async_trait]
    impl ObjectStore for MockStore {
        async fn create_container(
            &self,
            _name: &str,
            _parent: Option<&ObjectId>,
        ) -> Result<ObjectId> {
            let n = self.next_id.fetch_add(1, Ordering::SeqCst);
            Ok(format!("ctr-{n}").into())
        }

        async fn put_object(
            &self,
            _name: &str,
            _parent: &ObjectId,
            data: Bytes,
        ) -> Result<ObjectId> {
            self.put_calls.fetch_add(1, Ordering::SeqCst);
            if self
                .fail_puts
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(Error::Transport("simulated timeout".into()));
            }
            let n = self.next_id.fetch_add(1, Ordering::SeqCst);
            let id = format!("obj-{n}");
            self.objects.lock().unwrap().insert(id.clone(), data);
            Ok(id.into())
        }

        async fn get_object(&self, id: &ObjectId) -> Result<Bytes> {
            self.get_calls.fetch_add(1, Ordering::SeqCst);
            if self
                .fail_gets
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(Error::Transport("simulated reset".into()));
            }
            self.objects
                .lock()
                .unwrap()
                .get(id.as_str())
                .cloned()
                .ok_or_else(|| Error::Store(format!("no such object: {id}")))
        }

        async fn list_children(&self, _parent: Option<&ObjectId>) -> Result<Vec<crate::store::ObjectEntry>> {
            Ok(Vec::new())
        }
    }

    const TEST_PIECE_SIZE: usize = 1024;

    fn transfer(store: Arc<MockStore>) -> PieceTransfer {
        let crypto = Arc::new(CryptoEngine::from_key([5u8; KEY_LENGTH]));
        PieceTransfer::new(store, crypto, RetryPolicy::fast()).with_piece_size(TEST_PIECE_SIZE)
    }

    fn record_from(upload: UploadedFile, source: &str) -> FileRecord {
        FileRecord {
            source: source.into(),
            digest: upload.digest,
            total_size: upload.total_size,
            uploaded: 0.0,
            pieces: upload.pieces,
        }
    }

    #[tokio::test]
    async fn piece_round_trip_across_boundaries() {
        let sizes = [
            0usize,
            TEST_PIECE_SIZE - 1,
            TEST_PIECE_SIZE,
            TEST_PIECE_SIZE + 1,
            3 * TEST_PIECE_SIZE + 7,
        ];
        for size in sizes {
            let store = Arc::new(MockStore::default());
            let t = transfer(store.clone());
            let dir = tempfile::tempdir().unwrap();
            let src = dir.path().join("input.bin");
            let content: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
            std::fs::write(&src, &content).unwrap();

            let container: ObjectId = "ctr".into();
            let upload = t
                .upload_file(&src, "input.bin", &container, &NullProgress)
                .await
                .unwrap();
            assert_eq!(upload.total_size, size as u64);
            assert_eq!(upload.pieces.len(), size.div_ceil(TEST_PIECE_SIZE));

            let record = record_from(upload, "input.bin");
            let restore_root = dir.path().join("restore");
            t.download_file(&record, &restore_root, &NullProgress)
                .await
                .unwrap();
            let restored = std::fs::read(restore_root.join("input.bin")).unwrap();
            assert_eq!(restored, content);
            assert_eq!(
                file_digest(&restore_root.join("input.bin"), TEST_PIECE_SIZE)
                    .await
                    .unwrap(),
                record.digest
            );
        }
    }

    #[tokio::test]
    async fn piece_sizes_account_for_padding_and_iv() {
        let store = Arc::new(MockStore::default());
        let t = transfer(store.clone());
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("f");
        std::fs::write(&src, vec![1u8; TEST_PIECE_SIZE + 10]).unwrap();

        let upload = t
            .upload_file(&src, "f", &"ctr".into(), &NullProgress)
            .await
            .unwrap();
        // Full piece: IV block plus a whole extra padding block.
        assert_eq!(upload.pieces[0].size as usize, TEST_PIECE_SIZE + 32);
        // 10-byte tail: IV block plus one padded block.
        assert_eq!(upload.pieces[1].size, 32);
    }

    #[tokio::test]
    async fn transient_upload_failures_are_retried_to_success() {
        let store = Arc::new(MockStore::default());
        store.fail_puts.store(4, Ordering::SeqCst);
        let t = transfer(store.clone());
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("flaky.bin");
        std::fs::write(&src, b"resilient payload").unwrap();

        let upload = t
            .upload_file(&src, "flaky.bin", &"ctr".into(), &NullProgress)
            .await
            .unwrap();
        assert_eq!(upload.pieces.len(), 1);
        // 4 failures then 1 success.
        assert_eq!(store.put_calls.load(Ordering::SeqCst), 5);

        let record = record_from(upload, "flaky.bin");
        store.fail_gets.store(3, Ordering::SeqCst);
        let restore_root = dir.path().join("out");
        t.download_file(&record, &restore_root, &NullProgress)
            .await
            .unwrap();
        assert_eq!(
            std::fs::read(restore_root.join("flaky.bin")).unwrap(),
            b"resilient payload"
        );
        assert_eq!(store.get_calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn fatal_store_error_aborts_without_retry() {
        let store = Arc::new(MockStore::default());
        let t = transfer(store.clone());
        let dir = tempfile::tempdir().unwrap();

        let record = FileRecord {
            source: "gone.bin".into(),
            digest: "x".into(),
            total_size: 1,
            uploaded: 0.0,
            pieces: vec![PieceRecord {
                id: "missing".into(),
                size: 32,
            }],
        };
        let result = t
            .download_file(&record, dir.path(), &NullProgress)
            .await;
        assert!(matches!(result, Err(Error::Store(_))));
        assert_eq!(store.get_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn second_restore_skips_already_correct_files() {
        let store = Arc::new(MockStore::default());
        let t = transfer(store.clone());
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.txt");
        std::fs::write(&src, b"stable contents").unwrap();

        let upload = t
            .upload_file(&src, "a.txt", &"ctr".into(), &NullProgress)
            .await
            .unwrap();
        let record = record_from(upload, "a.txt");
        let restore_root = dir.path().join("out");

        t.download_file(&record, &restore_root, &NullProgress)
            .await
            .unwrap();
        let gets_after_first = store.get_calls.load(Ordering::SeqCst);

        t.download_file(&record, &restore_root, &NullProgress)
            .await
            .unwrap();
        assert_eq!(store.get_calls.load(Ordering::SeqCst), gets_after_first);
    }

    #[tokio::test]
    async fn tampered_piece_fails_with_integrity_error() {
        let store = Arc::new(MockStore::default());
        let t = transfer(store.clone());
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("t.bin");
        std::fs::write(&src, vec![9u8; 100]).unwrap();

        let upload = t
            .upload_file(&src, "t.bin", &"ctr".into(), &NullProgress)
            .await
            .unwrap();
        let mut record = record_from(upload, "t.bin");
        // Claim a different plaintext digest than what the pieces hold.
        record.digest = STANDARD.encode(Sha256::digest(b"something else"));

        let result = t
            .download_file(&record, &dir.path().join("out"), &NullProgress)
            .await;
        assert!(matches!(result, Err(Error::Integrity(_))));
    }

    #[test]
    fn manifest_name_is_version_tagged() {
        assert_eq!(manifest_object_name(), "backup_1.json");
    }
}
