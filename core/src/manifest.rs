use crate::crypto::CryptoEngine;
use crate::record::{FileRecord, Manifest, RawManifest, manifest_object_name};
use crate::retry::{RetryPolicy, retry_transient};
use crate::store::{ObjectId, ObjectStore};
use crate::{Error, Result};
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Reads and writes the encrypted per-snapshot manifest object.
#[derive(Clone)]
pub struct ManifestStore {
    store: Arc<dyn ObjectStore>,
    crypto: Arc<CryptoEngine>,
    retry: RetryPolicy,
}

impl ManifestStore {
    pub fn new(store: Arc<dyn ObjectStore>, crypto: Arc<CryptoEngine>, retry: RetryPolicy) -> Self {
        Self {
            store,
            crypto,
            retry,
        }
    }

    /// Encrypts the file list as one payload and uploads it under the
    /// snapshot container with the fixed, version-qualified name.
    pub async fn publish(&self, container: &ObjectId, files: Vec<FileRecord>) -> Result<Manifest> {
        let manifest = Manifest::new(files);
        let payload = Bytes::from(self.crypto.encrypt(&serde_json::to_vec(&manifest)?)?);
        let name = self.crypto.encrypt_name(&manifest_object_name())?;
        retry_transient(&self.retry, "publish manifest", || {
            let payload = payload.clone();
            let name = &name;
            async move { self.store.put_object(name, container, payload).await }
        })
        .await?;
        info!(
            container = %container,
            files = manifest.files.len(),
            "published manifest"
        );
        Ok(manifest)
    }

    /// Finds and decodes the manifest of `container`, indexed by source
    /// path. `None` means the snapshot has no usable file list (no manifest
    /// object was ever published). A manifest that is present but
    /// undecryptable or malformed is a [`Error::ManifestDecode`].
    pub async fn load(
        &self,
        container: &ObjectId,
    ) -> Result<Option<HashMap<String, FileRecord>>> {
        let expected = manifest_object_name();
        for entry in self.store.list_children(Some(container)).await? {
            let Ok(name) = self.crypto.decrypt_name(&entry.name) else {
                // Foreign objects under our container don't decrypt; skip.
                continue;
            };
            if name != expected {
                continue;
            }
            debug!(container = %container, "loading manifest");
            let data = retry_transient(&self.retry, "download manifest", || async {
                self.store.get_object(&entry.id).await
            })
            .await?;
            let plaintext = self
                .crypto
                .decrypt(&data)
                .map_err(|e| Error::ManifestDecode(e.to_string()))?;
            let raw: RawManifest = serde_json::from_slice(&plaintext)
                .map_err(|e| Error::ManifestDecode(e.to_string()))?;
            let mut by_path = HashMap::with_capacity(raw.files.len());
            for file in raw.files {
                let record = file.normalize()?;
                by_path.insert(record.source.clone(), record);
            }
            return Ok(Some(by_path));
        }
        Ok(None)
    }
}
