use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;
use uuid::Uuid;
use veilsnap_core::{Error, ObjectEntry, ObjectId, ObjectStore, Result};

/// Filesystem-backed object store.
///
/// Encrypted names can exceed filesystem name limits, so every container
/// and object is a directory with a generated id as its directory name,
/// holding a `name` file (the token) and, for objects, a `data` file.
/// Object ids are paths relative to the base directory.
pub struct LocalStore {
    base: PathBuf,
}

impl LocalStore {
    pub fn new<P: AsRef<Path>>(base: P) -> Self {
        Self {
            base: base.as_ref().to_path_buf(),
        }
    }

    fn entry_dir(&self, parent: Option<&ObjectId>) -> PathBuf {
        match parent {
            Some(id) => self.base.join(id.as_str()),
            None => self.base.clone(),
        }
    }

    fn relative_id(&self, path: &Path) -> Result<ObjectId> {
        let rel = path
            .strip_prefix(&self.base)
            .map_err(|_| Error::Store(format!("path {} escapes the store", path.display())))?;
        Ok(ObjectId(rel.to_string_lossy().replace('\\', "/")))
    }
}

#[async_trait]
impl ObjectStore for LocalStore {
    async fn create_container(&self, name: &str, parent: Option<&ObjectId>) -> Result<ObjectId> {
        let dir = self.entry_dir(parent).join(format!("ctr-{}", Uuid::new_v4()));
        fs::create_dir_all(&dir).await?;
        fs::write(dir.join("name"), name).await?;
        let id = self.relative_id(&dir)?;
        debug!(id = %id, "created container");
        Ok(id)
    }

    async fn put_object(&self, name: &str, parent: &ObjectId, data: Bytes) -> Result<ObjectId> {
        let dir = self.entry_dir(Some(parent)).join(format!("obj-{}", Uuid::new_v4()));
        fs::create_dir_all(&dir).await?;
        fs::write(dir.join("name"), name).await?;
        fs::write(dir.join("data"), &data).await?;
        self.relative_id(&dir)
    }

    async fn get_object(&self, id: &ObjectId) -> Result<Bytes> {
        let path = self.base.join(id.as_str()).join("data");
        let data = fs::read(&path)
            .await
            .map_err(|e| Error::Store(format!("cannot read object {id}: {e}")))?;
        Ok(Bytes::from(data))
    }

    async fn list_children(&self, parent: Option<&ObjectId>) -> Result<Vec<ObjectEntry>> {
        let dir = self.entry_dir(parent);
        let mut entries = Vec::new();
        if !dir.exists() {
            return Ok(entries);
        }
        let mut read_dir = fs::read_dir(&dir).await?;
        while let Some(entry) = read_dir.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let name_path = entry.path().join("name");
            let Ok(name) = fs::read_to_string(&name_path).await else {
                continue;
            };
            entries.push(ObjectEntry {
                id: self.relative_id(&entry.path())?,
                name,
            });
        }
        Ok(entries)
    }
}
