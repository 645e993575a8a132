use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque identifier assigned by the remote store to a container or object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(pub String);

impl ObjectId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for ObjectId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ObjectId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One child of a container, as returned by a listing.
#[derive(Debug, Clone)]
pub struct ObjectEntry {
    pub id: ObjectId,
    pub name: String,
}

/// Narrow interface to the remote blob store.
///
/// Every `name` crossing this boundary is a name-encrypted token; the store
/// never sees plaintext paths, timestamps, or structure. Passing `None` as
/// the parent addresses the store root.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn create_container(&self, name: &str, parent: Option<&ObjectId>) -> Result<ObjectId>;

    async fn put_object(&self, name: &str, parent: &ObjectId, data: Bytes) -> Result<ObjectId>;

    async fn get_object(&self, id: &ObjectId) -> Result<Bytes>;

    async fn list_children(&self, parent: Option<&ObjectId>) -> Result<Vec<ObjectEntry>>;
}
