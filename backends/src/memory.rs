use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Mutex;
use veilsnap_core::{Error, ObjectEntry, ObjectId, ObjectStore, Result};

struct Entry {
    name: String,
    parent: Option<ObjectId>,
    data: Option<Bytes>,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    next_id: u64,
    put_calls: u64,
    get_calls: u64,
}

/// In-memory object store, used by tests and as a reference
/// implementation of the store contract.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `put_object` calls observed, containers excluded.
    pub fn put_calls(&self) -> u64 {
        self.inner.lock().unwrap().put_calls
    }

    /// Number of `get_object` calls observed.
    pub fn get_calls(&self) -> u64 {
        self.inner.lock().unwrap().get_calls
    }

    /// Number of stored non-container objects.
    pub fn object_count(&self) -> usize {
        self.inner
            .lock()
            .unwrap()
            .entries
            .values()
            .filter(|e| e.data.is_some())
            .count()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn create_container(&self, name: &str, parent: Option<&ObjectId>) -> Result<ObjectId> {
        let mut inner = self.inner.lock().unwrap();
        inner.next_id += 1;
        let id = format!("ctr-{}", inner.next_id);
        inner.entries.insert(
            id.clone(),
            Entry {
                name: name.to_string(),
                parent: parent.cloned(),
                data: None,
            },
        );
        Ok(ObjectId(id))
    }

    async fn put_object(&self, name: &str, parent: &ObjectId, data: Bytes) -> Result<ObjectId> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.entries.contains_key(parent.as_str()) {
            return Err(Error::Store(format!("no such container: {parent}")));
        }
        inner.next_id += 1;
        inner.put_calls += 1;
        let id = format!("obj-{}", inner.next_id);
        inner.entries.insert(
            id.clone(),
            Entry {
                name: name.to_string(),
                parent: Some(parent.clone()),
                data: Some(data),
            },
        );
        Ok(ObjectId(id))
    }

    async fn get_object(&self, id: &ObjectId) -> Result<Bytes> {
        let mut inner = self.inner.lock().unwrap();
        inner.get_calls += 1;
        inner
            .entries
            .get(id.as_str())
            .and_then(|e| e.data.clone())
            .ok_or_else(|| Error::Store(format!("no such object: {id}")))
    }

    async fn list_children(&self, parent: Option<&ObjectId>) -> Result<Vec<ObjectEntry>> {
        let inner = self.inner.lock().unwrap();
        let mut children: Vec<(u64, ObjectEntry)> = inner
            .entries
            .iter()
            .filter(|(_, e)| e.parent.as_ref() == parent)
            .map(|(id, e)| {
                let ordinal: u64 = id
                    .rsplit('-')
                    .next()
                    .and_then(|n| n.parse().ok())
                    .unwrap_or(0);
                (
                    ordinal,
                    ObjectEntry {
                        id: ObjectId(id.clone()),
                        name: e.name.clone(),
                    },
                )
            })
            .collect();
        children.sort_by_key(|(ordinal, _)| *ordinal);
        Ok(children.into_iter().map(|(_, e)| e).collect())
    }
}
