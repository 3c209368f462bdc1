//! In-process document store. Used by tests and single-process deployments.

use std::{
    collections::HashMap,
    time::{SystemTime, UNIX_EPOCH},
};

use {async_trait::async_trait, tokio::sync::RwLock, tracing::debug};

use crate::{
    ObjectId,
    document::{Document, FieldUpdate, Fields, IndexInfo, apply_updates, millis_of},
    error::Result,
    store::DocumentStore,
};

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    documents: RwLock<HashMap<ObjectId, Fields>>,
    indexes: RwLock<Vec<IndexInfo>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with existing documents, keeping their identifiers.
    pub fn with_documents(documents: impl IntoIterator<Item = Document>) -> Self {
        let documents = documents
            .into_iter()
            .map(|doc| (doc.id, doc.fields))
            .collect();
        Self {
            documents: RwLock::new(documents),
            indexes: RwLock::default(),
        }
    }

    /// Declare a TTL index on `key`. Nothing is removed until
    /// [`sweep_expired`](Self::sweep_expired) runs.
    pub fn with_ttl_index(mut self, key: &str, expire_after_seconds: u64) -> Self {
        self.indexes
            .get_mut()
            .push(IndexInfo::ttl(key, expire_after_seconds));
        self
    }

    pub async fn create_index(&self, index: IndexInfo) {
        let mut indexes = self.indexes.write().await;
        indexes.retain(|i| i.name != index.name);
        indexes.push(index);
    }

    pub async fn contains(&self, id: &ObjectId) -> bool {
        self.documents.read().await.contains_key(id)
    }

    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.documents.read().await.is_empty()
    }

    /// Remove documents past any TTL index, like a database's TTL monitor.
    pub async fn sweep_expired(&self) -> u64 {
        let ttl: Vec<(String, u64)> = self
            .indexes
            .read()
            .await
            .iter()
            .filter_map(|i| i.expire_after_seconds.map(|secs| (i.key.clone(), secs)))
            .collect();
        let now = now_ms();
        let mut removed = 0;
        for (key, secs) in ttl {
            let cutoff = now.saturating_sub(secs.saturating_mul(1000) as i64);
            removed += self.delete_before(&key, cutoff).await;
        }
        removed
    }

    async fn delete_before(&self, field: &str, before_ms: i64) -> u64 {
        let mut documents = self.documents.write().await;
        let before = documents.len();
        documents.retain(|_, fields| millis_of(fields, field).is_none_or(|ms| ms >= before_ms));
        (before - documents.len()) as u64
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn insert(&self, fields: Fields) -> Result<ObjectId> {
        let id = ObjectId::new();
        self.documents.write().await.insert(id, fields);
        debug!(%id, "inserted document");
        Ok(id)
    }

    async fn fetch(&self, id: &ObjectId) -> Result<Option<Document>> {
        let documents = self.documents.read().await;
        Ok(documents
            .get(id)
            .map(|fields| Document::new(*id, fields.clone())))
    }

    async fn delete(&self, id: &ObjectId) -> Result<u64> {
        Ok(u64::from(self.documents.write().await.remove(id).is_some()))
    }

    async fn delete_older_than(&self, field: &str, before_ms: i64) -> Result<u64> {
        Ok(self.delete_before(field, before_ms).await)
    }

    async fn modify(&self, id: &ObjectId, ops: &[FieldUpdate]) -> Result<Option<Document>> {
        let mut documents = self.documents.write().await;
        let Some(stored) = documents.get_mut(id) else {
            return Ok(None);
        };
        let mut updated = stored.clone();
        apply_updates(&mut updated, ops)?;
        *stored = updated.clone();
        Ok(Some(Document::new(*id, updated)))
    }

    async fn list_indexes(&self) -> Result<Vec<IndexInfo>> {
        Ok(self.indexes.read().await.clone())
    }
}
