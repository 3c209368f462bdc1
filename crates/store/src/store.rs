//! Storage abstraction for session documents.

use async_trait::async_trait;

use crate::{
    ObjectId,
    document::{Document, FieldUpdate, Fields, IndexInfo},
    error::Result,
};

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Human-readable backend name (e.g. "memory", "sqlite").
    fn backend_name(&self) -> &'static str;

    /// Insert a new document and return the identifier the store assigned.
    async fn insert(&self, fields: Fields) -> Result<ObjectId>;

    async fn fetch(&self, id: &ObjectId) -> Result<Option<Document>>;

    /// Delete by identifier. Returns the number of documents removed (0 or 1).
    async fn delete(&self, id: &ObjectId) -> Result<u64>;

    /// Delete every document whose millisecond timestamp `field` is strictly
    /// before `before_ms`. Documents without a numeric `field` are kept.
    async fn delete_older_than(&self, field: &str, before_ms: i64) -> Result<u64>;

    /// Atomically apply `ops` to an existing document and return the result.
    ///
    /// Never upserts: returns `Ok(None)` when no document with `id` exists.
    /// If any op fails the stored document is left untouched.
    async fn modify(&self, id: &ObjectId, ops: &[FieldUpdate]) -> Result<Option<Document>>;

    async fn list_indexes(&self) -> Result<Vec<IndexInfo>>;
}
