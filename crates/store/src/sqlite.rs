//! SQLite-backed document store.
//!
//! Documents live as JSON text in a single `documents` table partitioned by
//! collection name. TTL indexes are recorded in `document_indexes` and enforced
//! by [`SqliteStore::sweep_expired`], which [`SqliteStore::spawn_ttl_monitor`]
//! runs on an interval.

use std::{
    str::FromStr,
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use {
    async_trait::async_trait,
    sqlx::sqlite::SqliteConnectOptions,
    tokio::{task::JoinHandle, time::MissedTickBehavior},
    tracing::{debug, warn},
};

use crate::{
    ObjectId,
    document::{Document, FieldUpdate, Fields, IndexInfo, apply_updates},
    error::{Result, StoreError},
    store::DocumentStore,
};

/// How long a write waits for another connection's lock.
pub const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// JSON path for a dotted field name with every segment quoted, so encoded
/// keys such as `a%2eb` are addressed literally.
fn json_path(field: &str) -> String {
    let mut path = String::from("$");
    for segment in field.split('.') {
        path.push_str(".\"");
        path.push_str(segment);
        path.push('"');
    }
    path
}

pub struct SqliteStore {
    pool: sqlx::SqlitePool,
    collection: String,
}

#[derive(sqlx::FromRow)]
struct DocumentRow {
    id: String,
    body: String,
}

impl TryFrom<DocumentRow> for Document {
    type Error = StoreError;

    fn try_from(row: DocumentRow) -> Result<Self> {
        let id = row.id.parse::<ObjectId>().map_err(|e| StoreError::Corrupt {
            id: row.id.clone(),
            reason: e.to_string(),
        })?;
        let fields: Fields = serde_json::from_str(&row.body).map_err(|e| StoreError::Corrupt {
            id: row.id.clone(),
            reason: e.to_string(),
        })?;
        Ok(Self::new(id, fields))
    }
}

#[derive(sqlx::FromRow)]
struct IndexRow {
    name: String,
    key_field: String,
    expire_after_seconds: Option<i64>,
}

impl From<IndexRow> for IndexInfo {
    fn from(r: IndexRow) -> Self {
        Self {
            name: r.name,
            key: r.key_field,
            expire_after_seconds: r.expire_after_seconds.map(|s| s.max(0) as u64),
        }
    }
}

impl SqliteStore {
    pub fn new(pool: sqlx::SqlitePool, collection: impl Into<String>) -> Self {
        Self {
            pool,
            collection: collection.into(),
        }
    }

    /// Connect to `url` (e.g. `sqlite://sessions.db?mode=rwc`), create the
    /// schema if needed, and scope the store to `collection`.
    ///
    /// Writers queue on the database lock for up to [`BUSY_TIMEOUT`].
    pub async fn connect(url: &str, collection: impl Into<String>) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?.busy_timeout(BUSY_TIMEOUT);
        let pool = sqlx::SqlitePool::connect_with(options).await?;
        Self::init(&pool).await?;
        Ok(Self::new(pool, collection))
    }

    /// Create the `documents` and `document_indexes` tables if they don't exist.
    pub async fn init(pool: &sqlx::SqlitePool) -> Result<()> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS documents (
                collection TEXT NOT NULL,
                id         TEXT NOT NULL,
                body       TEXT NOT NULL,
                PRIMARY KEY (collection, id)
            )"#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS document_indexes (
                collection           TEXT NOT NULL,
                name                 TEXT NOT NULL,
                key_field            TEXT NOT NULL,
                expire_after_seconds INTEGER,
                PRIMARY KEY (collection, name)
            )"#,
        )
        .execute(pool)
        .await?;

        Ok(())
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Register (or replace) a TTL index on `key` for this collection.
    pub async fn create_ttl_index(&self, key: &str, expire_after_seconds: u64) -> Result<IndexInfo> {
        let index = IndexInfo::ttl(key, expire_after_seconds);
        sqlx::query(
            r#"INSERT INTO document_indexes (collection, name, key_field, expire_after_seconds)
               VALUES (?, ?, ?, ?)
               ON CONFLICT(collection, name) DO UPDATE SET
                 key_field = excluded.key_field,
                 expire_after_seconds = excluded.expire_after_seconds"#,
        )
        .bind(&self.collection)
        .bind(&index.name)
        .bind(&index.key)
        .bind(expire_after_seconds as i64)
        .execute(&self.pool)
        .await?;
        debug!(collection = %self.collection, name = %index.name, expire_after_seconds, "created ttl index");
        Ok(index)
    }

    /// Drop an index by name. Returns whether it existed.
    pub async fn drop_index(&self, name: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM document_indexes WHERE collection = ? AND name = ?")
            .bind(&self.collection)
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Remove every document past one of this collection's TTL indexes.
    pub async fn sweep_expired(&self) -> Result<u64> {
        let now = now_ms();
        let mut removed = 0;
        for index in self.list_indexes().await? {
            let Some(secs) = index.expire_after_seconds else {
                continue;
            };
            let cutoff = now.saturating_sub(secs.saturating_mul(1000) as i64);
            removed += self.delete_older_than(&index.key, cutoff).await?;
        }
        Ok(removed)
    }

    /// Run [`sweep_expired`](Self::sweep_expired) every `every` until the
    /// returned handle is aborted.
    pub fn spawn_ttl_monitor(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match self.sweep_expired().await {
                    Ok(0) => {},
                    Ok(count) => {
                        debug!(collection = %self.collection, count, "ttl monitor removed expired documents");
                    },
                    Err(e) => warn!(collection = %self.collection, error = %e, "ttl monitor sweep failed"),
                }
            }
        })
    }
}

#[async_trait]
impl DocumentStore for SqliteStore {
    fn backend_name(&self) -> &'static str {
        "sqlite"
    }

    async fn insert(&self, fields: Fields) -> Result<ObjectId> {
        let id = ObjectId::new();
        sqlx::query("INSERT INTO documents (collection, id, body) VALUES (?, ?, ?)")
            .bind(&self.collection)
            .bind(id.to_string())
            .bind(serde_json::to_string(&fields)?)
            .execute(&self.pool)
            .await?;
        Ok(id)
    }

    async fn fetch(&self, id: &ObjectId) -> Result<Option<Document>> {
        sqlx::query_as::<_, DocumentRow>(
            "SELECT id, body FROM documents WHERE collection = ? AND id = ?",
        )
        .bind(&self.collection)
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?
        .map(Document::try_from)
        .transpose()
    }

    async fn delete(&self, id: &ObjectId) -> Result<u64> {
        let result = sqlx::query("DELETE FROM documents WHERE collection = ? AND id = ?")
            .bind(&self.collection)
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete_older_than(&self, field: &str, before_ms: i64) -> Result<u64> {
        let result = sqlx::query(
            r#"DELETE FROM documents
               WHERE collection = ?1
                 AND json_type(body, ?2) IN ('integer', 'real')
                 AND json_extract(body, ?2) < ?3"#,
        )
        .bind(&self.collection)
        .bind(json_path(field))
        .bind(before_ms)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn modify(&self, id: &ObjectId, ops: &[FieldUpdate]) -> Result<Option<Document>> {
        let key = id.to_string();
        let mut tx = self.pool.begin().await?;

        // Write first so the transaction holds the write lock before reading.
        // A read lock upgraded later fails with SQLITE_BUSY under contention
        // instead of waiting out the busy timeout.
        let claimed = sqlx::query("UPDATE documents SET body = body WHERE collection = ? AND id = ?")
            .bind(&self.collection)
            .bind(&key)
            .execute(&mut *tx)
            .await?;
        if claimed.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        let (body,): (String,) =
            sqlx::query_as("SELECT body FROM documents WHERE collection = ? AND id = ?")
                .bind(&self.collection)
                .bind(&key)
                .fetch_one(&mut *tx)
                .await?;

        let mut fields: Fields = serde_json::from_str(&body).map_err(|e| StoreError::Corrupt {
            id: key.clone(),
            reason: e.to_string(),
        })?;
        apply_updates(&mut fields, ops)?;

        sqlx::query("UPDATE documents SET body = ? WHERE collection = ? AND id = ?")
            .bind(serde_json::to_string(&fields)?)
            .bind(&self.collection)
            .bind(&key)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(Some(Document::new(*id, fields)))
    }

    async fn list_indexes(&self) -> Result<Vec<IndexInfo>> {
        let rows = sqlx::query_as::<_, IndexRow>(
            "SELECT name, key_field, expire_after_seconds FROM document_indexes
             WHERE collection = ? ORDER BY name",
        )
        .bind(&self.collection)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }
}
