use std::{fmt, sync::Arc, time::Duration};

use {
    docket_config::schema::SessionsConfig,
    docket_store::{Document, DocumentStore, Fields, ObjectId},
    serde_json::{Map, Value},
    tracing::{debug, info, warn},
};

use crate::{
    error::{Result, SessionError},
    layout::{CREATED_FIELD, Normalized, VALUES_FIELD, normalize},
    record::{SessionRecord, now_ms},
};

/// How long a session lasts when nothing else is configured.
pub const DEFAULT_DURATION: Duration = Duration::from_secs(86_400);

/// Creates and opens sessions in a [`DocumentStore`].
///
/// With TTL delegation the store removes expired documents itself: the
/// duration is taken from its TTL index on `_created` and
/// [`collect_expired`](Self::collect_expired) never touches the store.
pub struct SessionFactory {
    store: Arc<dyn DocumentStore>,
    duration: Duration,
    ttl: bool,
}

impl fmt::Debug for SessionFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionFactory")
            .field("backend", &self.store.backend_name())
            .field("duration", &self.duration)
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl SessionFactory {
    /// A factory that expires sessions itself, lasting [`DEFAULT_DURATION`].
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            duration: DEFAULT_DURATION,
            ttl: false,
        }
    }

    /// A factory delegating expiry to the store's TTL index on `_created`.
    ///
    /// Fails with [`SessionError::MissingTtlIndex`] if the store has none.
    pub async fn using_ttl(store: Arc<dyn DocumentStore>) -> Result<Self> {
        let indexes = store.list_indexes().await?;
        let Some(expire_after_seconds) = indexes
            .iter()
            .filter(|index| index.key == CREATED_FIELD)
            .find_map(|index| index.expire_after_seconds)
        else {
            return Err(SessionError::MissingTtlIndex {
                field: CREATED_FIELD,
            });
        };
        debug!(
            backend = store.backend_name(),
            expire_after_seconds, "delegating session expiry to ttl index"
        );
        Ok(Self {
            store,
            duration: Duration::from_secs(expire_after_seconds),
            ttl: true,
        })
    }

    /// Build a factory from the `[sessions]` config section.
    pub async fn from_config(store: Arc<dyn DocumentStore>, config: &SessionsConfig) -> Result<Self> {
        if config.use_ttl {
            if let Some(secs) = config.duration_secs {
                warn!(
                    duration_secs = secs,
                    "sessions.duration_secs is ignored while sessions.use_ttl is set"
                );
            }
            return Self::using_ttl(store).await;
        }
        let mut factory = Self::new(store);
        if let Some(secs) = config.duration_secs {
            factory.configure(Duration::from_secs(secs))?;
        }
        Ok(factory)
    }

    /// Set how long sessions last after creation.
    ///
    /// Fails with [`SessionError::ConfigurationConflict`] under TTL delegation,
    /// where the store's index decides.
    pub fn configure(&mut self, duration: Duration) -> Result<&mut Self> {
        if self.ttl {
            return Err(SessionError::ConfigurationConflict);
        }
        self.duration = duration;
        Ok(self)
    }

    /// Builder form of [`configure`](Self::configure).
    pub fn lasting(mut self, duration: Duration) -> Result<Self> {
        self.configure(duration)?;
        Ok(self)
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn uses_ttl(&self) -> bool {
        self.ttl
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    fn duration_ms(&self) -> i64 {
        i64::try_from(self.duration.as_millis()).unwrap_or(i64::MAX)
    }

    /// Insert a fresh session document and return it as a new record.
    ///
    /// Also runs [`collect_expired`](Self::collect_expired); a failure there is
    /// logged and does not fail the creation.
    pub async fn create(&self) -> Result<SessionRecord> {
        let now = now_ms();
        let mut fields = Fields::new();
        fields.insert(CREATED_FIELD.to_string(), Value::from(now));
        fields.insert(VALUES_FIELD.to_string(), Value::Object(Map::new()));

        let id = self.store.insert(fields.clone()).await?;
        debug!(%id, "created session");

        if let Err(e) = self.collect_expired().await {
            warn!(error = %e, "expired session cleanup failed");
        }

        let normalized = Normalized {
            document: Document::new(id, fields),
            migrated: false,
        };
        Ok(SessionRecord::new(
            Arc::clone(&self.store),
            normalized,
            now.saturating_add(self.duration_ms()),
            true,
        ))
    }

    /// Open an existing, unexpired session.
    ///
    /// Returns `Ok(None)` when no document exists or it has expired, in which
    /// case the expired document is deleted. Malformed identifiers fail with
    /// [`SessionError::InvalidIdentifier`].
    pub async fn open(&self, id: &str) -> Result<Option<SessionRecord>> {
        let id: ObjectId = id.parse()?;
        let Some(document) = self.store.fetch(&id).await? else {
            debug!(%id, "session not found");
            return Ok(None);
        };
        let Some(created) = document.millis(CREATED_FIELD) else {
            warn!(%id, "session document has no readable creation time");
            return Ok(None);
        };

        let expires_at = created.saturating_add(self.duration_ms());
        if now_ms() < expires_at {
            return Ok(Some(SessionRecord::new(
                Arc::clone(&self.store),
                normalize(document),
                expires_at,
                false,
            )));
        }

        // Expired but not yet swept, by us or by the store's TTL monitor.
        let deleted = self.store.delete(&id).await?;
        debug!(%id, deleted, "removed expired session on open");
        Ok(None)
    }

    /// Delete every session older than the configured duration and return
    /// how many were removed. Always `0` under TTL delegation.
    pub async fn collect_expired(&self) -> Result<u64> {
        if self.ttl {
            return Ok(0);
        }
        let before = now_ms().saturating_sub(self.duration_ms());
        let count = self.store.delete_older_than(CREATED_FIELD, before).await?;
        if count > 0 {
            info!(count, "collected expired sessions");
        }
        Ok(count)
    }
}
