use std::{
    fmt,
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use {
    docket_store::{Document, DocumentStore, FieldUpdate, ObjectId},
    serde::{Serialize, de::DeserializeOwned},
    serde_json::{Map, Value},
    tracing::debug,
};

use crate::{
    error::{Result, SessionError},
    key::{decode_key, encode_key},
    layout::{Normalized, VALUES_FIELD},
    sink::SessionSink,
};

pub(crate) fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// One session's data, backed by a single document.
///
/// Every value operation first checks the expiry deadline. Mutations go
/// straight to the store as a single atomic update and the in-memory document
/// is replaced by what the store returns, so sibling fields written by other
/// processes are picked up. A record is used by one request at a time.
pub struct SessionRecord {
    store: Arc<dyn DocumentStore>,
    document: Document,
    expires_at: i64,
    is_new: bool,
    detached: bool,
    /// `values` came from a legacy layout and must be written with the next mutation.
    unsaved_layout: bool,
}

impl fmt::Debug for SessionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRecord")
            .field("id", &self.document.id)
            .field("backend", &self.store.backend_name())
            .field("expires_at", &self.expires_at)
            .field("is_new", &self.is_new)
            .field("detached", &self.detached)
            .finish_non_exhaustive()
    }
}

impl SessionRecord {
    pub(crate) fn new(
        store: Arc<dyn DocumentStore>,
        normalized: Normalized,
        expires_at: i64,
        is_new: bool,
    ) -> Self {
        Self {
            store,
            document: normalized.document,
            expires_at,
            is_new,
            detached: false,
            unsaved_layout: normalized.migrated,
        }
    }

    pub fn id(&self) -> &ObjectId {
        &self.document.id
    }

    /// Expiry deadline in milliseconds since the Unix epoch.
    pub fn expires_at(&self) -> i64 {
        self.expires_at
    }

    pub fn is_new(&self) -> bool {
        self.is_new
    }

    pub fn valid(&self) -> bool {
        now_ms() < self.expires_at
    }

    fn invalid(&self) -> SessionError {
        SessionError::SessionInvalid {
            id: self.document.id.to_string(),
        }
    }

    fn ensure_valid(&self) -> Result<()> {
        if self.valid() {
            Ok(())
        } else {
            Err(self.invalid())
        }
    }

    fn values(&self) -> Option<&Map<String, Value>> {
        self.document.get(VALUES_FIELD).and_then(Value::as_object)
    }

    /// All session keys, decoded. Order is unspecified.
    pub fn keys(&self) -> Result<Vec<String>> {
        self.ensure_valid()?;
        Ok(self
            .values()
            .map(|values| values.keys().map(|k| decode_key(k).into_owned()).collect())
            .unwrap_or_default())
    }

    /// The raw value stored under `key`, if any.
    pub fn value(&self, key: &str) -> Result<Option<&Value>> {
        self.ensure_valid()?;
        Ok(self
            .values()
            .and_then(|values| values.get(&*encode_key(key))))
    }

    pub fn value_or(&self, key: &str, default: Value) -> Result<Value> {
        Ok(self.value(key)?.cloned().unwrap_or(default))
    }

    /// The value under `key` deserialized into `T`.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        self.value(key)?
            .map(|value| {
                T::deserialize(value).map_err(|source| SessionError::Serialization {
                    key: key.to_string(),
                    source,
                })
            })
            .transpose()
    }

    /// Write `value` under `key`.
    ///
    /// Fails with [`SessionError::SessionInvalid`] if the record expired or the
    /// document no longer exists in the store, and with
    /// [`SessionError::EmptyKey`] for `""`.
    pub async fn register<T: Serialize + ?Sized>(&mut self, key: &str, value: &T) -> Result<()> {
        self.ensure_valid()?;
        ensure_key(key)?;
        let value = serde_json::to_value(value).map_err(|source| SessionError::Serialization {
            key: key.to_string(),
            source,
        })?;
        self.update(FieldUpdate::set(field_path(key), value)).await
    }

    /// Remove `key`. Removing an absent key still requires the document to exist.
    pub async fn remove(&mut self, key: &str) -> Result<()> {
        self.ensure_valid()?;
        ensure_key(key)?;
        self.update(FieldUpdate::unset(field_path(key))).await
    }

    async fn update(&mut self, op: FieldUpdate) -> Result<()> {
        let mut ops = Vec::with_capacity(2);
        if self.unsaved_layout {
            // No-op when another writer already migrated the document.
            let values = self.values().cloned().unwrap_or_default();
            ops.push(FieldUpdate::ensure_object(VALUES_FIELD, values));
        }
        ops.push(op);

        match self.store.modify(&self.document.id, &ops).await? {
            Some(document) => {
                self.document = document;
                self.unsaved_layout = false;
                Ok(())
            },
            None => {
                debug!(id = %self.document.id, "session document vanished from store");
                Err(self.invalid())
            },
        }
    }

    /// Invalidate the record and delete its document.
    ///
    /// Always issues the delete, even when the record is already invalid.
    pub async fn destroy(&mut self) -> Result<()> {
        self.expires_at = now_ms() - 1;
        self.is_new = false;
        self.detached = true;
        let deleted = self.store.delete(&self.document.id).await?;
        debug!(id = %self.document.id, deleted, "destroyed session");
        Ok(())
    }

    /// Report association changes to `sink`: attach once for a new session,
    /// detach once after it has become invalid.
    pub fn transmit(&mut self, sink: &mut dyn SessionSink) {
        if self.is_new {
            sink.attach(self);
            self.is_new = false;
        } else if !self.detached && !self.valid() {
            sink.detach(self);
            self.detached = true;
        }
    }
}

fn ensure_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(SessionError::EmptyKey);
    }
    Ok(())
}

fn field_path(key: &str) -> String {
    format!("{VALUES_FIELD}.{}", encode_key(key))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use {
        super::*,
        crate::{factory::SessionFactory, layout::CREATED_FIELD},
        docket_store::MemoryStore,
        serde_json::json,
    };

    #[derive(Default)]
    struct RecordingSink {
        attached: Vec<String>,
        detached: Vec<String>,
    }

    impl SessionSink for RecordingSink {
        fn attach(&mut self, session: &SessionRecord) {
            self.attached.push(session.id().to_string());
        }

        fn detach(&mut self, session: &SessionRecord) {
            self.detached.push(session.id().to_string());
        }
    }

    fn setup() -> (Arc<MemoryStore>, SessionFactory) {
        let store = Arc::new(MemoryStore::new());
        let factory = SessionFactory::new(store.clone());
        (store, factory)
    }

    fn legacy(fields: Value) -> Document {
        let mut fields = fields.as_object().cloned().unwrap();
        fields.insert(CREATED_FIELD.into(), json!(now_ms()));
        Document::new(ObjectId::new(), fields)
    }

    #[tokio::test]
    async fn test_register_then_value() {
        let (_, factory) = setup();
        let mut session = factory.create().await.unwrap();

        session.register("user", "alice").await.unwrap();
        session.register("cart", &vec![1, 2, 3]).await.unwrap();

        assert_eq!(session.value("user").unwrap(), Some(&json!("alice")));
        assert_eq!(session.get::<Vec<u32>>("cart").unwrap(), Some(vec![1, 2, 3]));
        let mut keys = session.keys().unwrap();
        keys.sort();
        assert_eq!(keys, vec!["cart", "user"]);
    }

    #[tokio::test]
    async fn test_remove_then_default() {
        let (_, factory) = setup();
        let mut session = factory.create().await.unwrap();
        session.register("user", "alice").await.unwrap();

        session.remove("user").await.unwrap();
        assert_eq!(session.value("user").unwrap(), None);
        assert_eq!(
            session.value_or("user", json!("anonymous")).unwrap(),
            json!("anonymous")
        );
        assert!(session.keys().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_keys_with_special_characters() {
        let (store, factory) = setup();
        let mut session = factory.create().await.unwrap();

        session.register("a.b", &1).await.unwrap();
        session.register("50%", &2).await.unwrap();

        assert_eq!(session.value("a.b").unwrap(), Some(&json!(1)));
        assert_eq!(session.value("50%").unwrap(), Some(&json!(2)));
        let mut keys = session.keys().unwrap();
        keys.sort();
        assert_eq!(keys, vec!["50%", "a.b"]);

        // stored flat under encoded names, not nested
        let stored = store.fetch(session.id()).await.unwrap().unwrap();
        assert_eq!(stored.fields["values"], json!({ "a%2eb": 1, "50%25": 2 }));
    }

    #[tokio::test]
    async fn test_register_picks_up_sibling_writes() {
        let (_, factory) = setup();
        let mut first = factory.create().await.unwrap();
        let id = first.id().to_string();
        let mut second = factory.open(&id).await.unwrap().unwrap();

        second.register("theme", "dark").await.unwrap();
        first.register("user", "alice").await.unwrap();

        assert_eq!(first.value("theme").unwrap(), Some(&json!("dark")));
        assert_eq!(first.value("user").unwrap(), Some(&json!("alice")));
    }

    #[tokio::test]
    async fn test_mutation_after_external_delete_is_invalid() {
        let (store, factory) = setup();
        let mut session = factory.create().await.unwrap();
        store.delete(session.id()).await.unwrap();

        let err = session.register("user", "alice").await.unwrap_err();
        assert!(matches!(err, SessionError::SessionInvalid { .. }));
        let err = session.remove("user").await.unwrap_err();
        assert!(err.is_invalid());
        // no upsert happened
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_destroy_invalidates_everything() {
        let (store, factory) = setup();
        let mut session = factory.create().await.unwrap();
        session.register("user", "alice").await.unwrap();

        session.destroy().await.unwrap();

        assert!(!session.valid());
        assert!(!store.contains(session.id()).await);
        assert!(session.value("user").unwrap_err().is_invalid());
        assert!(session.keys().unwrap_err().is_invalid());
        assert!(session.register("user", "bob").await.unwrap_err().is_invalid());
        assert!(session.remove("user").await.unwrap_err().is_invalid());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_destroy_is_idempotent() {
        let (store, factory) = setup();
        let mut session = factory.create().await.unwrap();
        session.destroy().await.unwrap();
        session.destroy().await.unwrap();
        assert!(!store.contains(session.id()).await);
    }

    #[tokio::test]
    async fn test_expired_record_rejects_operations() {
        let (_, mut factory) = setup();
        factory.configure(Duration::from_millis(40)).unwrap();
        let mut session = factory.create().await.unwrap();
        session.register("user", "alice").await.unwrap();

        tokio::time::sleep(Duration::from_millis(80)).await;

        assert!(!session.valid());
        assert!(session.value("user").unwrap_err().is_invalid());
        assert!(session.value_or("user", Value::Null).unwrap_err().is_invalid());
        assert!(session.keys().unwrap_err().is_invalid());
        assert!(session.register("user", "bob").await.unwrap_err().is_invalid());
        assert!(session.remove("user").await.unwrap_err().is_invalid());
    }

    #[tokio::test]
    async fn test_get_with_wrong_type() {
        let (_, factory) = setup();
        let mut session = factory.create().await.unwrap();
        session.register("count", "not a number").await.unwrap();
        let err = session.get::<u32>("count").unwrap_err();
        assert!(matches!(err, SessionError::Serialization { ref key, .. } if key == "count"));
        assert_eq!(session.get::<u32>("missing").unwrap(), None);
    }

    #[tokio::test]
    async fn test_legacy_layout_readable() {
        let doc = legacy(json!({ "user": "test", "prefs.lang": "en", "_internal": 1 }));
        let id = doc.id.to_string();
        let store = Arc::new(MemoryStore::with_documents([doc]));
        let factory = SessionFactory::new(store.clone());

        let session = factory.open(&id).await.unwrap().unwrap();
        let mut keys = session.keys().unwrap();
        keys.sort();
        assert_eq!(keys, vec!["prefs.lang", "user"]);
        assert_eq!(session.value("user").unwrap(), Some(&json!("test")));
        assert_eq!(session.value("prefs.lang").unwrap(), Some(&json!("en")));

        // read-only access writes nothing back
        let stored = store.fetch(session.id()).await.unwrap().unwrap();
        assert!(stored.get("values").is_none());
    }

    #[tokio::test]
    async fn test_legacy_layout_persisted_on_first_mutation() {
        let doc = legacy(json!({ "user": "test", "theme": "dark" }));
        let id = doc.id.to_string();
        let store = Arc::new(MemoryStore::with_documents([doc]));
        let factory = SessionFactory::new(store.clone());

        let mut session = factory.open(&id).await.unwrap().unwrap();
        session.remove("theme").await.unwrap();
        session.register("lang", "en").await.unwrap();

        let stored = store.fetch(session.id()).await.unwrap().unwrap();
        assert_eq!(stored.fields["values"], json!({ "user": "test", "lang": "en" }));
        let mut keys = session.keys().unwrap();
        keys.sort();
        assert_eq!(keys, vec!["lang", "user"]);
    }

    #[tokio::test]
    async fn test_legacy_migration_keeps_sibling_writes() {
        let doc = legacy(json!({ "user": "test" }));
        let id = doc.id.to_string();
        let store = Arc::new(MemoryStore::with_documents([doc]));
        let factory = SessionFactory::new(store.clone());

        let mut a = factory.open(&id).await.unwrap().unwrap();
        let mut b = factory.open(&id).await.unwrap().unwrap();
        b.register("cart", &vec![1]).await.unwrap();
        b.remove("user").await.unwrap();
        a.register("theme", "dark").await.unwrap();

        let stored = store.fetch(a.id()).await.unwrap().unwrap();
        assert_eq!(stored.fields["values"], json!({ "cart": [1], "theme": "dark" }));
        assert_eq!(a.value("cart").unwrap(), Some(&json!([1])));
        assert_eq!(a.value("user").unwrap(), None);
    }

    #[tokio::test]
    async fn test_empty_key_rejected() {
        let (store, factory) = setup();
        let mut session = factory.create().await.unwrap();

        let err = session.register("", "x").await.unwrap_err();
        assert!(matches!(err, SessionError::EmptyKey));
        let err = session.remove("").await.unwrap_err();
        assert!(matches!(err, SessionError::EmptyKey));
        assert_eq!(session.value("").unwrap(), None);

        let stored = store.fetch(session.id()).await.unwrap().unwrap();
        assert_eq!(stored.fields["values"], json!({}));
    }

    #[tokio::test]
    async fn test_transmit_attaches_new_session_once() {
        let (_, factory) = setup();
        let mut session = factory.create().await.unwrap();
        let mut sink = RecordingSink::default();

        assert!(session.is_new());
        session.transmit(&mut sink);
        session.transmit(&mut sink);

        assert!(!session.is_new());
        assert_eq!(sink.attached, vec![session.id().to_string()]);
        assert!(sink.detached.is_empty());
    }

    #[tokio::test]
    async fn test_transmit_opened_session_is_silent() {
        let (_, factory) = setup();
        let id = factory.create().await.unwrap().id().to_string();
        let mut session = factory.open(&id).await.unwrap().unwrap();
        let mut sink = RecordingSink::default();

        assert!(!session.is_new());
        session.transmit(&mut sink);
        assert!(sink.attached.is_empty());
        assert!(sink.detached.is_empty());
    }

    #[tokio::test]
    async fn test_transmit_detaches_expired_session_once() {
        let (_, mut factory) = setup();
        factory.configure(Duration::from_millis(40)).unwrap();
        let mut session = factory.create().await.unwrap();
        let mut sink = RecordingSink::default();
        session.transmit(&mut sink);

        tokio::time::sleep(Duration::from_millis(80)).await;
        session.transmit(&mut sink);
        session.transmit(&mut sink);

        assert_eq!(sink.attached.len(), 1);
        assert_eq!(sink.detached, vec![session.id().to_string()]);
    }

    #[tokio::test]
    async fn test_transmit_new_session_expired_before_response() {
        let (_, mut factory) = setup();
        factory.configure(Duration::from_millis(40)).unwrap();
        let mut session = factory.create().await.unwrap();
        let mut sink = RecordingSink::default();

        tokio::time::sleep(Duration::from_millis(80)).await;
        session.transmit(&mut sink);
        assert_eq!(sink.attached.len(), 1);
        assert!(sink.detached.is_empty());

        session.transmit(&mut sink);
        assert_eq!(sink.detached.len(), 1);
    }

    #[tokio::test]
    async fn test_transmit_after_destroy_is_silent() {
        let (_, factory) = setup();
        let mut session = factory.create().await.unwrap();
        let mut sink = RecordingSink::default();

        session.destroy().await.unwrap();
        session.transmit(&mut sink);

        assert!(sink.attached.is_empty());
        assert!(sink.detached.is_empty());
    }
}
