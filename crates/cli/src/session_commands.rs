use std::{sync::Arc, time::Duration};

use {
    anyhow::{Context, Result, bail},
    clap::Subcommand,
    serde_json::{Map, Value},
    tracing::{info, warn},
};

use {
    docket_config::{DocketConfig, StoreBackend, StoreConfig},
    docket_sessions::{SessionFactory, SessionRecord, SessionSink, layout::CREATED_FIELD},
    docket_store::{DocumentStore, MemoryStore, SqliteStore},
};

#[derive(Subcommand)]
pub enum SessionAction {
    /// Create a new session and print its id.
    Create,
    /// Print a session's values as JSON.
    Show {
        /// Session id (24 hex characters).
        id: String,
    },
    /// Store a value under a key. The value is parsed as JSON, falling back
    /// to a plain string.
    Set {
        id: String,
        key: String,
        value: String,
    },
    /// Remove a key from a session.
    Unset { id: String, key: String },
    /// Delete a session.
    Destroy { id: String },
    /// Delete every session past its lifetime.
    Gc,
    /// Declare a TTL index on the creation timestamp (sqlite backend only).
    TtlIndex {
        /// Seconds after creation at which documents expire.
        seconds: u64,
    },
    /// Run the TTL monitor in the foreground until interrupted.
    Sweep,
}

pub async fn handle_sessions(action: SessionAction, config: &DocketConfig) -> Result<()> {
    let backend = open_backend(&config.store).await?;
    match action {
        SessionAction::Create => create(&backend.factory(config).await?).await,
        SessionAction::Show { id } => show(&backend.factory(config).await?, &id).await,
        SessionAction::Set { id, key, value } => {
            set(&backend.factory(config).await?, &id, &key, &value).await
        },
        SessionAction::Unset { id, key } => unset(&backend.factory(config).await?, &id, &key).await,
        SessionAction::Destroy { id } => destroy(&backend.factory(config).await?, &id).await,
        SessionAction::Gc => gc(&backend.factory(config).await?).await,
        SessionAction::TtlIndex { seconds } => ttl_index(&backend, seconds).await,
        SessionAction::Sweep => sweep(&backend, config.store.ttl_sweep_secs).await,
    }
}

/// The configured store, plus the concrete sqlite handle for the commands
/// that manage indexes.
struct Backend {
    store: Arc<dyn DocumentStore>,
    sqlite: Option<Arc<SqliteStore>>,
}

impl Backend {
    async fn factory(&self, config: &DocketConfig) -> Result<SessionFactory> {
        Ok(SessionFactory::from_config(Arc::clone(&self.store), &config.sessions).await?)
    }

    fn sqlite(&self, command: &str) -> Result<&Arc<SqliteStore>> {
        match &self.sqlite {
            Some(sqlite) => Ok(sqlite),
            None => bail!("{command} requires the sqlite backend"),
        }
    }
}

async fn open_backend(config: &StoreConfig) -> Result<Backend> {
    match config.backend {
        StoreBackend::Sqlite => {
            let sqlite = SqliteStore::connect(&config.url, config.collection.clone())
                .await
                .with_context(|| format!("connecting to {}", config.url))?;
            let sqlite = Arc::new(sqlite);
            Ok(Backend {
                store: sqlite.clone(),
                sqlite: Some(sqlite),
            })
        },
        StoreBackend::Memory => {
            warn!("memory backend does not persist between invocations");
            Ok(Backend {
                store: Arc::new(MemoryStore::new()),
                sqlite: None,
            })
        },
    }
}

/// Prints association changes instead of writing cookies.
struct PrintSink;

impl SessionSink for PrintSink {
    fn attach(&mut self, session: &SessionRecord) {
        println!("attach {}", session.id());
    }

    fn detach(&mut self, session: &SessionRecord) {
        println!("detach {}", session.id());
    }
}

async fn open_session(factory: &SessionFactory, id: &str) -> Result<SessionRecord> {
    match factory.open(id).await {
        Ok(Some(session)) => Ok(session),
        Ok(None) => bail!("session {id} not found or expired"),
        Err(e) if e.is_invalid() => bail!("invalid session id {id:?}"),
        Err(e) => Err(e.into()),
    }
}

fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn render(session: &SessionRecord) -> Result<Value> {
    let mut values = Map::new();
    for key in session.keys()? {
        let value = session.value_or(&key, Value::Null)?;
        values.insert(key, value);
    }
    Ok(serde_json::json!({
        "id": session.id().to_string(),
        "expires_at": session.expires_at(),
        "values": values,
    }))
}

async fn create(factory: &SessionFactory) -> Result<()> {
    let mut session = factory.create().await?;
    session.transmit(&mut PrintSink);
    Ok(())
}

async fn show(factory: &SessionFactory, id: &str) -> Result<()> {
    let session = open_session(factory, id).await?;
    println!("{}", serde_json::to_string_pretty(&render(&session)?)?);
    Ok(())
}

async fn set(factory: &SessionFactory, id: &str, key: &str, raw: &str) -> Result<()> {
    let mut session = open_session(factory, id).await?;
    session.register(key, &parse_value(raw)).await?;
    session.transmit(&mut PrintSink);
    Ok(())
}

async fn unset(factory: &SessionFactory, id: &str, key: &str) -> Result<()> {
    let mut session = open_session(factory, id).await?;
    session.remove(key).await?;
    session.transmit(&mut PrintSink);
    Ok(())
}

async fn destroy(factory: &SessionFactory, id: &str) -> Result<()> {
    let mut session = open_session(factory, id).await?;
    session.destroy().await?;
    println!("destroyed {id}");
    Ok(())
}

async fn gc(factory: &SessionFactory) -> Result<()> {
    if factory.uses_ttl() {
        println!("Expiry is delegated to the store's TTL index, nothing to collect.");
        return Ok(());
    }
    let count = factory.collect_expired().await?;
    println!("Removed {count} expired session(s).");
    Ok(())
}

async fn ttl_index(backend: &Backend, seconds: u64) -> Result<()> {
    let sqlite = backend.sqlite("ttl-index")?;
    let index = sqlite.create_ttl_index(CREATED_FIELD, seconds).await?;
    println!(
        "Index {} on {} expires documents after {seconds}s.",
        index.name, index.key
    );
    Ok(())
}

async fn sweep(backend: &Backend, every_secs: u64) -> Result<()> {
    let sqlite = backend.sqlite("sweep")?;
    if every_secs == 0 {
        bail!("store.ttl_sweep_secs is 0, the sweeper is disabled");
    }
    let handle = Arc::clone(sqlite).spawn_ttl_monitor(Duration::from_secs(every_secs));
    info!(
        collection = sqlite.collection(),
        every_secs, "ttl monitor running, press Ctrl-C to stop"
    );
    tokio::signal::ctrl_c().await?;
    handle.abort();
    Ok(())
}
