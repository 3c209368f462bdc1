/// Config schema types (sessions, store).
use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DocketConfig {
    pub sessions: SessionsConfig,
    pub store: StoreConfig,
}

/// Session lifetime policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionsConfig {
    /// Seconds a session lasts after creation. Defaults to one day.
    /// Ignored when `use_ttl` is on; the TTL index decides then.
    pub duration_secs: Option<u64>,

    /// Delegate expiry to a TTL index on `_created` in the store.
    pub use_ttl: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Sqlite,
    Memory,
}

impl std::fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite => f.write_str("sqlite"),
            Self::Memory => f.write_str("memory"),
        }
    }
}

/// Document store connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,

    /// Database URL for the sqlite backend.
    pub url: String,

    /// Collection holding session documents.
    pub collection: String,

    /// How often the sqlite backend sweeps documents past their TTL index.
    /// `0` disables the sweeper.
    pub ttl_sweep_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Sqlite,
            url: "sqlite://docket.db?mode=rwc".into(),
            collection: "sessions".into(),
            ttl_sweep_secs: 60,
        }
    }
}
