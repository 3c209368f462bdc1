use {
    docket_store::{ParseObjectIdError, StoreError},
    thiserror::Error,
};

pub type Result<T, E = SessionError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum SessionError {
    /// The identifier handed to `open` is not a well-formed object id.
    #[error("invalid session identifier: {0}")]
    InvalidIdentifier(#[from] ParseObjectIdError),

    /// The session has expired, been destroyed, or vanished from the store.
    #[error("session {id} is no longer valid")]
    SessionInvalid { id: String },

    /// Session keys must be non-empty to be written or removed.
    #[error("session key must not be empty")]
    EmptyKey,

    #[error("cannot modify duration when TTL indexes are in use")]
    ConfigurationConflict,

    #[error("no TTL index on `{field}` found")]
    MissingTtlIndex { field: &'static str },

    #[error("session value `{key}` could not be converted: {source}")]
    Serialization {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SessionError {
    /// Whether the caller should treat this as "no session" and start a new one.
    pub fn is_invalid(&self) -> bool {
        matches!(self, Self::SessionInvalid { .. } | Self::InvalidIdentifier(_))
    }
}
