use thiserror::Error;

pub type Result<T, E = StoreError> = std::result::Result<T, E>;

/// Failures raised by a [`DocumentStore`](crate::DocumentStore) backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A field path was empty, addressed `_id`, or traversed a non-object.
    #[error("invalid field path `{path}`: {reason}")]
    InvalidPath { path: String, reason: String },

    /// A stored row could not be turned back into a document.
    #[error("corrupt document {id}: {reason}")]
    Corrupt { id: String, reason: String },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// The input was not 24 hexadecimal characters.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid object id `{0}`: expected 24 hex characters")]
pub struct ParseObjectIdError(pub String);
