//! Session records stored as documents.
//!
//! A [`SessionFactory`] creates and opens sessions against a
//! [`DocumentStore`](docket_store::DocumentStore); each [`SessionRecord`]
//! keeps its values under a nested `values` map and mutates single fields
//! atomically, failing with [`SessionError::SessionInvalid`] once the
//! document has expired or vanished from the store.

pub mod error;
pub mod factory;
pub mod key;
pub mod layout;
pub mod record;
pub mod sink;

pub use {
    error::{Result, SessionError},
    factory::{DEFAULT_DURATION, SessionFactory},
    key::{decode_key, encode_key},
    layout::normalize,
    record::SessionRecord,
    sink::SessionSink,
};
