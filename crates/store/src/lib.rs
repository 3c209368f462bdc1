//! Document storage for session records.
//!
//! A [`DocumentStore`] holds JSON documents keyed by a store-assigned
//! [`ObjectId`] and supports atomic, non-upserting field updates addressed by
//! dotted paths. Two backends ship with the crate: an in-process
//! [`MemoryStore`] and a SQLite-backed [`SqliteStore`].

pub mod document;
pub mod error;
pub mod id;
pub mod memory;
pub mod sqlite;
pub mod store;

pub use {
    document::{Document, FieldUpdate, Fields, IndexInfo},
    error::{ParseObjectIdError, Result, StoreError},
    id::ObjectId,
    memory::MemoryStore,
    sqlite::SqliteStore,
    store::DocumentStore,
};
