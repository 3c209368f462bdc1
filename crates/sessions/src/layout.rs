//! Session document layout.
//!
//! Current documents look like `{ _created: <ms>, values: { <encoded key>: <value> } }`.
//! Documents written by older releases kept values as top-level fields next
//! to `_created`; [`normalize`] lifts those into `values` in memory.

use {docket_store::Document, serde_json::Value};

use crate::key::encode_key;

/// Creation timestamp, milliseconds since the Unix epoch.
pub const CREATED_FIELD: &str = "_created";

/// Nested map holding session values under encoded keys.
pub const VALUES_FIELD: &str = "values";

/// Top-level fields starting with this are bookkeeping, never session values.
pub const RESERVED_PREFIX: char = '_';

/// A fetched document in the current layout.
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    pub document: Document,
    /// `values` was synthesized from a legacy layout and is not yet persisted.
    pub migrated: bool,
}

/// Bring `document` into the current layout.
///
/// When `values` is missing (or not an object), every top-level field not
/// starting with [`RESERVED_PREFIX`] is copied into a fresh `values` map under
/// its encoded name. The original top-level fields are left in place.
pub fn normalize(mut document: Document) -> Normalized {
    if matches!(document.get(VALUES_FIELD), Some(Value::Object(_))) {
        return Normalized {
            document,
            migrated: false,
        };
    }

    let values = document
        .fields
        .iter()
        .filter(|(name, _)| !name.starts_with(RESERVED_PREFIX))
        .map(|(name, value)| (encode_key(name).into_owned(), value.clone()))
        .collect();
    document
        .fields
        .insert(VALUES_FIELD.to_string(), Value::Object(values));

    Normalized {
        document,
        migrated: true,
    }
}
