use {
    serde::{Deserialize, Serialize},
    serde_json::{Map, Value},
};

use crate::{
    ObjectId,
    error::{Result, StoreError},
};

/// Top-level fields of a document, excluding its identifier.
pub type Fields = Map<String, Value>;

/// Name under which a document's identifier is addressed; never writable.
pub const ID_FIELD: &str = "_id";

/// A stored document: identifier plus its JSON fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: ObjectId,
    pub fields: Fields,
}

impl Document {
    pub fn new(id: ObjectId, fields: Fields) -> Self {
        Self { id, fields }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Read a top-level timestamp stored as integer milliseconds.
    pub fn millis(&self, name: &str) -> Option<i64> {
        millis_of(&self.fields, name)
    }
}

/// Timestamps are persisted as milliseconds since the Unix epoch. Floats are
/// truncated so documents written by other clients still compare.
pub fn millis_of(fields: &Fields, name: &str) -> Option<i64> {
    let value = fields.get(name)?;
    value.as_i64().or_else(|| value.as_f64().map(|f| f as i64))
}

/// A single field mutation addressed by a dotted path (`values.user`).
#[derive(Debug, Clone, PartialEq)]
pub enum FieldUpdate {
    /// Write `value` at `path`, creating intermediate objects.
    Set { path: String, value: Value },
    /// Remove the field at `path`; missing paths are ignored.
    Unset { path: String },
    /// Write `value` at `path` unless an object is already there.
    EnsureObject { path: String, value: Fields },
}

impl FieldUpdate {
    pub fn set(path: impl Into<String>, value: Value) -> Self {
        Self::Set {
            path: path.into(),
            value,
        }
    }

    pub fn unset(path: impl Into<String>) -> Self {
        Self::Unset { path: path.into() }
    }

    pub fn ensure_object(path: impl Into<String>, value: Fields) -> Self {
        Self::EnsureObject {
            path: path.into(),
            value,
        }
    }

    pub fn path(&self) -> &str {
        match self {
            Self::Set { path, .. } | Self::Unset { path } | Self::EnsureObject { path, .. } => path,
        }
    }

    /// Apply this update to `fields` in place.
    pub fn apply(&self, fields: &mut Fields) -> Result<()> {
        match self {
            Self::Set { path, value } => set_path(fields, path, value.clone()),
            Self::Unset { path } => unset_path(fields, path),
            Self::EnsureObject { path, value } => {
                if matches!(get_path(fields, path)?, Some(Value::Object(_))) {
                    Ok(())
                } else {
                    set_path(fields, path, Value::Object(value.clone()))
                }
            },
        }
    }
}

/// Apply `ops` in order. On error `fields` may be partially updated, so
/// callers apply to a scratch copy and only keep it on success.
pub fn apply_updates(fields: &mut Fields, ops: &[FieldUpdate]) -> Result<()> {
    for op in ops {
        op.apply(fields)?;
    }
    Ok(())
}

fn split_path(path: &str) -> Result<(Vec<&str>, &str)> {
    let invalid = |reason: &str| StoreError::InvalidPath {
        path: path.to_string(),
        reason: reason.to_string(),
    };
    let mut segments: Vec<&str> = path.split('.').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(invalid("empty path segment"));
    }
    if segments[0] == ID_FIELD {
        return Err(invalid("the identifier is immutable"));
    }
    let leaf = segments.pop().ok_or_else(|| invalid("empty path"))?;
    Ok((segments, leaf))
}

fn get_path<'a>(fields: &'a Fields, path: &str) -> Result<Option<&'a Value>> {
    let (parents, leaf) = split_path(path)?;
    let mut current = fields;
    for segment in parents {
        match current.get(segment) {
            Some(Value::Object(map)) => current = map,
            _ => return Ok(None),
        }
    }
    Ok(current.get(leaf))
}

fn set_path(fields: &mut Fields, path: &str, value: Value) -> Result<()> {
    let (parents, leaf) = split_path(path)?;
    let mut current = fields;
    for segment in parents {
        let entry = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        current = match entry {
            Value::Object(map) => map,
            _ => {
                return Err(StoreError::InvalidPath {
                    path: path.to_string(),
                    reason: format!("`{segment}` is not an object"),
                });
            },
        };
    }
    current.insert(leaf.to_string(), value);
    Ok(())
}

fn unset_path(fields: &mut Fields, path: &str) -> Result<()> {
    let (parents, leaf) = split_path(path)?;
    let mut current = fields;
    for segment in parents {
        match current.get_mut(segment) {
            Some(Value::Object(map)) => current = map,
            _ => return Ok(()),
        }
    }
    current.remove(leaf);
    Ok(())
}

/// An index as reported by the store. `expire_after_seconds` marks a TTL
/// index: the store removes documents once `key` is older than that.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexInfo {
    pub name: String,
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expire_after_seconds: Option<u64>,
}

impl IndexInfo {
    /// A TTL index named the way document databases name single-field indexes.
    pub fn ttl(key: &str, expire_after_seconds: u64) -> Self {
        Self {
            name: format!("{key}_1"),
            key: key.to_string(),
            expire_after_seconds: Some(expire_after_seconds),
        }
    }
}
