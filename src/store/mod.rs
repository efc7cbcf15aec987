//! Persistence contract for departure legs: opaque-id records carrying named
//! attributes, category tags and append-only notes. The core never assumes a
//! richer query surface than attribute equality and tag membership.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryRecordStore;
pub use sqlite::SqliteRecordStore;

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(String),
    #[error("store backend error: {0}")]
    Backend(String),
    #[error("corrupt stored value: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// Wrap an arbitrary backend failure.
    pub fn backend(err: impl std::fmt::Display) -> Self {
        StoreError::Backend(err.to_string())
    }
}

/// Canonical rendering for timestamp values. Equality queries compare this
/// form, so lookups are stable at whole-second precision.
pub fn canonical_time(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// A typed attribute value attached to a record.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Text(String),
    Time(DateTime<Utc>),
    Json(serde_json::Value),
}

impl AttrValue {
    pub fn text(value: impl Into<String>) -> Self {
        AttrValue::Text(value.into())
    }

    pub fn time(value: DateTime<Utc>) -> Self {
        AttrValue::Time(value)
    }

    pub fn json(value: serde_json::Value) -> Self {
        AttrValue::Json(value)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            AttrValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_time(&self) -> Option<DateTime<Utc>> {
        match self {
            AttrValue::Time(t) => Some(*t),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            AttrValue::Json(v) => Some(v),
            _ => None,
        }
    }

    /// Storage discriminator persisted next to the rendered value.
    pub fn storage_type(&self) -> &'static str {
        match self {
            AttrValue::Text(_) => "text",
            AttrValue::Time(_) => "time",
            AttrValue::Json(_) => "json",
        }
    }

    /// Canonical storage rendering; both implementations compare equality on
    /// this string together with the storage type.
    pub fn storage_value(&self) -> String {
        match self {
            AttrValue::Text(s) => s.clone(),
            AttrValue::Time(t) => canonical_time(*t),
            AttrValue::Json(v) => v.to_string(),
        }
    }

    /// Rebuild a value from its storage pair.
    pub fn from_storage(value_type: &str, raw: &str) -> StoreResult<Self> {
        match value_type {
            "text" => Ok(AttrValue::Text(raw.to_string())),
            "time" => DateTime::parse_from_rfc3339(raw)
                .map(|t| AttrValue::Time(t.with_timezone(&Utc)))
                .map_err(|e| StoreError::Corrupt(format!("bad timestamp {raw:?}: {e}"))),
            "json" => serde_json::from_str(raw)
                .map(AttrValue::Json)
                .map_err(|e| StoreError::Corrupt(format!("bad json attribute: {e}"))),
            other => Err(StoreError::Corrupt(format!(
                "unknown attribute type {other:?}"
            ))),
        }
    }
}

/// An append-only annotation on a record's history.
#[derive(Debug, Clone, PartialEq)]
pub struct Note {
    pub posted_at: DateTime<Utc>,
    pub body: String,
}

/// A stored record: opaque id, named attributes, tags and bookkeeping
/// timestamps.
#[derive(Debug, Clone)]
pub struct LegRecord {
    pub id: String,
    pub attributes: HashMap<String, AttrValue>,
    pub tags: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LegRecord {
    pub fn attr(&self, name: &str) -> Option<&AttrValue> {
        self.attributes.get(name)
    }

    pub fn attr_text(&self, name: &str) -> Option<&str> {
        self.attr(name).and_then(AttrValue::as_text)
    }

    pub fn attr_time(&self, name: &str) -> Option<DateTime<Utc>> {
        self.attr(name).and_then(AttrValue::as_time)
    }

    pub fn attr_json(&self, name: &str) -> Option<&serde_json::Value> {
        self.attr(name).and_then(AttrValue::as_json)
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }
}

/// Record-store contract.
///
/// Every `find_*` returns its results ordered by record id so callers that
/// must break ties do so deterministically. `delete_record` on an unknown id
/// is a no-op; all other mutations on unknown ids fail with `NotFound`.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Create a record with an opaque id; `created_at == updated_at`.
    async fn create_record(
        &self,
        attributes: Vec<(String, AttrValue)>,
        tags: Vec<String>,
    ) -> StoreResult<LegRecord>;

    async fn get_record(&self, id: &str) -> StoreResult<Option<LegRecord>>;

    /// Upsert attributes by name and bump `updated_at`.
    async fn set_attributes(
        &self,
        id: &str,
        attributes: Vec<(String, AttrValue)>,
    ) -> StoreResult<()>;

    /// Idempotent tag membership; bumps `updated_at`.
    async fn add_tag(&self, id: &str, tag: &str) -> StoreResult<()>;

    /// Idempotent tag removal; bumps `updated_at`.
    async fn remove_tag(&self, id: &str, tag: &str) -> StoreResult<()>;

    /// Append an immutable annotation to the record's history.
    async fn append_note(&self, id: &str, body: &str) -> StoreResult<()>;

    async fn notes(&self, id: &str) -> StoreResult<Vec<Note>>;

    /// Exact equality on the canonical rendering of `value`.
    async fn find_by_attribute(&self, name: &str, value: &AttrValue)
        -> StoreResult<Vec<LegRecord>>;

    async fn find_by_tag(&self, tag: &str) -> StoreResult<Vec<LegRecord>>;

    async fn delete_record(&self, id: &str) -> StoreResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_time_is_whole_second_utc() {
        let t = DateTime::parse_from_rfc3339("2025-10-06T10:00:00.734+02:00")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(canonical_time(t), "2025-10-06T08:00:00Z");
    }

    #[test]
    fn attr_value_round_trips_through_storage() {
        let values = [
            AttrValue::text("U75"),
            AttrValue::time(
                DateTime::parse_from_rfc3339("2025-10-06T10:00:00Z")
                    .unwrap()
                    .with_timezone(&Utc),
            ),
            AttrValue::json(serde_json::json!({"stops": [1, 2, 3]})),
        ];
        for value in values {
            let rebuilt =
                AttrValue::from_storage(value.storage_type(), &value.storage_value()).unwrap();
            assert_eq!(rebuilt.storage_type(), value.storage_type());
            assert_eq!(rebuilt.storage_value(), value.storage_value());
        }
    }

    #[test]
    fn from_storage_rejects_garbage() {
        assert!(AttrValue::from_storage("time", "not-a-time").is_err());
        assert!(AttrValue::from_storage("json", "{broken").is_err());
        assert!(AttrValue::from_storage("blob", "x").is_err());
    }
}
