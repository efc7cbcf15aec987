//! In-memory record store used by tests and ephemeral deployments.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{AttrValue, LegRecord, Note, RecordStore, StoreError, StoreResult};

struct Entry {
    record: LegRecord,
    notes: Vec<Note>,
}

/// Lock-guarded map keyed by record id. Linear scans are fine at the corpus
/// sizes this store is meant for.
pub struct MemoryRecordStore {
    inner: RwLock<HashMap<String, Entry>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

fn matches(stored: &AttrValue, wanted: &AttrValue) -> bool {
    stored.storage_type() == wanted.storage_type()
        && stored.storage_value() == wanted.storage_value()
}

fn sorted_by_id(mut records: Vec<LegRecord>) -> Vec<LegRecord> {
    records.sort_by(|a, b| a.id.cmp(&b.id));
    records
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn create_record(
        &self,
        attributes: Vec<(String, AttrValue)>,
        tags: Vec<String>,
    ) -> StoreResult<LegRecord> {
        let now = Utc::now();
        let record = LegRecord {
            id: Uuid::new_v4().to_string(),
            attributes: attributes.into_iter().collect(),
            tags: tags.into_iter().collect(),
            created_at: now,
            updated_at: now,
        };
        self.inner.write().await.insert(
            record.id.clone(),
            Entry {
                record: record.clone(),
                notes: Vec::new(),
            },
        );
        Ok(record)
    }

    async fn get_record(&self, id: &str) -> StoreResult<Option<LegRecord>> {
        Ok(self.inner.read().await.get(id).map(|e| e.record.clone()))
    }

    async fn set_attributes(
        &self,
        id: &str,
        attributes: Vec<(String, AttrValue)>,
    ) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let entry = inner
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        for (name, value) in attributes {
            entry.record.attributes.insert(name, value);
        }
        entry.record.updated_at = Utc::now();
        Ok(())
    }

    async fn add_tag(&self, id: &str, tag: &str) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let entry = inner
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        entry.record.tags.insert(tag.to_string());
        entry.record.updated_at = Utc::now();
        Ok(())
    }

    async fn remove_tag(&self, id: &str, tag: &str) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let entry = inner
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        entry.record.tags.remove(tag);
        entry.record.updated_at = Utc::now();
        Ok(())
    }

    async fn append_note(&self, id: &str, body: &str) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let entry = inner
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        entry.notes.push(Note {
            posted_at: Utc::now(),
            body: body.to_string(),
        });
        Ok(())
    }

    async fn notes(&self, id: &str) -> StoreResult<Vec<Note>> {
        let inner = self.inner.read().await;
        let entry = inner
            .get(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        Ok(entry.notes.clone())
    }

    async fn find_by_attribute(
        &self,
        name: &str,
        value: &AttrValue,
    ) -> StoreResult<Vec<LegRecord>> {
        let inner = self.inner.read().await;
        let hits = inner
            .values()
            .filter(|e| e.record.attr(name).is_some_and(|v| matches(v, value)))
            .map(|e| e.record.clone())
            .collect();
        Ok(sorted_by_id(hits))
    }

    async fn find_by_tag(&self, tag: &str) -> StoreResult<Vec<LegRecord>> {
        let inner = self.inner.read().await;
        let hits = inner
            .values()
            .filter(|e| e.record.has_tag(tag))
            .map(|e| e.record.clone())
            .collect();
        Ok(sorted_by_id(hits))
    }

    async fn delete_record(&self, id: &str) -> StoreResult<()> {
        self.inner.write().await.remove(id);
        Ok(())
    }
}
