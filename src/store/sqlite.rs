//! SQLite-backed record store. Plain `sqlx::query` with binds; the schema
//! lives in `migrations/`.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use sqlx::sqlite::SqlitePool;
use uuid::Uuid;

use super::{canonical_time, AttrValue, LegRecord, Note, RecordStore, StoreError, StoreResult};

pub struct SqliteRecordStore {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct RecordRow {
    id: String,
    created_at: String,
    updated_at: String,
}

#[derive(sqlx::FromRow)]
struct AttrRow {
    record_id: String,
    name: String,
    value_type: String,
    value: String,
}

#[derive(sqlx::FromRow)]
struct TagRow {
    record_id: String,
    tag: String,
}

#[derive(sqlx::FromRow)]
struct NoteRow {
    posted_at: String,
    body: String,
}

fn parse_stored_time(raw: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("bad stored timestamp {raw:?}: {e}")))
}

impl SqliteRecordStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Attach attributes and tags to a batch of record rows with two bulk
    /// queries instead of one pair per record.
    async fn hydrate(&self, rows: Vec<RecordRow>) -> StoreResult<Vec<LegRecord>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<&str> = rows.iter().map(|r| r.id.as_str()).collect();
        let placeholders = vec!["?"; ids.len()].join(", ");

        let attr_sql = format!(
            "SELECT record_id, name, value_type, value FROM record_attributes \
             WHERE record_id IN ({placeholders})"
        );
        let mut attr_query = sqlx::query_as::<_, AttrRow>(&attr_sql);
        for id in &ids {
            attr_query = attr_query.bind(id);
        }
        let attr_rows = attr_query
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::backend)?;

        let tag_sql =
            format!("SELECT record_id, tag FROM record_tags WHERE record_id IN ({placeholders})");
        let mut tag_query = sqlx::query_as::<_, TagRow>(&tag_sql);
        for id in &ids {
            tag_query = tag_query.bind(id);
        }
        let tag_rows = tag_query
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::backend)?;

        let mut attrs_by_id: HashMap<String, Vec<AttrRow>> = HashMap::new();
        for row in attr_rows {
            attrs_by_id.entry(row.record_id.clone()).or_default().push(row);
        }
        let mut tags_by_id: HashMap<String, Vec<String>> = HashMap::new();
        for row in tag_rows {
            tags_by_id.entry(row.record_id).or_default().push(row.tag);
        }

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let mut attributes = HashMap::new();
            for attr in attrs_by_id.remove(&row.id).unwrap_or_default() {
                attributes.insert(
                    attr.name,
                    AttrValue::from_storage(&attr.value_type, &attr.value)?,
                );
            }
            records.push(LegRecord {
                created_at: parse_stored_time(&row.created_at)?,
                updated_at: parse_stored_time(&row.updated_at)?,
                attributes,
                tags: tags_by_id.remove(&row.id).unwrap_or_default().into_iter().collect(),
                id: row.id,
            });
        }
        Ok(records)
    }

    /// Bump `updated_at`, failing with `NotFound` for unknown ids.
    async fn touch(&self, id: &str) -> StoreResult<()> {
        let result = sqlx::query("UPDATE records SET updated_at = ? WHERE id = ?")
            .bind(canonical_time(Utc::now()))
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(StoreError::backend)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn create_record(
        &self,
        attributes: Vec<(String, AttrValue)>,
        tags: Vec<String>,
    ) -> StoreResult<LegRecord> {
        let now = Utc::now().trunc_subsecs(0);
        let id = Uuid::new_v4().to_string();

        let mut tx = self.pool.begin().await.map_err(StoreError::backend)?;
        sqlx::query("INSERT INTO records (id, created_at, updated_at) VALUES (?, ?, ?)")
            .bind(&id)
            .bind(canonical_time(now))
            .bind(canonical_time(now))
            .execute(&mut *tx)
            .await
            .map_err(StoreError::backend)?;
        for (name, value) in &attributes {
            sqlx::query(
                "INSERT INTO record_attributes (record_id, name, value_type, value) \
                 VALUES (?, ?, ?, ?)",
            )
            .bind(&id)
            .bind(name)
            .bind(value.storage_type())
            .bind(value.storage_value())
            .execute(&mut *tx)
            .await
            .map_err(StoreError::backend)?;
        }
        for tag in &tags {
            sqlx::query("INSERT OR IGNORE INTO record_tags (record_id, tag) VALUES (?, ?)")
                .bind(&id)
                .bind(tag)
                .execute(&mut *tx)
                .await
                .map_err(StoreError::backend)?;
        }
        tx.commit().await.map_err(StoreError::backend)?;

        Ok(LegRecord {
            id,
            attributes: attributes.into_iter().collect(),
            tags: tags.into_iter().collect(),
            created_at: now,
            updated_at: now,
        })
    }

    async fn get_record(&self, id: &str) -> StoreResult<Option<LegRecord>> {
        let row = sqlx::query_as::<_, RecordRow>(
            "SELECT id, created_at, updated_at FROM records WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::backend)?;

        let Some(row) = row else {
            return Ok(None);
        };
        Ok(self.hydrate(vec![row]).await?.pop())
    }

    async fn set_attributes(
        &self,
        id: &str,
        attributes: Vec<(String, AttrValue)>,
    ) -> StoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(StoreError::backend)?;
        let result = sqlx::query("UPDATE records SET updated_at = ? WHERE id = ?")
            .bind(canonical_time(Utc::now()))
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(StoreError::backend)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        for (name, value) in &attributes {
            sqlx::query(
                "INSERT INTO record_attributes (record_id, name, value_type, value) \
                 VALUES (?, ?, ?, ?) \
                 ON CONFLICT (record_id, name) \
                 DO UPDATE SET value_type = excluded.value_type, value = excluded.value",
            )
            .bind(id)
            .bind(name)
            .bind(value.storage_type())
            .bind(value.storage_value())
            .execute(&mut *tx)
            .await
            .map_err(StoreError::backend)?;
        }
        tx.commit().await.map_err(StoreError::backend)?;
        Ok(())
    }

    async fn add_tag(&self, id: &str, tag: &str) -> StoreResult<()> {
        self.touch(id).await?;
        sqlx::query("INSERT OR IGNORE INTO record_tags (record_id, tag) VALUES (?, ?)")
            .bind(id)
            .bind(tag)
            .execute(&self.pool)
            .await
            .map_err(StoreError::backend)?;
        Ok(())
    }

    async fn remove_tag(&self, id: &str, tag: &str) -> StoreResult<()> {
        self.touch(id).await?;
        sqlx::query("DELETE FROM record_tags WHERE record_id = ? AND tag = ?")
            .bind(id)
            .bind(tag)
            .execute(&self.pool)
            .await
            .map_err(StoreError::backend)?;
        Ok(())
    }

    async fn append_note(&self, id: &str, body: &str) -> StoreResult<()> {
        let exists = sqlx::query("SELECT 1 FROM records WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::backend)?;
        if exists.is_none() {
            return Err(StoreError::NotFound(id.to_string()));
        }
        sqlx::query("INSERT INTO record_notes (record_id, posted_at, body) VALUES (?, ?, ?)")
            .bind(id)
            .bind(canonical_time(Utc::now()))
            .bind(body)
            .execute(&self.pool)
            .await
            .map_err(StoreError::backend)?;
        Ok(())
    }

    async fn notes(&self, id: &str) -> StoreResult<Vec<Note>> {
        let rows = sqlx::query_as::<_, NoteRow>(
            "SELECT posted_at, body FROM record_notes WHERE record_id = ? ORDER BY id",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::backend)?;

        rows.into_iter()
            .map(|row| {
                Ok(Note {
                    posted_at: parse_stored_time(&row.posted_at)?,
                    body: row.body,
                })
            })
            .collect()
    }

    async fn find_by_attribute(
        &self,
        name: &str,
        value: &AttrValue,
    ) -> StoreResult<Vec<LegRecord>> {
        let rows = sqlx::query_as::<_, RecordRow>(
            "SELECT r.id, r.created_at, r.updated_at FROM records r \
             JOIN record_attributes a ON a.record_id = r.id \
             WHERE a.name = ? AND a.value_type = ? AND a.value = ? \
             ORDER BY r.id",
        )
        .bind(name)
        .bind(value.storage_type())
        .bind(value.storage_value())
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::backend)?;

        self.hydrate(rows).await
    }

    async fn find_by_tag(&self, tag: &str) -> StoreResult<Vec<LegRecord>> {
        let rows = sqlx::query_as::<_, RecordRow>(
            "SELECT r.id, r.created_at, r.updated_at FROM records r \
             JOIN record_tags t ON t.record_id = r.id \
             WHERE t.tag = ? \
             ORDER BY r.id",
        )
        .bind(tag)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::backend)?;

        self.hydrate(rows).await
    }

    async fn delete_record(&self, id: &str) -> StoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(StoreError::backend)?;
        for sql in [
            "DELETE FROM record_attributes WHERE record_id = ?",
            "DELETE FROM record_tags WHERE record_id = ?",
            "DELETE FROM record_notes WHERE record_id = ?",
            "DELETE FROM records WHERE id = ?",
        ] {
            sqlx::query(sql)
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(StoreError::backend)?;
        }
        tx.commit().await.map_err(StoreError::backend)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn test_store() -> SqliteRecordStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        SqliteRecordStore::new(pool)
    }

    fn t(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[tokio::test]
    async fn create_then_get_preserves_attributes_and_tags() {
        let store = test_store().await;
        let rec = store
            .create_record(
                vec![
                    ("trip_id".into(), AttrValue::text("T1")),
                    ("dep_scheduled".into(), AttrValue::time(t("2025-10-06T10:00:00Z"))),
                    ("stops".into(), AttrValue::json(serde_json::json!([{"seq": 1}]))),
                ],
                vec!["urban".into(), "status:scheduled".into()],
            )
            .await
            .unwrap();

        let fetched = store.get_record(&rec.id).await.unwrap().unwrap();
        assert_eq!(fetched.attr_text("trip_id"), Some("T1"));
        assert_eq!(
            fetched.attr_time("dep_scheduled"),
            Some(t("2025-10-06T10:00:00Z"))
        );
        assert!(fetched.attr_json("stops").is_some());
        assert!(fetched.has_tag("urban"));
        assert!(fetched.has_tag("status:scheduled"));
        assert_eq!(fetched.created_at, rec.created_at);
    }

    #[tokio::test]
    async fn set_attributes_upserts_and_bumps_updated_at() {
        let store = test_store().await;
        let rec = store
            .create_record(vec![("gate".into(), AttrValue::text("12"))], vec![])
            .await
            .unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
        store
            .set_attributes(
                &rec.id,
                vec![
                    ("gate".into(), AttrValue::text("14")),
                    ("terminal".into(), AttrValue::text("B")),
                ],
            )
            .await
            .unwrap();

        let fetched = store.get_record(&rec.id).await.unwrap().unwrap();
        assert_eq!(fetched.attr_text("gate"), Some("14"));
        assert_eq!(fetched.attr_text("terminal"), Some("B"));
        assert_eq!(fetched.created_at, rec.created_at);
        assert!(fetched.updated_at > rec.updated_at);
    }

    #[tokio::test]
    async fn find_by_attribute_matches_canonical_time() {
        let store = test_store().await;
        store
            .create_record(
                vec![("dep_scheduled".into(), AttrValue::time(t("2025-10-06T10:00:00Z")))],
                vec![],
            )
            .await
            .unwrap();
        store
            .create_record(
                vec![("dep_scheduled".into(), AttrValue::time(t("2025-10-06T11:00:00Z")))],
                vec![],
            )
            .await
            .unwrap();

        let hits = store
            .find_by_attribute("dep_scheduled", &AttrValue::time(t("2025-10-06T10:00:00Z")))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn find_by_tag_returns_id_ordered_records() {
        let store = test_store().await;
        for _ in 0..5 {
            store.create_record(vec![], vec!["rail".into()]).await.unwrap();
        }
        let hits = store.find_by_tag("rail").await.unwrap();
        assert_eq!(hits.len(), 5);
        let ids: Vec<_> = hits.iter().map(|r| r.id.clone()).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
    }

    #[tokio::test]
    async fn delete_removes_the_whole_record() {
        let store = test_store().await;
        let rec = store
            .create_record(vec![("x".into(), AttrValue::text("y"))], vec!["rail".into()])
            .await
            .unwrap();
        store.append_note(&rec.id, "hello").await.unwrap();

        store.delete_record(&rec.id).await.unwrap();
        assert!(store.get_record(&rec.id).await.unwrap().is_none());
        assert!(store.find_by_tag("rail").await.unwrap().is_empty());
        // Idempotent on unknown ids.
        store.delete_record(&rec.id).await.unwrap();
    }

    #[tokio::test]
    async fn notes_preserve_append_order() {
        let store = test_store().await;
        let rec = store.create_record(vec![], vec![]).await.unwrap();
        store.append_note(&rec.id, "created").await.unwrap();
        store.append_note(&rec.id, "delayed by 5 min").await.unwrap();

        let notes = store.notes(&rec.id).await.unwrap();
        let bodies: Vec<_> = notes.iter().map(|n| n.body.as_str()).collect();
        assert_eq!(bodies, ["created", "delayed by 5 min"]);
    }
}
