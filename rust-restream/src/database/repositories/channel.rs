//! Channel record repository.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use sqlx::SqlitePool;

use crate::database::models::ChannelRecord;
use crate::{Error, Result};

/// Channel record repository trait.
#[async_trait]
pub trait ChannelRecordRepository: Send + Sync {
    /// Insert or replace a record, keeping its creation time.
    async fn upsert(&self, record: &ChannelRecord) -> Result<()>;
    async fn get(&self, key: &str) -> Result<ChannelRecord>;
    async fn list(&self) -> Result<Vec<ChannelRecord>>;
    async fn set_status(&self, key: &str, status: &str, last_error: Option<&str>) -> Result<()>;
    /// Returns whether a record existed.
    async fn delete(&self, key: &str) -> Result<bool>;
}

/// SQLx implementation of ChannelRecordRepository.
pub struct SqlxChannelRecordRepository {
    pool: SqlitePool,
}

impl SqlxChannelRecordRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChannelRecordRepository for SqlxChannelRecordRepository {
    async fn upsert(&self, record: &ChannelRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO channel_records (key, source, playlist, status, last_error, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                source = excluded.source,
                playlist = excluded.playlist,
                status = excluded.status,
                last_error = excluded.last_error,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&record.key)
        .bind(&record.source)
        .bind(&record.playlist)
        .bind(&record.status)
        .bind(&record.last_error)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<ChannelRecord> {
        sqlx::query_as::<_, ChannelRecord>("SELECT * FROM channel_records WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::not_found("Channel", key))
    }

    async fn list(&self) -> Result<Vec<ChannelRecord>> {
        let records =
            sqlx::query_as::<_, ChannelRecord>("SELECT * FROM channel_records ORDER BY key")
                .fetch_all(&self.pool)
                .await?;
        Ok(records)
    }

    async fn set_status(&self, key: &str, status: &str, last_error: Option<&str>) -> Result<()> {
        let result = sqlx::query(
            "UPDATE channel_records SET status = ?, last_error = ?, updated_at = ? WHERE key = ?",
        )
        .bind(status)
        .bind(last_error)
        .bind(Utc::now().timestamp_millis())
        .bind(key)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::not_found("Channel", key));
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM channel_records WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

/// In-memory implementation, used when no database is configured.
#[derive(Default)]
pub struct InMemoryChannelRecordRepository {
    records: RwLock<BTreeMap<String, ChannelRecord>>,
}

impl InMemoryChannelRecordRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChannelRecordRepository for InMemoryChannelRecordRepository {
    async fn upsert(&self, record: &ChannelRecord) -> Result<()> {
        let mut records = self.records.write();
        let mut record = record.clone();
        if let Some(existing) = records.get(&record.key) {
            record.created_at = existing.created_at;
        }
        records.insert(record.key.clone(), record);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<ChannelRecord> {
        self.records
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| Error::not_found("Channel", key))
    }

    async fn list(&self) -> Result<Vec<ChannelRecord>> {
        Ok(self.records.read().values().cloned().collect())
    }

    async fn set_status(&self, key: &str, status: &str, last_error: Option<&str>) -> Result<()> {
        let mut records = self.records.write();
        let record = records
            .get_mut(key)
            .ok_or_else(|| Error::not_found("Channel", key))?;
        record.status = status.to_string();
        record.last_error = last_error.map(str::to_string);
        record.updated_at = Utc::now().timestamp_millis();
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.records.write().remove(key).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ChannelKey, PipelineState, SourceReference};

    fn record(key: &str, status: PipelineState) -> ChannelRecord {
        let key = ChannelKey::new(key).unwrap();
        let source = SourceReference::new("https://example/live1").unwrap();
        ChannelRecord::new(&key, &source, format!("/streams/{}.m3u8", key), status)
    }

    #[tokio::test]
    async fn test_in_memory_upsert_keeps_created_at() {
        let repo = InMemoryChannelRecordRepository::new();
        let mut first = record("gma7", PipelineState::Streaming);
        first.created_at = 1;
        repo.upsert(&first).await.unwrap();

        let second = record("gma7", PipelineState::Failed).with_error("boom");
        repo.upsert(&second).await.unwrap();

        let stored = repo.get("gma7").await.unwrap();
        assert_eq!(stored.created_at, 1);
        assert_eq!(stored.state(), Some(PipelineState::Failed));
        assert_eq!(stored.last_error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_in_memory_status_and_delete() {
        let repo = InMemoryChannelRecordRepository::new();
        assert!(matches!(
            repo.set_status("gma7", "IDLE", None).await,
            Err(Error::NotFound { .. })
        ));

        repo.upsert(&record("gma7", PipelineState::Streaming)).await.unwrap();
        repo.upsert(&record("abc", PipelineState::Streaming)).await.unwrap();
        repo.set_status("gma7", "IDLE", None).await.unwrap();
        assert_eq!(repo.get("gma7").await.unwrap().status, "IDLE");

        let keys: Vec<String> = repo.list().await.unwrap().into_iter().map(|r| r.key).collect();
        assert_eq!(keys, vec!["abc", "gma7"]);

        assert!(repo.delete("gma7").await.unwrap());
        assert!(!repo.delete("gma7").await.unwrap());
        assert!(repo.get("gma7").await.is_err());
    }
}
