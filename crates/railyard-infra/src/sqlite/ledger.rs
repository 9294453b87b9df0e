//! SQLite implementation of the message idempotency ledger.
//!
//! Rows live in the `messages` envelope table; the dedup key is the queue's
//! own message id, looked up through `json_extract` and enforced by a unique
//! index so a racing duplicate insert surfaces as a conflict.

use chrono::{DateTime, Utc};
use sqlx::Row;
use uuid::Uuid;

use railyard_core::broker::MessageLedger;
use railyard_types::entity::Record;
use railyard_types::error::StoreError;
use railyard_types::message::{MessageData, MessageState};

use super::{store_err, DatabasePool};

#[derive(Clone)]
pub struct SqliteMessageLedger {
    pool: DatabasePool,
}

impl SqliteMessageLedger {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    fn decode(row: &sqlx::sqlite::SqliteRow) -> Result<Record<MessageData>, StoreError> {
        let id: String = row.get("id");
        let id = Uuid::parse_str(&id)
            .map_err(|e| StoreError::Query(format!("corrupt message id: {e}")))?;
        let raw: String = row.get("data");
        let data: MessageData = serde_json::from_str(&raw)
            .map_err(|e| StoreError::Query(format!("corrupt message payload: {e}")))?;
        Ok(Record {
            id,
            version_id: row.get("version_id"),
            created: parse_ts(row.get("created"))?,
            updated: parse_ts(row.get("updated"))?,
            data,
        })
    }
}

fn parse_ts(raw: String) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Query(format!("corrupt message timestamp: {e}")))
}

impl MessageLedger for SqliteMessageLedger {
    async fn find(&self, queue_message_id: &str) -> Result<Option<Record<MessageData>>, StoreError> {
        let row = sqlx::query(
            "SELECT id, version_id, created, updated, data FROM messages \
             WHERE json_extract(data, '$.queue_message_id') = ?",
        )
        .bind(queue_message_id)
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(store_err)?;
        row.as_ref().map(Self::decode).transpose()
    }

    async fn insert(&self, data: MessageData) -> Result<Record<MessageData>, StoreError> {
        let record = Record::new(data);
        let payload =
            serde_json::to_string(&record.data).map_err(|e| StoreError::Query(e.to_string()))?;
        sqlx::query(
            "INSERT INTO messages (id, version_id, created, updated, data) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(record.id.to_string())
        .bind(record.version_id)
        .bind(record.created.to_rfc3339())
        .bind(record.updated.to_rfc3339())
        .bind(payload)
        .execute(&self.pool.writer)
        .await
        .map_err(store_err)?;
        Ok(record)
    }

    async fn set_state(&self, id: Uuid, state: MessageState) -> Result<(), StoreError> {
        let row = sqlx::query("SELECT data FROM messages WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(store_err)?
            .ok_or(StoreError::NotFound)?;
        let raw: String = row.get("data");
        let mut data: MessageData = serde_json::from_str(&raw)
            .map_err(|e| StoreError::Query(format!("corrupt message payload: {e}")))?;
        data.state = state;
        let payload = serde_json::to_string(&data).map_err(|e| StoreError::Query(e.to_string()))?;

        let result = sqlx::query(
            "UPDATE messages SET version_id = version_id + 1, updated = ?, data = ? WHERE id = ?",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(payload)
        .bind(id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(store_err)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM messages WHERE created < ?")
            .bind(cutoff.to_rfc3339())
            .execute(&self.pool.writer)
            .await
            .map_err(store_err)?;
        Ok(result.rows_affected())
    }
}
