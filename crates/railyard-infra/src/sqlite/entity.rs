//! SQLite implementation of the entity store.
//!
//! Every kind shares the same envelope schema (id, version_id, created,
//! updated, data); `EntityData::KIND` selects the table. Patches apply the
//! field-level diff to the currently-stored payload guarded by
//! `WHERE version_id = ?`, retrying with jittered backoff when another
//! writer got there first.

use chrono::{DateTime, Utc};
use sqlx::Row;
use uuid::Uuid;

use railyard_core::store::{self, diff, EntityStore, MAX_PATCH_ATTEMPTS};
use railyard_types::entity::{EntityData, Record};
use railyard_types::error::StoreError;

use super::{store_err, DatabasePool};

/// Entity store backed by the shared envelope tables.
#[derive(Clone)]
pub struct SqliteEntityStore {
    pool: DatabasePool,
}

impl SqliteEntityStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    fn decode<T: EntityData>(row: &sqlx::sqlite::SqliteRow) -> Result<Record<T>, StoreError> {
        let id: String = row.get("id");
        let id = Uuid::parse_str(&id)
            .map_err(|e| StoreError::Query(format!("corrupt {} id: {e}", T::KIND)))?;
        let raw: String = row.get("data");
        let data: T = serde_json::from_str(&raw)
            .map_err(|e| StoreError::Query(format!("corrupt {} payload: {e}", T::KIND)))?;
        Ok(Record {
            id,
            version_id: row.get("version_id"),
            created: parse_ts::<T>(row.get("created"))?,
            updated: parse_ts::<T>(row.get("updated"))?,
            data,
        })
    }

    async fn fetch_raw<T: EntityData>(
        &self,
        id: Uuid,
    ) -> Result<(i64, serde_json::Value), StoreError> {
        let sql = format!("SELECT version_id, data FROM {} WHERE id = ?", T::KIND);
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(store_err)?
            .ok_or(StoreError::NotFound)?;
        let raw: String = row.get("data");
        let value: serde_json::Value = serde_json::from_str(&raw)
            .map_err(|e| StoreError::Query(format!("corrupt {} payload: {e}", T::KIND)))?;
        Ok((row.get("version_id"), value))
    }

    async fn patch_with<T, P>(
        &self,
        original: &Record<T>,
        modified: &Record<T>,
        predicate: Option<&P>,
    ) -> Result<Record<T>, StoreError>
    where
        T: EntityData,
        P: Fn(&T) -> bool + Send + Sync,
    {
        let before =
            serde_json::to_value(&original.data).map_err(|e| StoreError::Query(e.to_string()))?;
        let after =
            serde_json::to_value(&modified.data).map_err(|e| StoreError::Query(e.to_string()))?;
        let changes = diff::compute(&before, &after);

        let sql = format!(
            "UPDATE {} SET version_id = ?, updated = ?, data = ? WHERE id = ? AND version_id = ?",
            T::KIND
        );

        for attempt in 1..=MAX_PATCH_ATTEMPTS {
            let (version_id, mut stored) = self.fetch_raw::<T>(original.id).await?;
            if let Some(predicate) = predicate {
                let current: T = serde_json::from_value(stored.clone())
                    .map_err(|e| StoreError::Query(format!("corrupt {} payload: {e}", T::KIND)))?;
                if !predicate(&current) {
                    return Err(StoreError::ConditionFailed);
                }
            }
            diff::apply(&mut stored, &changes);

            let updated = Utc::now();
            let payload =
                serde_json::to_string(&stored).map_err(|e| StoreError::Query(e.to_string()))?;
            let result = sqlx::query(&sql)
                .bind(version_id + 1)
                .bind(updated.to_rfc3339())
                .bind(payload)
                .bind(original.id.to_string())
                .bind(version_id)
                .execute(&self.pool.writer)
                .await
                .map_err(store_err)?;

            if result.rows_affected() == 1 {
                let data: T = serde_json::from_value(stored)
                    .map_err(|e| StoreError::Query(format!("corrupt {} payload: {e}", T::KIND)))?;
                return Ok(Record {
                    id: original.id,
                    version_id: version_id + 1,
                    created: original.created,
                    updated,
                    data,
                });
            }
            tracing::debug!(
                kind = T::KIND,
                id = %original.id,
                attempt,
                "patch lost a version race, retrying"
            );
            tokio::time::sleep(store::patch_backoff(attempt)).await;
        }
        Err(StoreError::StaleVersion {
            attempts: MAX_PATCH_ATTEMPTS,
        })
    }
}

fn parse_ts<T: EntityData>(raw: String) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Query(format!("corrupt {} timestamp: {e}", T::KIND)))
}

impl EntityStore for SqliteEntityStore {
    async fn create<T: EntityData>(&self, data: T) -> Result<Record<T>, StoreError> {
        data.validate()?;
        let record = Record::new(data);
        let payload =
            serde_json::to_string(&record.data).map_err(|e| StoreError::Query(e.to_string()))?;
        let sql = format!(
            "INSERT INTO {} (id, version_id, created, updated, data) VALUES (?, ?, ?, ?, ?)",
            T::KIND
        );
        sqlx::query(&sql)
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

    async fn get<T: EntityData>(&self, id: Uuid) -> Result<Record<T>, StoreError> {
        let sql = format!(
            "SELECT id, version_id, created, updated, data FROM {} WHERE id = ?",
            T::KIND
        );
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(store_err)?
            .ok_or(StoreError::NotFound)?;
        Self::decode(&row)
    }

    async fn list<T: EntityData>(&self) -> Result<Vec<Record<T>>, StoreError> {
        let sql = format!(
            "SELECT id, version_id, created, updated, data FROM {} ORDER BY id",
            T::KIND
        );
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool.reader)
            .await
            .map_err(store_err)?;
        rows.iter().map(Self::decode).collect()
    }

    async fn delete<T: EntityData>(&self, id: Uuid) -> Result<bool, StoreError> {
        let sql = format!("DELETE FROM {} WHERE id = ?", T::KIND);
        let result = sqlx::query(&sql)
            .bind(id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(store_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn patch<T: EntityData>(
        &self,
        original: &Record<T>,
        modified: &Record<T>,
    ) -> Result<Record<T>, StoreError> {
        self.patch_with::<T, fn(&T) -> bool>(original, modified, None)
            .await
    }

    async fn patch_if<T: EntityData, P>(
        &self,
        original: &Record<T>,
        modified: &Record<T>,
        predicate: P,
    ) -> Result<Record<T>, StoreError>
    where
        P: Fn(&T) -> bool + Send + Sync,
    {
        self.patch_with(original, modified, Some(&predicate)).await
    }
}
