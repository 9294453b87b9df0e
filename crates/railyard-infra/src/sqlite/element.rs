//! SQLite implementation of the subscription element store.
//!
//! Elements use typed columns instead of the JSON envelope: state
//! transitions are single bulk UPDATEs conditioned on the expected current
//! state, and (subscription_id, path) uniqueness rides on the table's
//! UNIQUE constraint via `INSERT OR IGNORE`.

use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Row, Sqlite};
use uuid::Uuid;

use railyard_core::subscription::ElementStore;
use railyard_types::error::StoreError;
use railyard_types::subscription::{ElementState, SubscriptionElement};

use super::{store_err, DatabasePool};

/// Rows per INSERT chunk; comfortably under SQLite's bind-parameter limit.
const INSERT_CHUNK: usize = 100;

#[derive(Clone)]
pub struct SqliteElementStore {
    pool: DatabasePool,
}

impl SqliteElementStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    fn decode(row: &sqlx::sqlite::SqliteRow) -> Result<SubscriptionElement, StoreError> {
        let state_raw: String = row.get("state");
        let state = ElementState::parse(&state_raw)
            .ok_or_else(|| StoreError::Query(format!("corrupt element state '{state_raw}'")))?;
        Ok(SubscriptionElement {
            id: parse_uuid(row.get("id"))?,
            subscription_id: parse_uuid(row.get("subscription_id"))?,
            path: row.get("path"),
            size_bytes: row.get("size_bytes"),
            state,
            batch_id: parse_opt_uuid(row.get("batch_id"))?,
            action_id: parse_opt_uuid(row.get("action_id"))?,
            created: parse_ts(row.get("created"))?,
            updated: parse_ts(row.get("updated"))?,
        })
    }

    fn push_values(builder: &mut QueryBuilder<'_, Sqlite>, elements: &[SubscriptionElement]) {
        builder.push_values(elements, |mut b, el| {
            b.push_bind(el.id.to_string())
                .push_bind(el.subscription_id.to_string())
                .push_bind(el.path.clone())
                .push_bind(el.size_bytes)
                .push_bind(el.state.as_str())
                .push_bind(el.batch_id.map(|id| id.to_string()))
                .push_bind(el.action_id.map(|id| id.to_string()))
                .push_bind(el.created.to_rfc3339())
                .push_bind(el.updated.to_rfc3339());
        });
    }
}

fn parse_uuid(raw: String) -> Result<Uuid, StoreError> {
    Uuid::parse_str(&raw).map_err(|e| StoreError::Query(format!("corrupt element uuid: {e}")))
}

fn parse_opt_uuid(raw: Option<String>) -> Result<Option<Uuid>, StoreError> {
    raw.map(parse_uuid).transpose()
}

fn parse_ts(raw: String) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Query(format!("corrupt element timestamp: {e}")))
}

impl ElementStore for SqliteElementStore {
    async fn insert_batch(&self, elements: &[SubscriptionElement]) -> Result<(), StoreError> {
        for chunk in elements.chunks(INSERT_CHUNK) {
            let mut builder: QueryBuilder<'_, Sqlite> = QueryBuilder::new(
                "INSERT INTO subscription_elements \
                 (id, subscription_id, path, size_bytes, state, batch_id, action_id, created, updated) ",
            );
            Self::push_values(&mut builder, chunk);
            builder
                .build()
                .execute(&self.pool.writer)
                .await
                .map_err(store_err)?;
        }
        Ok(())
    }

    async fn conditional_insert(&self, element: &SubscriptionElement) -> Result<bool, StoreError> {
        let mut builder: QueryBuilder<'_, Sqlite> = QueryBuilder::new(
            "INSERT OR IGNORE INTO subscription_elements \
             (id, subscription_id, path, size_bytes, state, batch_id, action_id, created, updated) ",
        );
        Self::push_values(&mut builder, std::slice::from_ref(element));
        let result = builder
            .build()
            .execute(&self.pool.writer)
            .await
            .map_err(store_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_unconsumed(
        &self,
        subscription_id: Uuid,
        after_path: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SubscriptionElement>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM subscription_elements \
             WHERE subscription_id = ? AND state = ? AND path > ? \
             ORDER BY path ASC LIMIT ?",
        )
        .bind(subscription_id.to_string())
        .bind(ElementState::Unconsumed.as_str())
        .bind(after_path.unwrap_or(""))
        .bind(limit as i64)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(store_err)?;
        rows.iter().map(Self::decode).collect()
    }

    async fn mark_reserved(&self, element_ids: &[Uuid], batch_id: Uuid) -> Result<u64, StoreError> {
        let mut moved = 0;
        for chunk in element_ids.chunks(INSERT_CHUNK) {
            let mut builder: QueryBuilder<'_, Sqlite> =
                QueryBuilder::new("UPDATE subscription_elements SET state = ");
            builder
                .push_bind(ElementState::Reserved.as_str())
                .push(", batch_id = ")
                .push_bind(batch_id.to_string())
                .push(", updated = ")
                .push_bind(Utc::now().to_rfc3339())
                .push(" WHERE state = ")
                .push_bind(ElementState::Unconsumed.as_str())
                .push(" AND id IN (");
            let mut separated = builder.separated(", ");
            for id in chunk {
                separated.push_bind(id.to_string());
            }
            builder.push(")");
            let result = builder
                .build()
                .execute(&self.pool.writer)
                .await
                .map_err(store_err)?;
            moved += result.rows_affected();
        }
        Ok(moved)
    }

    async fn oldest_reserved_batch(&self, subscription_id: Uuid) -> Result<Option<Uuid>, StoreError> {
        let row = sqlx::query(
            "SELECT batch_id FROM subscription_elements \
             WHERE subscription_id = ? AND state = ? AND batch_id IS NOT NULL \
             ORDER BY path ASC LIMIT 1",
        )
        .bind(subscription_id.to_string())
        .bind(ElementState::Reserved.as_str())
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(store_err)?;
        match row {
            Some(row) => Ok(parse_opt_uuid(row.get("batch_id"))?),
            None => Ok(None),
        }
    }

    async fn assign_batch(&self, batch_id: Uuid, action_id: Uuid) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE subscription_elements SET state = ?, action_id = ?, updated = ? \
             WHERE batch_id = ? AND state = ?",
        )
        .bind(ElementState::Assigned.as_str())
        .bind(action_id.to_string())
        .bind(Utc::now().to_rfc3339())
        .bind(batch_id.to_string())
        .bind(ElementState::Reserved.as_str())
        .execute(&self.pool.writer)
        .await
        .map_err(store_err)?;
        Ok(result.rows_affected())
    }

    async fn assign_all_unconsumed(
        &self,
        subscription_id: Uuid,
        action_id: Uuid,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE subscription_elements SET state = ?, action_id = ?, updated = ? \
             WHERE subscription_id = ? AND state = ?",
        )
        .bind(ElementState::Assigned.as_str())
        .bind(action_id.to_string())
        .bind(Utc::now().to_rfc3339())
        .bind(subscription_id.to_string())
        .bind(ElementState::Unconsumed.as_str())
        .execute(&self.pool.writer)
        .await
        .map_err(store_err)?;
        Ok(result.rows_affected())
    }

    async fn complete_assigned(&self, action_id: Uuid) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE subscription_elements SET state = ?, updated = ? \
             WHERE action_id = ? AND state = ?",
        )
        .bind(ElementState::Consumed.as_str())
        .bind(Utc::now().to_rfc3339())
        .bind(action_id.to_string())
        .bind(ElementState::Assigned.as_str())
        .execute(&self.pool.writer)
        .await
        .map_err(store_err)?;
        Ok(result.rows_affected())
    }

    async fn release_assigned(&self, action_id: Uuid) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE subscription_elements \
             SET state = ?, batch_id = NULL, action_id = NULL, updated = ? \
             WHERE action_id = ? AND state = ?",
        )
        .bind(ElementState::Unconsumed.as_str())
        .bind(Utc::now().to_rfc3339())
        .bind(action_id.to_string())
        .bind(ElementState::Assigned.as_str())
        .execute(&self.pool.writer)
        .await
        .map_err(store_err)?;
        Ok(result.rows_affected())
    }

    async fn delete_for_subscription(&self, subscription_id: Uuid) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM subscription_elements WHERE subscription_id = ?")
            .bind(subscription_id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(store_err)?;
        Ok(result.rows_affected())
    }

    async fn list_for_subscription(
        &self,
        subscription_id: Uuid,
    ) -> Result<Vec<SubscriptionElement>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM subscription_elements WHERE subscription_id = ? ORDER BY path ASC",
        )
        .bind(subscription_id.to_string())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(store_err)?;
        rows.iter().map(Self::decode).collect()
    }
}
