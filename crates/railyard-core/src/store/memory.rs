//! In-memory `EntityStore` used by unit tests and local experiments.
//!
//! Rows live in per-kind `DashMap`s; a read-modify-write under the shard
//! lock gives the same atomicity the SQLite implementation gets from
//! `WHERE version_id = ?`, so the diff/predicate semantics match.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;
use uuid::Uuid;

use railyard_types::entity::{EntityData, Record};
use railyard_types::error::StoreError;

use super::diff;

#[derive(Debug, Clone)]
struct RawRow {
    version_id: i64,
    created: DateTime<Utc>,
    updated: DateTime<Utc>,
    data: Value,
}

/// In-memory entity store. Cheap to clone; clones share state.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    tables: Arc<DashMap<&'static str, DashMap<Uuid, RawRow>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_table<R>(&self, kind: &'static str, f: impl FnOnce(&DashMap<Uuid, RawRow>) -> R) -> R {
        let table = self.tables.entry(kind).or_default();
        f(&table)
    }

    fn decode<T: EntityData>(id: Uuid, row: &RawRow) -> Result<Record<T>, StoreError> {
        let data: T = serde_json::from_value(row.data.clone())
            .map_err(|e| StoreError::Query(format!("corrupt {} payload: {e}", T::KIND)))?;
        Ok(Record {
            id,
            version_id: row.version_id,
            created: row.created,
            updated: row.updated,
            data,
        })
    }

    fn patch_inner<T: EntityData>(
        &self,
        original: &Record<T>,
        modified: &Record<T>,
        predicate: Option<&(dyn Fn(&T) -> bool + Send + Sync)>,
    ) -> Result<Record<T>, StoreError> {
        let before = serde_json::to_value(&original.data)
            .map_err(|e| StoreError::Query(e.to_string()))?;
        let after = serde_json::to_value(&modified.data)
            .map_err(|e| StoreError::Query(e.to_string()))?;
        let changes = diff::compute(&before, &after);

        self.with_table(T::KIND, |table| {
            let mut row = table.get_mut(&original.id).ok_or(StoreError::NotFound)?;
            if let Some(predicate) = predicate {
                let current: T = serde_json::from_value(row.data.clone())
                    .map_err(|e| StoreError::Query(format!("corrupt {} payload: {e}", T::KIND)))?;
                if !predicate(&current) {
                    return Err(StoreError::ConditionFailed);
                }
            }
            diff::apply(&mut row.data, &changes);
            row.version_id += 1;
            row.updated = Utc::now();
            Self::decode(original.id, &row)
        })
    }
}

impl super::EntityStore for InMemoryStore {
    async fn create<T: EntityData>(&self, data: T) -> Result<Record<T>, StoreError> {
        data.validate()?;
        let record = Record::new(data);
        let value =
            serde_json::to_value(&record.data).map_err(|e| StoreError::Query(e.to_string()))?;
        self.with_table(T::KIND, |table| {
            table.insert(
                record.id,
                RawRow {
                    version_id: record.version_id,
                    created: record.created,
                    updated: record.updated,
                    data: value,
                },
            );
        });
        Ok(record)
    }

    async fn get<T: EntityData>(&self, id: Uuid) -> Result<Record<T>, StoreError> {
        self.with_table(T::KIND, |table| {
            let row = table.get(&id).ok_or(StoreError::NotFound)?;
            Self::decode(id, &row)
        })
    }

    async fn list<T: EntityData>(&self) -> Result<Vec<Record<T>>, StoreError> {
        let mut records = self.with_table(T::KIND, |table| {
            table
                .iter()
                .map(|entry| Self::decode(*entry.key(), entry.value()))
                .collect::<Result<Vec<_>, _>>()
        })?;
        records.sort_by_key(|r| r.id);
        Ok(records)
    }

    async fn delete<T: EntityData>(&self, id: Uuid) -> Result<bool, StoreError> {
        Ok(self.with_table(T::KIND, |table| table.remove(&id).is_some()))
    }

    async fn patch<T: EntityData>(
        &self,
        original: &Record<T>,
        modified: &Record<T>,
    ) -> Result<Record<T>, StoreError> {
        self.patch_inner(original, modified, None)
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
        self.patch_inner(original, modified, Some(&predicate))
    }
}
