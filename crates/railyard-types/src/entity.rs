//! Generic persisted-entity envelope.
//!
//! Every entity Railyard stores shares the same envelope: an opaque UUIDv7
//! id, a monotonic `version_id` used for optimistic concurrency, creation
//! and update timestamps, and a `data` payload holding all mutable semantic
//! fields. Relationships between entities are plain id references resolved
//! through the store -- there are no in-memory object graphs.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;

/// Payload trait implemented by every entity kind.
///
/// `KIND` doubles as the storage table name; `validate` runs once at create
/// time, before anything is persisted.
pub trait EntityData: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Storage table / kind name (snake_case plural, e.g. "datastores").
    const KIND: &'static str;

    /// Reject malformed drafts before persistence.
    fn validate(&self) -> Result<(), ValidationError> {
        Ok(())
    }
}

/// The shared envelope wrapping an entity payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record<T> {
    /// UUIDv7, assigned by the store at create time.
    pub id: Uuid,
    /// Monotonic version, bumped on every successful patch.
    pub version_id: i64,
    /// When the row was first persisted.
    pub created: DateTime<Utc>,
    /// When the row was last patched.
    pub updated: DateTime<Utc>,
    /// The kind-specific payload.
    pub data: T,
}

impl<T: EntityData> Record<T> {
    /// Wrap a freshly-created payload with a new envelope (version 1).
    pub fn new(data: T) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            version_id: 1,
            created: now,
            updated: now,
            data,
        }
    }

    /// Produce a mutated copy of this record's payload.
    ///
    /// The returned record keeps the same envelope; it is meant to be passed
    /// alongside the original to `EntityStore::patch`, which derives the
    /// field-level difference between the two payloads.
    pub fn with_data(&self, f: impl FnOnce(&mut T)) -> Self {
        let mut next = self.clone();
        f(&mut next.data);
        next
    }
}
