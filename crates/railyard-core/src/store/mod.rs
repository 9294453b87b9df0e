//! Entity store contract.
//!
//! The store is the sole point of mutation for persisted entities. Updates
//! go through `patch`: a field-level diff between two in-memory snapshots is
//! applied to the currently-stored row only if its version has not changed,
//! retried with jittered backoff on concurrent modification. `patch_if`
//! additionally evaluates a predicate against the current stored state
//! immediately before the write, which is how compare-and-swap state
//! transitions ("only if still QUEUED") are expressed.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use uuid::Uuid;

use railyard_types::entity::{EntityData, Record};
use railyard_types::error::StoreError;

pub mod diff;
pub mod memory;

/// Bounded retry budget for optimistic-concurrency conflicts. Exhausting it
/// indicates a stuck writer and surfaces `StoreError::StaleVersion`.
pub const MAX_PATCH_ATTEMPTS: u32 = 5;

/// Jittered backoff before retrying a conflicted patch.
pub fn patch_backoff(attempt: u32) -> Duration {
    let jitter = rand::thread_rng().gen_range(0..50);
    Duration::from_millis(20 * u64::from(attempt) + jitter)
}

/// Typed CRUD plus optimistic-concurrency patch over persisted entities.
///
/// One handle covers every entity kind; the kind selects the table via
/// `EntityData::KIND`. Uses native async fn in traits (RPITIT).
pub trait EntityStore: Send + Sync {
    /// Validate a draft payload, assign an id and version 1, persist.
    fn create<T: EntityData>(
        &self,
        data: T,
    ) -> impl Future<Output = Result<Record<T>, StoreError>> + Send;

    /// Fetch one record. `StoreError::NotFound` when absent.
    fn get<T: EntityData>(
        &self,
        id: Uuid,
    ) -> impl Future<Output = Result<Record<T>, StoreError>> + Send;

    /// All records of a kind, ascending by id (UUIDv7, so creation order).
    fn list<T: EntityData>(
        &self,
    ) -> impl Future<Output = Result<Vec<Record<T>>, StoreError>> + Send;

    /// Delete one record. Returns whether it existed.
    fn delete<T: EntityData>(
        &self,
        id: Uuid,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Apply the field-level difference between `original` and `modified`
    /// to the stored row, retrying on version conflict.
    fn patch<T: EntityData>(
        &self,
        original: &Record<T>,
        modified: &Record<T>,
    ) -> impl Future<Output = Result<Record<T>, StoreError>> + Send;

    /// Like `patch`, but the whole operation fails with
    /// `StoreError::ConditionFailed` (never retried) when `predicate`
    /// rejects the currently-stored payload.
    fn patch_if<T: EntityData, P>(
        &self,
        original: &Record<T>,
        modified: &Record<T>,
        predicate: P,
    ) -> impl Future<Output = Result<Record<T>, StoreError>> + Send
    where
        P: Fn(&T) -> bool + Send + Sync;
}
