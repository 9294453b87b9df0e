//! Named advisory locks stored as entity rows.
//!
//! Acquisition is a compare-and-swap READY→LOCKED through the store's
//! `patch_if`, retried with random backoff until success or timeout. Release
//! unconditionally sets LOCKED→READY, even when the guarded closure errors.
//! A crash while holding a lock is not auto-released, so this is used only
//! for short critical sections around external side effects (remote task
//! launches, scale-down) where a plain CAS retry loop could duplicate the
//! side effect.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;
use uuid::Uuid;

use railyard_types::entity::Record;
use railyard_types::error::{LockError, StoreError};
use railyard_types::mutex::{MutexData, MutexState};

use crate::store::EntityStore;

/// Advisory lock service over mutex rows.
#[derive(Clone)]
pub struct MutexService<S> {
    store: S,
}

impl<S: EntityStore + Clone> MutexService<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Run `fut` while holding the named lock.
    ///
    /// The future runs only after acquisition succeeds; the lock is released
    /// afterwards regardless of the future's outcome.
    pub async fn with_lock<F, Fut, T>(
        &self,
        name: &str,
        timeout: Duration,
        f: F,
    ) -> Result<T, LockError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let row_id = self.acquire(name, timeout).await?;
        let result = f().await;
        self.release(row_id).await?;
        Ok(result)
    }

    /// Poll the row READY→LOCKED until success or `timeout` elapses.
    async fn acquire(&self, name: &str, timeout: Duration) -> Result<Uuid, LockError> {
        let deadline = Instant::now() + timeout;
        loop {
            let row = self.row_for(name).await?;
            let locked = row.with_data(|d| d.state = MutexState::Locked);
            match self
                .store
                .patch_if(&row, &locked, |d| d.state == MutexState::Ready)
                .await
            {
                Ok(_) => {
                    tracing::debug!(lock = name, "acquired");
                    return Ok(row.id);
                }
                Err(StoreError::ConditionFailed) => {
                    if Instant::now() >= deadline {
                        return Err(LockError::Timeout(name.to_string()));
                    }
                    let backoff = rand::thread_rng().gen_range(25..100);
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Unconditionally set LOCKED→READY.
    async fn release(&self, row_id: Uuid) -> Result<(), LockError> {
        let row: Record<MutexData> = self.store.get(row_id).await?;
        let ready = row.with_data(|d| d.state = MutexState::Ready);
        self.store.patch(&row, &ready).await?;
        tracing::debug!(lock = %row.data.name, "released");
        Ok(())
    }

    /// Resolve (creating on first use) the row for a lock name.
    ///
    /// Two workers racing on first use may both create a row; both then
    /// converge on the smallest id for the name, so a single row wins
    /// deterministically.
    async fn row_for(&self, name: &str) -> Result<Record<MutexData>, StoreError> {
        let existing = self.find_min(name).await?;
        if let Some(row) = existing {
            return Ok(row);
        }
        self.store
            .create(MutexData {
                name: name.to_string(),
                state: MutexState::Ready,
            })
            .await?;
        let row = self.find_min(name).await?;
        row.ok_or(StoreError::NotFound)
    }

    async fn find_min(&self, name: &str) -> Result<Option<Record<MutexData>>, StoreError> {
        let rows = self.store.list::<MutexData>().await?;
        Ok(rows.into_iter().filter(|r| r.data.name == name).min_by_key(|r| r.id))
    }
}
