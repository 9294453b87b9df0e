pub mod element;
pub mod entity;
pub mod ledger;
pub mod pool;

pub use element::SqliteElementStore;
pub use entity::SqliteEntityStore;
pub use ledger::SqliteMessageLedger;
pub use pool::DatabasePool;

use railyard_types::error::StoreError;

/// Map a sqlx error onto the store error taxonomy.
pub(crate) fn store_err(err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::RowNotFound => StoreError::NotFound,
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            StoreError::Conflict(db.to_string())
        }
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StoreError::Connection
        }
        other => StoreError::Query(other.to_string()),
    }
}
