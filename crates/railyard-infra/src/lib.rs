//! Infrastructure adapters for the Railyard core ports.
//!
//! SQLite persistence (entity store, subscription elements, message
//! ledger), an in-process queue and object store for local mode, the local
//! engine task runner, the cron runtime, and configuration loading.

pub mod config;
pub mod cron;
pub mod object_store;
pub mod queue;
pub mod sqlite;
pub mod task;
