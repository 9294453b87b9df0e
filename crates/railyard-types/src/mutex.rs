//! Mutex entity: a named advisory-lock row.
//!
//! No ownership token beyond the name. A crash while holding a lock is not
//! auto-released, so callers keep critical sections short and timeout-guard
//! every acquisition.

use serde::{Deserialize, Serialize};

use crate::entity::EntityData;
use crate::error::ValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutexState {
    Ready,
    Locked,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutexData {
    /// The lock name callers acquire by.
    pub name: String,
    pub state: MutexState,
}

impl EntityData for MutexData {
    const KIND: &'static str = "mutexes";

    fn validate(&self) -> Result<(), ValidationError> {
        if self.name.is_empty() {
            return Err(ValidationError::MissingField("name".to_string()));
        }
        Ok(())
    }
}
