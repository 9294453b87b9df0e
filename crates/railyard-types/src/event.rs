//! Event entity: a named gate referenced by event triggers.
//!
//! An event trigger fires only while the Event entity itself is ACTIVE, so
//! operators can mute a whole class of firings without touching the
//! triggers.

use serde::{Deserialize, Serialize};

use crate::entity::EntityData;
use crate::error::ValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Active,
    Inactive,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventData {
    /// Human-readable event name.
    pub name: String,
    /// Whether occurrences of this event fire triggers.
    pub status: EventStatus,
}

impl EntityData for EventData {
    const KIND: &'static str = "events";

    fn validate(&self) -> Result<(), ValidationError> {
        if self.name.is_empty() {
            return Err(ValidationError::MissingField("name".to_string()));
        }
        Ok(())
    }
}
