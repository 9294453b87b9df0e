//! Subscription and SubscriptionElement: a standing query over an object
//! store and the individual matched objects it tracks.
//!
//! Elements do not use the generic envelope: the subscription manager filters
//! and orders on path/state/size in SQL, and (subscription_id, path)
//! uniqueness is enforced by the database, never in memory.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entity::EntityData;
use crate::error::ValidationError;

/// Subscription lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Queued,
    Generating,
    Active,
    Failed,
}

/// A standing query against an object-store prefix for one dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionData {
    /// Human-readable subscription name.
    pub name: String,
    /// The dataset (bucket + prefix) this subscription watches.
    pub dataset_id: Uuid,
    /// Current lifecycle state.
    pub status: SubscriptionStatus,
    /// Only keys >= this value (relative to the dataset prefix) match.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_prefix: Option<String>,
    /// Only keys < this value match.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_prefix: Option<String>,
    /// Additional regex filter applied to the full object key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_regex: Option<String>,
    /// Error recorded when generation fails.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl EntityData for SubscriptionData {
    const KIND: &'static str = "subscriptions";

    fn validate(&self) -> Result<(), ValidationError> {
        if self.name.is_empty() {
            return Err(ValidationError::MissingField("name".to_string()));
        }
        Ok(())
    }
}

/// SubscriptionElement lifecycle states.
///
/// Failure of a consuming action returns ASSIGNED elements to UNCONSUMED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementState {
    Unconsumed,
    Reserved,
    Assigned,
    Consumed,
}

impl ElementState {
    pub fn as_str(self) -> &'static str {
        match self {
            ElementState::Unconsumed => "unconsumed",
            ElementState::Reserved => "reserved",
            ElementState::Assigned => "assigned",
            ElementState::Consumed => "consumed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "unconsumed" => Some(ElementState::Unconsumed),
            "reserved" => Some(ElementState::Reserved),
            "assigned" => Some(ElementState::Assigned),
            "consumed" => Some(ElementState::Consumed),
            _ => None,
        }
    }
}

/// One matched object. Unique per (subscription_id, path).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionElement {
    pub id: Uuid,
    pub subscription_id: Uuid,
    /// Full object key.
    pub path: String,
    pub size_bytes: i64,
    pub state: ElementState,
    /// Shared id stamped when a trigger firing reserves a batch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<Uuid>,
    /// The consuming action, stamped at assignment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_id: Option<Uuid>,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

impl SubscriptionElement {
    /// A fresh UNCONSUMED element for a newly-matched object.
    pub fn new(subscription_id: Uuid, path: impl Into<String>, size_bytes: i64) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            subscription_id,
            path: path.into(),
            size_bytes,
            state: ElementState::Unconsumed,
            batch_id: None,
            action_id: None,
            created: now,
            updated: now,
        }
    }
}
