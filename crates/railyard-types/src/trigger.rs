//! Trigger entity: a rule that starts workflows when a condition is met.
//!
//! The type-specific parameters live in a closed tagged `TriggerSpec` enum;
//! the persisted kind string maps to a variant at deserialization time, never
//! through runtime type-name dispatch.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entity::EntityData;
use crate::error::ValidationError;

/// Whether a trigger participates in evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerStatus {
    Active,
    Inactive,
}

/// The closed set of trigger kinds.
///
/// `Manual` never appears on a persisted trigger row; it exists so that
/// `FiredBy` can record CLI/API firings uniformly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Manual,
    Scheduled,
    Event,
    SubscriptionBatch,
    WorkflowCompletion,
    Super,
}

/// For super triggers: fire on any member completion, or only once all
/// members have completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FireAfter {
    Any,
    All,
}

/// Type-specific trigger parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TriggerSpec {
    /// Fires on a cron schedule.
    Scheduled { cron_pattern: String },
    /// Fires when the named event occurs (and the Event entity is ACTIVE).
    Event { event_id: Uuid },
    /// Fires when a subscription has accumulated at least `byte_threshold`
    /// bytes of unconsumed elements.
    SubscriptionBatch {
        subscription_id: Uuid,
        byte_threshold: u64,
    },
    /// Fires when the named workflow completes an instance.
    WorkflowCompletion { completed_workflow_id: Uuid },
    /// Combinator over other triggers' completions.
    Super {
        completed_trigger_ids: Vec<Uuid>,
        fire_after: FireAfter,
    },
}

impl TriggerSpec {
    pub fn kind(&self) -> TriggerKind {
        match self {
            TriggerSpec::Scheduled { .. } => TriggerKind::Scheduled,
            TriggerSpec::Event { .. } => TriggerKind::Event,
            TriggerSpec::SubscriptionBatch { .. } => TriggerKind::SubscriptionBatch,
            TriggerSpec::WorkflowCompletion { .. } => TriggerKind::WorkflowCompletion,
            TriggerSpec::Super { .. } => TriggerKind::Super,
        }
    }
}

/// A trigger row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerData {
    /// Human-readable trigger name.
    pub name: String,
    /// INACTIVE triggers are silently ignored by evaluators.
    pub status: TriggerStatus,
    /// Type-specific parameters.
    pub spec: TriggerSpec,
    /// Workflows started when this trigger fires. Each is started in its own
    /// error scope.
    pub workflow_ids: Vec<Uuid>,
    /// ALL-combinator state: completion timestamp per member trigger id.
    /// Cleared when the combinator fires, so it can re-arm.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub completions: BTreeMap<Uuid, DateTime<Utc>>,
}

impl EntityData for TriggerData {
    const KIND: &'static str = "triggers";

    fn validate(&self) -> Result<(), ValidationError> {
        if self.name.is_empty() {
            return Err(ValidationError::MissingField("name".to_string()));
        }
        if self.workflow_ids.is_empty() {
            return Err(ValidationError::MissingField("workflow_ids".to_string()));
        }
        match &self.spec {
            TriggerSpec::Scheduled { cron_pattern } if cron_pattern.is_empty() => {
                Err(ValidationError::MissingField("cron_pattern".to_string()))
            }
            TriggerSpec::SubscriptionBatch { byte_threshold: 0, .. } => {
                Err(ValidationError::InvalidValue {
                    field: "byte_threshold".to_string(),
                    reason: "must be at least 1".to_string(),
                })
            }
            TriggerSpec::Super {
                completed_trigger_ids,
                ..
            } if completed_trigger_ids.is_empty() => Err(ValidationError::MissingField(
                "completed_trigger_ids".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

impl TriggerData {
    pub fn kind(&self) -> TriggerKind {
        self.spec.kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trigger(spec: TriggerSpec) -> TriggerData {
        TriggerData {
            name: "t".to_string(),
            status: TriggerStatus::Active,
            spec,
            workflow_ids: vec![Uuid::now_v7()],
            completions: BTreeMap::new(),
        }
    }

    #[test]
    fn test_spec_tagged_serde() {
        let t = trigger(TriggerSpec::SubscriptionBatch {
            subscription_id: Uuid::now_v7(),
            byte_threshold: 1024,
        });
        let json = serde_json::to_string(&t).unwrap();
        assert!(json.contains("\"kind\":\"subscription_batch\""));
        let parsed: TriggerData = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.kind(), TriggerKind::SubscriptionBatch);
    }

    #[test]
    fn test_validate_rejects_empty_workflow_ids() {
        let mut t = trigger(TriggerSpec::Event {
            event_id: Uuid::now_v7(),
        });
        t.workflow_ids.clear();
        assert!(t.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_byte_threshold() {
        let t = trigger(TriggerSpec::SubscriptionBatch {
            subscription_id: Uuid::now_v7(),
            byte_threshold: 0,
        });
        assert!(t.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_super_members() {
        let t = trigger(TriggerSpec::Super {
            completed_trigger_ids: vec![],
            fire_after: FireAfter::All,
        });
        assert!(t.validate().is_err());
    }

    #[test]
    fn test_completions_map_roundtrip() {
        let mut t = trigger(TriggerSpec::Super {
            completed_trigger_ids: vec![Uuid::now_v7(), Uuid::now_v7()],
            fire_after: FireAfter::All,
        });
        t.completions.insert(Uuid::now_v7(), Utc::now());
        let json = serde_json::to_string(&t).unwrap();
        let parsed: TriggerData = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.completions.len(), 1);
    }
}
