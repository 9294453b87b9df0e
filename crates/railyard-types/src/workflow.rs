//! Workflow and WorkflowInstance entities.
//!
//! A Workflow is a reusable ordered list of action templates bound to a
//! datastore; a WorkflowInstance is one concrete run of it, created when a
//! trigger fires.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entity::EntityData;
use crate::error::ValidationError;
use crate::trigger::TriggerKind;

/// Whether a workflow accepts new instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Active,
    Inactive,
}

/// A reusable ordered action template bound to a datastore.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowData {
    /// Human-readable workflow name.
    pub name: String,
    /// Whether triggers may start new instances.
    pub status: WorkflowStatus,
    /// The datastore (usually a TEMPLATE) this workflow's actions run
    /// against.
    pub datastore_id: Uuid,
    /// Max simultaneous instances in QUEUED/RUNNING.
    pub concurrency: u32,
}

impl EntityData for WorkflowData {
    const KIND: &'static str = "workflows";

    fn validate(&self) -> Result<(), ValidationError> {
        if self.name.is_empty() {
            return Err(ValidationError::MissingField("name".to_string()));
        }
        if self.concurrency == 0 {
            return Err(ValidationError::InvalidValue {
                field: "concurrency".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// WorkflowInstance lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

/// What caused an instance to be created.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FiredBy {
    /// The trigger kind that fired (manual firings have no trigger row).
    pub kind: TriggerKind,
    /// The trigger row, when one exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_id: Option<Uuid>,
}

impl FiredBy {
    /// A manual firing (CLI / API), with no trigger row behind it.
    pub fn manual() -> Self {
        Self {
            kind: TriggerKind::Manual,
            trigger_id: None,
        }
    }

    /// A firing caused by a persisted trigger.
    pub fn trigger(kind: TriggerKind, trigger_id: Uuid) -> Self {
        Self {
            kind,
            trigger_id: Some(trigger_id),
        }
    }
}

/// One concrete run of a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowInstanceData {
    /// The workflow this instance runs.
    pub workflow_id: Uuid,
    /// The concrete (possibly cloned) datastore this instance runs against.
    pub datastore_id: Uuid,
    /// Current lifecycle state.
    pub status: InstanceStatus,
    /// What fired this instance.
    pub fired_by: FiredBy,
    /// Error recorded when the instance fails.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl EntityData for WorkflowInstanceData {
    const KIND: &'static str = "workflow_instances";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workflow_validate_rejects_zero_concurrency() {
        let data = WorkflowData {
            name: "nightly-load".to_string(),
            status: WorkflowStatus::Active,
            datastore_id: Uuid::now_v7(),
            concurrency: 0,
        };
        assert!(data.validate().is_err());
    }

    #[test]
    fn test_fired_by_manual_has_no_trigger_id() {
        let fired = FiredBy::manual();
        assert_eq!(fired.kind, TriggerKind::Manual);
        assert!(fired.trigger_id.is_none());
    }

    #[test]
    fn test_instance_json_roundtrip() {
        let data = WorkflowInstanceData {
            workflow_id: Uuid::now_v7(),
            datastore_id: Uuid::now_v7(),
            status: InstanceStatus::Queued,
            fired_by: FiredBy::trigger(TriggerKind::Scheduled, Uuid::now_v7()),
            error_message: None,
        };
        let json = serde_json::to_string(&data).unwrap();
        let parsed: WorkflowInstanceData = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.status, InstanceStatus::Queued);
        assert_eq!(parsed.fired_by.kind, TriggerKind::Scheduled);
    }
}
