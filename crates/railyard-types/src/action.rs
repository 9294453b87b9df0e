//! Action entity: one schedulable unit of work.
//!
//! Templates are blueprints owned by a workflow and never run directly; a
//! workflow instance clones them into concrete HAS_NEVER_RUN rows. Fractional
//! `order_idx` values totally order actions within a datastore / instance
//! scope and support insertion between existing indices without renumbering.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entity::EntityData;
use crate::error::ValidationError;

/// Action lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Template,
    HasNeverRun,
    Queued,
    Pending,
    Running,
    Finishing,
    Completed,
    Failed,
    Skipped,
}

impl ActionStatus {
    /// States that count against a datastore's concurrency limit.
    pub fn holds_capacity(self) -> bool {
        matches!(
            self,
            ActionStatus::Pending | ActionStatus::Running | ActionStatus::Finishing
        )
    }

    /// States in which an action has not yet started and can still be
    /// skipped by a failure-policy cascade.
    pub fn not_yet_run(self) -> bool {
        matches!(self, ActionStatus::HasNeverRun | ActionStatus::Queued)
    }
}

/// One unit of work, bound to a datastore and (once cloned) an instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionData {
    /// Human-readable action name.
    pub name: String,
    /// Current lifecycle state.
    pub status: ActionStatus,
    /// Which engine executes this action (e.g. "redshift", "emr").
    pub engine: String,
    /// The datastore this action runs against. For templates this is the
    /// template datastore; clones point at the concrete one.
    pub datastore_id: Uuid,
    /// Owning workflow, for template rows.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<Uuid>,
    /// Owning instance, for cloned rows.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_instance_id: Option<Uuid>,
    /// Total order within the datastore / instance scope.
    pub order_idx: f64,
    /// Checkout of this action cascades the instance to RUNNING.
    #[serde(default)]
    pub first_in_workflow: bool,
    /// Completion of this action completes the instance.
    #[serde(default)]
    pub last_in_workflow: bool,
    /// Set when this action consumes a subscription's elements.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_id: Option<Uuid>,
    /// Remote task identity, stamped after a successful launch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_arn: Option<String>,
    /// Opaque engine-specific parameters (never inspected by the core).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<serde_json::Value>,
    /// Error recorded when the action fails.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl EntityData for ActionData {
    const KIND: &'static str = "actions";

    fn validate(&self) -> Result<(), ValidationError> {
        if self.name.is_empty() {
            return Err(ValidationError::MissingField("name".to_string()));
        }
        if self.engine.is_empty() {
            return Err(ValidationError::MissingField("engine".to_string()));
        }
        if !self.order_idx.is_finite() {
            return Err(ValidationError::InvalidValue {
                field: "order_idx".to_string(),
                reason: "must be finite".to_string(),
            });
        }
        Ok(())
    }
}

impl ActionData {
    /// Clone this template into a concrete HAS_NEVER_RUN action bound to an
    /// instance and its concrete datastore.
    pub fn clone_for_instance(&self, instance_id: Uuid, datastore_id: Uuid) -> Self {
        Self {
            name: self.name.clone(),
            status: ActionStatus::HasNeverRun,
            engine: self.engine.clone(),
            datastore_id,
            workflow_id: self.workflow_id,
            workflow_instance_id: Some(instance_id),
            order_idx: self.order_idx,
            first_in_workflow: self.first_in_workflow,
            last_in_workflow: self.last_in_workflow,
            subscription_id: self.subscription_id,
            task_arn: None,
            args: self.args.clone(),
            error_message: None,
        }
    }
}

/// Outcome reported by an engine at checkin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionOutcome {
    Success,
    Failure,
}

/// The full checkin envelope an engine hands back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckinResult {
    pub state: ActionOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl CheckinResult {
    pub fn success() -> Self {
        Self {
            state: ActionOutcome::Success,
            error_message: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            state: ActionOutcome::Failure,
            error_message: Some(message.into()),
        }
    }
}
