//! Datastore entity: a compute cluster definition actions run against.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entity::EntityData;
use crate::error::ValidationError;

/// Datastore lifecycle states.
///
/// `Template` rows are blueprints, cloned into a concrete `Active` datastore
/// per workflow run. Actions and workflows execute only against an `Active`
/// datastore. `Done` is reached through explicit operator teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatastoreStatus {
    Template,
    Inactive,
    Active,
    Done,
}

/// What to do with the owning datastore/workflow when an action fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Record the failure and proceed to the next action.
    Continue,
    /// Fail the instance, skip remaining actions, deactivate the workflow
    /// and the concrete datastore.
    Deactivate,
}

/// A compute cluster definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatastoreData {
    /// Human-readable datastore name.
    pub name: String,
    /// Current lifecycle state.
    pub status: DatastoreStatus,
    /// Max simultaneous actions in PENDING/RUNNING/FINISHING against this
    /// datastore.
    pub concurrency: u32,
    /// Failure policy applied when an action against this datastore fails.
    pub on_failure: FailurePolicy,
    /// For clones: the template datastore this row was derived from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_id: Option<Uuid>,
    /// Opaque engine-specific cluster parameters (never inspected by the
    /// core).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<serde_json::Value>,
}

impl EntityData for DatastoreData {
    const KIND: &'static str = "datastores";

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

impl DatastoreData {
    /// Derive a concrete ACTIVE datastore from this template.
    pub fn clone_from_template(&self, template_id: Uuid) -> Self {
        Self {
            name: self.name.clone(),
            status: DatastoreStatus::Active,
            concurrency: self.concurrency,
            on_failure: self.on_failure,
            template_id: Some(template_id),
            args: self.args.clone(),
        }
    }
}
