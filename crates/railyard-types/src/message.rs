//! Broker message shapes and the idempotency ledger entity.
//!
//! `BrokerMessage` is the closed set of payloads carried over the queue;
//! `MessageData` is the durability/idempotency record keyed by the underlying
//! queue's message id.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entity::EntityData;
use crate::workflow::FiredBy;

// ---------------------------------------------------------------------------
// Idempotency ledger
// ---------------------------------------------------------------------------

/// Processing state of one external queue message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageState {
    Running,
    Completed,
    Failed,
}

/// Identity of the worker processing a message, used for lost-worker
/// detection. Workers running outside a container scheduler carry no task
/// arn and are treated as dead once their message is redelivered.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerIdentity {
    pub instance_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
    pub cluster: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_arn: Option<String>,
}

impl WorkerIdentity {
    /// Identity for a worker not managed by a remote task scheduler.
    pub fn local(cluster: impl Into<String>) -> Self {
        let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
        Self {
            instance_id: format!("{host}-{}", std::process::id()),
            container_id: None,
            cluster: cluster.into(),
            task_arn: None,
        }
    }
}

/// Idempotency ledger row, keyed by the external queue message id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageData {
    /// The underlying queue's message id (the dedup key).
    pub queue_message_id: String,
    pub state: MessageState,
    /// The worker that claimed this message.
    pub worker: WorkerIdentity,
}

impl EntityData for MessageData {
    const KIND: &'static str = "messages";
}

// ---------------------------------------------------------------------------
// Object-store notifications
// ---------------------------------------------------------------------------

/// The notification envelope delivered by the object store's ingestion
/// path: `{Records: [{eventName, s3: {bucket: {name}, object: {key, size}}}]}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ObjectNotification {
    #[serde(rename = "Records")]
    pub records: Vec<NotificationRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotificationRecord {
    #[serde(rename = "eventName")]
    pub event_name: String,
    pub s3: S3Entity,
}

impl NotificationRecord {
    /// Only `ObjectCreated:*` events are acted on.
    pub fn is_object_created(&self) -> bool {
        self.event_name.starts_with("ObjectCreated:")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct S3Entity {
    pub bucket: BucketRef,
    pub object: ObjectRef,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BucketRef {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ObjectRef {
    pub key: String,
    pub size: i64,
}

// ---------------------------------------------------------------------------
// Broker payloads
// ---------------------------------------------------------------------------

/// The closed set of payloads carried over the queue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BrokerMessage {
    /// Start a new instance of a workflow.
    RunWorkflow { workflow_id: Uuid, fired_by: FiredBy },
    /// Evaluate one trigger (scheduled firings arrive this way).
    EvaluateTrigger { trigger_id: Uuid },
    /// A trigger fired; feeds super-trigger combinators. Recursive: firing a
    /// super trigger emits this too, so super-of-super resolves.
    TriggerFired { trigger_id: Uuid },
    /// A workflow completed an instance; feeds workflow-completion triggers.
    WorkflowCompleted { workflow_id: Uuid },
    /// A named event occurred; feeds event triggers.
    EventOccurred { event_id: Uuid },
    /// Raw object-store notification.
    ObjectCreated { notification: ObjectNotification },
}
