//! Message broker: at-least-once delivery plus an idempotency ledger.
//!
//! Wraps one external at-least-once queue. Every received message is matched
//! against a ledger row keyed by the queue's message id: absent means first
//! delivery, COMPLETED/FAILED means redelivery of already-processed work (the
//! handler is skipped), RUNNING means another worker claimed it: we query
//! the remote task scheduler for that worker's liveness and either leave the
//! message for the visibility timeout or treat it as a recovered crash and
//! hand the handler `previous_failed = true`.

use std::future::Future;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use uuid::Uuid;

use railyard_types::entity::Record;
use railyard_types::error::{BrokerError, StoreError};
use railyard_types::message::{BrokerMessage, MessageData, MessageState, WorkerIdentity};

use crate::task::{self, TaskScheduler};

/// Probability of running a ledger retention purge on any given receive.
/// Keeps ledger growth bounded without a separate sweep process.
const PURGE_PROBABILITY: f64 = 0.01;

// ---------------------------------------------------------------------------
// Ports
// ---------------------------------------------------------------------------

/// One raw message pulled from the underlying queue.
#[derive(Debug, Clone)]
pub struct QueueMessage {
    /// The queue's own message id (the idempotency key).
    pub id: String,
    pub body: String,
}

/// The external at-least-once queue.
pub trait MessageQueue: Send + Sync {
    fn send(&self, body: String) -> impl Future<Output = Result<(), BrokerError>> + Send;

    /// Pull at most one message, long-polling up to `wait`. Undeleted
    /// messages reappear after the queue's visibility timeout.
    fn receive_one(
        &self,
        wait: Duration,
    ) -> impl Future<Output = Result<Option<QueueMessage>, BrokerError>> + Send;

    fn delete(&self, message_id: &str) -> impl Future<Output = Result<(), BrokerError>> + Send;
}

/// The idempotency ledger: Message rows keyed by queue message id.
pub trait MessageLedger: Send + Sync {
    fn find(
        &self,
        queue_message_id: &str,
    ) -> impl Future<Output = Result<Option<Record<MessageData>>, StoreError>> + Send;

    /// Insert a RUNNING row. `StoreError::Conflict` when the queue message
    /// id already has one.
    fn insert(
        &self,
        data: MessageData,
    ) -> impl Future<Output = Result<Record<MessageData>, StoreError>> + Send;

    fn set_state(
        &self,
        id: Uuid,
        state: MessageState,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Delete rows older than the cutoff. Returns how many were purged.
    fn purge_older_than(
        &self,
        cutoff: chrono::DateTime<chrono::Utc>,
    ) -> impl Future<Output = Result<u64, StoreError>> + Send;
}

/// A handler invoked at most once per queue message (effects-wise).
///
/// `previous_failed` is true when the message was previously claimed by a
/// worker that is no longer alive; the handler applies failure semantics
/// instead of re-running the original side effect.
pub trait MessageHandler: Send + Sync {
    fn handle(
        &self,
        queue_message_id: &str,
        message: BrokerMessage,
        previous_failed: bool,
    ) -> impl Future<Output = Result<(), Box<dyn std::error::Error + Send + Sync>>> + Send;
}

/// Send-only slice of the broker for components that publish but never
/// consume (trigger engine, workflow service, CLI).
pub trait Publisher: Send + Sync {
    fn publish(&self, message: &BrokerMessage) -> impl Future<Output = Result<(), BrokerError>> + Send;
}

/// Publisher over a bare queue. Serialization matches the broker's, so
/// components wired before the full broker exists (or in short-lived CLI
/// commands) publish onto the same stream.
#[derive(Clone)]
pub struct QueuePublisher<Q> {
    queue: Q,
}

impl<Q> QueuePublisher<Q> {
    pub fn new(queue: Q) -> Self {
        Self { queue }
    }
}

impl<Q: MessageQueue> Publisher for QueuePublisher<Q> {
    async fn publish(&self, message: &BrokerMessage) -> Result<(), BrokerError> {
        let body = serde_json::to_string(message).map_err(|e| BrokerError::Payload(e.to_string()))?;
        self.queue.send(body).await
    }
}

// ---------------------------------------------------------------------------
// Broker
// ---------------------------------------------------------------------------

/// Durability/idempotency wrapper over one external queue.
#[derive(Clone)]
pub struct MessageBroker<Q, L, T> {
    queue: Q,
    ledger: L,
    tasks: T,
    identity: WorkerIdentity,
    /// Ledger rows older than this are purged.
    retention: chrono::Duration,
    /// Long-poll bound for receive.
    wait: Duration,
}

impl<Q, L, T> MessageBroker<Q, L, T>
where
    Q: MessageQueue,
    L: MessageLedger,
    T: TaskScheduler,
{
    pub fn new(
        queue: Q,
        ledger: L,
        tasks: T,
        identity: WorkerIdentity,
        retention_days: u32,
        wait: Duration,
    ) -> Self {
        Self {
            queue,
            ledger,
            tasks,
            identity,
            retention: chrono::Duration::days(i64::from(retention_days)),
            wait,
        }
    }

    /// Serialize and enqueue one payload.
    pub async fn send(&self, message: &BrokerMessage) -> Result<(), BrokerError> {
        let body = serde_json::to_string(message).map_err(|e| BrokerError::Payload(e.to_string()))?;
        self.queue.send(body).await
    }
}

impl<Q, L, T> Publisher for MessageBroker<Q, L, T>
where
    Q: MessageQueue,
    L: MessageLedger,
    T: TaskScheduler,
{
    async fn publish(&self, message: &BrokerMessage) -> Result<(), BrokerError> {
        self.send(message).await
    }
}

impl<Q, L, T> MessageBroker<Q, L, T>
where
    Q: MessageQueue,
    L: MessageLedger,
    T: TaskScheduler,
{

    /// Pull and process at most one message. Returns whether a message was
    /// pulled. Handler errors are recorded as FAILED in the ledger and do
    /// not propagate; the worker loop survives.
    pub async fn receive<H: MessageHandler>(&self, handler: &H) -> Result<bool, BrokerError> {
        self.maybe_purge().await;

        let Some(raw) = self.queue.receive_one(self.wait).await? else {
            return Ok(false);
        };

        let message: BrokerMessage = match serde_json::from_str(&raw.body) {
            Ok(message) => message,
            Err(err) => {
                tracing::error!(message_id = %raw.id, error = %err, "dropping unparseable message");
                self.queue.delete(&raw.id).await?;
                return Ok(true);
            }
        };

        let previous_failed = match self.ledger.find(&raw.id).await? {
            None => {
                self.ledger
                    .insert(MessageData {
                        queue_message_id: raw.id.clone(),
                        state: MessageState::Running,
                        worker: self.identity.clone(),
                    })
                    .await?;
                false
            }
            Some(record) => match record.data.state {
                // Redelivery of already-processed work: the idempotency
                // boundary. Drop the queue message without re-invoking.
                MessageState::Completed | MessageState::Failed => {
                    tracing::debug!(message_id = %raw.id, "redelivery of processed message, skipping");
                    self.queue.delete(&raw.id).await?;
                    return Ok(true);
                }
                MessageState::Running => {
                    if self.claimant_alive(&record.data.worker).await? {
                        // Still being worked; the visibility timeout will
                        // resend if that worker stalls.
                        tracing::debug!(message_id = %raw.id, "claimed by a live worker, leaving for redelivery");
                        return Ok(true);
                    }
                    tracing::warn!(
                        message_id = %raw.id,
                        instance_id = %record.data.worker.instance_id,
                        "claiming worker is gone, recovering"
                    );
                    true
                }
            },
        };

        let ledger_row = self
            .ledger
            .find(&raw.id)
            .await?
            .ok_or_else(|| BrokerError::Payload("ledger row vanished".to_string()))?;

        let outcome = handler.handle(&raw.id, message, previous_failed).await;
        let final_state = match &outcome {
            Ok(()) => MessageState::Completed,
            Err(err) => {
                tracing::error!(message_id = %raw.id, error = %err, "message handler failed");
                MessageState::Failed
            }
        };
        self.ledger.set_state(ledger_row.id, final_state).await?;
        self.queue.delete(&raw.id).await?;
        Ok(true)
    }

    /// Is the worker that claimed a RUNNING row still alive?
    ///
    /// Workers without a task arn (local mode, or crashed before stamping)
    /// cannot be confirmed alive; redelivery of their messages means they
    /// are gone.
    async fn claimant_alive(&self, worker: &WorkerIdentity) -> Result<bool, BrokerError> {
        let Some(task_arn) = &worker.task_arn else {
            return Ok(false);
        };
        let descriptions = self.tasks.describe_tasks(&[task_arn.clone()]).await?;
        Ok(task::is_alive(&descriptions, task_arn))
    }

    async fn maybe_purge(&self) {
        if rand::thread_rng().gen_bool(PURGE_PROBABILITY) {
            let cutoff = Utc::now() - self.retention;
            match self.ledger.purge_older_than(cutoff).await {
                Ok(purged) if purged > 0 => {
                    tracing::info!(purged, "purged expired message ledger rows");
                }
                Ok(_) => {}
                Err(err) => tracing::warn!(error = %err, "ledger purge failed"),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
