//! In-process message queue with at-least-once delivery semantics.
//!
//! Stands in for a hosted queue service in single-process deployments and
//! tests. Received messages become invisible for a visibility window instead
//! of being removed; a consumer that never deletes them sees them again,
//! which is exactly the redelivery behavior the broker's idempotency ledger
//! is built against.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use uuid::Uuid;

use railyard_core::broker::{MessageQueue, QueueMessage};
use railyard_types::error::BrokerError;

const POLL_INTERVAL: Duration = Duration::from_millis(25);

struct PendingMessage {
    id: String,
    body: String,
    /// Hidden from receivers until this instant.
    invisible_until: Option<Instant>,
}

/// In-memory queue with a visibility timeout.
#[derive(Clone)]
pub struct InMemoryQueue {
    messages: Arc<Mutex<Vec<PendingMessage>>>,
    visibility: Duration,
}

impl InMemoryQueue {
    pub fn new(visibility: Duration) -> Self {
        Self {
            messages: Arc::new(Mutex::new(Vec::new())),
            visibility,
        }
    }

    /// Number of messages currently queued, visible or not.
    pub fn depth(&self) -> usize {
        self.messages.lock().expect("queue lock poisoned").len()
    }

    fn take_visible(&self) -> Option<QueueMessage> {
        let now = Instant::now();
        let mut messages = self.messages.lock().expect("queue lock poisoned");
        let next = messages
            .iter_mut()
            .find(|m| m.invisible_until.is_none_or(|until| until <= now))?;
        next.invisible_until = Some(now + self.visibility);
        Some(QueueMessage {
            id: next.id.clone(),
            body: next.body.clone(),
        })
    }
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

impl MessageQueue for InMemoryQueue {
    async fn send(&self, body: String) -> Result<(), BrokerError> {
        let mut messages = self.messages.lock().expect("queue lock poisoned");
        messages.push(PendingMessage {
            id: Uuid::now_v7().to_string(),
            body,
            invisible_until: None,
        });
        Ok(())
    }

    async fn receive_one(&self, wait: Duration) -> Result<Option<QueueMessage>, BrokerError> {
        let deadline = Instant::now() + wait;
        loop {
            if let Some(message) = self.take_visible() {
                return Ok(Some(message));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(POLL_INTERVAL.min(deadline - Instant::now())).await;
        }
    }

    async fn delete(&self, message_id: &str) -> Result<(), BrokerError> {
        let mut messages = self.messages.lock().expect("queue lock poisoned");
        messages.retain(|m| m.id != message_id);
        Ok(())
    }
}
