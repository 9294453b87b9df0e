//! Message listener: routes broker payloads into the services.
//!
//! This is the single consumer behind the broker's idempotency ledger.
//! `previous_failed` means a prior worker claimed the message and died;
//! non-idempotent routes (instance creation, trigger firing) are skipped in
//! that case since the original side effects may have partially happened,
//! while the object-notification route re-runs safely because element
//! insertion is conditional.

use railyard_types::error::WorkflowError;
use railyard_types::message::{BrokerMessage, ObjectNotification};

use crate::broker::{MessageHandler, Publisher};
use crate::store::EntityStore;
use crate::subscription::{self, ElementStore, ObjectStore, SubscriptionManager};
use crate::trigger::{CronScheduler, TriggerEngine};
use crate::workflow::WorkflowService;

type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// One consumer wiring every broker payload to its service.
#[derive(Clone)]
pub struct RailyardListener<S, P, E, O, C> {
    store: S,
    workflow: WorkflowService<S, P, E>,
    triggers: TriggerEngine<S, P, E, C>,
    subscriptions: SubscriptionManager<S, E, O>,
}

impl<S, P, E, O, C> RailyardListener<S, P, E, O, C>
where
    S: EntityStore + Clone,
    P: Publisher + Clone,
    E: ElementStore + Clone,
    O: ObjectStore + Clone,
    C: CronScheduler + Clone,
{
    pub fn new(
        store: S,
        workflow: WorkflowService<S, P, E>,
        triggers: TriggerEngine<S, P, E, C>,
        subscriptions: SubscriptionManager<S, E, O>,
    ) -> Self {
        Self {
            store,
            workflow,
            triggers,
            subscriptions,
        }
    }

    async fn handle_object_created(
        &self,
        notification: &ObjectNotification,
    ) -> Result<(), HandlerError> {
        for record in &notification.records {
            if !record.is_object_created() {
                tracing::debug!(event = %record.event_name, "ignoring non-create notification");
                continue;
            }
            let bucket = &record.s3.bucket.name;
            let key = &record.s3.object.key;
            let matches = subscription::matching_subscriptions(&self.store, bucket, key).await?;
            for subscription in matches {
                let inserted = self
                    .subscriptions
                    .conditional_insert(subscription.id, key, record.s3.object.size)
                    .await?;
                if inserted {
                    tracing::debug!(
                        subscription_id = %subscription.id,
                        key = %key,
                        "new element from notification"
                    );
                    self.triggers
                        .on_subscription_activity(subscription.id)
                        .await?;
                }
            }
        }
        Ok(())
    }
}

impl<S, P, E, O, C> MessageHandler for RailyardListener<S, P, E, O, C>
where
    S: EntityStore + Clone,
    P: Publisher + Clone,
    E: ElementStore + Clone,
    O: ObjectStore + Clone,
    C: CronScheduler + Clone,
{
    async fn handle(
        &self,
        queue_message_id: &str,
        message: BrokerMessage,
        previous_failed: bool,
    ) -> Result<(), HandlerError> {
        // Only the object-notification route is safe to replay after a
        // partial run; everything else is dropped with its ledger row
        // marked, matching a failed first delivery.
        if previous_failed && !matches!(message, BrokerMessage::ObjectCreated { .. }) {
            tracing::warn!(
                message_id = %queue_message_id,
                payload = ?message,
                "skipping non-replayable message from a lost worker"
            );
            return Ok(());
        }

        match message {
            BrokerMessage::RunWorkflow {
                workflow_id,
                fired_by,
            } => match self.workflow.start_instance(workflow_id, fired_by).await {
                Ok(_) => Ok(()),
                // An operator turned the workflow off between firing and
                // delivery; not a processing failure.
                Err(WorkflowError::WorkflowInactive(_)) => {
                    tracing::warn!(%workflow_id, "dropping firing for inactive workflow");
                    Ok(())
                }
                Err(err) => Err(err.into()),
            },
            BrokerMessage::EvaluateTrigger { trigger_id } => {
                self.triggers.evaluate(trigger_id).await.map_err(Into::into)
            }
            BrokerMessage::TriggerFired { trigger_id } => self
                .triggers
                .on_trigger_fired(trigger_id)
                .await
                .map_err(Into::into),
            BrokerMessage::WorkflowCompleted { workflow_id } => self
                .triggers
                .on_workflow_completed(workflow_id)
                .await
                .map_err(Into::into),
            BrokerMessage::EventOccurred { event_id } => {
                self.triggers.on_event(event_id).await.map_err(Into::into)
            }
            BrokerMessage::ObjectCreated { notification } => {
                self.handle_object_created(&notification).await
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use uuid::Uuid;

    use railyard_types::dataset::DatasetData;
    use railyard_types::datastore::{DatastoreData, DatastoreStatus, FailurePolicy};
    use railyard_types::entity::Record;
    use railyard_types::error::{BrokerError, SubscriptionError, TriggerError};
    use railyard_types::message::{BucketRef, NotificationRecord, ObjectRef, S3Entity};
    use railyard_types::subscription::{SubscriptionData, SubscriptionStatus};
    use railyard_types::trigger::{TriggerData, TriggerSpec, TriggerStatus};
    use railyard_types::workflow::{
        FiredBy, InstanceStatus, WorkflowData, WorkflowInstanceData, WorkflowStatus,
    };

    use crate::store::memory::InMemoryStore;
    use crate::subscription::tests::TestElements;
    use crate::subscription::ObjectEntry;

    #[derive(Clone, Default)]
    struct RecordingPublisher {
        sent: Arc<Mutex<Vec<BrokerMessage>>>,
    }

    impl Publisher for RecordingPublisher {
        async fn publish(&self, message: &BrokerMessage) -> Result<(), BrokerError> {
            self.sent.lock().unwrap().push(message.clone());
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    struct EmptyObjects;

    impl ObjectStore for EmptyObjects {
        async fn list_page(
            &self,
            _bucket: &str,
            _prefix: &str,
            _start_after: Option<&str>,
            _limit: usize,
        ) -> Result<Vec<ObjectEntry>, SubscriptionError> {
            Ok(vec![])
        }
    }

    #[derive(Clone, Default)]
    struct NullCron;

    impl CronScheduler for NullCron {
        async fn register(&self, _trigger_id: Uuid, _cron: &str) -> Result<(), TriggerError> {
            Ok(())
        }

        async fn remove(&self, _trigger_id: Uuid) -> Result<(), TriggerError> {
            Ok(())
        }
    }

    type TestListener = RailyardListener<
        InMemoryStore,
        RecordingPublisher,
        TestElements,
        EmptyObjects,
        NullCron,
    >;

    fn listener(
        store: InMemoryStore,
        publisher: RecordingPublisher,
        elements: TestElements,
    ) -> TestListener {
        let workflow = WorkflowService::new(store.clone(), publisher.clone(), elements.clone());
        let triggers =
            TriggerEngine::new(store.clone(), publisher.clone(), elements.clone(), NullCron);
        let subscriptions =
            SubscriptionManager::new(store.clone(), elements, EmptyObjects, 100);
        RailyardListener::new(store, workflow, triggers, subscriptions)
    }

    async fn active_workflow(store: &InMemoryStore) -> Record<WorkflowData> {
        let datastore = store
            .create(DatastoreData {
                name: "warehouse".to_string(),
                status: DatastoreStatus::Active,
                concurrency: 1,
                on_failure: FailurePolicy::Continue,
                template_id: None,
                args: None,
            })
            .await
            .unwrap();
        store
            .create(WorkflowData {
                name: "nightly-load".to_string(),
                status: WorkflowStatus::Active,
                datastore_id: datastore.id,
                concurrency: 1,
            })
            .await
            .unwrap()
    }

    fn created_notification(bucket: &str, key: &str, size: i64) -> ObjectNotification {
        ObjectNotification {
            records: vec![NotificationRecord {
                event_name: "ObjectCreated:Put".to_string(),
                s3: S3Entity {
                    bucket: BucketRef {
                        name: bucket.to_string(),
                    },
                    object: ObjectRef {
                        key: key.to_string(),
                        size,
                    },
                },
            }],
        }
    }

    #[tokio::test]
    async fn test_run_workflow_creates_instance() {
        let store = InMemoryStore::new();
        let listener = listener(store.clone(), RecordingPublisher::default(), TestElements::default());
        let workflow = active_workflow(&store).await;

        listener
            .handle(
                "m-1",
                BrokerMessage::RunWorkflow {
                    workflow_id: workflow.id,
                    fired_by: FiredBy::manual(),
                },
                false,
            )
            .await
            .unwrap();

        let instances = store.list::<WorkflowInstanceData>().await.unwrap();
        assert_eq!(instances.len(), 1);
        assert_eq!(instances[0].data.status, InstanceStatus::Queued);
    }

    #[tokio::test]
    async fn test_previous_failed_skips_run_workflow() {
        let store = InMemoryStore::new();
        let listener = listener(store.clone(), RecordingPublisher::default(), TestElements::default());
        let workflow = active_workflow(&store).await;

        listener
            .handle(
                "m-1",
                BrokerMessage::RunWorkflow {
                    workflow_id: workflow.id,
                    fired_by: FiredBy::manual(),
                },
                true,
            )
            .await
            .unwrap();

        assert!(store.list::<WorkflowInstanceData>().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_inactive_workflow_firing_is_dropped_not_failed() {
        let store = InMemoryStore::new();
        let listener = listener(store.clone(), RecordingPublisher::default(), TestElements::default());
        let workflow = active_workflow(&store).await;
        let inactive = workflow.with_data(|d| d.status = WorkflowStatus::Inactive);
        store.patch(&workflow, &inactive).await.unwrap();

        // Succeeds so the ledger records COMPLETED, not FAILED.
        listener
            .handle(
                "m-1",
                BrokerMessage::RunWorkflow {
                    workflow_id: workflow.id,
                    fired_by: FiredBy::manual(),
                },
                false,
            )
            .await
            .unwrap();
        assert!(store.list::<WorkflowInstanceData>().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_object_created_inserts_element_and_evaluates_trigger() {
        let store = InMemoryStore::new();
        let publisher = RecordingPublisher::default();
        let elements = TestElements::default();
        let listener = listener(store.clone(), publisher.clone(), elements.clone());

        let dataset = store
            .create(DatasetData {
                name: "clickstream".to_string(),
                bucket: "data-lake".to_string(),
                prefix: "raw/".to_string(),
            })
            .await
            .unwrap();
        let subscription = store
            .create(SubscriptionData {
                name: "clicks".to_string(),
                dataset_id: dataset.id,
                status: SubscriptionStatus::Active,
                start_prefix: None,
                end_prefix: None,
                path_regex: None,
                error_message: None,
            })
            .await
            .unwrap();
        store
            .create(TriggerData {
                name: "batch".to_string(),
                status: TriggerStatus::Active,
                spec: TriggerSpec::SubscriptionBatch {
                    subscription_id: subscription.id,
                    byte_threshold: 1000,
                },
                workflow_ids: vec![Uuid::now_v7()],
                completions: Default::default(),
            })
            .await
            .unwrap();

        listener
            .handle(
                "m-1",
                BrokerMessage::ObjectCreated {
                    notification: created_notification("data-lake", "raw/part-0.gz", 2048),
                },
                false,
            )
            .await
            .unwrap();

        // Element landed and the threshold trigger fired.
        let rows = elements.list_for_subscription(subscription.id).await.unwrap();
        assert_eq!(rows.len(), 1);
        let sent = publisher.sent.lock().unwrap().clone();
        assert!(sent
            .iter()
            .any(|m| matches!(m, BrokerMessage::RunWorkflow { .. })));
    }

    #[tokio::test]
    async fn test_object_created_replay_is_safe() {
        let store = InMemoryStore::new();
        let elements = TestElements::default();
        let listener = listener(store.clone(), RecordingPublisher::default(), elements.clone());

        let dataset = store
            .create(DatasetData {
                name: "clickstream".to_string(),
                bucket: "data-lake".to_string(),
                prefix: "raw/".to_string(),
            })
            .await
            .unwrap();
        let subscription = store
            .create(SubscriptionData {
                name: "clicks".to_string(),
                dataset_id: dataset.id,
                status: SubscriptionStatus::Active,
                start_prefix: None,
                end_prefix: None,
                path_regex: None,
                error_message: None,
            })
            .await
            .unwrap();

        let message = BrokerMessage::ObjectCreated {
            notification: created_notification("data-lake", "raw/part-0.gz", 2048),
        };
        listener.handle("m-1", message.clone(), false).await.unwrap();
        // Redelivery after a lost worker re-runs; the conditional insert
        // dedups.
        listener.handle("m-1", message, true).await.unwrap();

        let rows = elements.list_for_subscription(subscription.id).await.unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn test_unmatched_object_is_ignored() {
        let store = InMemoryStore::new();
        let elements = TestElements::default();
        let listener = listener(store.clone(), RecordingPublisher::default(), elements.clone());

        let dataset = store
            .create(DatasetData {
                name: "clickstream".to_string(),
                bucket: "data-lake".to_string(),
                prefix: "raw/".to_string(),
            })
            .await
            .unwrap();
        let subscription = store
            .create(SubscriptionData {
                name: "clicks".to_string(),
                dataset_id: dataset.id,
                status: SubscriptionStatus::Active,
                start_prefix: None,
                end_prefix: None,
                path_regex: None,
                error_message: None,
            })
            .await
            .unwrap();

        listener
            .handle(
                "m-1",
                BrokerMessage::ObjectCreated {
                    notification: created_notification("other-bucket", "raw/part-0.gz", 2048),
                },
                false,
            )
            .await
            .unwrap();
        assert!(elements
            .list_for_subscription(subscription.id)
            .await
            .unwrap()
            .is_empty());
    }
}
