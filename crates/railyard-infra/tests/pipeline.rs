//! End-to-end scenarios over the full local stack: SQLite persistence,
//! in-process queue, local task runner, and the core services wired the same
//! way the `ryd` binary wires them.

use std::time::Duration;

use uuid::Uuid;

use railyard_core::broker::{MessageBroker, QueuePublisher};
use railyard_core::engine::{BoxEngine, Engine};
use railyard_core::listener::RailyardListener;
use railyard_core::store::EntityStore;
use railyard_core::subscription::{self, ElementStore, SubscriptionManager};
use railyard_core::trigger::TriggerEngine;
use railyard_core::worker::EngineWorker;
use railyard_core::workflow::WorkflowService;
use railyard_infra::cron::CronRuntime;
use railyard_infra::object_store::InMemoryObjectStore;
use railyard_infra::queue::InMemoryQueue;
use railyard_infra::sqlite::{
    DatabasePool, SqliteElementStore, SqliteEntityStore, SqliteMessageLedger,
};
use railyard_infra::task::{LocalTaskRunner, NoopEngine};
use railyard_types::action::{ActionData, ActionStatus, CheckinResult};
use railyard_types::config::WorkerConfig;
use railyard_types::dataset::DatasetData;
use railyard_types::datastore::{DatastoreData, DatastoreStatus, FailurePolicy};
use railyard_types::entity::Record;
use railyard_types::message::WorkerIdentity;
use railyard_types::subscription::{
    ElementState, SubscriptionData, SubscriptionElement, SubscriptionStatus,
};
use railyard_types::trigger::{TriggerData, TriggerSpec, TriggerStatus};
use railyard_types::workflow::{
    FiredBy, InstanceStatus, WorkflowData, WorkflowInstanceData, WorkflowStatus,
};

type Publisher = QueuePublisher<InMemoryQueue>;
type Workflow = WorkflowService<SqliteEntityStore, Publisher, SqliteElementStore>;
type Runner = LocalTaskRunner<SqliteEntityStore, Publisher, SqliteElementStore>;
type Broker = MessageBroker<InMemoryQueue, SqliteMessageLedger, Runner>;
type Cron = CronRuntime<Publisher>;
type Triggers = TriggerEngine<SqliteEntityStore, Publisher, SqliteElementStore, Cron>;
type Subscriptions = SubscriptionManager<SqliteEntityStore, SqliteElementStore, InMemoryObjectStore>;
type Listener =
    RailyardListener<SqliteEntityStore, Publisher, SqliteElementStore, InMemoryObjectStore, Cron>;
type Worker = EngineWorker<SqliteEntityStore, Runner, Publisher, SqliteElementStore>;

/// An engine that fails every action it is handed.
struct ExplodingEngine;

impl Engine for ExplodingEngine {
    fn id(&self) -> &str {
        "boom"
    }

    async fn run(
        &self,
        _action: Record<ActionData>,
        _datastore: Record<DatastoreData>,
    ) -> CheckinResult {
        CheckinResult::failure("synthetic engine failure")
    }
}

struct Harness {
    _dir: tempfile::TempDir,
    store: SqliteEntityStore,
    elements: SqliteElementStore,
    objects: InMemoryObjectStore,
    queue: InMemoryQueue,
    workflow: Workflow,
    broker: Broker,
    triggers: Triggers,
    subscriptions: Subscriptions,
    worker: Worker,
}

impl Harness {
    async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("t.db").display());
        let pool = DatabasePool::new(&url).await.unwrap();

        let store = SqliteEntityStore::new(pool.clone());
        let elements = SqliteElementStore::new(pool.clone());
        let ledger = SqliteMessageLedger::new(pool);

        let queue = InMemoryQueue::default();
        let publisher = QueuePublisher::new(queue.clone());
        let objects = InMemoryObjectStore::new();

        let workflow = WorkflowService::new(store.clone(), publisher.clone(), elements.clone());
        let tasks = LocalTaskRunner::new(workflow.clone());
        tasks.register(BoxEngine::new(NoopEngine));
        tasks.register(BoxEngine::new(ExplodingEngine));

        let broker = MessageBroker::new(
            queue.clone(),
            ledger,
            tasks.clone(),
            WorkerIdentity::local("test"),
            14,
            Duration::from_millis(5),
        );
        let cron = CronRuntime::new(publisher.clone());
        let triggers = TriggerEngine::new(
            store.clone(),
            publisher.clone(),
            elements.clone(),
            cron,
        );
        let subscriptions =
            SubscriptionManager::new(store.clone(), elements.clone(), objects.clone(), 100);
        let worker = EngineWorker::new(
            store.clone(),
            tasks,
            workflow.clone(),
            WorkerConfig::default(),
        );

        Self {
            _dir: dir,
            store,
            elements,
            objects,
            queue,
            workflow,
            broker,
            triggers,
            subscriptions,
            worker,
        }
    }

    fn listener(&self) -> Listener {
        RailyardListener::new(
            self.store.clone(),
            self.workflow.clone(),
            self.triggers.clone(),
            self.subscriptions.clone(),
        )
    }

    /// Process every message currently in the queue.
    async fn drain(&self) {
        let listener = self.listener();
        while self.queue.depth() > 0 {
            self.broker.receive(&listener).await.unwrap();
        }
    }

    /// Promote queued actions and drain resulting messages until the
    /// instance reaches a terminal state.
    async fn run_to_terminal(&self, instance_id: Uuid) -> Record<WorkflowInstanceData> {
        for _ in 0..200 {
            self.worker.promote_tick().await.unwrap();
            self.drain().await;
            let instance = self
                .store
                .get::<WorkflowInstanceData>(instance_id)
                .await
                .unwrap();
            if matches!(
                instance.data.status,
                InstanceStatus::Completed | InstanceStatus::Failed
            ) {
                // Let spawned engine tasks finish their final bookkeeping.
                tokio::time::sleep(Duration::from_millis(25)).await;
                return instance;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("instance {instance_id} never reached a terminal state");
    }

    async fn template_datastore(&self, on_failure: FailurePolicy) -> Record<DatastoreData> {
        self.store
            .create(DatastoreData {
                name: "warehouse".to_string(),
                status: DatastoreStatus::Template,
                concurrency: 2,
                on_failure,
                template_id: None,
                args: None,
            })
            .await
            .unwrap()
    }

    async fn active_workflow(&self, datastore_id: Uuid, concurrency: u32) -> Record<WorkflowData> {
        self.store
            .create(WorkflowData {
                name: "nightly-load".to_string(),
                status: WorkflowStatus::Active,
                datastore_id,
                concurrency,
            })
            .await
            .unwrap()
    }

    #[allow(clippy::too_many_arguments)]
    async fn action_template(
        &self,
        workflow: &Record<WorkflowData>,
        engine: &str,
        order_idx: f64,
        first: bool,
        last: bool,
        subscription_id: Option<Uuid>,
    ) -> Record<ActionData> {
        self.store
            .create(ActionData {
                name: format!("step-{order_idx}"),
                status: ActionStatus::Template,
                engine: engine.to_string(),
                datastore_id: workflow.data.datastore_id,
                workflow_id: Some(workflow.id),
                workflow_instance_id: None,
                order_idx,
                first_in_workflow: first,
                last_in_workflow: last,
                subscription_id,
                task_arn: None,
                args: None,
                error_message: None,
            })
            .await
            .unwrap()
    }

    async fn active_subscription(&self, dataset_id: Uuid) -> Record<SubscriptionData> {
        self.store
            .create(SubscriptionData {
                name: "clicks".to_string(),
                dataset_id,
                status: SubscriptionStatus::Active,
                start_prefix: None,
                end_prefix: None,
                path_regex: None,
                error_message: None,
            })
            .await
            .unwrap()
    }
}

#[tokio::test]
async fn test_manual_firing_runs_workflow_to_completion() {
    let h = Harness::new().await;
    let template = h.template_datastore(FailurePolicy::Continue).await;
    let workflow = h.active_workflow(template.id, 1).await;
    h.action_template(&workflow, "noop", 1.0, true, false, None)
        .await;
    h.action_template(&workflow, "noop", 2.0, false, true, None)
        .await;

    let instance = h
        .workflow
        .start_instance(workflow.id, FiredBy::manual())
        .await
        .unwrap()
        .expect("admission should accept the first firing");

    let finished = h.run_to_terminal(instance.id).await;
    assert_eq!(finished.data.status, InstanceStatus::Completed);

    // Both cloned actions ran to COMPLETED; the templates are untouched.
    let actions = h.store.list::<ActionData>().await.unwrap();
    let clones: Vec<_> = actions
        .iter()
        .filter(|a| a.data.workflow_instance_id == Some(instance.id))
        .collect();
    assert_eq!(clones.len(), 2);
    assert!(clones.iter().all(|a| a.data.status == ActionStatus::Completed));
    assert_eq!(
        actions
            .iter()
            .filter(|a| a.data.status == ActionStatus::Template)
            .count(),
        2
    );

    // The instance ran against an ACTIVE clone of the template datastore,
    // and completion leaves the clone ACTIVE.
    let clone = h
        .store
        .get::<DatastoreData>(finished.data.datastore_id)
        .await
        .unwrap();
    assert_ne!(clone.id, template.id);
    assert_eq!(clone.data.template_id, Some(template.id));
    assert_eq!(clone.data.status, DatastoreStatus::Active);
    let template = h.store.get::<DatastoreData>(template.id).await.unwrap();
    assert_eq!(template.data.status, DatastoreStatus::Template);
}

#[tokio::test]
async fn test_concurrency_admission_declines_excess_firing() {
    let h = Harness::new().await;
    let template = h.template_datastore(FailurePolicy::Continue).await;
    let workflow = h.active_workflow(template.id, 1).await;
    h.action_template(&workflow, "noop", 1.0, true, true, None)
        .await;

    let first = h
        .workflow
        .start_instance(workflow.id, FiredBy::manual())
        .await
        .unwrap();
    assert!(first.is_some());

    // The workflow is at its limit while the first instance is in flight;
    // the second firing is dropped, not queued.
    let second = h
        .workflow
        .start_instance(workflow.id, FiredBy::manual())
        .await
        .unwrap();
    assert!(second.is_none());
    assert_eq!(
        h.store.list::<WorkflowInstanceData>().await.unwrap().len(),
        1
    );
}

#[tokio::test]
async fn test_failed_action_deactivates_workflow_and_datastore() {
    let h = Harness::new().await;
    let template = h.template_datastore(FailurePolicy::Deactivate).await;
    let workflow = h.active_workflow(template.id, 1).await;
    h.action_template(&workflow, "boom", 1.0, true, false, None)
        .await;
    h.action_template(&workflow, "noop", 2.0, false, true, None)
        .await;

    let instance = h
        .workflow
        .start_instance(workflow.id, FiredBy::manual())
        .await
        .unwrap()
        .unwrap();

    let finished = h.run_to_terminal(instance.id).await;
    assert_eq!(finished.data.status, InstanceStatus::Failed);

    let clones: Vec<_> = h
        .store
        .list::<ActionData>()
        .await
        .unwrap()
        .into_iter()
        .filter(|a| a.data.workflow_instance_id == Some(instance.id))
        .collect();
    let failed = clones.iter().find(|a| a.data.engine == "boom").unwrap();
    assert_eq!(failed.data.status, ActionStatus::Failed);
    assert!(failed.data.error_message.is_some());
    let skipped = clones.iter().find(|a| a.data.engine == "noop").unwrap();
    assert_eq!(skipped.data.status, ActionStatus::Skipped);

    // The deactivation cascade turns off the workflow and the concrete
    // datastore, but never the template.
    let workflow = h.store.get::<WorkflowData>(workflow.id).await.unwrap();
    assert_eq!(workflow.data.status, WorkflowStatus::Inactive);
    let clone = h
        .store
        .get::<DatastoreData>(finished.data.datastore_id)
        .await
        .unwrap();
    assert_eq!(clone.data.status, DatastoreStatus::Inactive);
    let template = h.store.get::<DatastoreData>(template.id).await.unwrap();
    assert_eq!(template.data.status, DatastoreStatus::Template);
}

#[tokio::test]
async fn test_byte_threshold_reserves_oldest_elements() {
    let h = Harness::new().await;
    let subscription_id = Uuid::now_v7();
    h.elements
        .insert_batch(&[
            SubscriptionElement::new(subscription_id, "raw/part-0.gz", 100),
            SubscriptionElement::new(subscription_id, "raw/part-1.gz", 200),
            SubscriptionElement::new(subscription_id, "raw/part-2.gz", 300),
        ])
        .await
        .unwrap();

    // 100 + 200 crosses the 250-byte threshold; part-2 stays out.
    let batch = subscription::accumulate_threshold(&h.elements, subscription_id, 250)
        .await
        .unwrap()
        .expect("threshold should be met");
    assert_eq!(batch.len(), 2);

    let ids: Vec<Uuid> = batch.iter().map(|e| e.id).collect();
    let batch_id = subscription::reserve_batch(&h.elements, &ids).await.unwrap();

    let mut rows = h
        .elements
        .list_for_subscription(subscription_id)
        .await
        .unwrap();
    rows.sort_by(|a, b| a.path.cmp(&b.path));
    assert_eq!(rows[0].state, ElementState::Reserved);
    assert_eq!(rows[0].batch_id, Some(batch_id));
    assert_eq!(rows[1].state, ElementState::Reserved);
    assert_eq!(rows[1].batch_id, Some(batch_id));
    assert_eq!(rows[2].state, ElementState::Unconsumed);
    assert_eq!(rows[2].batch_id, None);
}

#[tokio::test]
async fn test_subscription_batch_trigger_consumes_reserved_batch() {
    let h = Harness::new().await;
    let dataset = h
        .store
        .create(DatasetData {
            name: "clickstream".to_string(),
            bucket: "data-lake".to_string(),
            prefix: "raw/".to_string(),
        })
        .await
        .unwrap();
    let subscription = h.active_subscription(dataset.id).await;

    let template = h.template_datastore(FailurePolicy::Continue).await;
    let workflow = h.active_workflow(template.id, 1).await;
    h.action_template(&workflow, "noop", 1.0, true, true, Some(subscription.id))
        .await;

    let trigger = h
        .store
        .create(TriggerData {
            name: "batch".to_string(),
            status: TriggerStatus::Active,
            spec: TriggerSpec::SubscriptionBatch {
                subscription_id: subscription.id,
                byte_threshold: 250,
            },
            workflow_ids: vec![workflow.id],
            completions: Default::default(),
        })
        .await
        .unwrap();

    h.elements
        .insert_batch(&[
            SubscriptionElement::new(subscription.id, "raw/part-0.gz", 100),
            SubscriptionElement::new(subscription.id, "raw/part-1.gz", 200),
            SubscriptionElement::new(subscription.id, "raw/part-2.gz", 300),
        ])
        .await
        .unwrap();

    // Evaluation reserves the batch and publishes RunWorkflow; draining lets
    // the listener admit the instance.
    h.triggers.evaluate(trigger.id).await.unwrap();
    h.drain().await;

    let instances = h.store.list::<WorkflowInstanceData>().await.unwrap();
    assert_eq!(instances.len(), 1);
    let finished = h.run_to_terminal(instances[0].id).await;
    assert_eq!(finished.data.status, InstanceStatus::Completed);

    // The consuming action took exactly the reserved batch.
    let mut rows = h
        .elements
        .list_for_subscription(subscription.id)
        .await
        .unwrap();
    rows.sort_by(|a, b| a.path.cmp(&b.path));
    assert_eq!(rows[0].state, ElementState::Consumed);
    assert_eq!(rows[1].state, ElementState::Consumed);
    assert_eq!(rows[2].state, ElementState::Unconsumed);
}

#[tokio::test]
async fn test_generation_populates_elements_from_object_store() {
    let h = Harness::new().await;
    let dataset = h
        .store
        .create(DatasetData {
            name: "clickstream".to_string(),
            bucket: "data-lake".to_string(),
            prefix: "raw/".to_string(),
        })
        .await
        .unwrap();
    let subscription = h
        .store
        .create(SubscriptionData {
            name: "clicks".to_string(),
            dataset_id: dataset.id,
            status: SubscriptionStatus::Queued,
            start_prefix: None,
            end_prefix: None,
            path_regex: None,
            error_message: None,
        })
        .await
        .unwrap();

    h.objects.put("data-lake", "raw/part-0.gz", 100);
    h.objects.put("data-lake", "raw/part-1.gz", 200);
    h.objects.put("data-lake", "raw/part-2.gz", 300);
    h.objects.put("data-lake", "staging/other.gz", 400);

    h.subscriptions.generate(subscription.id).await.unwrap();

    let subscription = h
        .store
        .get::<SubscriptionData>(subscription.id)
        .await
        .unwrap();
    assert_eq!(subscription.data.status, SubscriptionStatus::Active);
    let rows = h
        .elements
        .list_for_subscription(subscription.id)
        .await
        .unwrap();
    assert_eq!(rows.len(), 3);
    assert!(rows.iter().all(|e| e.state == ElementState::Unconsumed));
    assert!(rows.iter().all(|e| e.path.starts_with("raw/")));
}
