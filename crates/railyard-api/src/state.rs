//! Application state wiring all services together.
//!
//! Services are generic over store/queue/scheduler ports; AppState pins
//! them to the concrete infra implementations for local mode: SQLite
//! persistence shared between processes, with the queue, object store, and
//! task runner living in-process.

use std::time::Duration;

use railyard_core::broker::{MessageBroker, QueuePublisher};
use railyard_core::engine::BoxEngine;
use railyard_core::listener::RailyardListener;
use railyard_core::subscription::SubscriptionManager;
use railyard_core::trigger::TriggerEngine;
use railyard_core::worker::EngineWorker;
use railyard_core::workflow::WorkflowService;
use railyard_infra::config;
use railyard_infra::cron::CronRuntime;
use railyard_infra::object_store::InMemoryObjectStore;
use railyard_infra::queue::InMemoryQueue;
use railyard_infra::sqlite::{
    DatabasePool, SqliteElementStore, SqliteEntityStore, SqliteMessageLedger,
};
use railyard_infra::task::{LocalTaskRunner, NoopEngine};
use railyard_types::config::WorkerConfig;
use railyard_types::message::WorkerIdentity;

/// Concrete type aliases for the service generics pinned to infra
/// implementations.
pub type ConcretePublisher = QueuePublisher<InMemoryQueue>;
pub type ConcreteWorkflow =
    WorkflowService<SqliteEntityStore, ConcretePublisher, SqliteElementStore>;
pub type ConcreteRunner = LocalTaskRunner<SqliteEntityStore, ConcretePublisher, SqliteElementStore>;
pub type ConcreteBroker = MessageBroker<InMemoryQueue, SqliteMessageLedger, ConcreteRunner>;
pub type ConcreteCron = CronRuntime<ConcretePublisher>;
pub type ConcreteTriggers =
    TriggerEngine<SqliteEntityStore, ConcretePublisher, SqliteElementStore, ConcreteCron>;
pub type ConcreteSubscriptions =
    SubscriptionManager<SqliteEntityStore, SqliteElementStore, InMemoryObjectStore>;
pub type ConcreteListener = RailyardListener<
    SqliteEntityStore,
    ConcretePublisher,
    SqliteElementStore,
    InMemoryObjectStore,
    ConcreteCron,
>;
pub type ConcreteWorker =
    EngineWorker<SqliteEntityStore, ConcreteRunner, ConcretePublisher, SqliteElementStore>;

/// Shared application state holding all services.
#[derive(Clone)]
pub struct AppState {
    pub config: WorkerConfig,
    pub data_dir: String,
    pub store: SqliteEntityStore,
    pub elements: SqliteElementStore,
    pub objects: InMemoryObjectStore,
    pub queue: InMemoryQueue,
    pub publisher: ConcretePublisher,
    pub workflow: ConcreteWorkflow,
    pub tasks: ConcreteRunner,
    pub broker: ConcreteBroker,
    pub cron: ConcreteCron,
    pub triggers: ConcreteTriggers,
    pub subscriptions: ConcreteSubscriptions,
}

impl AppState {
    /// Initialize the application state: open the database, wire services.
    pub async fn init() -> anyhow::Result<Self> {
        let data_dir = config::default_data_dir();
        tokio::fs::create_dir_all(&data_dir).await?;

        let worker_config = config::load(&data_dir)?;
        let db_url = config::database_url(&worker_config, &data_dir);
        let pool = DatabasePool::new(&db_url).await?;

        let store = SqliteEntityStore::new(pool.clone());
        let elements = SqliteElementStore::new(pool.clone());
        let ledger = SqliteMessageLedger::new(pool);

        let queue = InMemoryQueue::default();
        let publisher = QueuePublisher::new(queue.clone());
        let objects = InMemoryObjectStore::new();

        let workflow = WorkflowService::new(store.clone(), publisher.clone(), elements.clone());

        let tasks = LocalTaskRunner::new(workflow.clone());
        tasks.register(BoxEngine::new(NoopEngine));

        let broker = MessageBroker::new(
            queue.clone(),
            ledger,
            tasks.clone(),
            WorkerIdentity::local(&worker_config.cluster),
            worker_config.message_retention_days,
            Duration::from_secs(worker_config.queue_wait_secs),
        );

        let cron = CronRuntime::new(publisher.clone());
        let triggers = TriggerEngine::new(
            store.clone(),
            publisher.clone(),
            elements.clone(),
            cron.clone(),
        );
        let subscriptions = SubscriptionManager::new(
            store.clone(),
            elements.clone(),
            objects.clone(),
            worker_config.generation_batch_size,
        );

        Ok(Self {
            config: worker_config,
            data_dir,
            store,
            elements,
            objects,
            queue,
            publisher,
            workflow,
            tasks,
            broker,
            cron,
            triggers,
            subscriptions,
        })
    }

    /// The message consumer wiring every broker payload to its service.
    pub fn listener(&self) -> ConcreteListener {
        RailyardListener::new(
            self.store.clone(),
            self.workflow.clone(),
            self.triggers.clone(),
            self.subscriptions.clone(),
        )
    }

    /// The engine worker loop over this state's store and task runner.
    pub fn worker(&self) -> ConcreteWorker {
        EngineWorker::new(
            self.store.clone(),
            self.tasks.clone(),
            self.workflow.clone(),
            self.config.clone(),
        )
    }
}
