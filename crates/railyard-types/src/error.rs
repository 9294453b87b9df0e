use thiserror::Error;

/// Malformed input rejected before any persistence.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("missing required field '{0}'")]
    MissingField(String),

    #[error("invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Errors from the entity store.
///
/// `ConditionFailed` is a routine, expected race (another worker already
/// claimed the row) and is silently skipped at call sites. `StaleVersion`
/// surfaces only after the bounded retry budget is exhausted.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("entity not found")]
    NotFound,

    #[error("conditional update predicate failed")]
    ConditionFailed,

    #[error("stale version after {attempts} attempts")]
    StaleVersion { attempts: u32 },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("query error: {0}")]
    Query(String),

    #[error("database connection error")]
    Connection,

    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),
}

impl StoreError {
    /// Whether this error is the routine lost-a-race case.
    pub fn is_condition_failed(&self) -> bool {
        matches!(self, StoreError::ConditionFailed)
    }
}

/// Errors from the advisory mutex service.
#[derive(Debug, Error)]
pub enum LockError {
    #[error("timed out acquiring lock '{0}'")]
    Timeout(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors from the message broker (queue transport or idempotency ledger).
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("queue error: {0}")]
    Queue(String),

    #[error("invalid message payload: {0}")]
    Payload(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("task scheduler error: {0}")]
    Task(#[from] TaskError),
}

/// Errors from the remote task scheduler API.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("insufficient capacity in cluster '{0}'")]
    InsufficientCapacity(String),

    #[error("task scheduler API error: {0}")]
    Api(String),
}

/// Errors from workflow/instance/action lifecycle operations.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("workflow {0} is not active")]
    WorkflowInactive(uuid::Uuid),

    #[error("datastore {0} is not active")]
    DatastoreNotActive(uuid::Uuid),

    #[error("action {action_id} is not in state '{expected}'")]
    WrongActionState {
        action_id: uuid::Uuid,
        expected: String,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Subscription(#[from] SubscriptionError),

    #[error(transparent)]
    Broker(#[from] BrokerError),
}

/// Errors from trigger evaluation and cron registration.
#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("invalid cron pattern '{pattern}': {reason}")]
    InvalidCron { pattern: String, reason: String },

    #[error("schedule registration failed: {0}")]
    Schedule(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error(transparent)]
    Subscription(#[from] SubscriptionError),
}

/// Errors from subscription generation and element bookkeeping.
#[derive(Debug, Error)]
pub enum SubscriptionError {
    #[error("object store error: {0}")]
    ObjectStore(String),

    #[error("invalid path regex '{pattern}': {reason}")]
    InvalidRegex { pattern: String, reason: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors from the engine worker loop. Each tick catches these and logs;
/// they never crash the worker process.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Task(#[from] TaskError),

    #[error(transparent)]
    Workflow(#[from] WorkflowError),
}
