//! In-process task scheduler: runs engines as spawned tokio tasks.
//!
//! Stands in for a remote container scheduler in single-process
//! deployments. A launched "task" checks the action out, runs the engine
//! registered under the action's engine id, and checks the result back in.
//! Synthetic arns (`local-{uuid}`) keep the worker's orphan recovery and the
//! broker's liveness probe working unchanged: a restarted process forgets
//! its arns, so their actions are correctly reported dead.

use std::sync::Arc;

use dashmap::DashMap;
use uuid::Uuid;

use railyard_core::broker::Publisher;
use railyard_core::engine::{BoxEngine, Engine};
use railyard_core::store::EntityStore;
use railyard_core::subscription::ElementStore;
use railyard_core::task::{
    IdleInstance, LaunchOutcome, TaskDescription, TaskScheduler, TaskStatus, ENV_ACTION_ID,
};
use railyard_core::workflow::WorkflowService;
use railyard_types::action::CheckinResult;
use railyard_types::error::TaskError;

/// Task scheduler that executes engines in-process.
#[derive(Clone)]
pub struct LocalTaskRunner<S, P, E> {
    workflow: WorkflowService<S, P, E>,
    engines: Arc<DashMap<String, BoxEngine>>,
    statuses: Arc<DashMap<String, TaskStatus>>,
}

impl<S, P, E> LocalTaskRunner<S, P, E>
where
    S: EntityStore + Clone + Send + Sync + 'static,
    P: Publisher + Clone + Send + Sync + 'static,
    E: ElementStore + Clone + Send + Sync + 'static,
{
    pub fn new(workflow: WorkflowService<S, P, E>) -> Self {
        Self {
            workflow,
            engines: Arc::new(DashMap::new()),
            statuses: Arc::new(DashMap::new()),
        }
    }

    pub fn register(&self, engine: BoxEngine) {
        self.engines.insert(engine.id().to_string(), engine);
    }
}

impl<S, P, E> TaskScheduler for LocalTaskRunner<S, P, E>
where
    S: EntityStore + Clone + Send + Sync + 'static,
    P: Publisher + Clone + Send + Sync + 'static,
    E: ElementStore + Clone + Send + Sync + 'static,
{
    async fn run_task(
        &self,
        task_definition: &str,
        env: Vec<(String, String)>,
    ) -> Result<LaunchOutcome, TaskError> {
        let action_id = env
            .iter()
            .find(|(key, _)| key == ENV_ACTION_ID)
            .map(|(_, value)| value.as_str())
            .ok_or_else(|| TaskError::Api(format!("{ENV_ACTION_ID} not set")))?;
        let action_id = Uuid::parse_str(action_id)
            .map_err(|e| TaskError::Api(format!("bad {ENV_ACTION_ID}: {e}")))?;

        let engine = self
            .engines
            .get(task_definition)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| TaskError::Api(format!("no engine registered for '{task_definition}'")))?;

        let task_arn = format!("local-{}", Uuid::now_v7());
        self.statuses.insert(task_arn.clone(), TaskStatus::Running);

        let workflow = self.workflow.clone();
        let statuses = Arc::clone(&self.statuses);
        let arn = task_arn.clone();
        tokio::spawn(async move {
            match workflow.checkout(action_id).await {
                Ok((action, datastore)) => {
                    let result = engine.run(action, datastore).await;
                    if let Err(err) = workflow.checkin(action_id, result).await {
                        tracing::error!(%action_id, error = %err, "checkin failed");
                    }
                }
                Err(err) => {
                    tracing::warn!(%action_id, error = %err, "checkout failed, task abandoned");
                }
            }
            statuses.insert(arn, TaskStatus::Stopped);
        });

        Ok(LaunchOutcome::Started { task_arn })
    }

    async fn describe_tasks(&self, task_arns: &[String]) -> Result<Vec<TaskDescription>, TaskError> {
        Ok(task_arns
            .iter()
            .filter_map(|arn| {
                self.statuses.get(arn).map(|status| TaskDescription {
                    task_arn: arn.clone(),
                    status: *status.value(),
                })
            })
            .collect())
    }

    async fn list_idle_instances(&self, _cluster: &str) -> Result<Vec<IdleInstance>, TaskError> {
        // The local runner shares the worker's process; there is no fleet to
        // scale.
        Ok(vec![])
    }

    async fn deregister_instance(&self, _cluster: &str, _instance_id: &str) -> Result<(), TaskError> {
        Ok(())
    }

    async fn terminate_instance(&self, _instance_id: &str) -> Result<(), TaskError> {
        Ok(())
    }
}

/// Engine that succeeds without doing anything. Useful for wiring checks
/// and dry runs.
pub struct NoopEngine;

impl Engine for NoopEngine {
    fn id(&self) -> &str {
        "noop"
    }

    async fn run(
        &self,
        action: railyard_types::entity::Record<railyard_types::action::ActionData>,
        _datastore: railyard_types::entity::Record<railyard_types::datastore::DatastoreData>,
    ) -> CheckinResult {
        tracing::info!(action_id = %action.id, name = %action.data.name, "noop engine ran");
        CheckinResult::success()
    }
}
