//! Engine worker: the periodic scheduling loop.
//!
//! Four independent ticks, each its own error scope so one bad sweep never
//! takes the loop down: promote QUEUED actions into remote task launches
//! within datastore concurrency, return stale PENDING actions to QUEUED,
//! fail actions whose remote task died, and scale in idle compute near the
//! end of the billing hour.

use std::time::Duration;

use chrono::{DateTime, Timelike, Utc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use railyard_types::action::{ActionData, ActionStatus};
use railyard_types::config::WorkerConfig;
use railyard_types::datastore::{DatastoreData, DatastoreStatus};
use railyard_types::entity::Record;
use railyard_types::error::{StoreError, WorkerError};

use crate::broker::Publisher;
use crate::mutex::MutexService;
use crate::store::EntityStore;
use crate::subscription::ElementStore;
use crate::task::{self, LaunchOutcome, TaskScheduler, ENV_ACTION_ID};
use crate::workflow::WorkflowService;

/// Scale-down only runs this many minutes into the hour or later, so
/// instances are released just before the next billing hour starts.
const SCALE_DOWN_MINUTE: u32 = 55;

/// The periodic scheduling loop of one worker process.
#[derive(Clone)]
pub struct EngineWorker<S, T, P, E> {
    store: S,
    tasks: T,
    workflow: WorkflowService<S, P, E>,
    mutex: MutexService<S>,
    config: WorkerConfig,
}

impl<S, T, P, E> EngineWorker<S, T, P, E>
where
    S: EntityStore + Clone,
    T: TaskScheduler + Clone,
    P: Publisher + Clone,
    E: ElementStore + Clone,
{
    pub fn new(
        store: S,
        tasks: T,
        workflow: WorkflowService<S, P, E>,
        config: WorkerConfig,
    ) -> Self {
        let mutex = MutexService::new(store.clone());
        Self {
            store,
            tasks,
            workflow,
            mutex,
            config,
        }
    }

    /// Run the tick loop until cancelled.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut promote =
            tokio::time::interval(Duration::from_secs(self.config.promote_interval_secs.max(1)));
        let mut recovery =
            tokio::time::interval(Duration::from_secs(self.config.recovery_interval_secs.max(1)));
        let mut scale_down = tokio::time::interval(Duration::from_secs(
            self.config.scale_down_interval_secs.max(1),
        ));

        tracing::info!(cluster = %self.config.cluster, "engine worker loop started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("engine worker loop stopping");
                    return;
                }
                _ = promote.tick() => {
                    if let Err(err) = self.promote_tick().await {
                        tracing::error!(error = %err, "promotion sweep failed");
                    }
                }
                _ = recovery.tick() => {
                    if let Err(err) = self.recover_stale_tick().await {
                        tracing::error!(error = %err, "stale-pending sweep failed");
                    }
                    if let Err(err) = self.recover_orphans_tick().await {
                        tracing::error!(error = %err, "orphan sweep failed");
                    }
                }
                _ = scale_down.tick() => {
                    if let Err(err) = self.scale_down_tick().await {
                        tracing::error!(error = %err, "scale-down sweep failed");
                    }
                }
            }
        }
    }

    // -- promotion ---------------------------------------------------------

    /// Launch QUEUED actions, per ACTIVE datastore, within its concurrency
    /// limit, lowest order first.
    pub async fn promote_tick(&self) -> Result<(), WorkerError> {
        let actions = self.store.list::<ActionData>().await?;
        for datastore in self.store.list::<DatastoreData>().await? {
            if datastore.data.status != DatastoreStatus::Active {
                continue;
            }
            let held = actions
                .iter()
                .filter(|a| a.data.datastore_id == datastore.id && a.data.status.holds_capacity())
                .count();
            let free = (datastore.data.concurrency as usize).saturating_sub(held);
            if free == 0 {
                continue;
            }

            let mut queued: Vec<Record<ActionData>> = actions
                .iter()
                .filter(|a| {
                    a.data.datastore_id == datastore.id && a.data.status == ActionStatus::Queued
                })
                .cloned()
                .collect();
            queued.sort_by(|a, b| {
                a.data
                    .order_idx
                    .partial_cmp(&b.data.order_idx)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });

            for action in queued.into_iter().take(free) {
                if !self.launch(action).await? {
                    // The cluster is out of capacity; later datastores would
                    // only hit the same wall this tick.
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    /// QUEUED→PENDING, then launch the remote task under the cluster launch
    /// lock. Returns false when the cluster reported insufficient capacity.
    async fn launch(&self, action: Record<ActionData>) -> Result<bool, WorkerError> {
        let pending = action.with_data(|d| d.status = ActionStatus::Pending);
        let action = match self
            .store
            .patch_if(&action, &pending, |d| d.status == ActionStatus::Queued)
            .await
        {
            Ok(action) => action,
            // Another worker promoted it first.
            Err(StoreError::ConditionFailed) => return Ok(true),
            Err(err) => return Err(err.into()),
        };

        let lock = format!("task-launch:{}", self.config.cluster);
        let timeout = Duration::from_secs(self.config.lock_timeout_secs);
        let env = vec![(ENV_ACTION_ID.to_string(), action.id.to_string())];
        let outcome = self
            .mutex
            .with_lock(&lock, timeout, || async {
                self.tasks.run_task(&action.data.engine, env).await
            })
            .await?;

        match outcome {
            Ok(LaunchOutcome::Started { task_arn }) => {
                let stamped = action.with_data(|d| d.task_arn = Some(task_arn.clone()));
                self.store.patch(&action, &stamped).await?;
                tracing::info!(
                    action_id = %action.id,
                    name = %action.data.name,
                    %task_arn,
                    "launched action task"
                );
                Ok(true)
            }
            Ok(LaunchOutcome::InsufficientCapacity) => {
                self.revert_to_queued(&action).await?;
                tracing::warn!(
                    action_id = %action.id,
                    cluster = %self.config.cluster,
                    "insufficient cluster capacity, action returned to queued"
                );
                Ok(false)
            }
            Err(err) => {
                self.revert_to_queued(&action).await?;
                tracing::error!(action_id = %action.id, error = %err, "task launch failed");
                Ok(true)
            }
        }
    }

    async fn revert_to_queued(&self, action: &Record<ActionData>) -> Result<(), WorkerError> {
        let queued = action.with_data(|d| {
            d.status = ActionStatus::Queued;
            d.task_arn = None;
        });
        match self
            .store
            .patch_if(action, &queued, |d| d.status == ActionStatus::Pending)
            .await
        {
            Ok(_) | Err(StoreError::ConditionFailed) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    // -- recovery ----------------------------------------------------------

    /// Return PENDING actions that never received a task arn within the
    /// grace period to QUEUED. Covers launches that died between the CAS
    /// and the arn stamp.
    pub async fn recover_stale_tick(&self) -> Result<(), WorkerError> {
        let cutoff = Utc::now() - chrono::Duration::seconds(self.config.pending_grace_secs as i64);
        for action in self.store.list::<ActionData>().await? {
            if action.data.status != ActionStatus::Pending
                || action.data.task_arn.is_some()
                || action.updated >= cutoff
            {
                continue;
            }
            tracing::warn!(
                action_id = %action.id,
                name = %action.data.name,
                "pending action exceeded grace period, returning to queued"
            );
            self.revert_to_queued(&action).await?;
        }
        Ok(())
    }

    /// Fail actions whose remote task the scheduler no longer reports as
    /// running. One batch status query covers the whole sweep.
    pub async fn recover_orphans_tick(&self) -> Result<(), WorkerError> {
        let candidates: Vec<(Uuid, String)> = self
            .store
            .list::<ActionData>()
            .await?
            .into_iter()
            .filter(|a| {
                matches!(a.data.status, ActionStatus::Pending | ActionStatus::Running)
            })
            .filter_map(|a| a.data.task_arn.clone().map(|arn| (a.id, arn)))
            .collect();
        if candidates.is_empty() {
            return Ok(());
        }

        let arns: Vec<String> = candidates.iter().map(|(_, arn)| arn.clone()).collect();
        let described = self.tasks.describe_tasks(&arns).await?;
        for (action_id, arn) in candidates {
            if task::is_alive(&described, &arn) {
                continue;
            }
            tracing::warn!(%action_id, task_arn = %arn, "remote task is gone, failing action");
            if let Err(err) = self
                .workflow
                .fail_remote(action_id, "remote task stopped without checking in")
                .await
            {
                tracing::error!(%action_id, error = %err, "orphan failure cascade failed");
            }
        }
        Ok(())
    }

    // -- scale-down --------------------------------------------------------

    pub async fn scale_down_tick(&self) -> Result<(), WorkerError> {
        self.scale_down_at(Utc::now()).await
    }

    /// Terminate one idle instance, at most, near the end of the billing
    /// hour. One idle instance always stays warm.
    async fn scale_down_at(&self, now: DateTime<Utc>) -> Result<(), WorkerError> {
        if now.minute() < SCALE_DOWN_MINUTE {
            return Ok(());
        }
        let lock = format!("scale-down:{}", self.config.cluster);
        let timeout = Duration::from_secs(self.config.lock_timeout_secs);
        self.mutex
            .with_lock(&lock, timeout, || async {
                let mut idle = self.tasks.list_idle_instances(&self.config.cluster).await?;
                if idle.len() <= 1 {
                    return Ok::<(), WorkerError>(());
                }
                idle.sort_by_key(|i| i.launched_at);
                let victim = &idle[0];
                self.tasks
                    .deregister_instance(&self.config.cluster, &victim.instance_id)
                    .await?;
                self.tasks.terminate_instance(&victim.instance_id).await?;
                tracing::info!(
                    instance_id = %victim.instance_id,
                    cluster = %self.config.cluster,
                    "scaled in idle instance"
                );
                Ok(())
            })
            .await??;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
