//! Remote task scheduler port.
//!
//! The container-orchestration API the worker launches remote engine tasks
//! through. Implementations: a real cluster client (out of scope here) or
//! the in-process `LocalTaskRunner` in `railyard-infra`.

use std::future::Future;

use chrono::{DateTime, Utc};

use railyard_types::error::TaskError;

/// Environment variable carrying the action id into a launched task.
pub const ENV_ACTION_ID: &str = "RAILYARD_ACTION_ID";

/// Reported desired status of one remote task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Running,
    Stopped,
}

/// One entry from a batch task-status query.
#[derive(Debug, Clone)]
pub struct TaskDescription {
    pub task_arn: String,
    pub status: TaskStatus,
}

/// Outcome of a launch attempt.
#[derive(Debug, Clone)]
pub enum LaunchOutcome {
    Started { task_arn: String },
    /// No capacity right now; the caller reverts the action to QUEUED and
    /// retries on a later tick.
    InsufficientCapacity,
}

/// A compute node with no running or pending tasks.
#[derive(Debug, Clone)]
pub struct IdleInstance {
    pub instance_id: String,
    pub launched_at: DateTime<Utc>,
}

/// Remote task scheduler API surface the core depends on.
pub trait TaskScheduler: Send + Sync {
    /// Launch one task of the given definition with extra environment.
    fn run_task(
        &self,
        task_definition: &str,
        env: Vec<(String, String)>,
    ) -> impl Future<Output = Result<LaunchOutcome, TaskError>> + Send;

    /// Batch-query task statuses. Arns absent from the answer are unknown
    /// to the scheduler; callers treat them as stopped.
    fn describe_tasks(
        &self,
        task_arns: &[String],
    ) -> impl Future<Output = Result<Vec<TaskDescription>, TaskError>> + Send;

    /// Active instances with zero running/pending tasks in the cluster.
    fn list_idle_instances(
        &self,
        cluster: &str,
    ) -> impl Future<Output = Result<Vec<IdleInstance>, TaskError>> + Send;

    /// Remove an instance from the cluster before terminating it.
    fn deregister_instance(
        &self,
        cluster: &str,
        instance_id: &str,
    ) -> impl Future<Output = Result<(), TaskError>> + Send;

    /// Request termination from the underlying fleet.
    fn terminate_instance(
        &self,
        instance_id: &str,
    ) -> impl Future<Output = Result<(), TaskError>> + Send;
}

/// Whether a batch status answer reports the arn as alive.
pub fn is_alive(descriptions: &[TaskDescription], task_arn: &str) -> bool {
    descriptions
        .iter()
        .any(|d| d.task_arn == task_arn && d.status == TaskStatus::Running)
}
