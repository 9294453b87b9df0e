//! Cron runtime for scheduled triggers, wrapping `tokio-cron-scheduler`.
//!
//! Each registered trigger owns one cron job; when the schedule elapses the
//! job publishes `EvaluateTrigger` for the trigger id onto the broker, so
//! scheduled firings flow through the same idempotent message path as
//! everything else. Patterns are validated with `croner` before a job is
//! created.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::RwLock;
use tokio_cron_scheduler::{Job, JobScheduler};
use uuid::Uuid;

use railyard_core::broker::Publisher;
use railyard_core::trigger::CronScheduler;
use railyard_types::error::TriggerError;
use railyard_types::message::BrokerMessage;

/// Cron runtime publishing trigger evaluations on schedule.
#[derive(Clone)]
pub struct CronRuntime<P> {
    publisher: P,
    inner: Arc<RwLock<Option<JobScheduler>>>,
    /// trigger id -> job guid.
    jobs: Arc<DashMap<Uuid, Uuid>>,
}

impl<P> CronRuntime<P>
where
    P: Publisher + Clone + Send + Sync + 'static,
{
    pub fn new(publisher: P) -> Self {
        Self {
            publisher,
            inner: Arc::new(RwLock::new(None)),
            jobs: Arc::new(DashMap::new()),
        }
    }

    /// Start the underlying scheduler. Must run before any registration.
    pub async fn start(&self) -> Result<(), TriggerError> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| TriggerError::Schedule(e.to_string()))?;
        scheduler
            .start()
            .await
            .map_err(|e| TriggerError::Schedule(e.to_string()))?;
        *self.inner.write().await = Some(scheduler);
        tracing::info!("cron runtime started");
        Ok(())
    }

    /// Stop the scheduler and drop all jobs.
    pub async fn shutdown(&self) -> Result<(), TriggerError> {
        if let Some(mut scheduler) = self.inner.write().await.take() {
            scheduler
                .shutdown()
                .await
                .map_err(|e| TriggerError::Schedule(e.to_string()))?;
            tracing::info!("cron runtime stopped");
        }
        self.jobs.clear();
        Ok(())
    }

    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }
}

/// Validate a cron pattern without registering it.
pub fn validate_pattern(pattern: &str) -> Result<(), TriggerError> {
    pattern
        .parse::<croner::Cron>()
        .map(|_| ())
        .map_err(|e| TriggerError::InvalidCron {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })
}

impl<P> CronScheduler for CronRuntime<P>
where
    P: Publisher + Clone + Send + Sync + 'static,
{
    async fn register(&self, trigger_id: Uuid, cron_pattern: &str) -> Result<(), TriggerError> {
        validate_pattern(cron_pattern)?;

        // Replace any job from a previous registration of this trigger.
        self.remove(trigger_id).await?;

        let inner = self.inner.read().await;
        let scheduler = inner
            .as_ref()
            .ok_or_else(|| TriggerError::Schedule("cron runtime not started".to_string()))?;

        let publisher = self.publisher.clone();
        let job = Job::new_async(cron_pattern, move |_uuid, _lock| {
            let publisher = publisher.clone();
            Box::pin(async move {
                tracing::debug!(%trigger_id, "schedule elapsed");
                if let Err(err) = publisher
                    .publish(&BrokerMessage::EvaluateTrigger { trigger_id })
                    .await
                {
                    tracing::error!(%trigger_id, error = %err, "failed to publish trigger evaluation");
                }
            })
        })
        .map_err(|e| TriggerError::InvalidCron {
            pattern: cron_pattern.to_string(),
            reason: e.to_string(),
        })?;

        let job_id = job.guid();
        scheduler
            .add(job)
            .await
            .map_err(|e| TriggerError::Schedule(e.to_string()))?;
        self.jobs.insert(trigger_id, job_id);

        tracing::info!(%trigger_id, %job_id, pattern = cron_pattern, "registered scheduled trigger");
        Ok(())
    }

    async fn remove(&self, trigger_id: Uuid) -> Result<(), TriggerError> {
        let Some((_, job_id)) = self.jobs.remove(&trigger_id) else {
            return Ok(());
        };
        let inner = self.inner.read().await;
        if let Some(scheduler) = inner.as_ref() {
            scheduler
                .remove(&job_id)
                .await
                .map_err(|e| TriggerError::Schedule(e.to_string()))?;
        }
        tracing::info!(%trigger_id, "unregistered scheduled trigger");
        Ok(())
    }
}
