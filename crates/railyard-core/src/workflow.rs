//! Workflow service: instance creation and the action lifecycle.
//!
//! `start_instance` handles a `RunWorkflow` message: admission against the
//! workflow's concurrency limit, cloning the template datastore and action
//! templates into concrete rows, and queueing the first action. `checkout`
//! and `checkin` are the engine-facing halves of one action run; every state
//! transition between them is a compare-and-swap so redelivered or
//! duplicated calls lose the race instead of corrupting the lifecycle.

use uuid::Uuid;

use railyard_types::action::{ActionData, ActionOutcome, ActionStatus, CheckinResult};
use railyard_types::datastore::{DatastoreData, DatastoreStatus, FailurePolicy};
use railyard_types::entity::Record;
use railyard_types::error::{StoreError, WorkflowError};
use railyard_types::message::BrokerMessage;
use railyard_types::workflow::{
    FiredBy, InstanceStatus, WorkflowData, WorkflowInstanceData, WorkflowStatus,
};

use crate::broker::Publisher;
use crate::store::EntityStore;
use crate::subscription::{self, ElementStore};

/// Workflow, instance, and action lifecycle operations.
#[derive(Clone)]
pub struct WorkflowService<S, P, E> {
    store: S,
    publisher: P,
    elements: E,
}

impl<S, P, E> WorkflowService<S, P, E>
where
    S: EntityStore + Clone,
    P: Publisher + Clone,
    E: ElementStore + Clone,
{
    pub fn new(store: S, publisher: P, elements: E) -> Self {
        Self {
            store,
            publisher,
            elements,
        }
    }

    // -- instance creation -------------------------------------------------

    /// Start one instance of a workflow, or decline.
    ///
    /// `Ok(None)` means admission declined: the workflow already has
    /// `concurrency` instances in QUEUED/RUNNING. The firing is dropped, not
    /// queued; the next firing re-evaluates.
    pub async fn start_instance(
        &self,
        workflow_id: Uuid,
        fired_by: FiredBy,
    ) -> Result<Option<Record<WorkflowInstanceData>>, WorkflowError> {
        let workflow = self.store.get::<WorkflowData>(workflow_id).await?;
        if workflow.data.status != WorkflowStatus::Active {
            return Err(WorkflowError::WorkflowInactive(workflow_id));
        }

        let in_flight = self
            .store
            .list::<WorkflowInstanceData>()
            .await?
            .iter()
            .filter(|i| {
                i.data.workflow_id == workflow_id
                    && matches!(i.data.status, InstanceStatus::Queued | InstanceStatus::Running)
            })
            .count();
        if in_flight as u32 >= workflow.data.concurrency {
            tracing::info!(
                %workflow_id,
                in_flight,
                limit = workflow.data.concurrency,
                "workflow at concurrency limit, declining firing"
            );
            return Ok(None);
        }

        let datastore = self.resolve_datastore(&workflow).await?;

        let instance = self
            .store
            .create(WorkflowInstanceData {
                workflow_id,
                datastore_id: datastore.id,
                status: InstanceStatus::Queued,
                fired_by,
                error_message: None,
            })
            .await?;

        // Clone the workflow's action templates in order.
        let mut templates: Vec<Record<ActionData>> = self
            .store
            .list::<ActionData>()
            .await?
            .into_iter()
            .filter(|a| {
                a.data.workflow_id == Some(workflow_id) && a.data.status == ActionStatus::Template
            })
            .collect();
        templates.sort_by(|a, b| {
            a.data
                .order_idx
                .partial_cmp(&b.data.order_idx)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        for template in &templates {
            self.store
                .create(template.data.clone_for_instance(instance.id, datastore.id))
                .await?;
        }

        // Only the lowest-ordered action goes live; the rest advance one at
        // a time through checkin.
        self.enqueue_next(instance.id).await?;

        tracing::info!(
            %workflow_id,
            instance_id = %instance.id,
            datastore_id = %datastore.id,
            actions = templates.len(),
            "started workflow instance"
        );
        Ok(Some(instance))
    }

    /// Resolve the concrete datastore an instance will run against: clone a
    /// TEMPLATE, pass through an ACTIVE one, refuse the rest.
    async fn resolve_datastore(
        &self,
        workflow: &Record<WorkflowData>,
    ) -> Result<Record<DatastoreData>, WorkflowError> {
        let datastore = self
            .store
            .get::<DatastoreData>(workflow.data.datastore_id)
            .await?;
        match datastore.data.status {
            DatastoreStatus::Template => {
                let clone = self
                    .store
                    .create(datastore.data.clone_from_template(datastore.id))
                    .await?;
                tracing::info!(
                    template_id = %datastore.id,
                    datastore_id = %clone.id,
                    "cloned template datastore"
                );
                Ok(clone)
            }
            DatastoreStatus::Active => Ok(datastore),
            DatastoreStatus::Inactive | DatastoreStatus::Done => {
                Err(WorkflowError::DatastoreNotActive(datastore.id))
            }
        }
    }

    // -- checkout / checkin ------------------------------------------------

    /// Engine-side start of one action run: PENDING→RUNNING.
    ///
    /// Cascades the instance to RUNNING on the first action, and assigns
    /// the action's subscription elements before any work happens, so the
    /// engine sees a stable element set.
    pub async fn checkout(
        &self,
        action_id: Uuid,
    ) -> Result<(Record<ActionData>, Record<DatastoreData>), WorkflowError> {
        let action = self.store.get::<ActionData>(action_id).await?;
        let running = action.with_data(|d| d.status = ActionStatus::Running);
        let action = self
            .store
            .patch_if(&action, &running, |d| d.status == ActionStatus::Pending)
            .await
            .map_err(|err| wrong_state(err, action_id, "pending"))?;

        let datastore = self
            .store
            .get::<DatastoreData>(action.data.datastore_id)
            .await?;
        if datastore.data.status != DatastoreStatus::Active {
            return Err(WorkflowError::DatastoreNotActive(datastore.id));
        }

        if action.data.first_in_workflow {
            if let Some(instance_id) = action.data.workflow_instance_id {
                self.instance_running(instance_id).await?;
            }
        }

        subscription::assign_for_action(&self.store, &self.elements, &action).await?;

        tracing::info!(%action_id, name = %action.data.name, "checked out action");
        Ok((action, datastore))
    }

    /// Engine-side end of one action run: RUNNING→FINISHING, then the
    /// terminal state and its cascade.
    pub async fn checkin(
        &self,
        action_id: Uuid,
        result: CheckinResult,
    ) -> Result<Record<ActionData>, WorkflowError> {
        let action = self.store.get::<ActionData>(action_id).await?;
        let finishing = action.with_data(|d| d.status = ActionStatus::Finishing);
        let action = self
            .store
            .patch_if(&action, &finishing, |d| d.status == ActionStatus::Running)
            .await
            .map_err(|err| wrong_state(err, action_id, "running"))?;
        self.finish(action, result).await
    }

    /// Recovery path for an action whose remote task died without checking
    /// in: PENDING|RUNNING→FINISHING, then the normal failure cascade.
    pub async fn fail_remote(
        &self,
        action_id: Uuid,
        message: impl Into<String>,
    ) -> Result<(), WorkflowError> {
        let action = self.store.get::<ActionData>(action_id).await?;
        let finishing = action.with_data(|d| d.status = ActionStatus::Finishing);
        let action = match self
            .store
            .patch_if(&action, &finishing, |d| {
                matches!(d.status, ActionStatus::Pending | ActionStatus::Running)
            })
            .await
        {
            Ok(action) => action,
            // Already reached a terminal state through a normal checkin.
            Err(StoreError::ConditionFailed) => return Ok(()),
            Err(err) => return Err(err.into()),
        };
        self.finish(action, CheckinResult::failure(message)).await?;
        Ok(())
    }

    /// Shared tail of checkin and remote failure. `action` is FINISHING.
    async fn finish(
        &self,
        action: Record<ActionData>,
        result: CheckinResult,
    ) -> Result<Record<ActionData>, WorkflowError> {
        subscription::reconcile_for_action(&self.elements, action.id, result.state).await?;

        match result.state {
            ActionOutcome::Success => {
                let completed = action.with_data(|d| d.status = ActionStatus::Completed);
                let action = self.store.patch(&action, &completed).await?;
                tracing::info!(action_id = %action.id, name = %action.data.name, "action completed");
                self.advance(&action).await?;
                Ok(action)
            }
            ActionOutcome::Failure => {
                let failed = action.with_data(|d| {
                    d.status = ActionStatus::Failed;
                    d.error_message = result.error_message.clone();
                });
                let action = self.store.patch(&action, &failed).await?;
                tracing::warn!(
                    action_id = %action.id,
                    name = %action.data.name,
                    error = result.error_message.as_deref().unwrap_or("unknown"),
                    "action failed"
                );
                self.apply_failure_policy(&action).await?;
                Ok(action)
            }
        }
    }

    /// After a success: complete the instance, or queue the next action.
    async fn advance(&self, action: &Record<ActionData>) -> Result<(), WorkflowError> {
        let Some(instance_id) = action.data.workflow_instance_id else {
            return Ok(());
        };
        if action.data.last_in_workflow {
            self.complete_instance(instance_id).await
        } else {
            self.enqueue_next(instance_id).await
        }
    }

    async fn apply_failure_policy(&self, action: &Record<ActionData>) -> Result<(), WorkflowError> {
        let datastore = self
            .store
            .get::<DatastoreData>(action.data.datastore_id)
            .await?;
        match datastore.data.on_failure {
            // Record-and-proceed: the failed action is terminal, the
            // workflow keeps going.
            FailurePolicy::Continue => self.advance(action).await,
            FailurePolicy::Deactivate => self.deactivate_cascade(action, &datastore).await,
        }
    }

    /// DEACTIVATE cascade: skip everything not yet run, fail the instance,
    /// deactivate the workflow and the concrete datastore.
    async fn deactivate_cascade(
        &self,
        action: &Record<ActionData>,
        datastore: &Record<DatastoreData>,
    ) -> Result<(), WorkflowError> {
        let Some(instance_id) = action.data.workflow_instance_id else {
            return Ok(());
        };

        for sibling in self.instance_actions(instance_id).await? {
            if !sibling.data.status.not_yet_run() {
                continue;
            }
            let skipped = sibling.with_data(|d| d.status = ActionStatus::Skipped);
            match self
                .store
                .patch_if(&sibling, &skipped, |d| d.status.not_yet_run())
                .await
            {
                Ok(_) | Err(StoreError::ConditionFailed) => {}
                Err(err) => return Err(err.into()),
            }
        }

        let instance = self.store.get::<WorkflowInstanceData>(instance_id).await?;
        let failed = instance.with_data(|d| {
            d.status = InstanceStatus::Failed;
            d.error_message = action.data.error_message.clone();
        });
        let instance = self.store.patch(&instance, &failed).await?;

        let workflow = self
            .store
            .get::<WorkflowData>(instance.data.workflow_id)
            .await?;
        let inactive = workflow.with_data(|d| d.status = WorkflowStatus::Inactive);
        match self
            .store
            .patch_if(&workflow, &inactive, |d| d.status == WorkflowStatus::Active)
            .await
        {
            Ok(_) | Err(StoreError::ConditionFailed) => {}
            Err(err) => return Err(err.into()),
        }

        // Only cloned datastores are torn down; a shared ACTIVE datastore
        // referenced directly by the workflow is left alone.
        if datastore.data.template_id.is_some() && datastore.data.status == DatastoreStatus::Active
        {
            let deactivated = datastore.with_data(|d| d.status = DatastoreStatus::Inactive);
            match self
                .store
                .patch_if(datastore, &deactivated, |d| {
                    d.status == DatastoreStatus::Active
                })
                .await
            {
                Ok(_) | Err(StoreError::ConditionFailed) => {}
                Err(err) => return Err(err.into()),
            }
        }

        tracing::warn!(
            %instance_id,
            workflow_id = %instance.data.workflow_id,
            "deactivate policy applied"
        );
        Ok(())
    }

    // -- instance transitions ----------------------------------------------

    async fn instance_running(&self, instance_id: Uuid) -> Result<(), WorkflowError> {
        let instance = self.store.get::<WorkflowInstanceData>(instance_id).await?;
        let running = instance.with_data(|d| d.status = InstanceStatus::Running);
        match self
            .store
            .patch_if(&instance, &running, |d| d.status == InstanceStatus::Queued)
            .await
        {
            Ok(_) => Ok(()),
            Err(StoreError::ConditionFailed) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn complete_instance(&self, instance_id: Uuid) -> Result<(), WorkflowError> {
        let instance = self.store.get::<WorkflowInstanceData>(instance_id).await?;
        let completed = instance.with_data(|d| d.status = InstanceStatus::Completed);
        let instance = match self
            .store
            .patch_if(&instance, &completed, |d| {
                matches!(d.status, InstanceStatus::Queued | InstanceStatus::Running)
            })
            .await
        {
            Ok(instance) => instance,
            Err(StoreError::ConditionFailed) => return Ok(()),
            Err(err) => return Err(err.into()),
        };

        tracing::info!(
            %instance_id,
            workflow_id = %instance.data.workflow_id,
            "workflow instance completed"
        );
        self.publisher
            .publish(&BrokerMessage::WorkflowCompleted {
                workflow_id: instance.data.workflow_id,
            })
            .await?;
        Ok(())
    }

    /// Promote the lowest-ordered HAS_NEVER_RUN action of an instance to
    /// QUEUED. No-op when none remain.
    async fn enqueue_next(&self, instance_id: Uuid) -> Result<(), WorkflowError> {
        let next = self
            .instance_actions(instance_id)
            .await?
            .into_iter()
            .filter(|a| a.data.status == ActionStatus::HasNeverRun)
            .min_by(|a, b| {
                a.data
                    .order_idx
                    .partial_cmp(&b.data.order_idx)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
        let Some(next) = next else {
            return Ok(());
        };
        let queued = next.with_data(|d| d.status = ActionStatus::Queued);
        match self
            .store
            .patch_if(&next, &queued, |d| d.status == ActionStatus::HasNeverRun)
            .await
        {
            Ok(_) => {
                tracing::debug!(action_id = %next.id, order = next.data.order_idx, "queued next action");
                Ok(())
            }
            Err(StoreError::ConditionFailed) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn instance_actions(
        &self,
        instance_id: Uuid,
    ) -> Result<Vec<Record<ActionData>>, WorkflowError> {
        Ok(self
            .store
            .list::<ActionData>()
            .await?
            .into_iter()
            .filter(|a| a.data.workflow_instance_id == Some(instance_id))
            .collect())
    }
}

fn wrong_state(err: StoreError, action_id: Uuid, expected: &str) -> WorkflowError {
    match err {
        StoreError::ConditionFailed => WorkflowError::WrongActionState {
            action_id,
            expected: expected.to_string(),
        },
        other => WorkflowError::Store(other),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
