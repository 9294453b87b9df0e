//! Trigger engine: condition evaluation and firing.
//!
//! Evaluation is driven entirely by broker messages, so every firing flows
//! through the idempotency ledger. Scheduled triggers arrive as
//! `EvaluateTrigger` from the cron runtime; the other kinds react to
//! `EventOccurred`, subscription activity, `WorkflowCompleted`, and
//! `TriggerFired`. Firing a trigger starts each of its workflows in its own
//! error scope and then emits `TriggerFired`, which is what lets super
//! triggers compose recursively (a super of supers resolves through the
//! same message).

use std::future::Future;

use chrono::Utc;
use uuid::Uuid;

use railyard_types::entity::Record;
use railyard_types::error::TriggerError;
use railyard_types::event::{EventData, EventStatus};
use railyard_types::message::BrokerMessage;
use railyard_types::trigger::{FireAfter, TriggerData, TriggerSpec, TriggerStatus};
use railyard_types::workflow::FiredBy;

use crate::broker::Publisher;
use crate::store::EntityStore;
use crate::subscription::{self, ElementStore};

// ---------------------------------------------------------------------------
// Cron runtime port
// ---------------------------------------------------------------------------

/// The cron runtime scheduled triggers are registered with. Each registered
/// job publishes `EvaluateTrigger` for its trigger id when the schedule
/// elapses.
pub trait CronScheduler: Send + Sync {
    /// Register (or replace) the job for a trigger. Rejects malformed
    /// patterns with `TriggerError::InvalidCron`.
    fn register(
        &self,
        trigger_id: Uuid,
        cron_pattern: &str,
    ) -> impl Future<Output = Result<(), TriggerError>> + Send;

    /// Remove the job for a trigger, if one is registered.
    fn remove(&self, trigger_id: Uuid) -> impl Future<Output = Result<(), TriggerError>> + Send;
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Evaluates trigger conditions and fires workflows over the broker.
#[derive(Clone)]
pub struct TriggerEngine<S, P, E, C> {
    store: S,
    publisher: P,
    elements: E,
    cron: C,
}

impl<S, P, E, C> TriggerEngine<S, P, E, C>
where
    S: EntityStore + Clone,
    P: Publisher + Clone,
    E: ElementStore + Clone,
    C: CronScheduler + Clone,
{
    pub fn new(store: S, publisher: P, elements: E, cron: C) -> Self {
        Self {
            store,
            publisher,
            elements,
            cron,
        }
    }

    // -- cron registration lifecycle ---------------------------------------

    /// Register cron jobs for every ACTIVE scheduled trigger. Run once at
    /// worker startup.
    pub async fn initialize_all(&self) -> Result<(), TriggerError> {
        for trigger in self.store.list::<TriggerData>().await? {
            if trigger.data.status != TriggerStatus::Active {
                continue;
            }
            if let TriggerSpec::Scheduled { cron_pattern } = &trigger.data.spec {
                self.cron.register(trigger.id, cron_pattern).await?;
                tracing::info!(trigger_id = %trigger.id, cron = %cron_pattern, "registered schedule");
            }
        }
        Ok(())
    }

    /// Hook for a newly created trigger.
    pub async fn trigger_created(&self, trigger: &Record<TriggerData>) -> Result<(), TriggerError> {
        if trigger.data.status == TriggerStatus::Active {
            if let TriggerSpec::Scheduled { cron_pattern } = &trigger.data.spec {
                self.cron.register(trigger.id, cron_pattern).await?;
            }
        }
        Ok(())
    }

    /// Hook for an edited trigger. Re-registers or removes the cron job as
    /// the schedule or status changed.
    pub async fn trigger_edited(
        &self,
        before: &Record<TriggerData>,
        after: &Record<TriggerData>,
    ) -> Result<(), TriggerError> {
        let was_scheduled = matches!(&before.data.spec, TriggerSpec::Scheduled { .. })
            && before.data.status == TriggerStatus::Active;
        let now_scheduled = after.data.status == TriggerStatus::Active;
        match (&after.data.spec, was_scheduled) {
            (TriggerSpec::Scheduled { cron_pattern }, _) if now_scheduled => {
                self.cron.register(after.id, cron_pattern).await
            }
            (_, true) => self.cron.remove(after.id).await,
            _ => Ok(()),
        }
    }

    /// Hook for a deleted trigger.
    pub async fn trigger_deleted(&self, trigger_id: Uuid) -> Result<(), TriggerError> {
        self.cron.remove(trigger_id).await
    }

    // -- evaluation entry points -------------------------------------------

    /// `EvaluateTrigger` arrived. For scheduled triggers the elapsed
    /// schedule is the whole condition; batch triggers get a fresh
    /// threshold check so operators can force re-evaluation.
    pub async fn evaluate(&self, trigger_id: Uuid) -> Result<(), TriggerError> {
        let Some(trigger) = self.active_trigger(trigger_id).await? else {
            return Ok(());
        };
        match &trigger.data.spec {
            TriggerSpec::Scheduled { .. } => self.fire(&trigger).await,
            TriggerSpec::SubscriptionBatch {
                subscription_id,
                byte_threshold,
            } => {
                self.evaluate_batch(&trigger, *subscription_id, *byte_threshold)
                    .await
            }
            other => {
                tracing::debug!(
                    %trigger_id,
                    kind = ?other.kind(),
                    "trigger kind has no on-demand evaluation"
                );
                Ok(())
            }
        }
    }

    /// `EventOccurred` arrived. Fires every ACTIVE event trigger watching
    /// the event, provided the event itself is ACTIVE.
    pub async fn on_event(&self, event_id: Uuid) -> Result<(), TriggerError> {
        let event = self.store.get::<EventData>(event_id).await?;
        if event.data.status != EventStatus::Active {
            tracing::debug!(%event_id, "event is inactive, ignoring occurrence");
            return Ok(());
        }
        for trigger in self.active_triggers().await? {
            if matches!(&trigger.data.spec, TriggerSpec::Event { event_id: e } if *e == event_id) {
                self.fire(&trigger).await?;
            }
        }
        Ok(())
    }

    /// A subscription gained at least one new element. Re-checks the byte
    /// threshold of every batch trigger watching it.
    pub async fn on_subscription_activity(&self, subscription_id: Uuid) -> Result<(), TriggerError> {
        for trigger in self.active_triggers().await? {
            if let TriggerSpec::SubscriptionBatch {
                subscription_id: s,
                byte_threshold,
            } = &trigger.data.spec
            {
                if *s == subscription_id {
                    self.evaluate_batch(&trigger, subscription_id, *byte_threshold)
                        .await?;
                }
            }
        }
        Ok(())
    }

    /// `WorkflowCompleted` arrived.
    pub async fn on_workflow_completed(&self, workflow_id: Uuid) -> Result<(), TriggerError> {
        for trigger in self.active_triggers().await? {
            if matches!(
                &trigger.data.spec,
                TriggerSpec::WorkflowCompletion { completed_workflow_id } if *completed_workflow_id == workflow_id
            ) {
                self.fire(&trigger).await?;
            }
        }
        Ok(())
    }

    /// `TriggerFired` arrived: advance super-trigger combinators.
    pub async fn on_trigger_fired(&self, fired_trigger_id: Uuid) -> Result<(), TriggerError> {
        for trigger in self.active_triggers().await? {
            let TriggerSpec::Super {
                completed_trigger_ids,
                fire_after,
            } = &trigger.data.spec
            else {
                continue;
            };
            if !completed_trigger_ids.contains(&fired_trigger_id) {
                continue;
            }
            match fire_after {
                FireAfter::Any => self.fire(&trigger).await?,
                FireAfter::All => {
                    self.advance_all_combinator(&trigger, fired_trigger_id)
                        .await?
                }
            }
        }
        Ok(())
    }

    // -- internals ---------------------------------------------------------

    /// Record a member completion; fire and re-arm once every member has
    /// one. Completions persist across evaluation cycles, so members may
    /// finish in any order and any mix of cycles.
    async fn advance_all_combinator(
        &self,
        trigger: &Record<TriggerData>,
        fired_trigger_id: Uuid,
    ) -> Result<(), TriggerError> {
        let recorded = trigger.with_data(|d| {
            d.completions.insert(fired_trigger_id, Utc::now());
        });
        let recorded = self.store.patch(trigger, &recorded).await?;

        let TriggerSpec::Super {
            completed_trigger_ids,
            ..
        } = &recorded.data.spec
        else {
            return Ok(());
        };
        let complete = completed_trigger_ids
            .iter()
            .all(|id| recorded.data.completions.contains_key(id));
        if !complete {
            tracing::debug!(
                trigger_id = %recorded.id,
                completed = recorded.data.completions.len(),
                required = completed_trigger_ids.len(),
                "combinator waiting for remaining members"
            );
            return Ok(());
        }

        // Fire and re-arm: clearing the map resets the combinator for the
        // next round of member firings.
        let cleared = recorded.with_data(|d| d.completions.clear());
        let cleared = self.store.patch(&recorded, &cleared).await?;
        self.fire(&cleared).await
    }

    /// Threshold check for one batch trigger; reserves the accumulated
    /// elements under a batch id before firing so concurrent consumers see
    /// a stable batch.
    async fn evaluate_batch(
        &self,
        trigger: &Record<TriggerData>,
        subscription_id: Uuid,
        byte_threshold: u64,
    ) -> Result<(), TriggerError> {
        let Some(batch) =
            subscription::accumulate_threshold(&self.elements, subscription_id, byte_threshold)
                .await?
        else {
            tracing::debug!(
                trigger_id = %trigger.id,
                %subscription_id,
                "unconsumed bytes below threshold"
            );
            return Ok(());
        };
        let element_ids: Vec<Uuid> = batch.iter().map(|e| e.id).collect();
        subscription::reserve_batch(&self.elements, &element_ids).await?;
        self.fire(trigger).await
    }

    /// Start every workflow of a firing trigger, then announce the firing.
    ///
    /// Each workflow gets its own error scope: a failed publish is logged
    /// and does not block the remaining workflows or the `TriggerFired`
    /// announcement.
    async fn fire(&self, trigger: &Record<TriggerData>) -> Result<(), TriggerError> {
        let fired_by = FiredBy::trigger(trigger.data.kind(), trigger.id);
        tracing::info!(
            trigger_id = %trigger.id,
            name = %trigger.data.name,
            kind = ?trigger.data.kind(),
            workflows = trigger.data.workflow_ids.len(),
            "trigger fired"
        );
        for workflow_id in &trigger.data.workflow_ids {
            let message = BrokerMessage::RunWorkflow {
                workflow_id: *workflow_id,
                fired_by: fired_by.clone(),
            };
            if let Err(err) = self.publisher.publish(&message).await {
                tracing::error!(
                    trigger_id = %trigger.id,
                    %workflow_id,
                    error = %err,
                    "failed to publish workflow start"
                );
            }
        }
        self.publisher
            .publish(&BrokerMessage::TriggerFired {
                trigger_id: trigger.id,
            })
            .await?;
        Ok(())
    }

    async fn active_trigger(
        &self,
        trigger_id: Uuid,
    ) -> Result<Option<Record<TriggerData>>, TriggerError> {
        let trigger = self.store.get::<TriggerData>(trigger_id).await?;
        if trigger.data.status != TriggerStatus::Active {
            tracing::debug!(%trigger_id, "trigger is inactive, skipping");
            return Ok(None);
        }
        Ok(Some(trigger))
    }

    async fn active_triggers(&self) -> Result<Vec<Record<TriggerData>>, TriggerError> {
        Ok(self
            .store
            .list::<TriggerData>()
            .await?
            .into_iter()
            .filter(|t| t.data.status == TriggerStatus::Active)
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use railyard_types::error::BrokerError;
    use railyard_types::subscription::{ElementState, SubscriptionElement};
    use railyard_types::trigger::TriggerKind;

    use crate::store::memory::InMemoryStore;
    use crate::subscription::tests::TestElements;

    #[derive(Clone, Default)]
    struct RecordingPublisher {
        sent: Arc<Mutex<Vec<BrokerMessage>>>,
    }

    impl RecordingPublisher {
        fn sent(&self) -> Vec<BrokerMessage> {
            self.sent.lock().unwrap().clone()
        }

        fn run_workflow_count(&self) -> usize {
            self.sent()
                .iter()
                .filter(|m| matches!(m, BrokerMessage::RunWorkflow { .. }))
                .count()
        }
    }

    impl Publisher for RecordingPublisher {
        async fn publish(&self, message: &BrokerMessage) -> Result<(), BrokerError> {
            self.sent.lock().unwrap().push(message.clone());
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    struct RecordingCron {
        registered: Arc<Mutex<Vec<Uuid>>>,
    }

    impl CronScheduler for RecordingCron {
        async fn register(&self, trigger_id: Uuid, _cron_pattern: &str) -> Result<(), TriggerError> {
            self.registered.lock().unwrap().push(trigger_id);
            Ok(())
        }

        async fn remove(&self, trigger_id: Uuid) -> Result<(), TriggerError> {
            self.registered.lock().unwrap().retain(|id| *id != trigger_id);
            Ok(())
        }
    }

    fn engine(
        store: InMemoryStore,
        publisher: RecordingPublisher,
        elements: TestElements,
    ) -> TriggerEngine<InMemoryStore, RecordingPublisher, TestElements, RecordingCron> {
        TriggerEngine::new(store, publisher, elements, RecordingCron::default())
    }

    async fn create_trigger(store: &InMemoryStore, spec: TriggerSpec) -> Record<TriggerData> {
        store
            .create(TriggerData {
                name: "t".to_string(),
                status: TriggerStatus::Active,
                spec,
                workflow_ids: vec![Uuid::now_v7()],
                completions: Default::default(),
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_scheduled_evaluate_fires_each_workflow_and_announces() {
        let store = InMemoryStore::new();
        let publisher = RecordingPublisher::default();
        let engine = engine(store.clone(), publisher.clone(), TestElements::default());

        let mut trigger = create_trigger(
            &store,
            TriggerSpec::Scheduled {
                cron_pattern: "0 0 * * * *".to_string(),
            },
        )
        .await;
        // Two workflows on one trigger.
        let updated = trigger.with_data(|d| d.workflow_ids.push(Uuid::now_v7()));
        trigger = store.patch(&trigger, &updated).await.unwrap();

        engine.evaluate(trigger.id).await.unwrap();

        let sent = publisher.sent();
        assert_eq!(publisher.run_workflow_count(), 2);
        assert!(matches!(
            sent.last().unwrap(),
            BrokerMessage::TriggerFired { trigger_id } if *trigger_id == trigger.id
        ));
        // Firings carry the trigger identity.
        let BrokerMessage::RunWorkflow { fired_by, .. } = &sent[0] else {
            panic!("expected RunWorkflow first");
        };
        assert_eq!(fired_by.kind, TriggerKind::Scheduled);
        assert_eq!(fired_by.trigger_id, Some(trigger.id));
    }

    #[tokio::test]
    async fn test_inactive_trigger_never_fires() {
        let store = InMemoryStore::new();
        let publisher = RecordingPublisher::default();
        let engine = engine(store.clone(), publisher.clone(), TestElements::default());

        let trigger = create_trigger(
            &store,
            TriggerSpec::Scheduled {
                cron_pattern: "0 0 * * * *".to_string(),
            },
        )
        .await;
        let inactive = trigger.with_data(|d| d.status = TriggerStatus::Inactive);
        store.patch(&trigger, &inactive).await.unwrap();

        engine.evaluate(trigger.id).await.unwrap();
        assert!(publisher.sent().is_empty());
    }

    #[tokio::test]
    async fn test_event_trigger_gated_on_event_status() {
        let store = InMemoryStore::new();
        let publisher = RecordingPublisher::default();
        let engine = engine(store.clone(), publisher.clone(), TestElements::default());

        let event = store
            .create(EventData {
                name: "upstream-ready".to_string(),
                status: EventStatus::Inactive,
            })
            .await
            .unwrap();
        create_trigger(&store, TriggerSpec::Event { event_id: event.id }).await;

        // Muted event: no firing.
        engine.on_event(event.id).await.unwrap();
        assert!(publisher.sent().is_empty());

        let active = event.with_data(|d| d.status = EventStatus::Active);
        store.patch(&event, &active).await.unwrap();
        engine.on_event(event.id).await.unwrap();
        assert_eq!(publisher.run_workflow_count(), 1);
    }

    #[tokio::test]
    async fn test_batch_trigger_reserves_then_fires_when_threshold_met() {
        let store = InMemoryStore::new();
        let publisher = RecordingPublisher::default();
        let elements = TestElements::default();
        let engine = engine(store.clone(), publisher.clone(), elements.clone());

        let subscription_id = Uuid::now_v7();
        let rows: Vec<_> = [("raw/a", 100i64), ("raw/b", 200), ("raw/c", 300)]
            .iter()
            .map(|(p, s)| SubscriptionElement::new(subscription_id, *p, *s))
            .collect();
        elements.insert_batch(&rows).await.unwrap();

        create_trigger(
            &store,
            TriggerSpec::SubscriptionBatch {
                subscription_id,
                byte_threshold: 250,
            },
        )
        .await;

        engine.on_subscription_activity(subscription_id).await.unwrap();
        assert_eq!(publisher.run_workflow_count(), 1);

        // The first two elements (100 + 200 >= 250) are now RESERVED under
        // one batch; the third stays UNCONSUMED.
        let after = elements.list_for_subscription(subscription_id).await.unwrap();
        assert_eq!(after[0].state, ElementState::Reserved);
        assert_eq!(after[1].state, ElementState::Reserved);
        assert_eq!(after[0].batch_id, after[1].batch_id);
        assert_eq!(after[2].state, ElementState::Unconsumed);
    }

    #[tokio::test]
    async fn test_batch_trigger_below_threshold_stays_quiet() {
        let store = InMemoryStore::new();
        let publisher = RecordingPublisher::default();
        let elements = TestElements::default();
        let engine = engine(store.clone(), publisher.clone(), elements.clone());

        let subscription_id = Uuid::now_v7();
        elements
            .insert_batch(&[SubscriptionElement::new(subscription_id, "raw/a", 100)])
            .await
            .unwrap();
        create_trigger(
            &store,
            TriggerSpec::SubscriptionBatch {
                subscription_id,
                byte_threshold: 1000,
            },
        )
        .await;

        engine.on_subscription_activity(subscription_id).await.unwrap();
        assert!(publisher.sent().is_empty());
    }

    #[tokio::test]
    async fn test_workflow_completion_trigger_matches_workflow() {
        let store = InMemoryStore::new();
        let publisher = RecordingPublisher::default();
        let engine = engine(store.clone(), publisher.clone(), TestElements::default());

        let watched = Uuid::now_v7();
        create_trigger(
            &store,
            TriggerSpec::WorkflowCompletion {
                completed_workflow_id: watched,
            },
        )
        .await;

        engine.on_workflow_completed(Uuid::now_v7()).await.unwrap();
        assert!(publisher.sent().is_empty());

        engine.on_workflow_completed(watched).await.unwrap();
        assert_eq!(publisher.run_workflow_count(), 1);
    }

    #[tokio::test]
    async fn test_any_combinator_fires_on_single_member() {
        let store = InMemoryStore::new();
        let publisher = RecordingPublisher::default();
        let engine = engine(store.clone(), publisher.clone(), TestElements::default());

        let member_a = Uuid::now_v7();
        let member_b = Uuid::now_v7();
        create_trigger(
            &store,
            TriggerSpec::Super {
                completed_trigger_ids: vec![member_a, member_b],
                fire_after: FireAfter::Any,
            },
        )
        .await;

        engine.on_trigger_fired(member_a).await.unwrap();
        assert_eq!(publisher.run_workflow_count(), 1);
    }

    #[tokio::test]
    async fn test_all_combinator_waits_clears_and_rearms() {
        let store = InMemoryStore::new();
        let publisher = RecordingPublisher::default();
        let engine = engine(store.clone(), publisher.clone(), TestElements::default());

        let member_a = Uuid::now_v7();
        let member_b = Uuid::now_v7();
        let trigger = create_trigger(
            &store,
            TriggerSpec::Super {
                completed_trigger_ids: vec![member_a, member_b],
                fire_after: FireAfter::All,
            },
        )
        .await;

        // First member alone does not fire.
        engine.on_trigger_fired(member_a).await.unwrap();
        assert_eq!(publisher.run_workflow_count(), 0);
        let mid: Record<TriggerData> = store.get(trigger.id).await.unwrap();
        assert!(mid.data.completions.contains_key(&member_a));

        // Second member completes the set.
        engine.on_trigger_fired(member_b).await.unwrap();
        assert_eq!(publisher.run_workflow_count(), 1);

        // Re-armed: completions cleared, the next full round fires again.
        let after: Record<TriggerData> = store.get(trigger.id).await.unwrap();
        assert!(after.data.completions.is_empty());

        engine.on_trigger_fired(member_a).await.unwrap();
        engine.on_trigger_fired(member_b).await.unwrap();
        assert_eq!(publisher.run_workflow_count(), 2);
    }

    #[tokio::test]
    async fn test_unrelated_firing_ignored_by_combinator() {
        let store = InMemoryStore::new();
        let publisher = RecordingPublisher::default();
        let engine = engine(store.clone(), publisher.clone(), TestElements::default());

        let trigger = create_trigger(
            &store,
            TriggerSpec::Super {
                completed_trigger_ids: vec![Uuid::now_v7()],
                fire_after: FireAfter::All,
            },
        )
        .await;

        engine.on_trigger_fired(Uuid::now_v7()).await.unwrap();
        assert!(publisher.sent().is_empty());
        let after: Record<TriggerData> = store.get(trigger.id).await.unwrap();
        assert!(after.data.completions.is_empty());
    }

    #[tokio::test]
    async fn test_initialize_registers_only_active_scheduled() {
        let store = InMemoryStore::new();
        let cron = RecordingCron::default();
        let engine = TriggerEngine::new(
            store.clone(),
            RecordingPublisher::default(),
            TestElements::default(),
            cron.clone(),
        );

        let scheduled = create_trigger(
            &store,
            TriggerSpec::Scheduled {
                cron_pattern: "0 0 * * * *".to_string(),
            },
        )
        .await;
        create_trigger(
            &store,
            TriggerSpec::Event {
                event_id: Uuid::now_v7(),
            },
        )
        .await;
        let muted = create_trigger(
            &store,
            TriggerSpec::Scheduled {
                cron_pattern: "0 30 * * * *".to_string(),
            },
        )
        .await;
        let inactive = muted.with_data(|d| d.status = TriggerStatus::Inactive);
        store.patch(&muted, &inactive).await.unwrap();

        engine.initialize_all().await.unwrap();
        assert_eq!(*cron.registered.lock().unwrap(), vec![scheduled.id]);
    }
}
