//! Subscription manager: element generation, dedup, and batch bookkeeping.
//!
//! Elements are matched objects from the backing object store. Uniqueness
//! per (subscription_id, path) is enforced by the element store's
//! conditional insert, never by in-memory dedup. Reservation stamps a shared
//! batch id once per trigger firing; assignment hands a batch (or all
//! unconsumed elements) to a consuming action; checkin reconciliation moves
//! them to CONSUMED or back to UNCONSUMED.

use std::future::Future;

use regex::Regex;
use uuid::Uuid;

use railyard_types::action::{ActionData, ActionOutcome};
use railyard_types::dataset::DatasetData;
use railyard_types::entity::Record;
use railyard_types::error::{StoreError, SubscriptionError};
use railyard_types::subscription::{SubscriptionData, SubscriptionElement, SubscriptionStatus};
use railyard_types::trigger::{TriggerData, TriggerSpec};

use crate::store::EntityStore;

/// First accumulation page, before an average element size is known.
const FIRST_PAGE_SIZE: usize = 100;

/// Clamp bound for predicted accumulation pages.
const MAX_PAGE_SIZE: usize = 1000;

/// Object-store listing page size during generation.
const GENERATION_PAGE_SIZE: usize = 1000;

// ---------------------------------------------------------------------------
// Ports
// ---------------------------------------------------------------------------

/// One object in the backing store.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectEntry {
    pub key: String,
    pub size_bytes: i64,
}

/// The backing object store, listed in ascending key order.
pub trait ObjectStore: Send + Sync {
    /// Up to `limit` objects under `prefix` with keys strictly greater than
    /// `start_after`. A short page means the listing is exhausted.
    fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        start_after: Option<&str>,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<ObjectEntry>, SubscriptionError>> + Send;
}

/// Subscription element persistence. Bulk transitions are conditional on the
/// expected current state, so lost races surface as a zero count rather
/// than corrupt rows.
pub trait ElementStore: Send + Sync {
    /// Multi-row insert for generation throughput.
    fn insert_batch(
        &self,
        elements: &[SubscriptionElement],
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Insert only if no row exists for (subscription_id, path). Returns
    /// whether an insert occurred.
    fn conditional_insert(
        &self,
        element: &SubscriptionElement,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// UNCONSUMED elements in ascending path order, paths strictly greater
    /// than `after_path`, up to `limit`.
    fn list_unconsumed(
        &self,
        subscription_id: Uuid,
        after_path: Option<&str>,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<SubscriptionElement>, StoreError>> + Send;

    /// UNCONSUMED→RESERVED with a shared batch id. Returns rows moved.
    fn mark_reserved(
        &self,
        element_ids: &[Uuid],
        batch_id: Uuid,
    ) -> impl Future<Output = Result<u64, StoreError>> + Send;

    /// The RESERVED batch whose smallest path is lowest (FIFO-by-name).
    fn oldest_reserved_batch(
        &self,
        subscription_id: Uuid,
    ) -> impl Future<Output = Result<Option<Uuid>, StoreError>> + Send;

    /// RESERVED→ASSIGNED for a whole batch, stamping the action.
    fn assign_batch(
        &self,
        batch_id: Uuid,
        action_id: Uuid,
    ) -> impl Future<Output = Result<u64, StoreError>> + Send;

    /// UNCONSUMED→ASSIGNED for every unconsumed element of a subscription.
    fn assign_all_unconsumed(
        &self,
        subscription_id: Uuid,
        action_id: Uuid,
    ) -> impl Future<Output = Result<u64, StoreError>> + Send;

    /// ASSIGNED→CONSUMED for an action's elements.
    fn complete_assigned(
        &self,
        action_id: Uuid,
    ) -> impl Future<Output = Result<u64, StoreError>> + Send;

    /// ASSIGNED→UNCONSUMED (batch and action cleared) for an action's
    /// elements, after a failed run.
    fn release_assigned(
        &self,
        action_id: Uuid,
    ) -> impl Future<Output = Result<u64, StoreError>> + Send;

    /// Cascade delete when the owning subscription is deleted.
    fn delete_for_subscription(
        &self,
        subscription_id: Uuid,
    ) -> impl Future<Output = Result<u64, StoreError>> + Send;

    /// Every element of a subscription (status displays, tests).
    fn list_for_subscription(
        &self,
        subscription_id: Uuid,
    ) -> impl Future<Output = Result<Vec<SubscriptionElement>, StoreError>> + Send;
}

// ---------------------------------------------------------------------------
// Restartable paged listing
// ---------------------------------------------------------------------------

/// Explicit cursor over object-store pages, restartable from a last-seen
/// key.
pub struct ObjectLister<'a, O> {
    objects: &'a O,
    bucket: &'a str,
    prefix: &'a str,
    last_key: Option<String>,
    page_size: usize,
    exhausted: bool,
}

impl<'a, O: ObjectStore> ObjectLister<'a, O> {
    pub fn new(objects: &'a O, bucket: &'a str, prefix: &'a str, start_after: Option<String>) -> Self {
        Self {
            objects,
            bucket,
            prefix,
            last_key: start_after,
            page_size: GENERATION_PAGE_SIZE,
            exhausted: false,
        }
    }

    /// The next page, or `None` once the listing is exhausted.
    pub async fn next_page(&mut self) -> Result<Option<Vec<ObjectEntry>>, SubscriptionError> {
        if self.exhausted {
            return Ok(None);
        }
        let page = self
            .objects
            .list_page(self.bucket, self.prefix, self.last_key.as_deref(), self.page_size)
            .await?;
        if page.len() < self.page_size {
            self.exhausted = true;
        }
        if page.is_empty() {
            return Ok(None);
        }
        self.last_key = page.last().map(|o| o.key.clone());
        Ok(Some(page))
    }
}

// ---------------------------------------------------------------------------
// Key matching
// ---------------------------------------------------------------------------

/// Does an object key fall inside a subscription's filters?
///
/// `start_prefix`/`end_prefix` bound the full key (`start` inclusive, `end`
/// exclusive); the regex, when present, must match the full key.
pub fn key_matches(
    subscription: &SubscriptionData,
    dataset: &DatasetData,
    bucket: &str,
    key: &str,
) -> Result<bool, SubscriptionError> {
    if bucket != dataset.bucket || !key.starts_with(&dataset.prefix) {
        return Ok(false);
    }
    if let Some(start) = &subscription.start_prefix {
        if key < start.as_str() {
            return Ok(false);
        }
    }
    if let Some(end) = &subscription.end_prefix {
        if key >= end.as_str() {
            return Ok(false);
        }
    }
    if let Some(pattern) = &subscription.path_regex {
        let regex = Regex::new(pattern).map_err(|e| SubscriptionError::InvalidRegex {
            pattern: pattern.clone(),
            reason: e.to_string(),
        })?;
        if !regex.is_match(key) {
            return Ok(false);
        }
    }
    Ok(true)
}

/// ACTIVE subscriptions whose dataset and filters match a created object.
pub async fn matching_subscriptions<S: EntityStore>(
    store: &S,
    bucket: &str,
    key: &str,
) -> Result<Vec<Record<SubscriptionData>>, SubscriptionError> {
    let mut matches = Vec::new();
    for subscription in store.list::<SubscriptionData>().await? {
        if subscription.data.status != SubscriptionStatus::Active {
            continue;
        }
        let dataset = match store.get::<DatasetData>(subscription.data.dataset_id).await {
            Ok(dataset) => dataset,
            Err(StoreError::NotFound) => {
                tracing::warn!(
                    subscription_id = %subscription.id,
                    dataset_id = %subscription.data.dataset_id,
                    "subscription references a missing dataset"
                );
                continue;
            }
            Err(err) => return Err(err.into()),
        };
        if key_matches(&subscription.data, &dataset.data, bucket, key)? {
            matches.push(subscription);
        }
    }
    Ok(matches)
}

// ---------------------------------------------------------------------------
// Byte-threshold accumulation
// ---------------------------------------------------------------------------

/// Predicted next-page size: `ceil(remaining / avg * 1.1)`, clamped.
/// Minimizes round trips while bounding memory.
fn predict_page_size(remaining_bytes: u64, avg_element_size: f64) -> usize {
    if avg_element_size <= 0.0 {
        return FIRST_PAGE_SIZE;
    }
    let predicted = (remaining_bytes as f64 / avg_element_size * 1.1).ceil() as usize;
    predicted.clamp(1, MAX_PAGE_SIZE)
}

/// Accumulate UNCONSUMED elements in ascending path order until their sizes
/// meet or exceed `byte_threshold`. `None` when the subscription's
/// unconsumed bytes fall short.
pub async fn accumulate_threshold<E: ElementStore>(
    elements: &E,
    subscription_id: Uuid,
    byte_threshold: u64,
) -> Result<Option<Vec<SubscriptionElement>>, SubscriptionError> {
    let mut accumulated: Vec<SubscriptionElement> = Vec::new();
    let mut total: u64 = 0;
    let mut after_path: Option<String> = None;

    loop {
        let limit = if accumulated.is_empty() {
            FIRST_PAGE_SIZE
        } else {
            let avg = total as f64 / accumulated.len() as f64;
            predict_page_size(byte_threshold - total, avg)
        };

        let page = elements
            .list_unconsumed(subscription_id, after_path.as_deref(), limit)
            .await?;
        let exhausted = page.len() < limit;

        for element in page {
            total += element.size_bytes.max(0) as u64;
            after_path = Some(element.path.clone());
            accumulated.push(element);
            if total >= byte_threshold {
                return Ok(Some(accumulated));
            }
        }
        if exhausted {
            return Ok(None);
        }
    }
}

// ---------------------------------------------------------------------------
// Batch bookkeeping (shared by the trigger engine and workflow service)
// ---------------------------------------------------------------------------

/// UNCONSUMED→RESERVED under a fresh shared batch id. Called once per
/// trigger firing by the single trigger worker, so no extra locking.
pub async fn reserve_batch<E: ElementStore>(
    elements: &E,
    element_ids: &[Uuid],
) -> Result<Uuid, SubscriptionError> {
    let batch_id = Uuid::now_v7();
    let reserved = elements.mark_reserved(element_ids, batch_id).await?;
    tracing::info!(%batch_id, reserved, "reserved subscription batch");
    Ok(batch_id)
}

/// Assign elements to a consume-subscription action being admitted.
///
/// With a subscription_batch trigger configured, the oldest RESERVED batch
/// (smallest object path) is assigned; otherwise every UNCONSUMED element
/// is. Returns how many elements were assigned.
pub async fn assign_for_action<S: EntityStore, E: ElementStore>(
    store: &S,
    elements: &E,
    action: &Record<ActionData>,
) -> Result<u64, SubscriptionError> {
    let Some(subscription_id) = action.data.subscription_id else {
        return Ok(0);
    };

    let batched = store.list::<TriggerData>().await?.iter().any(|t| {
        matches!(
            &t.data.spec,
            TriggerSpec::SubscriptionBatch { subscription_id: s, .. } if *s == subscription_id
        )
    });

    let assigned = if batched {
        match elements.oldest_reserved_batch(subscription_id).await? {
            Some(batch_id) => elements.assign_batch(batch_id, action.id).await?,
            None => 0,
        }
    } else {
        elements.assign_all_unconsumed(subscription_id, action.id).await?
    };

    tracing::info!(
        action_id = %action.id,
        %subscription_id,
        assigned,
        batched,
        "assigned subscription elements"
    );
    Ok(assigned)
}

/// Checkin reconciliation: CONSUMED on success, back to UNCONSUMED on
/// failure.
pub async fn reconcile_for_action<E: ElementStore>(
    elements: &E,
    action_id: Uuid,
    outcome: ActionOutcome,
) -> Result<u64, SubscriptionError> {
    let count = match outcome {
        ActionOutcome::Success => elements.complete_assigned(action_id).await?,
        ActionOutcome::Failure => elements.release_assigned(action_id).await?,
    };
    Ok(count)
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

/// Generation and live-notification entry points.
#[derive(Clone)]
pub struct SubscriptionManager<S, E, O> {
    store: S,
    elements: E,
    objects: O,
    insert_batch_size: usize,
}

impl<S, E, O> SubscriptionManager<S, E, O>
where
    S: EntityStore + Clone,
    E: ElementStore + Clone,
    O: ObjectStore + Clone,
{
    pub fn new(store: S, elements: E, objects: O, insert_batch_size: usize) -> Self {
        Self {
            store,
            elements,
            objects,
            insert_batch_size: insert_batch_size.max(1),
        }
    }

    /// Populate a QUEUED subscription from the object store.
    ///
    /// QUEUED→GENERATING→ACTIVE, with a second conditional-insert pass from
    /// the last bulk-inserted key to close the race window between the end
    /// of listing and the subscription going live for notifications.
    pub async fn generate(&self, subscription_id: Uuid) -> Result<(), SubscriptionError> {
        let subscription = self.store.get::<SubscriptionData>(subscription_id).await?;
        let generating = subscription.with_data(|d| d.status = SubscriptionStatus::Generating);
        let subscription = match self
            .store
            .patch_if(&subscription, &generating, |d| {
                d.status == SubscriptionStatus::Queued
            })
            .await
        {
            Ok(record) => record,
            Err(StoreError::ConditionFailed) => {
                tracing::debug!(%subscription_id, "subscription already claimed for generation");
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };

        match self.generate_inner(&subscription).await {
            Ok((inserted, backfilled)) => {
                tracing::info!(%subscription_id, inserted, backfilled, "subscription generated");
                Ok(())
            }
            Err(err) => {
                let current = self.store.get::<SubscriptionData>(subscription_id).await?;
                let failed = current.with_data(|d| {
                    d.status = SubscriptionStatus::Failed;
                    d.error_message = Some(err.to_string());
                });
                self.store.patch(&current, &failed).await?;
                Err(err)
            }
        }
    }

    async fn generate_inner(
        &self,
        subscription: &Record<SubscriptionData>,
    ) -> Result<(u64, u64), SubscriptionError> {
        let dataset = self
            .store
            .get::<DatasetData>(subscription.data.dataset_id)
            .await?;

        // First pass: bulk inserts in fixed-size batches.
        let mut lister =
            ObjectLister::new(&self.objects, &dataset.data.bucket, &dataset.data.prefix, None);
        let mut buffer: Vec<SubscriptionElement> = Vec::with_capacity(self.insert_batch_size);
        let mut inserted: u64 = 0;
        let mut last_inserted: Option<String> = None;

        while let Some(page) = lister.next_page().await? {
            for object in page {
                if !key_matches(&subscription.data, &dataset.data, &dataset.data.bucket, &object.key)? {
                    continue;
                }
                last_inserted = Some(object.key.clone());
                buffer.push(SubscriptionElement::new(
                    subscription.id,
                    object.key,
                    object.size_bytes,
                ));
                if buffer.len() >= self.insert_batch_size {
                    self.elements.insert_batch(&buffer).await?;
                    inserted += buffer.len() as u64;
                    buffer.clear();
                }
            }
        }
        if !buffer.is_empty() {
            self.elements.insert_batch(&buffer).await?;
            inserted += buffer.len() as u64;
        }

        let active = subscription.with_data(|d| d.status = SubscriptionStatus::Active);
        self.store.patch(subscription, &active).await?;

        // Second pass: anything that landed between end-of-listing and the
        // subscription going ACTIVE. Conditional inserts dedup against both
        // the first pass and live notifications.
        let mut backfilled: u64 = 0;
        let mut lister = ObjectLister::new(
            &self.objects,
            &dataset.data.bucket,
            &dataset.data.prefix,
            last_inserted,
        );
        while let Some(page) = lister.next_page().await? {
            for object in page {
                if !key_matches(&subscription.data, &dataset.data, &dataset.data.bucket, &object.key)? {
                    continue;
                }
                let element =
                    SubscriptionElement::new(subscription.id, object.key, object.size_bytes);
                if self.elements.conditional_insert(&element).await? {
                    backfilled += 1;
                }
            }
        }
        Ok((inserted, backfilled))
    }

    /// Live object-created notification path. Returns whether a new element
    /// appeared (callers re-evaluate triggers only if so).
    pub async fn conditional_insert(
        &self,
        subscription_id: Uuid,
        path: &str,
        size_bytes: i64,
    ) -> Result<bool, SubscriptionError> {
        let element = SubscriptionElement::new(subscription_id, path, size_bytes);
        Ok(self.elements.conditional_insert(&element).await?)
    }

    /// Delete a subscription and cascade to its elements.
    pub async fn delete(&self, subscription_id: Uuid) -> Result<bool, SubscriptionError> {
        let removed = self
            .elements
            .delete_for_subscription(subscription_id)
            .await?;
        let existed = self.store.delete::<SubscriptionData>(subscription_id).await?;
        tracing::info!(%subscription_id, removed, "deleted subscription");
        Ok(existed)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
