//! Entity CRUD commands: `ryd create`, `ryd list`, `ryd delete`.
//!
//! Drafts are JSON files matching each entity's `data` payload shape;
//! validation runs in the store before anything is persisted.

use anyhow::Context;
use comfy_table::{presets, Cell, Color, ContentArrangement, Table};
use uuid::Uuid;

use railyard_core::store::EntityStore;
use railyard_core::subscription::ElementStore;
use railyard_infra::cron::validate_pattern;
use railyard_types::action::ActionData;
use railyard_types::dataset::DatasetData;
use railyard_types::datastore::{DatastoreData, DatastoreStatus};
use railyard_types::entity::{EntityData, Record};
use railyard_types::error::StoreError;
use railyard_types::event::EventData;
use railyard_types::subscription::SubscriptionData;
use railyard_types::trigger::{TriggerData, TriggerSpec};
use railyard_types::workflow::{WorkflowData, WorkflowInstanceData};

use crate::cli::{CreateResource, DeleteResource, ListResource};
use crate::state::AppState;

// ---------------------------------------------------------------------------
// create
// ---------------------------------------------------------------------------

pub async fn create(state: &AppState, resource: CreateResource, json: bool) -> anyhow::Result<()> {
    match resource {
        CreateResource::Dataset { file } => create_one::<DatasetData>(state, &file, json).await,
        CreateResource::Datastore { file } => create_one::<DatastoreData>(state, &file, json).await,
        CreateResource::Workflow { file } => create_one::<WorkflowData>(state, &file, json).await,
        CreateResource::Action { file } => create_one::<ActionData>(state, &file, json).await,
        CreateResource::Event { file } => create_one::<EventData>(state, &file, json).await,
        CreateResource::Trigger { file } => {
            let draft: TriggerData = read_draft(&file)?;
            // Catch malformed schedules at create time rather than at the
            // worker's next restart.
            if let TriggerSpec::Scheduled { cron_pattern } = &draft.spec {
                validate_pattern(cron_pattern)?;
            }
            let record = state.store.create(draft).await?;
            print_created(&record, json)
        }
        CreateResource::Subscription { file } => {
            create_one::<SubscriptionData>(state, &file, json).await
        }
    }
}

async fn create_one<T: EntityData>(state: &AppState, file: &str, json: bool) -> anyhow::Result<()> {
    let draft: T = read_draft(file)?;
    let record = state.store.create(draft).await?;
    print_created(&record, json)
}

fn read_draft<T: EntityData>(file: &str) -> anyhow::Result<T> {
    let raw = if file == "-" {
        std::io::read_to_string(std::io::stdin())?
    } else {
        std::fs::read_to_string(file).with_context(|| format!("reading draft {file}"))?
    };
    serde_json::from_str(&raw).with_context(|| format!("parsing {} draft", T::KIND))
}

fn print_created<T: EntityData>(record: &Record<T>, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(record)?);
    } else {
        println!("created {} {}", T::KIND.trim_end_matches('s'), record.id);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// list
// ---------------------------------------------------------------------------

pub async fn list(state: &AppState, resource: ListResource, json: bool) -> anyhow::Result<()> {
    match resource {
        ListResource::Datasets => {
            let rows = state.store.list::<DatasetData>().await?;
            render(&rows, json, &["Id", "Name", "Bucket", "Prefix"], |r| {
                vec![
                    r.id.to_string(),
                    r.data.name.clone(),
                    r.data.bucket.clone(),
                    r.data.prefix.clone(),
                ]
            })
        }
        ListResource::Datastores => {
            let rows = state.store.list::<DatastoreData>().await?;
            render(
                &rows,
                json,
                &["Id", "Name", "Status", "Concurrency", "On Failure", "Template"],
                |r| {
                    vec![
                        r.id.to_string(),
                        r.data.name.clone(),
                        debug_lower(&r.data.status),
                        r.data.concurrency.to_string(),
                        debug_lower(&r.data.on_failure),
                        r.data
                            .template_id
                            .map(|id| id.to_string())
                            .unwrap_or_default(),
                    ]
                },
            )
        }
        ListResource::Workflows => {
            let rows = state.store.list::<WorkflowData>().await?;
            render(
                &rows,
                json,
                &["Id", "Name", "Status", "Datastore", "Concurrency"],
                |r| {
                    vec![
                        r.id.to_string(),
                        r.data.name.clone(),
                        debug_lower(&r.data.status),
                        r.data.datastore_id.to_string(),
                        r.data.concurrency.to_string(),
                    ]
                },
            )
        }
        ListResource::Instances => {
            let rows = state.store.list::<WorkflowInstanceData>().await?;
            render(
                &rows,
                json,
                &["Id", "Workflow", "Status", "Fired By", "Created", "Error"],
                |r| {
                    vec![
                        r.id.to_string(),
                        r.data.workflow_id.to_string(),
                        debug_lower(&r.data.status),
                        debug_lower(&r.data.fired_by.kind),
                        r.created.format("%Y-%m-%d %H:%M:%S").to_string(),
                        r.data.error_message.clone().unwrap_or_default(),
                    ]
                },
            )
        }
        ListResource::Actions => {
            let rows = state.store.list::<ActionData>().await?;
            render(
                &rows,
                json,
                &["Id", "Name", "Status", "Engine", "Order", "Instance"],
                |r| {
                    vec![
                        r.id.to_string(),
                        r.data.name.clone(),
                        debug_lower(&r.data.status),
                        r.data.engine.clone(),
                        r.data.order_idx.to_string(),
                        r.data
                            .workflow_instance_id
                            .map(|id| id.to_string())
                            .unwrap_or_default(),
                    ]
                },
            )
        }
        ListResource::Events => {
            let rows = state.store.list::<EventData>().await?;
            render(&rows, json, &["Id", "Name", "Status"], |r| {
                vec![
                    r.id.to_string(),
                    r.data.name.clone(),
                    debug_lower(&r.data.status),
                ]
            })
        }
        ListResource::Triggers => {
            let rows = state.store.list::<TriggerData>().await?;
            render(
                &rows,
                json,
                &["Id", "Name", "Kind", "Status", "Workflows"],
                |r| {
                    vec![
                        r.id.to_string(),
                        r.data.name.clone(),
                        debug_lower(&r.data.kind()),
                        debug_lower(&r.data.status),
                        r.data.workflow_ids.len().to_string(),
                    ]
                },
            )
        }
        ListResource::Subscriptions => {
            let rows = state.store.list::<SubscriptionData>().await?;
            render(
                &rows,
                json,
                &["Id", "Name", "Status", "Dataset", "Error"],
                |r| {
                    vec![
                        r.id.to_string(),
                        r.data.name.clone(),
                        debug_lower(&r.data.status),
                        r.data.dataset_id.to_string(),
                        r.data.error_message.clone().unwrap_or_default(),
                    ]
                },
            )
        }
        ListResource::Elements { subscription_id } => {
            let rows = state.elements.list_for_subscription(subscription_id).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&rows)?);
                return Ok(());
            }
            let mut table = new_table(&["Path", "Size", "State", "Batch", "Action"]);
            for element in &rows {
                table.add_row(vec![
                    element.path.clone(),
                    element.size_bytes.to_string(),
                    element.state.as_str().to_string(),
                    element
                        .batch_id
                        .map(|id| id.to_string())
                        .unwrap_or_default(),
                    element
                        .action_id
                        .map(|id| id.to_string())
                        .unwrap_or_default(),
                ]);
            }
            println!("{table}");
            Ok(())
        }
    }
}

fn render<T: EntityData>(
    rows: &[Record<T>],
    json: bool,
    header: &[&str],
    to_row: impl Fn(&Record<T>) -> Vec<String>,
) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(rows)?);
        return Ok(());
    }
    let mut table = new_table(header);
    for record in rows {
        table.add_row(to_row(record));
    }
    println!("{table}");
    Ok(())
}

fn new_table(header: &[&str]) -> Table {
    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(header.iter().map(|h| Cell::new(h).fg(Color::White)));
    table
}

fn debug_lower<T: std::fmt::Debug>(value: &T) -> String {
    format!("{value:?}").to_lowercase()
}

// ---------------------------------------------------------------------------
// finish
// ---------------------------------------------------------------------------

/// Operator teardown of a concrete datastore. Templates are never finished;
/// they have no running footprint.
pub async fn finish_datastore(
    state: &AppState,
    datastore_id: Uuid,
    json: bool,
) -> anyhow::Result<()> {
    let datastore = state.store.get::<DatastoreData>(datastore_id).await?;
    let done = datastore.with_data(|d| d.status = DatastoreStatus::Done);
    match state
        .store
        .patch_if(&datastore, &done, |d| {
            matches!(d.status, DatastoreStatus::Active | DatastoreStatus::Inactive)
        })
        .await
    {
        Ok(finished) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&finished)?);
            } else {
                println!("finished datastore {datastore_id}");
            }
            Ok(())
        }
        Err(StoreError::ConditionFailed) => {
            if json {
                println!(
                    "{}",
                    serde_json::json!({"id": datastore_id, "finished": false})
                );
            } else {
                println!(
                    "datastore {datastore_id} is {:?}, nothing to finish",
                    datastore.data.status
                );
            }
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}

// ---------------------------------------------------------------------------
// delete
// ---------------------------------------------------------------------------

pub async fn delete(state: &AppState, resource: DeleteResource, json: bool) -> anyhow::Result<()> {
    let (kind, id, removed) = match resource {
        DeleteResource::Dataset { id } => {
            ("dataset", id, state.store.delete::<DatasetData>(id).await?)
        }
        DeleteResource::Datastore { id } => (
            "datastore",
            id,
            state.store.delete::<DatastoreData>(id).await?,
        ),
        DeleteResource::Workflow { id } => {
            // Template actions are strictly owned by the workflow.
            let removed = state.store.delete::<WorkflowData>(id).await?;
            if removed {
                for action in state.store.list::<ActionData>().await? {
                    if action.data.workflow_id == Some(id)
                        && action.data.workflow_instance_id.is_none()
                    {
                        state.store.delete::<ActionData>(action.id).await?;
                    }
                }
            }
            ("workflow", id, removed)
        }
        DeleteResource::Action { id } => ("action", id, state.store.delete::<ActionData>(id).await?),
        DeleteResource::Event { id } => ("event", id, state.store.delete::<EventData>(id).await?),
        DeleteResource::Trigger { id } => {
            let removed = state.store.delete::<TriggerData>(id).await?;
            if removed {
                state.triggers.trigger_deleted(id).await?;
            }
            ("trigger", id, removed)
        }
        DeleteResource::Subscription { id } => {
            ("subscription", id, state.subscriptions.delete(id).await?)
        }
    };

    if json {
        println!("{}", serde_json::json!({"kind": kind, "id": id, "deleted": removed}));
    } else if removed {
        println!("deleted {kind} {id}");
    } else {
        println!("{kind} {id} not found");
    }
    Ok(())
}
