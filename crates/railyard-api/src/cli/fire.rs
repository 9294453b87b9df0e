//! Manual firing commands: `ryd trigger`, `ryd event`, `ryd generate`.
//!
//! These act on the shared database directly; a separately-running worker
//! process picks up the queued actions on its next promote tick. Messages
//! the firing produces (RunWorkflow fan-out, TriggerFired) are drained
//! in-process before the command returns, because the local queue does not
//! cross processes.

use uuid::Uuid;

use railyard_core::subscription::ElementStore;
use railyard_types::workflow::FiredBy;

use crate::state::AppState;

/// Manually start one instance of a workflow.
pub async fn trigger_workflow(
    state: &AppState,
    workflow_id: Uuid,
    json: bool,
) -> anyhow::Result<()> {
    match state
        .workflow
        .start_instance(workflow_id, FiredBy::manual())
        .await?
    {
        Some(instance) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&instance)?);
            } else {
                println!("started instance {} of workflow {workflow_id}", instance.id);
            }
        }
        None => {
            if json {
                println!("null");
            } else {
                println!("workflow {workflow_id} is at its concurrency limit, firing dropped");
            }
        }
    }
    Ok(())
}

/// Report an event occurrence and drain the resulting firings.
pub async fn fire_event(state: &AppState, event_id: Uuid, json: bool) -> anyhow::Result<()> {
    state.triggers.on_event(event_id).await?;
    drain(state).await?;
    if json {
        println!("{}", serde_json::json!({"event_id": event_id, "fired": true}));
    } else {
        println!("event {event_id} reported");
    }
    Ok(())
}

/// Populate a QUEUED subscription from the object store.
pub async fn generate_subscription(
    state: &AppState,
    subscription_id: Uuid,
    json: bool,
) -> anyhow::Result<()> {
    state.subscriptions.generate(subscription_id).await?;
    let elements = state.elements.list_for_subscription(subscription_id).await?;
    if json {
        println!(
            "{}",
            serde_json::json!({"subscription_id": subscription_id, "elements": elements.len()})
        );
    } else {
        println!(
            "subscription {subscription_id} generated with {} elements",
            elements.len()
        );
    }
    Ok(())
}

/// Process every message currently in the in-process queue.
async fn drain(state: &AppState) -> anyhow::Result<()> {
    let listener = state.listener();
    while state.queue.depth() > 0 {
        state.broker.receive(&listener).await?;
    }
    Ok(())
}
