//! CLI command definitions and dispatch for the `ryd` binary.
//!
//! Uses clap derive macros for argument parsing. The CLI follows a verb-noun
//! pattern (e.g., `ryd create workflow`, `ryd list actions`), with a few
//! top-level verbs for operations (`ryd worker`, `ryd trigger`,
//! `ryd generate`).

pub mod entity;
pub mod fire;
pub mod worker;

use clap::{Parser, Subcommand};
use uuid::Uuid;

/// Orchestrate data pipelines: datasets, datastores, workflows, triggers.
#[derive(Parser)]
#[command(name = "ryd", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of tables.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the worker: message consumer, engine loop, cron runtime.
    Worker {
        /// Emit JSON log lines instead of human-readable output.
        #[arg(long)]
        json_logs: bool,
    },

    /// Manually fire a workflow (starts one instance).
    Trigger {
        /// Workflow id to fire.
        workflow_id: Uuid,
    },

    /// Report an occurrence of a named event.
    Event {
        /// Event id that occurred.
        event_id: Uuid,
    },

    /// Populate a QUEUED subscription from the object store.
    Generate {
        /// Subscription id to generate.
        subscription_id: Uuid,
    },

    /// Tear down a concrete datastore (ACTIVE or INACTIVE to DONE).
    Finish {
        /// Datastore id to finish.
        datastore_id: Uuid,
    },

    /// Create a new resource from a JSON draft.
    Create {
        #[command(subcommand)]
        resource: CreateResource,
    },

    /// List resources.
    #[command(alias = "ls")]
    List {
        #[command(subcommand)]
        resource: ListResource,
    },

    /// Delete a resource.
    #[command(alias = "rm")]
    Delete {
        #[command(subcommand)]
        resource: DeleteResource,
    },
}

#[derive(Subcommand)]
pub enum CreateResource {
    /// Create a dataset (named bucket + prefix).
    Dataset {
        /// Path to a JSON draft (`-` for stdin).
        file: String,
    },
    /// Create a datastore (usually a TEMPLATE blueprint).
    Datastore {
        /// Path to a JSON draft (`-` for stdin).
        file: String,
    },
    /// Create a workflow.
    Workflow {
        /// Path to a JSON draft (`-` for stdin).
        file: String,
    },
    /// Create an action template for a workflow.
    Action {
        /// Path to a JSON draft (`-` for stdin).
        file: String,
    },
    /// Create an event gate.
    Event {
        /// Path to a JSON draft (`-` for stdin).
        file: String,
    },
    /// Create a trigger.
    Trigger {
        /// Path to a JSON draft (`-` for stdin).
        file: String,
    },
    /// Create a subscription (QUEUED; run `ryd generate` to populate).
    Subscription {
        /// Path to a JSON draft (`-` for stdin).
        file: String,
    },
}

#[derive(Subcommand)]
pub enum ListResource {
    /// List datasets.
    Datasets,
    /// List datastores.
    Datastores,
    /// List workflows.
    Workflows,
    /// List workflow instances.
    Instances,
    /// List actions.
    Actions,
    /// List events.
    Events,
    /// List triggers.
    Triggers,
    /// List subscriptions.
    Subscriptions,
    /// List the elements of one subscription.
    Elements {
        /// Subscription id.
        subscription_id: Uuid,
    },
}

#[derive(Subcommand)]
pub enum DeleteResource {
    /// Delete a dataset.
    Dataset { id: Uuid },
    /// Delete a datastore.
    Datastore { id: Uuid },
    /// Delete a workflow.
    Workflow { id: Uuid },
    /// Delete an action.
    Action { id: Uuid },
    /// Delete an event.
    Event { id: Uuid },
    /// Delete a trigger (removes its cron job on the next worker restart).
    Trigger { id: Uuid },
    /// Delete a subscription and all of its elements.
    Subscription { id: Uuid },
}
