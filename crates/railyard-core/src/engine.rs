//! Engine port: the external executor that performs an action's real work.
//!
//! The core never inspects engine-specific action args; it hands the engine
//! the checked-out action plus its resolved datastore and takes back a
//! `CheckinResult`. `BoxEngine` provides object-safe dynamic dispatch so a
//! registry can hold heterogeneous engines, following the same blanket-impl
//! pattern used elsewhere in the workspace for runtime-selected providers.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use railyard_types::action::{ActionData, CheckinResult};
use railyard_types::datastore::DatastoreData;
use railyard_types::entity::Record;

/// One engine kind (e.g. "redshift", "emr"). Matched against
/// `ActionData::engine`.
pub trait Engine: Send + Sync + 'static {
    /// Engine id actions reference.
    fn id(&self) -> &str;

    /// Execute the action. Never panics; failures come back as a FAILURE
    /// checkin result.
    fn run(
        &self,
        action: Record<ActionData>,
        datastore: Record<DatastoreData>,
    ) -> impl Future<Output = CheckinResult> + Send;
}

/// Object-safe version of [`Engine`] with boxed futures.
pub trait EngineDyn: Send + Sync {
    fn id(&self) -> &str;

    fn run_boxed(
        &self,
        action: Record<ActionData>,
        datastore: Record<DatastoreData>,
    ) -> Pin<Box<dyn Future<Output = CheckinResult> + Send + '_>>;
}

impl<T: Engine> EngineDyn for T {
    fn id(&self) -> &str {
        Engine::id(self)
    }

    fn run_boxed(
        &self,
        action: Record<ActionData>,
        datastore: Record<DatastoreData>,
    ) -> Pin<Box<dyn Future<Output = CheckinResult> + Send + '_>> {
        Box::pin(self.run(action, datastore))
    }
}

/// Type-erased engine handle for registries.
#[derive(Clone)]
pub struct BoxEngine(Arc<dyn EngineDyn>);

impl BoxEngine {
    pub fn new<E: Engine>(engine: E) -> Self {
        Self(Arc::new(engine))
    }

    pub fn id(&self) -> &str {
        self.0.id()
    }

    pub async fn run(
        &self,
        action: Record<ActionData>,
        datastore: Record<DatastoreData>,
    ) -> CheckinResult {
        self.0.run_boxed(action, datastore).await
    }
}
