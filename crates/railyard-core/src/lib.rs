//! Railyard orchestration core.
//!
//! Business logic and ports only: the entity store contract, the advisory
//! mutex service, the idempotent message broker, subscription element
//! bookkeeping, the trigger engine, the workflow/instance/action state
//! machines, and the engine worker loop. Persistence, queues, and task
//! schedulers are implemented against the ports here by `railyard-infra`.

pub mod broker;
pub mod engine;
pub mod listener;
pub mod mutex;
pub mod store;
pub mod subscription;
pub mod task;
pub mod trigger;
pub mod worker;
pub mod workflow;
