//! Execution Plans: the stateful handles of submitted computations,
//! the Registry which owns them, and delivery of their results to clients.
mod client;
pub mod delivery;
mod engine;
mod plan;
mod registry;
pub mod scripted;

pub use client::{Client, ClientId};
pub use delivery::{DeliveryError, ResultSet};
pub use engine::{Engine, ExecutionHandle, PipelineSpec};
pub use plan::{AppendError, ExecutionPlan, Info, Status};
pub use registry::Registry;

use model::ExecutionId;

/// Errors of Registry operations which reference an execution by its id.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("execution {0} does not exist")]
    NotFound(ExecutionId),
    #[error("execution {id} is {status} and cannot be dropped until it completes (use FORCE to abort it)")]
    NotTerminal { id: ExecutionId, status: Status },
    #[error("execution {id} has {waiters} blocked client(s) and cannot be dropped")]
    Waited { id: ExecutionId, waiters: usize },
}
