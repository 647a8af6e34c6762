//! Data model shared by the gears execution and registration layers:
//! the Records produced by pipelines, the Replies returned to clients,
//! and the identifiers of nodes, executions and registrations.
mod id;
mod record;
mod reply;

pub use id::{ExecutionId, NodeId, ParseIdError, RegistrationId};
pub use record::{Record, RecordRef};
pub use reply::Reply;
