//! Cluster-wide registration of stream-processing functions.
//!
//! A registration is installed on the node which receives it, and is then
//! offered to every other member of the cluster, each of which installs it and
//! acknowledges the outcome. Registration is not transactional: members which
//! installed a registration retain it even if other members failed to.
mod controller;
pub mod local;
mod message;
mod registration;
mod stats;

pub use controller::{
    Controller, FailureReason, Installer, NodeFailure, OnDone, RegistrationOutcome, Transport,
};
pub use message::{Ack, Message};
pub use registration::{Mode, Registration, RegistrationPayload, RegistrationState};
pub use stats::{Invocation, RegistrationStats, StatsSnapshot};

use model::RegistrationId;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("registration {0} does not exist")]
    NotFound(RegistrationId),
}
