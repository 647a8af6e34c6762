use crate::Command;
use execution::DeliveryError;
use std::fmt;

/// Status code of a dispatched command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    /// The command was accepted, and its Reply will follow.
    Pending,
    InvalidArgument,
    NotFound,
    InUse,
    Timeout,
    /// The client disconnected while blocked, and nothing was replied.
    Cancelled,
    InternalError,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Status::Ok => "OK",
            Status::Pending => "Pending",
            Status::InvalidArgument => "InvalidArgument",
            Status::NotFound => "NotFound",
            Status::InUse => "InUse",
            Status::Timeout => "Timeout",
            Status::Cancelled => "Cancelled",
            Status::InternalError => "InternalError",
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("unknown command '{0}'")]
    UnknownCommand(String),
    #[error("wrong number of arguments for '{}' command (usage: {})", .0.name(), .0.usage())]
    Arity(Command),
    #[error("{0}")]
    InvalidArgument(String),
    #[error("no registration is triggered by {0:?}")]
    UnknownTrigger(String),
    #[error(transparent)]
    Execution(#[from] execution::Error),
    #[error(transparent)]
    Delivery(#[from] DeliveryError),
    #[error(transparent)]
    Registration(#[from] registration::Error),
    /// A collaborator broke its contract with the command layer.
    #[error("internal error: {0:#}")]
    Internal(#[from] anyhow::Error),
}

impl CommandError {
    pub fn status(&self) -> Status {
        use execution::Error as E;

        match self {
            CommandError::UnknownCommand(_)
            | CommandError::Arity(_)
            | CommandError::InvalidArgument(_) => Status::InvalidArgument,
            CommandError::UnknownTrigger(_) => Status::NotFound,
            CommandError::Execution(E::NotFound(_)) => Status::NotFound,
            CommandError::Execution(E::NotTerminal { .. } | E::Waited { .. }) => Status::InUse,
            CommandError::Delivery(DeliveryError::Timeout { .. }) => Status::Timeout,
            CommandError::Delivery(DeliveryError::Cancelled { .. }) => Status::Cancelled,
            CommandError::Registration(registration::Error::InvalidArgument(_)) => {
                Status::InvalidArgument
            }
            CommandError::Registration(registration::Error::NotFound(_)) => Status::NotFound,
            CommandError::Internal(_) => Status::InternalError,
        }
    }
}

impl From<model::ParseIdError> for CommandError {
    fn from(err: model::ParseIdError) -> Self {
        CommandError::InvalidArgument(err.to_string())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_error_statuses() {
        let err = CommandError::Arity(Command::DropExecution);
        assert_eq!(err.status(), Status::InvalidArgument);
        insta::assert_snapshot!(err, @"wrong number of arguments for 'RG.DROPEXECUTION' command (usage: <id> [FORCE])");

        let err = CommandError::from(anyhow::anyhow!("execution n1-1 is running").context("reported complete"));
        assert_eq!(err.status(), Status::InternalError);
        insta::assert_snapshot!(err, @"internal error: reported complete: execution n1-1 is running");
    }
}
