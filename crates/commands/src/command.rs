use crate::CommandError;
use std::str::FromStr;

/// Command names which are dispatched by Commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    AbortExecution,
    DropExecution,
    GetResults,
    GetResultsBlocking,
    Register,
    FlushRegistrationsStats,
    Execute,
    GetExecution,
    DumpExecutions,
    DumpRegistrations,
    Trigger,
}

impl Command {
    pub const ALL: [Command; 11] = [
        Command::AbortExecution,
        Command::DropExecution,
        Command::GetResults,
        Command::GetResultsBlocking,
        Command::Register,
        Command::FlushRegistrationsStats,
        Command::Execute,
        Command::GetExecution,
        Command::DumpExecutions,
        Command::DumpRegistrations,
        Command::Trigger,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Command::AbortExecution => "RG.ABORTEXECUTION",
            Command::DropExecution => "RG.DROPEXECUTION",
            Command::GetResults => "RG.GETRESULTS",
            Command::GetResultsBlocking => "RG.GETRESULTSBLOCKING",
            Command::Register => "RG.REGISTER",
            Command::FlushRegistrationsStats => "RG.FLUSHREGISTRATIONSSTATS",
            Command::Execute => "RG.EXECUTE",
            Command::GetExecution => "RG.GETEXECUTION",
            Command::DumpExecutions => "RG.DUMPEXECUTIONS",
            Command::DumpRegistrations => "RG.DUMPREGISTRATIONS",
            Command::Trigger => "RG.TRIGGER",
        }
    }

    /// Usage of the command's arguments.
    pub fn usage(self) -> &'static str {
        match self {
            Command::AbortExecution | Command::GetResults | Command::GetExecution => "<id>",
            Command::DropExecution => "<id> [FORCE]",
            Command::GetResultsBlocking => "<id> [TIMEOUT <ms>]",
            Command::Register => {
                "<function> [READER <reader>] [PREFIX <prefix>] [MODE async|async_local|sync] [DESCRIPTION <text>]"
            }
            Command::FlushRegistrationsStats => "[<registration-id>]",
            Command::Execute => "<pipeline> [UNBLOCKING] [REQUIREMENTS <requirement>...]",
            Command::DumpExecutions | Command::DumpRegistrations => "no arguments",
            Command::Trigger => "<trigger>",
        }
    }
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Command::ALL
            .into_iter()
            .find(|command| command.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| CommandError::UnknownCommand(s.to_string()))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_names_are_case_insensitive() {
        for command in Command::ALL {
            assert_eq!(command.name().parse::<Command>().unwrap(), command);
            assert_eq!(
                command.name().to_lowercase().parse::<Command>().unwrap(),
                command
            );
        }
        insta::assert_snapshot!("RG.NOPE".parse::<Command>().unwrap_err(), @"unknown command 'RG.NOPE'");
    }
}
