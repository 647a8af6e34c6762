use crate::{Command, CommandError};
use std::str::FromStr;

// Args is a cursor over the arguments of a command.
pub(crate) struct Args<'a> {
    command: Command,
    rest: std::slice::Iter<'a, String>,
}

impl<'a> Args<'a> {
    pub fn new(command: Command, args: &'a [String]) -> Self {
        Self {
            command,
            rest: args.iter(),
        }
    }

    pub fn next(&mut self) -> Option<&'a str> {
        self.rest.next().map(String::as_str)
    }

    pub fn required(&mut self) -> Result<&'a str, CommandError> {
        self.next().ok_or(CommandError::Arity(self.command))
    }

    pub fn parse<T>(&mut self) -> Result<T, CommandError>
    where
        T: FromStr,
        CommandError: From<T::Err>,
    {
        Ok(self.required()?.parse()?)
    }

    /// Value which follows a keyword, such as `TIMEOUT <value>`.
    pub fn value_of(&mut self, keyword: &str) -> Result<&'a str, CommandError> {
        self.next().ok_or_else(|| {
            CommandError::InvalidArgument(format!("{keyword} requires a value"))
        })
    }

    /// All remaining arguments.
    pub fn remaining(&mut self) -> Vec<String> {
        self.rest.by_ref().cloned().collect()
    }

    pub fn finish(mut self) -> Result<(), CommandError> {
        match self.next() {
            None => Ok(()),
            Some(_) => Err(CommandError::Arity(self.command)),
        }
    }
}

pub(crate) fn keyword(arg: &str, name: &str) -> bool {
    arg.eq_ignore_ascii_case(name)
}

pub(crate) fn unexpected(arg: &str) -> CommandError {
    CommandError::InvalidArgument(format!("unexpected argument {arg:?}"))
}
