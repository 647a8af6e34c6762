//! Command entry points of gears: each validates its arguments, resolves an
//! execution or registration, and delegates to the execution Registry or the
//! registration Controller.
mod args;
mod command;
mod config;
mod error;
mod handler;
mod sink;

pub use command::Command;
pub use config::Config;
pub use error::{CommandError, Status};
pub use handler::{registration_reply, Commands, COMMAND_READER};
pub use sink::ResponseSink;
