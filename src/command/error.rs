//! Errors that can occur while invoking commands

use crate::{safelist::SafelistError, sweep::SweepError};
use std::{io, process::ExitStatus};
use thiserror::Error;

#[derive(Error, Debug)]
/// All the errors that can occur when invoking a command
pub enum CommandError {
    /// A failure reported by an in-process command
    #[error("{0}")]
    Failed(String),

    /// A command token could not be split into arguments (unbalanced quotes)
    #[error("can't parse command {token:?}: unbalanced quoting")]
    BadQuoting {
        /// The offending token
        token: String,
    },

    /// A command token was empty
    #[error("empty command")]
    EmptyCommand,

    /// An external command could not be started
    #[error("couldn't run {program}: {source}")]
    Spawn {
        /// The program that was run
        program: String,
        /// The underlying error
        source: io::Error,
    },

    /// Waiting for an external command failed
    #[error("couldn't wait for {program}: {source}")]
    Wait {
        /// The program that was run
        program: String,
        /// The underlying error
        source: io::Error,
    },

    /// An external command exited unsuccessfully
    #[error("command {command:?} failed with {status}")]
    ExitStatus {
        /// The command line that was run
        command: String,
        /// How it exited
        status: ExitStatus,
    },

    /// The command was interrupted by cancellation
    #[error("command {command:?} was interrupted")]
    Interrupted {
        /// The name of the command that was interrupted
        command: String,
    },

    /// A sweep run from inside a command failed
    #[error("{0}")]
    Sweep(Box<SweepError>),

    /// A command couldn't record to a safelist
    #[error(transparent)]
    Safelist(#[from] SafelistError),
}

impl CommandError {
    /// A failure with a message, for in-process commands.
    pub fn msg(message: impl ToString) -> Self {
        Self::Failed(message.to_string())
    }
}

impl From<SweepError> for CommandError {
    fn from(e: SweepError) -> Self {
        Self::Sweep(Box::new(e))
    }
}

impl From<crate::bindings::BindingError> for CommandError {
    fn from(e: crate::bindings::BindingError) -> Self {
        Self::Failed(e.to_string())
    }
}
