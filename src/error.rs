//! Errors that can be raised by Pyxis

use crate::{
    bindings::BindingError, command::CommandError, safelist::SafelistError, sweep::SweepError,
};
use thiserror::Error;

/// Errors from interpreting the command line.
#[derive(Error, Debug)]
pub enum CLIError {
    /// An argument was parsed but its value doesn't make sense
    #[error("Invalid Command Line Argument {option}. Expected {expected}, received {received}")]
    InvalidCommandLineArgument {
        /// The argument name within the clap app
        option: String,
        /// Description of what value was expected
        expected: String,
        /// Description of what value was received
        received: String,
    },
}

#[derive(Error, Debug)]
/// All the errors that can occur in Pyxis
pub enum PyxisError {
    /// Error resolving or defining bindings
    #[error(transparent)]
    Binding(#[from] BindingError),

    /// Error invoking commands outside of a sweep
    #[error(transparent)]
    Command(#[from] CommandError),

    /// Error ending a sweep
    #[error(transparent)]
    Sweep(#[from] SweepError),

    /// Error using a safelist
    #[error(transparent)]
    Safelist(#[from] SafelistError),

    /// Error derived from a bad command line
    #[error(transparent)]
    CLIError(#[from] CLIError),

    #[cfg(feature = "cli")]
    /// Error from clap, including requests for help or version
    #[error(transparent)]
    ClapError(#[from] clap::Error),

    /// Not an error, the command line asked to stop before sweeping
    #[error("Dry run")]
    DryRun {},
}
