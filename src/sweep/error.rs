//! Errors that can occur during a sweep

use crate::{
    bindings::{BindingError, Value},
    command::CommandError,
};
use itertools::Itertools;
use std::fmt::{self, Display};
use thiserror::Error;

/// A single item whose commands failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFailure {
    /// The value the swept variable was bound to
    pub value: Value,
    /// The error the commands produced
    pub message: String,
}

impl Display for ItemFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.value, self.message)
    }
}

/// Why a sweep worker failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobFailure {
    /// An item failed in strict mode, so the worker stopped there.
    Item(ItemFailure),
    /// The worker got through its items in persistent mode, but some failed.
    Items(Vec<ItemFailure>),
    /// The worker was interrupted while processing this value.
    Interrupted(Option<Value>),
    /// The worker crashed rather than failing an item.
    Crashed(String),
}

impl Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Item(failure) => write!(f, "aborted at {failure}"),
            Self::Items(failures) => {
                write!(f, "failed for {}", failures.iter().map(|f| &f.value).join(", "))
            }
            Self::Interrupted(Some(value)) => write!(f, "interrupted at {value}"),
            Self::Interrupted(None) => write!(f, "interrupted"),
            Self::Crashed(reason) => write!(f, "crashed: {reason}"),
        }
    }
}

#[derive(Error, Debug)]
/// All the errors that can end a sweep
pub enum SweepError {
    /// The swept variable's name couldn't be resolved.
    #[error(transparent)]
    Binding(#[from] BindingError),

    /// The sweep domain is neither a list of scalars nor a comma-joined string.
    #[error("{name}_List has invalid type {kind}")]
    InvalidDomain {
        /// The swept variable
        name: String,
        /// The kind of value found
        kind: &'static str,
    },

    /// Strict mode: an item failed, so the sweep stopped there.
    #[error("per-loop failed for {name}={value}: {source}")]
    ItemFailed {
        /// The swept variable
        name: String,
        /// The value that failed
        value: Value,
        /// What went wrong
        source: CommandError,
    },

    /// Persistent mode: every item was attempted, and these failed.
    #[error("per-loop failed for {}", failures.iter().map(|f| &f.value).join(","))]
    ItemsFailed {
        /// The swept variable
        name: String,
        /// The failed items, in sweep order
        failures: Vec<ItemFailure>,
    },

    /// Parallel mode: some workers failed.
    #[error(
        "{} of {num_jobs} jobs have failed (#{})",
        failures.len(),
        failures.iter().map(|(job, _)| job).join(", #")
    )]
    JobsFailed {
        /// The swept variable
        name: String,
        /// How many workers were started
        num_jobs: usize,
        /// The failed workers, by index
        failures: Vec<(usize, JobFailure)>,
    },

    /// The sweep was interrupted. All workers have been stopped.
    #[error("per-loop over {name} was interrupted")]
    Interrupted {
        /// The swept variable
        name: String,
    },

    /// A worker couldn't be started.
    #[error("couldn't start job #{job}: {source}")]
    Spawn {
        /// The index of the worker
        job: usize,
        /// The underlying error
        source: std::io::Error,
    },
}

impl SweepError {
    /// The values of the items that failed, for errors that know them.
    pub fn failed_values(&self) -> Vec<Value> {
        match self {
            Self::ItemFailed { value, .. } => vec![value.clone()],
            Self::ItemsFailed { failures, .. } => {
                failures.iter().map(|f| f.value.clone()).collect()
            }
            Self::JobsFailed { failures, .. } => failures
                .iter()
                .flat_map(|(_, failure)| match failure {
                    JobFailure::Item(f) => vec![f.value.clone()],
                    JobFailure::Items(fs) => fs.iter().map(|f| f.value.clone()).collect(),
                    JobFailure::Interrupted(_) | JobFailure::Crashed(_) => vec![],
                })
                .collect(),
            _ => vec![],
        }
    }

    /// The indices of the workers that failed, for parallel sweeps.
    pub fn failed_jobs(&self) -> Vec<usize> {
        match self {
            Self::JobsFailed { failures, .. } => failures.iter().map(|(job, _)| *job).collect(),
            _ => vec![],
        }
    }
}
