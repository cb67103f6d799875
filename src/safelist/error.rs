//! Errors that can occur when reading or writing a safelist

use std::{io, path::PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
/// All the errors that can occur when using a [`super::Safelist`]
pub enum SafelistError {
    /// Error opening, locking, reading or writing the backing file
    #[error("safelist {path}: {source}")]
    Io {
        /// The backing file
        path: PathBuf,
        /// The underlying error
        source: io::Error,
    },

    /// A record couldn't be encoded or decoded
    #[error("safelist {path}: bad record: {source}")]
    Pickle {
        /// The backing file
        path: PathBuf,
        /// The underlying error
        source: serde_pickle::Error,
    },

    /// A record is too big to be framed
    #[error("safelist {path}: record of {len} bytes is too large")]
    TooLarge {
        /// The backing file
        path: PathBuf,
        /// The encoded size of the record
        len: usize,
    },

    /// A temporary safelist file couldn't be kept
    #[error(transparent)]
    Persist(#[from] tempfile::PersistError),
}
