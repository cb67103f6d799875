//! A list of records shared between concurrent workers and processes.
//!
//! The list lives in a file. Each record is pickled and written as one frame:
//! a little-endian `u32` byte count followed by the pickle. Appends and reads
//! hold an advisory lock on the whole file, so records from concurrent
//! appenders never interleave.

pub mod error;
pub use error::SafelistError;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::{trace, warn};
use serde::{de::DeserializeOwned, Serialize};
use serde_pickle::{DeOptions, SerOptions};
use std::{
    fs::{self, File, OpenOptions},
    io::{self, Read, Write},
    path::{Path, PathBuf},
};

/// Size of the length prefix in front of each record.
const FRAME_HEADER_LEN: usize = 4;

/// A cross-process, append-only list of records.
///
/// # Examples
///
/// ```rust
/// use pyxis::Safelist;
/// use tempfile::tempdir;
///
/// let tmp_dir = tempdir().unwrap();
/// let list = Safelist::create(tmp_dir.path().join("done.safelist")).unwrap();
/// list.add(&"a.ms").unwrap();
/// list.add(&"b.ms").unwrap();
/// let done: Vec<String> = list.read_all().unwrap();
/// assert_eq!(done, vec!["a.ms", "b.ms"]);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Safelist {
    path: PathBuf,
}

impl Safelist {
    /// A new, empty list at `path`. Any existing file there is removed.
    ///
    /// # Errors
    ///
    /// [`SafelistError::Io`] if an existing file can't be removed.
    pub fn create(path: impl Into<PathBuf>) -> Result<Self, SafelistError> {
        let list = Self::attach(path);
        list.reset()?;
        Ok(list)
    }

    /// Join the list at `path` without touching its contents, e.g. from a
    /// cooperating process. The file need not exist yet.
    pub fn attach(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// A new, empty list in a randomly named file in the temp directory. The
    /// file is left behind when the list is dropped.
    ///
    /// # Errors
    ///
    /// [`SafelistError::Io`] or [`SafelistError::Persist`] if the file can't be created.
    pub fn temporary() -> Result<Self, SafelistError> {
        let file = tempfile::Builder::new()
            .prefix("pyxis-")
            .suffix(".safelist")
            .tempfile()
            .map_err(|source| SafelistError::Io {
                path: std::env::temp_dir(),
                source,
            })?;
        let (_, path) = file.keep()?;
        Ok(Self { path })
    }

    /// The file backing this list.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: io::Error) -> SafelistError {
        SafelistError::Io {
            path: self.path.clone(),
            source,
        }
    }

    /// Empty the list by removing its file.
    ///
    /// # Errors
    ///
    /// [`SafelistError::Io`] if the file exists but can't be removed.
    pub fn reset(&self) -> Result<(), SafelistError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.io_error(e)),
        }
    }

    /// Append a record, holding an exclusive lock for the duration of the write.
    ///
    /// # Errors
    ///
    /// - [`SafelistError::Pickle`] if the record can't be pickled
    /// - [`SafelistError::TooLarge`] if the pickle won't fit in a frame
    /// - [`SafelistError::Io`] on file errors
    pub fn add<T: Serialize>(&self, record: &T) -> Result<(), SafelistError> {
        let payload =
            serde_pickle::to_vec(record, SerOptions::new()).map_err(|source| {
                SafelistError::Pickle {
                    path: self.path.clone(),
                    source,
                }
            })?;
        let len = u32::try_from(payload.len()).map_err(|_| SafelistError::TooLarge {
            path: self.path.clone(),
            len: payload.len(),
        })?;
        let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
        frame
            .write_u32::<LittleEndian>(len)
            .map_err(|e| self.io_error(e))?;
        frame.extend_from_slice(&payload);

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| self.io_error(e))?;
        file.lock().map_err(|e| self.io_error(e))?;
        // a single write keeps the frame contiguous even if the lock is only advisory
        let written = file.write_all(&frame).and_then(|()| file.flush());
        let unlocked = file.unlock();
        written.map_err(|e| self.io_error(e))?;
        unlocked.map_err(|e| self.io_error(e))?;
        trace!("added {} byte record to {}", frame.len(), self.path.display());
        Ok(())
    }

    /// Every record in the list, in the order they were added. A list whose
    /// file doesn't exist is empty.
    ///
    /// A frame cut short at the end of the file (a writer that died mid-write)
    /// is treated as the end of the list.
    ///
    /// # Errors
    ///
    /// - [`SafelistError::Io`] on file errors
    /// - [`SafelistError::Pickle`] if a complete record can't be decoded as `T`
    pub fn read_all<T: DeserializeOwned>(&self) -> Result<Vec<T>, SafelistError> {
        let mut file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(self.io_error(e)),
        };
        file.lock_shared().map_err(|e| self.io_error(e))?;
        let mut buf = vec![];
        let read = file.read_to_end(&mut buf);
        let unlocked = file.unlock();
        read.map_err(|e| self.io_error(e))?;
        unlocked.map_err(|e| self.io_error(e))?;

        let mut records = vec![];
        let mut rest = buf.as_slice();
        while !rest.is_empty() {
            if rest.len() < FRAME_HEADER_LEN {
                warn!("{}: ignoring truncated record header", self.path.display());
                break;
            }
            let len = rest
                .read_u32::<LittleEndian>()
                .map_err(|e| self.io_error(e))? as usize;
            if rest.len() < len {
                warn!("{}: ignoring truncated record", self.path.display());
                break;
            }
            let (payload, tail) = rest.split_at(len);
            let record = serde_pickle::from_slice(payload, DeOptions::new()).map_err(|source| {
                SafelistError::Pickle {
                    path: self.path.clone(),
                    source,
                }
            })?;
            records.push(record);
            rest = tail;
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::{Safelist, SafelistError};
    use crate::bindings::Value;
    use serde::{Deserialize, Serialize};
    use std::{fs::OpenOptions, io::Write, thread};
    use tempfile::tempdir;

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    struct Record {
        writer: usize,
        seq: usize,
        value: Value,
    }

    #[test]
    fn test_missing_file_is_empty() {
        let tmp_dir = tempdir().unwrap();
        let list = Safelist::attach(tmp_dir.path().join("nothing"));
        assert!(list.read_all::<Value>().unwrap().is_empty());
    }

    #[test]
    fn test_create_removes_existing() {
        let tmp_dir = tempdir().unwrap();
        let path = tmp_dir.path().join("list");
        let first = Safelist::create(&path).unwrap();
        first.add(&1).unwrap();
        let attached = Safelist::attach(&path);
        assert_eq!(attached.read_all::<i64>().unwrap(), vec![1]);
        let second = Safelist::create(&path).unwrap();
        assert!(second.read_all::<i64>().unwrap().is_empty());
    }

    #[test]
    fn test_values_keep_their_type() {
        let list = Safelist::temporary().unwrap();
        let values = vec![Value::Int(3), Value::from("3"), Value::from(vec![1, 2])];
        for value in &values {
            list.add(value).unwrap();
        }
        assert_eq!(list.read_all::<Value>().unwrap(), values);
        list.reset().unwrap();
        assert!(!list.path().exists());
    }

    #[test]
    fn test_truncated_frame_ends_list() {
        let tmp_dir = tempdir().unwrap();
        let list = Safelist::create(tmp_dir.path().join("list")).unwrap();
        list.add(&"complete").unwrap();
        let mut file = OpenOptions::new().append(true).open(list.path()).unwrap();
        // a header promising more bytes than follow
        file.write_all(&[200, 0, 0, 0, 1, 2]).unwrap();
        drop(file);
        assert_eq!(list.read_all::<String>().unwrap(), vec!["complete"]);
    }

    #[test]
    fn test_wrong_record_type() {
        let list = Safelist::temporary().unwrap();
        list.add(&"not a number").unwrap();
        assert!(matches!(
            list.read_all::<i64>(),
            Err(SafelistError::Pickle { .. })
        ));
        list.reset().unwrap();
    }

    #[test]
    fn test_concurrent_appenders() {
        let tmp_dir = tempdir().unwrap();
        let list = Safelist::create(tmp_dir.path().join("list")).unwrap();
        let num_writers = 4;
        let num_records = 250;

        thread::scope(|scope| {
            for writer in 0..num_writers {
                // each thread opens the file for itself, as separate processes would
                let list = Safelist::attach(list.path());
                scope.spawn(move || {
                    for seq in 0..num_records {
                        let record = Record {
                            writer,
                            seq,
                            value: Value::from(format!("w{writer}-{seq}")),
                        };
                        list.add(&record).unwrap();
                    }
                });
            }
        });

        let records: Vec<Record> = list.read_all().unwrap();
        assert_eq!(records.len(), num_writers * num_records);
        for writer in 0..num_writers {
            let seqs: Vec<usize> = records
                .iter()
                .filter(|r| r.writer == writer)
                .map(|r| r.seq)
                .collect();
            // appends from one writer keep their order
            assert_eq!(seqs, (0..num_records).collect::<Vec<_>>());
        }
    }
}
