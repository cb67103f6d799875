#![warn(missing_docs)]
#![warn(clippy::missing_safety_doc)]
#![warn(clippy::missing_errors_doc)]

//! Pyxis runs parameter sweeps: it binds a variable to each value of a list
//! in turn and runs a sequence of commands for each value, serially or spread
//! over parallel workers.
//!
//! # Examples
//!
//! Here's how to run a command once per measurement set, four at a time,
//! carrying on past failures and recording what succeeded.
//!
//! ```rust
//! use pyxis::{pper, Bindings, Command, Context, Safelist, SweepConfigBuilder, Value};
//!
//! // the sweep domain lives in MS_List
//! let mut bindings = Bindings::new();
//! bindings.assign_list("MS", vec!["a.ms", "b.ms", "c.ms", "d.ms"]).unwrap();
//!
//! let config = SweepConfigBuilder::default()
//!     .jobs(4)
//!     .persist(true)
//!     .build()
//!     .unwrap();
//! let mut ctx = Context::new(bindings, config);
//!
//! // workers append to a shared list as they go
//! let done = Safelist::temporary().unwrap();
//! let record = {
//!     let done = done.clone();
//!     Command::call("record", move |ctx| {
//!         if let Some(ms) = ctx.bindings.get("MS")? {
//!             done.add(ms)?;
//!         }
//!         Ok(())
//!     })
//! };
//!
//! let report = pper(&mut ctx, "MS", &[record]).unwrap();
//! assert_eq!(report.processed.len(), 4);
//!
//! let mut seen: Vec<Value> = done.read_all().unwrap();
//! seen.sort();
//! let expected: Vec<Value> = vec!["a.ms".into(), "b.ms".into(), "c.ms".into(), "d.ms".into()];
//! assert_eq!(seen, expected);
//! done.reset().unwrap();
//! ```
//!
//! # Details
//!
//! - [`bindings`] holds variables, nested namespaces and `_List` sweep domains.
//! - [`command`] runs in-process callables and external command lines.
//! - [`sweep`] is the sweep controller, see [`per`] and [`pper`].
//! - [`safelist`] is an append-only record list that many processes can share.

pub mod bindings;
pub use bindings::{BindingError, Bindings, Namespace, Value};

pub mod command;
pub use command::{invoke, run_external, Command, CommandError, CommandRegistry};

pub mod context;
pub use context::{CancelToken, Context};

pub mod sweep;
pub use sweep::{
    per, per_ddid, per_ms, pper, sweep, JobFailure, JobReport, SweepConfig, SweepConfigBuilder,
    SweepError, SweepMode, SweepReport,
};

pub mod safelist;
pub use safelist::{Safelist, SafelistError};

pub mod error;
pub use error::{CLIError, PyxisError};

#[cfg(feature = "cli")]
pub mod cli;

#[cfg(test)]
mod test_common;
