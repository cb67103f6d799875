//! Sweep configuration.

use crate::bindings::{Bindings, Value};
use derive_builder::Builder;
use log::warn;
use std::{
    fmt::{self, Display},
    time::Duration,
};

/// Binding that holds the worker count.
pub const JOBS_VAR: &str = "JOBS";
/// Binding that holds the delay, in seconds, between starting workers.
pub const JOB_STAGGER_VAR: &str = "JOB_STAGGER";
/// Binding that turns on persistent mode.
pub const PERSIST_VAR: &str = "PERSIST";

/// Options that control how sweeps fan out and handle failures.
#[derive(Builder, Debug, Clone, PartialEq, Eq)]
pub struct SweepConfig {
    /// Maximum number of parallel workers. Fewer than 2 disables fan-out.
    #[builder(default = "1")]
    pub jobs: usize,
    /// Delay between starting consecutive workers
    #[builder(default)]
    pub job_stagger: Duration,
    /// Whether to keep going past failed items, reporting them all at the end
    #[builder(default = "false")]
    pub persist: bool,
    /// Whether to draw progress bars
    #[builder(default = "false")]
    pub draw_progress: bool,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            jobs: 1,
            job_stagger: Duration::ZERO,
            persist: false,
            draw_progress: false,
        }
    }
}

/// Interpret a binding as a boolean: non-zero integers and non-empty strings
/// other than `0`, `false` and `no` (in any case) are true.
fn is_true(value: &Value) -> bool {
    match value {
        Value::Int(i) => *i != 0,
        Value::Str(s) => !matches!(
            s.trim().to_ascii_lowercase().as_str(),
            "" | "0" | "false" | "no"
        ),
        Value::List(values) => !values.is_empty(),
    }
}

impl SweepConfig {
    /// Read `JOBS`, `JOB_STAGGER` and `PERSIST` from the top level of
    /// `bindings`, using defaults for anything unbound. Unusable values are
    /// logged and ignored.
    pub fn from_bindings(bindings: &Bindings) -> Self {
        let mut config = Self::default();
        let root = bindings.root();
        match root.get(JOBS_VAR) {
            Some(Value::Int(jobs)) if *jobs >= 0 => config.jobs = *jobs as usize,
            Some(other) => warn!("ignoring {}={}, expected a count", JOBS_VAR, other),
            None => (),
        }
        match root.get(JOB_STAGGER_VAR) {
            Some(Value::Int(secs)) if *secs >= 0 => {
                config.job_stagger = Duration::from_secs(*secs as u64)
            }
            Some(Value::Str(secs)) => match secs.trim().parse::<f64>() {
                Ok(secs) if secs.is_finite() && secs >= 0.0 => {
                    config.job_stagger = Duration::from_secs_f64(secs)
                }
                _ => warn!("ignoring {}={}, expected seconds", JOB_STAGGER_VAR, secs),
            },
            Some(other) => warn!("ignoring {}={}, expected seconds", JOB_STAGGER_VAR, other),
            None => (),
        }
        if let Some(persist) = root.get(PERSIST_VAR) {
            config.persist = is_true(persist);
        }
        config
    }
}

impl Display for SweepConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.jobs < 2 {
            writeln!(f, "Will not run parallel sweeps in parallel.")?;
        } else {
            writeln!(
                f,
                "Will run parallel sweeps with up to {} jobs, staggered by {:?}.",
                self.jobs, self.job_stagger
            )?;
        }
        writeln!(
            f,
            "{} continue past failed items (persistent mode).",
            if self.persist { "Will" } else { "Will not" }
        )?;
        Ok(())
    }
}
