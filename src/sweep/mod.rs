//! Parameter sweeps: run commands once per value of a variable's list.
//!
//! A sweep over `NAME` takes its domain from `NAME_List`, binds `NAME` to each
//! value in turn and invokes the commands. [`per`] does this in order, in the
//! calling context. [`pper`] fans the values out over up to
//! [`SweepConfig::jobs`] workers, each with its own copy of the bindings,
//! pulling values from a shared queue.
//!
//! Whatever happens, `NAME` is bound to its pre-sweep value (or left unbound,
//! if it was) when the sweep returns.
//!
//! In strict mode, the first failed item stops the sweep. In persistent mode
//! ([`SweepConfig::persist`]) every item is attempted and the failures are
//! reported together at the end.
//!
//! There is no timeout: a command that never finishes holds up the sweep.

mod config;
pub mod error;
mod worker;

pub use config::{
    SweepConfig, SweepConfigBuilder, SweepConfigBuilderError, JOBS_VAR, JOB_STAGGER_VAR,
    PERSIST_VAR,
};
pub use error::{ItemFailure, JobFailure, SweepError};

use crate::{
    bindings::{Value, LIST_SUFFIX},
    command::{describe, invoke, Command, CommandError},
    context::Context,
};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use itertools::Itertools;
use log::{debug, info, trace, warn};

/// The variable swept by [`per_ms`].
pub const MS_VAR: &str = "MS";
/// The variable swept by [`per_ddid`].
pub const DDID_VAR: &str = "ms.DDID";

/// How a sweep was carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepMode {
    /// The domain was unbound or empty, so nothing ran.
    Empty,
    /// Items ran one after the other in the calling context.
    Serial,
    /// Items were shared between this many workers.
    Parallel {
        /// Number of workers started
        num_jobs: usize,
    },
}

/// The values one worker of a parallel sweep processed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobReport {
    /// The worker index
    pub job: usize,
    /// The values it processed, in the order it processed them
    pub values: Vec<Value>,
}

/// What a successful sweep did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepReport {
    /// The swept variable
    pub name: String,
    /// How the sweep ran
    pub mode: SweepMode,
    /// The processed values. In sweep order for serial sweeps, grouped by
    /// worker for parallel sweeps.
    pub processed: Vec<Value>,
    /// Per-worker breakdown, for parallel sweeps
    pub jobs: Vec<JobReport>,
}

/// Sweep over `name` in order, in the calling context.
///
/// # Examples
///
/// ```rust
/// use pyxis::{per, Command, Context, Value};
///
/// let mut ctx = Context::default();
/// ctx.bindings.assign_list("MS", vec!["a.ms", "b.ms"]).unwrap();
/// let report = per(&mut ctx, "MS", &[Command::call("noop", |_| Ok(()))]).unwrap();
/// assert_eq!(report.processed, vec![Value::from("a.ms"), Value::from("b.ms")]);
/// // MS was unbound before the sweep, and is unbound again after it
/// assert_eq!(ctx.bindings.get("MS").unwrap(), None);
/// ```
///
/// # Errors
///
/// see [`sweep`]
pub fn per(ctx: &mut Context, name: &str, commands: &[Command]) -> Result<SweepReport, SweepError> {
    sweep(ctx, name, false, commands)
}

/// Sweep over `name`, fanning out over parallel workers where possible.
///
/// # Errors
///
/// see [`sweep`]
pub fn pper(
    ctx: &mut Context,
    name: &str,
    commands: &[Command],
) -> Result<SweepReport, SweepError> {
    sweep(ctx, name, true, commands)
}

/// Sweep over `MS` in parallel.
///
/// # Errors
///
/// see [`sweep`]
pub fn per_ms(ctx: &mut Context, commands: &[Command]) -> Result<SweepReport, SweepError> {
    sweep(ctx, MS_VAR, true, commands)
}

/// Sweep over `ms.DDID` in order.
///
/// # Errors
///
/// see [`sweep`]
pub fn per_ddid(ctx: &mut Context, commands: &[Command]) -> Result<SweepReport, SweepError> {
    sweep(ctx, DDID_VAR, false, commands)
}

/// Turn the value of a `_List` binding into the items to sweep over.
fn snapshot_domain(name: &str, list: &Value) -> Result<Vec<Value>, SweepError> {
    match list {
        Value::List(values) => {
            if values.iter().all(Value::is_scalar) {
                Ok(values.clone())
            } else {
                Err(SweepError::InvalidDomain {
                    name: name.into(),
                    kind: "nested list",
                })
            }
        }
        Value::Str(s) if s.is_empty() => Ok(vec![]),
        Value::Str(s) => Ok(s.split(',').map(Value::parse).collect()),
        Value::Int(_) => Err(SweepError::InvalidDomain {
            name: name.into(),
            kind: list.kind(),
        }),
    }
}

/// `job #N: ` inside a worker, nothing otherwise.
fn job_prefix(ctx: &Context) -> String {
    ctx.job()
        .map(|job| format!("job #{job}: "))
        .unwrap_or_default()
}

fn progress_bar(draw_progress: bool, len: usize, message: String) -> ProgressBar {
    let draw_target = if draw_progress {
        ProgressDrawTarget::stderr()
    } else {
        ProgressDrawTarget::hidden()
    };
    let progress = ProgressBar::with_draw_target(Some(len as u64), draw_target);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{msg:16}: [{elapsed_precise}] [{wide_bar:.cyan/blue}] {percent:3}% ({eta:5})")
    {
        progress.set_style(style.progress_chars("=> "));
    }
    progress.set_message(message);
    progress
}

/// Bind `name` to `value` and invoke the commands.
fn run_item(
    ctx: &mut Context,
    name: &str,
    value: &Value,
    commands: &[Command],
) -> Result<(), CommandError> {
    info!("{}per-loop, setting {}={}", job_prefix(ctx), name, value);
    ctx.bindings.assign(name, value.clone())?;
    invoke(ctx, commands)
}

/// Run a sweep over `name`, in parallel if `parallel` is set and the
/// configuration, the domain size and the context allow it.
///
/// Parallel sweeps only happen from the invoking context: a sweep started by
/// a command running inside a worker always runs serially.
///
/// # Errors
///
/// - [`SweepError::Binding`] if `name` can't be resolved
/// - [`SweepError::InvalidDomain`] if `name_List` isn't a usable domain
/// - [`SweepError::ItemFailed`] if an item fails in strict mode
/// - [`SweepError::ItemsFailed`] if items fail in persistent mode
/// - [`SweepError::JobsFailed`] if any parallel worker fails
/// - [`SweepError::Interrupted`] if the context is cancelled
/// - [`SweepError::Spawn`] if a worker thread can't be started
pub fn sweep(
    ctx: &mut Context,
    name: &str,
    parallel: bool,
    commands: &[Command],
) -> Result<SweepReport, SweepError> {
    trace!("start sweep({}, parallel={})", name, parallel);
    let cmdlist = describe(commands);

    let (namespace, leaf) = ctx.bindings.resolve(name)?;
    let saved = namespace.get(leaf).cloned();
    let items = match ctx.bindings.get_list(name)? {
        Some(list) => snapshot_domain(name, list)?,
        None => vec![],
    };
    if items.is_empty() {
        info!(
            "{}per({},{}): {}{} is empty",
            job_prefix(ctx),
            name,
            cmdlist,
            name,
            LIST_SUFFIX
        );
        return Ok(SweepReport {
            name: name.into(),
            mode: SweepMode::Empty,
            processed: vec![],
            jobs: vec![],
        });
    }

    let config = ctx.config.clone();
    info!(
        "{}per({},{},persist={}): iterating over {}={}",
        job_prefix(ctx),
        name,
        cmdlist,
        u8::from(config.persist),
        name,
        items.iter().join(" ")
    );

    let restore_name = name.to_string();
    let mut ctx = scopeguard::guard(ctx, move |ctx| {
        debug!(
            "{}restoring {}={}",
            job_prefix(ctx),
            restore_name,
            saved
                .as_ref()
                .map_or_else(|| "<unset>".to_string(), ToString::to_string)
        );
        if let Err(e) = ctx.bindings.restore(&restore_name, saved) {
            warn!("couldn't restore {}: {}", restore_name, e);
        }
    });

    let report = if !parallel || config.jobs < 2 || items.len() < 2 || ctx.job().is_some() {
        let processed = run_serial(&mut ctx, name, &items, commands)?;
        SweepReport {
            name: name.into(),
            mode: SweepMode::Serial,
            processed,
            jobs: vec![],
        }
    } else {
        let jobs = worker::run_parallel(&ctx, name, items, commands)?;
        SweepReport {
            name: name.into(),
            mode: SweepMode::Parallel {
                num_jobs: jobs.len(),
            },
            processed: jobs.iter().flat_map(|job| job.values.clone()).collect(),
            jobs,
        }
    };
    trace!("end sweep({})", name);
    Ok(report)
}

fn run_serial(
    ctx: &mut Context,
    name: &str,
    items: &[Value],
    commands: &[Command],
) -> Result<Vec<Value>, SweepError> {
    let persist = ctx.config.persist;
    let progress = progress_bar(
        ctx.config.draw_progress && ctx.job().is_none(),
        items.len(),
        format!("per {name}"),
    );

    let mut processed = Vec::with_capacity(items.len());
    let mut failures = vec![];
    for value in items {
        if ctx.is_cancelled() {
            progress.abandon();
            return Err(SweepError::Interrupted { name: name.into() });
        }
        match run_item(ctx, name, value, commands) {
            Ok(()) => processed.push(value.clone()),
            Err(e) if e.is_interrupt() => {
                progress.abandon();
                return Err(SweepError::Interrupted { name: name.into() });
            }
            Err(e) if persist => {
                warn!(
                    "{}exception raised for {}={}: {}",
                    job_prefix(ctx),
                    name,
                    value,
                    e
                );
                warn!(
                    "{}persistent mode is on (PERSIST=1), so continuing to end of {}{}",
                    job_prefix(ctx),
                    name,
                    LIST_SUFFIX
                );
                failures.push(ItemFailure {
                    value: value.clone(),
                    message: e.to_string(),
                });
            }
            Err(source) => {
                progress.abandon();
                return Err(SweepError::ItemFailed {
                    name: name.into(),
                    value: value.clone(),
                    source,
                });
            }
        }
        progress.inc(1);
    }
    progress.finish();

    if failures.is_empty() {
        Ok(processed)
    } else {
        Err(SweepError::ItemsFailed {
            name: name.into(),
            failures,
        })
    }
}
