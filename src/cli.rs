//! Command Line Interface helpers for Pyxis

use crate::{
    bindings::{Bindings, Value, LIST_SUFFIX},
    command::{Command, CommandError},
    context::Context,
    error::{CLIError::InvalidCommandLineArgument, PyxisError, PyxisError::DryRun},
    safelist::Safelist,
    sweep::{sweep, SweepConfig, SweepMode, SweepReport},
};
use clap::{arg, command, ErrorKind::ArgumentNotFound, ValueHint::FilePath};
use itertools::Itertools;
use log::{debug, info, trace, warn};
use prettytable::{format as prettyformat, row, table, Table};
use serde::{Deserialize, Serialize};
use std::{
    ffi::OsString,
    fmt::{Debug, Display},
    time::Duration,
};

/// What `--record` appends to the safelist for each processed value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepRecord {
    /// The swept variable
    pub var: String,
    /// The value that was processed
    pub value: Value,
    /// The worker that processed it, if the sweep ran in parallel
    pub job: Option<usize>,
    /// The process that ran the sweep
    pub pid: u32,
}

/// A sweep, as described by the command line.
pub struct PyxisContext {
    /// Bindings, configuration and named commands for the sweep
    pub ctx: Context,
    /// The variable to sweep over
    pub var: String,
    /// Commands to run for each value
    pub commands: Vec<Command>,
    /// Whether to fan out over parallel workers
    pub parallel: bool,
    /// Where to record processed values
    pub record: Option<Safelist>,
}

// Add build-time information from the "built" crate.
include!(concat!(env!("OUT_DIR"), "/built.rs"));

/// Write many info-level log lines of how this executable was compiled.
///
/// # Errors
///
/// propagates writeln! fails
pub fn fmt_build_info(f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match (GIT_HEAD_REF, GIT_COMMIT_HASH) {
        (Some(hr), Some(hash)) => {
            let dirty = GIT_DIRTY.unwrap_or(false);
            writeln!(
                f,
                "Compiled on git commit hash: {}{}",
                hash,
                if dirty { " (dirty)" } else { "" }
            )?;
            writeln!(f, "            git head ref: {}", hr)?;
        }
        _ => writeln!(f, "Compiled on git commit hash: <no git info>")?,
    }
    writeln!(f, "            {}", BUILT_TIME_UTC)?;
    writeln!(f, "         with compiler {}", RUSTC_VERSION)?;
    writeln!(f)?;
    Ok(())
}

impl Display for PyxisContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "{} version {}",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION"),
        )?;

        fmt_build_info(f)?;

        let domain = match self.ctx.bindings.get_list(&self.var) {
            Ok(Some(list)) => list.to_string(),
            Ok(None) => "<unset>".into(),
            Err(e) => format!("<{e}>"),
        };
        writeln!(f, "Sweep variable:       {}", self.var)?;
        writeln!(f, "Sweep domain:         {}{}={}", self.var, LIST_SUFFIX, domain)?;
        writeln!(
            f,
            "Commands:             {}",
            self.commands.iter().map(Command::name).join(", ")
        )?;
        writeln!(
            f,
            "{} fan out over parallel workers.",
            if self.parallel { "Will" } else { "Will not" }
        )?;
        write!(f, "{}", self.ctx.config)?;
        match &self.record {
            Some(list) => writeln!(f, "Will record processed values to {}", list.path().display())?,
            None => writeln!(f, "Will not record processed values.")?,
        }
        write!(f, "{}", self.ctx.bindings)?;
        Ok(())
    }
}

/// A command that appends the current value of `var` to `list`.
fn record_command(var: &str, list: &Safelist) -> Command {
    let var = var.to_string();
    let list = list.clone();
    Command::call("record", move |ctx| {
        let value = ctx
            .bindings
            .get(&var)?
            .cloned()
            .ok_or_else(|| CommandError::msg(format!("{var} is unbound")))?;
        list.add(&SweepRecord {
            var: var.clone(),
            value,
            job: ctx.job(),
            pid: std::process::id(),
        })?;
        Ok(())
    })
}

impl PyxisContext {
    fn get_matches<I, T>(args: I) -> Result<clap::ArgMatches, PyxisError>
    where
        I: IntoIterator<Item = T> + Debug,
        T: Into<OsString> + Clone,
    {
        let mut app = command!()
            .arg_required_else_help(true)
            .next_line_help(false)
            .about("Run commands once for each value of a variable's list, \
                    serially or over parallel workers.")
            .args(&[
                arg!(<VAR> "Variable to sweep over, e.g. MS or ms.DDID. Values come from <VAR>_List")
                    .help_heading("SWEEP"),
                arg!([COMMANDS] ... "Commands to run for each value. Each is a command line, \
                    run with the top-level variables in its environment")
                    .help_heading("SWEEP"),
                arg!(-D --define <DEFINITION> "Define a variable, as NAME=VALUE")
                    .multiple_occurrences(true)
                    .help_heading("SWEEP")
                    .required(false),
                arg!(-L --list <VALUES> "Comma-separated values to sweep over, sets <VAR>_List")
                    .help_heading("SWEEP")
                    .required(false),
                arg!(--persist "Keep going past failed values, reporting them all at the end")
                    .help_heading("SWEEP"),

                // parallel options
                arg!(-p --parallel "Fan out over parallel workers")
                    .help_heading("PARALLEL"),
                arg!(-j --jobs <COUNT> "Maximum number of parallel workers [default: $JOBS or 1]")
                    .help_heading("PARALLEL")
                    .required(false),
                arg!(--"job-stagger" <SECONDS> "Delay between starting workers [default: $JOB_STAGGER or 0]")
                    .help_heading("PARALLEL")
                    .required(false),

                // output options
                arg!(--record <PATH> "Append each processed value to the safelist at <PATH>")
                    .value_hint(FilePath)
                    .help_heading("OUTPUT")
                    .required(false),
                arg!(--"dry-run" "Just print the summary and exit"),
                arg!(--"no-draw-progress" "do not show progress bars"),
            ]);
        let matches = app.try_get_matches_from_mut(args)?;
        Ok(matches)
    }

    fn parse_bindings(matches: &clap::ArgMatches, var: &str) -> Result<Bindings, PyxisError> {
        let mut bindings = Bindings::new();
        if let Some(definitions) = matches.values_of("define") {
            for definition in definitions {
                bindings.define(definition)?;
            }
        }
        if let Some(list) = matches.value_of("list") {
            bindings.define(&format!("{var}{LIST_SUFFIX}={list}"))?;
        }
        Ok(bindings)
    }

    fn parse_config_matches(
        matches: &clap::ArgMatches,
        bindings: &Bindings,
    ) -> Result<SweepConfig, PyxisError> {
        let mut config = SweepConfig::from_bindings(bindings);
        match matches.value_of_t::<usize>("jobs") {
            Ok(jobs) => config.jobs = jobs,
            Err(err) => match err.kind() {
                ArgumentNotFound { .. } => {}
                _ => return Err(err.into()),
            },
        }
        match matches.value_of_t::<f64>("job-stagger") {
            Ok(secs) if secs.is_finite() && secs >= 0.0 => {
                config.job_stagger = Duration::from_secs_f64(secs);
            }
            Ok(secs) => {
                return Err(PyxisError::CLIError(InvalidCommandLineArgument {
                    option: "--job-stagger <SECONDS>".into(),
                    expected: "a non-negative number of seconds".into(),
                    received: format!("{secs}"),
                }))
            }
            Err(err) => match err.kind() {
                ArgumentNotFound { .. } => {}
                _ => return Err(err.into()),
            },
        }
        if matches.is_present("persist") {
            config.persist = true;
        }
        config.draw_progress = !matches.is_present("no-draw-progress");
        Ok(config)
    }

    /// Parse an iterator of arguments, `args` into a `PyxisContext`.
    ///
    /// # Errors
    ///
    /// Can raise:
    /// - `clap::Error` if clap cannot parse `args`
    /// - `BindingError` if a definition is malformed
    /// - `PyxisError::CLIError` if the arguments are invalid.
    /// - `PyxisError::DryRun` if `--dry-run` was given.
    pub fn from_args<I, T>(args: I) -> Result<Self, PyxisError>
    where
        I: IntoIterator<Item = T> + Debug,
        T: Into<OsString> + Clone,
    {
        debug!("args:\n{:?}", &args);

        let matches = Self::get_matches(args)?;
        trace!("arg matches:\n{:?}", &matches);

        let var: String = match matches.value_of_t("VAR") {
            Ok(var) => var,
            _ => unreachable!("<VAR> is required, enforced by clap"),
        };
        let bindings = Self::parse_bindings(&matches, &var)?;
        let config = Self::parse_config_matches(&matches, &bindings)?;
        let parallel = matches.is_present("parallel");
        if !parallel && config.jobs > 1 && matches.is_present("jobs") {
            warn!("--jobs has no effect without --parallel");
        }

        let mut commands: Vec<Command> = matches
            .values_of("COMMANDS")
            .map(|tokens| tokens.map(Command::from).collect())
            .unwrap_or_default();
        if commands.is_empty() {
            warn!("no commands given, the sweep will only set {}", var);
        }
        let record = matches.value_of("record").map(Safelist::attach);
        if let Some(list) = &record {
            commands.push(record_command(&var, list));
        }

        let result = Self {
            ctx: Context::new(bindings, config),
            var,
            commands,
            parallel,
            record,
        };

        info!("{}", &result);

        if matches.is_present("dry-run") {
            return Err(DryRun {});
        }

        Ok(result)
    }

    /// Run the sweep.
    ///
    /// # Errors
    ///
    /// see [`crate::sweep::sweep`]
    pub fn run(mut self) -> Result<SweepReport, PyxisError> {
        let report = sweep(&mut self.ctx, &self.var, self.parallel, &self.commands)?;
        Ok(report)
    }
}

/// A table of what each worker of a finished sweep processed.
pub fn report_table(report: &SweepReport) -> Table {
    let mut report_table = table!(["job", "items", "values"]);
    report_table.set_format(*prettyformat::consts::FORMAT_CLEAN);
    match report.mode {
        SweepMode::Parallel { .. } => {
            for job in &report.jobs {
                report_table.add_row(row![
                    format!("#{}", job.job),
                    job.values.len(),
                    job.values.iter().join(",")
                ]);
            }
        }
        SweepMode::Serial | SweepMode::Empty => {
            report_table.add_row(row![
                "-",
                report.processed.len(),
                report.processed.iter().join(",")
            ]);
        }
    }
    report_table
}
