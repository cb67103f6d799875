use clap::ErrorKind::{DisplayHelp, DisplayVersion};
use lazy_static::lazy_static;
use log::{error, info, trace, warn};
use pyxis::{
    cli::{report_table, PyxisContext},
    CancelToken,
    PyxisError::{ClapError, DryRun},
    SweepError,
};
use std::{env, ffi::OsString, fmt::Debug};

lazy_static! {
    /// Cancelled on Ctrl+C or SIGTERM. Sweeps forward it to their workers.
    static ref INTERRUPT: CancelToken = CancelToken::new();
}

fn main_with_args<I, T>(args: I) -> i32
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
    I: Debug,
{
    let mut pyxis_ctx = match PyxisContext::from_args(args) {
        Ok(pyxis_ctx) => pyxis_ctx,
        Err(DryRun {}) => {
            info!("Dry run. No commands will be run.");
            return 0;
        }
        Err(ClapError(inner)) => {
            // Swallow broken pipe errors
            trace!("clap error: {:?}", inner.kind());
            let _ = inner.print();
            match inner.kind() {
                DisplayHelp | DisplayVersion => return 0,
                _ => return 1,
            }
        }
        Err(e) => {
            eprintln!("error parsing args: {e}");
            return 1;
        }
    };

    pyxis_ctx.ctx.set_cancel_token(INTERRUPT.clone());

    match pyxis_ctx.run() {
        Ok(report) => {
            info!("sweep summary:\n{}", report_table(&report));
            0
        }
        Err(pyxis::PyxisError::Sweep(e @ SweepError::Interrupted { .. })) => {
            eprintln!("interrupted: {e}");
            1
        }
        Err(pyxis::PyxisError::Sweep(e)) => {
            if let SweepError::JobsFailed { failures, .. } = &e {
                for (job, failure) in failures {
                    error!("job #{}: {}", job, failure);
                }
            }
            eprintln!("sweep error: {e}");
            1
        }
        Err(e) => {
            eprintln!("error: {e}");
            1
        }
    }
}

fn main() {
    env_logger::init_from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
    );
    trace!("start main");
    if let Err(e) = ctrlc::set_handler(|| {
        warn!("interrupted, stopping jobs");
        INTERRUPT.cancel();
    }) {
        warn!("couldn't install interrupt handler: {}", e);
    }
    let retcode = main_with_args(env::args());
    trace!("end main");
    std::process::exit(retcode);
}
