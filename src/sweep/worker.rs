//! The worker pool behind parallel sweeps.
//!
//! The whole domain goes into a queue before any worker starts. Each worker
//! runs on its own thread against a forked copy of the invoking context and
//! pulls values until the queue is empty, so items are handed out
//! dynamically and each is processed exactly once.

use super::{progress_bar, run_item, JobFailure, JobReport, SweepError};
use crate::{
    bindings::Value,
    command::Command,
    context::{CancelToken, Context},
    sweep::ItemFailure,
};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use itertools::Itertools;
use log::{debug, error, info, trace, warn};
use std::{
    any::Any,
    collections::BTreeMap,
    panic::{self, AssertUnwindSafe},
    thread,
    time::{Duration, Instant},
};

/// How long the parent waits for worker events before checking for cancellation.
const REAP_INTERVAL: Duration = Duration::from_millis(50);

/// Sent from workers to the parent.
enum Event {
    /// An item was attempted
    Processed,
    /// A worker is done, one way or another
    Finished {
        job: usize,
        outcome: Result<Vec<Value>, JobFailure>,
    },
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "panicked".to_string()
    }
}

/// Wait out `delay` between worker starts, returning early if `ctx` is cancelled.
fn stagger(ctx: &Context, delay: Duration) {
    let deadline = Instant::now() + delay;
    while !ctx.is_cancelled() {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        thread::sleep(remaining.min(REAP_INTERVAL));
    }
}

/// Share `items` between up to `ctx.config.jobs` workers.
///
/// The parent stays in this function until every worker it started has
/// finished. If the parent context is cancelled, the cancellation is
/// forwarded to every live worker and the parent waits for them to wind down.
pub(super) fn run_parallel(
    ctx: &Context,
    name: &str,
    items: Vec<Value>,
    commands: &[Command],
) -> Result<Vec<JobReport>, SweepError> {
    let config = &ctx.config;
    let num_items = items.len();
    let num_jobs = config.jobs.min(num_items);

    let (tx_item, rx_item) = unbounded();
    for item in items {
        // can't fail, rx_item lives until the end of this function
        let _ = tx_item.send(item);
    }
    drop(tx_item);

    info!(
        "splitting into {} jobs by {}, staggered by {:?}",
        num_jobs, name, config.job_stagger
    );
    let progress = progress_bar(config.draw_progress, num_items, format!("pper {name}"));
    let (tx_event, rx_event) = unbounded();

    thread::scope(|scope| {
        let mut live: BTreeMap<usize, CancelToken> = BTreeMap::new();
        let mut spawn_error = None;

        for job in 0..num_jobs {
            if job > 0 {
                stagger(ctx, config.job_stagger);
            }
            if ctx.is_cancelled() {
                warn!("interrupted while starting jobs, {} of {} started", job, num_jobs);
                break;
            }
            let (worker_ctx, cancel) = ctx.fork(job);
            let rx_item = rx_item.clone();
            let tx_event = tx_event.clone();
            let spawned = thread::Builder::new()
                .name(format!("job{job}"))
                .spawn_scoped(scope, move || {
                    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                        run_job(worker_ctx, name, commands, &rx_item, &tx_event)
                    }))
                    .unwrap_or_else(|payload| Err(JobFailure::Crashed(panic_message(&*payload))));
                    // the parent holds the receiver until every started job has reported.
                    let _ = tx_event.send(Event::Finished { job, outcome });
                });
            match spawned {
                Ok(_) => {
                    debug!("launched job #{}", job);
                    live.insert(job, cancel);
                }
                Err(source) => {
                    error!("couldn't start job #{}: {}", job, source);
                    spawn_error = Some(SweepError::Spawn { job, source });
                    break;
                }
            }
        }
        drop(tx_event);
        let num_started = live.len();

        let mut reports = vec![];
        let mut failures = vec![];
        let mut stopping = false;
        while !live.is_empty() {
            if !stopping && (ctx.is_cancelled() || spawn_error.is_some()) {
                error!("stopping, waiting for {} jobs to exit", live.len());
                live.values().for_each(CancelToken::cancel);
                stopping = true;
            }
            match rx_event.recv_timeout(REAP_INTERVAL) {
                Ok(Event::Processed) => progress.inc(1),
                Ok(Event::Finished { job, outcome }) => {
                    live.remove(&job);
                    match outcome {
                        Ok(values) => {
                            info!(
                                "job #{} finished, waiting for {} more jobs to complete",
                                job,
                                live.len()
                            );
                            reports.push(JobReport { job, values });
                        }
                        Err(failure) => {
                            error!(
                                "job #{} {}, waiting for {} more jobs to complete",
                                job,
                                failure,
                                live.len()
                            );
                            failures.push((job, failure));
                        }
                    }
                }
                Err(RecvTimeoutError::Timeout) => (),
                Err(RecvTimeoutError::Disconnected) => {
                    // every started job reports before dropping its sender
                    for job in std::mem::take(&mut live).into_keys() {
                        failures.push((job, JobFailure::Crashed("exited without reporting".into())));
                    }
                }
            }
        }
        progress.finish();

        if let Some(e) = spawn_error {
            return Err(e);
        }
        if ctx.is_cancelled() {
            return Err(SweepError::Interrupted { name: name.into() });
        }
        if !failures.is_empty() {
            failures.sort_by_key(|(job, _)| *job);
            error!("{} of {} jobs have failed", failures.len(), num_started);
            return Err(SweepError::JobsFailed {
                name: name.into(),
                num_jobs: num_started,
                failures,
            });
        }
        info!("all {} jobs finished ok", num_started);
        reports.sort_by_key(|report| report.job);
        Ok(reports)
    })
}

/// The body of one worker: pull values until the queue is empty.
fn run_job(
    ctx: Context,
    name: &str,
    commands: &[Command],
    rx_item: &Receiver<Value>,
    tx_event: &Sender<Event>,
) -> Result<Vec<Value>, JobFailure> {
    let job = ctx.job().unwrap_or_default();
    let persist = ctx.config.persist;
    trace!("started job #{}", job);

    let saved = ctx.bindings.get(name).ok().flatten().cloned();
    let restore_name = name.to_string();
    let mut ctx = scopeguard::guard(ctx, move |mut ctx| {
        if let Err(e) = ctx.bindings.restore(&restore_name, saved) {
            warn!("job #{}: couldn't restore {}: {}", job, restore_name, e);
        }
    });

    let mut succeeded = vec![];
    let mut failures = vec![];
    loop {
        if ctx.is_cancelled() {
            error!("job #{}: interrupted", job);
            return Err(JobFailure::Interrupted(None));
        }
        let value = match rx_item.try_recv() {
            Ok(value) => value,
            Err(_) => break,
        };
        match run_item(&mut ctx, name, &value, commands) {
            Ok(()) => succeeded.push(value),
            Err(e) if e.is_interrupt() => {
                error!("job #{}: interrupted at {}={}", job, name, value);
                return Err(JobFailure::Interrupted(Some(value)));
            }
            Err(e) if persist => {
                warn!("job #{}: exception raised for {}={}: {}", job, name, value, e);
                failures.push(ItemFailure {
                    value,
                    message: e.to_string(),
                });
            }
            Err(e) => {
                error!("job #{}: exception raised for {}={}: {}", job, name, value, e);
                return Err(JobFailure::Item(ItemFailure {
                    value,
                    message: e.to_string(),
                }));
            }
        }
        let _ = tx_event.send(Event::Processed);
    }

    if !succeeded.is_empty() {
        info!(
            "job #{}: per-loop succeeded for {}",
            job,
            succeeded.iter().join(", ")
        );
    }
    if !failures.is_empty() {
        error!(
            "job #{}: per-loop failed for {}",
            job,
            failures.iter().map(|f| &f.value).join(", ")
        );
        return Err(JobFailure::Items(failures));
    }
    debug!("job #{} exiting normally", job);
    Ok(succeeded)
}

#[cfg(test)]
mod tests {
    use crate::{
        bindings::{Bindings, Value},
        command::{Command, CommandError},
        sweep::{per, pper, JobFailure, SweepError, SweepMode},
        test_common::{fail_on, get_context, recorder},
    };
    use std::{
        collections::BTreeSet,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc, Mutex,
        },
        thread,
        time::{Duration, Instant},
    };

    #[test]
    fn test_each_item_processed_once() {
        let mut ctx = get_context(3, false);
        ctx.bindings.assign_list("X", (1..=10).collect::<Vec<i64>>()).unwrap();
        let (record, seen) = recorder("X");

        let report = pper(&mut ctx, "X", &[record]).unwrap();

        assert_eq!(report.mode, SweepMode::Parallel { num_jobs: 3 });
        assert_eq!(report.jobs.len(), 3);
        let mut seen = seen.lock().unwrap().clone();
        seen.sort();
        let expected: Vec<Value> = (1..=10).map(Value::Int).collect();
        assert_eq!(seen, expected);
        let mut processed = report.processed.clone();
        processed.sort();
        assert_eq!(processed, expected);
        assert_eq!(ctx.bindings.get("X").unwrap(), None);
    }

    #[test]
    fn test_jobs_capped_by_domain() {
        let mut ctx = get_context(8, false);
        ctx.bindings.assign_list("X", vec![1, 2]).unwrap();
        let report = pper(&mut ctx, "X", &[Command::call("noop", |_| Ok(()))]).unwrap();
        assert_eq!(report.mode, SweepMode::Parallel { num_jobs: 2 });
    }

    #[test]
    fn test_workers_have_isolated_bindings() {
        let mut ctx = get_context(4, false);
        ctx.bindings.assign("X", "parent").unwrap();
        ctx.bindings.assign_list("X", vec![1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        // each worker writes its own marker and checks X is still what it was given
        let check = Command::call("check", |ctx| {
            let x = ctx.bindings.get("X")?.cloned();
            ctx.bindings.assign("SCRATCH", x.clone().unwrap_or(Value::Int(-1)))?;
            thread::sleep(Duration::from_millis(5));
            if ctx.bindings.get("X")?.cloned() != x {
                return Err(CommandError::msg("X changed under us"));
            }
            Ok(())
        });

        pper(&mut ctx, "X", &[check]).unwrap();

        assert_eq!(ctx.bindings.get("X").unwrap(), Some(&Value::from("parent")));
        assert_eq!(ctx.bindings.get("SCRATCH").unwrap(), None);
    }

    #[test]
    fn test_strict_worker_failure() {
        let mut ctx = get_context(2, false);
        ctx.bindings.assign_list("X", vec![1, 2, 3, 4]).unwrap();

        let err = pper(&mut ctx, "X", &[fail_on("X", &[3])]).unwrap_err();

        match &err {
            SweepError::JobsFailed {
                num_jobs, failures, ..
            } => {
                assert_eq!(*num_jobs, 2);
                assert_eq!(failures.len(), 1);
                assert!(matches!(failures[0].1, JobFailure::Item(_)));
            }
            e => panic!("expected JobsFailed, got {e}"),
        }
        assert_eq!(err.failed_values(), vec![Value::Int(3)]);
        let job = err.failed_jobs()[0];
        assert_eq!(err.to_string(), format!("1 of 2 jobs have failed (#{job})"));
        assert_eq!(ctx.bindings.get("X").unwrap(), None);
    }

    #[test]
    fn test_persistent_workers_attempt_everything() {
        let mut ctx = get_context(3, true);
        ctx.bindings.assign_list("X", (1..=9).collect::<Vec<i64>>()).unwrap();
        let (record, seen) = recorder("X");

        let err = pper(&mut ctx, "X", &[record, fail_on("X", &[2, 5, 8])]).unwrap_err();

        assert_eq!(seen.lock().unwrap().len(), 9);
        let mut failed = err.failed_values();
        failed.sort();
        assert_eq!(failed, vec![Value::Int(2), Value::Int(5), Value::Int(8)]);
        let jobs = err.failed_jobs();
        assert!(!jobs.is_empty() && jobs.len() <= 3);
        assert!(jobs.windows(2).all(|w| w[0] < w[1]));
        let indices = jobs.iter().map(|j| j.to_string()).collect::<Vec<_>>().join(", #");
        assert_eq!(
            err.to_string(),
            format!("{} of 3 jobs have failed (#{indices})", jobs.len())
        );
    }

    #[test]
    fn test_crashed_worker_is_a_failure() {
        let mut ctx = get_context(2, false);
        ctx.bindings.assign_list("X", vec![1, 2, 3]).unwrap();
        let boom = Command::call("boom", |ctx| {
            if ctx.bindings.get("X")? == Some(&Value::Int(2)) {
                panic!("boom");
            }
            Ok(())
        });

        let err = pper(&mut ctx, "X", &[boom]).unwrap_err();

        match err {
            SweepError::JobsFailed { failures, .. } => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].1, JobFailure::Crashed("boom".into()));
            }
            e => panic!("expected JobsFailed, got {e}"),
        }
    }

    #[test]
    fn test_nested_sweeps_run_serially_in_workers() {
        let mut ctx = get_context(2, false);
        ctx.bindings.assign_list("MS", vec!["a.ms", "b.ms"]).unwrap();
        ctx.bindings.assign_list("DDID", vec![0, 1, 2]).unwrap();
        let modes = Arc::new(Mutex::new(vec![]));
        let inner_modes = modes.clone();
        let inner = Command::call("inner", move |ctx| {
            let report = pper(ctx, "DDID", &[Command::call("noop", |_| Ok(()))])?;
            inner_modes.lock().unwrap().push((ctx.job(), report.mode));
            Ok(())
        });

        let report = pper(&mut ctx, "MS", &[inner]).unwrap();

        assert_eq!(report.mode, SweepMode::Parallel { num_jobs: 2 });
        let modes = modes.lock().unwrap();
        assert_eq!(modes.len(), 2);
        assert!(modes
            .iter()
            .all(|(job, mode)| job.is_some() && *mode == SweepMode::Serial));
    }

    #[test]
    fn test_worker_survives_failed_restore() {
        let mut ctx = get_context(2, false);
        ctx.bindings.define("ms.DDID=7").unwrap();
        ctx.bindings.define("ms.DDID_List=0,1").unwrap();
        let started = Arc::new(AtomicUsize::new(0));
        // the last item to start wipes its worker's bindings, so the worker
        // can no longer resolve ms.DDID when it restores it
        let wipe = Command::call("wipe", move |ctx| {
            if started.fetch_add(1, Ordering::SeqCst) == 1 {
                ctx.bindings = Bindings::new();
            }
            Ok(())
        });

        let report = pper(&mut ctx, "ms.DDID", &[wipe]).unwrap();

        assert_eq!(report.processed.len(), 2);
        assert_eq!(ctx.bindings.get("ms.DDID").unwrap(), Some(&Value::Int(7)));
    }

    #[test]
    fn test_job_stagger() {
        let mut ctx = get_context(3, false);
        ctx.config.job_stagger = Duration::from_millis(100);
        ctx.bindings.assign_list("X", vec![1, 2, 3]).unwrap();
        let starts = Arc::new(Mutex::new(BTreeSet::new()));
        let job_starts = starts.clone();
        let slow = Command::call("slow", move |ctx| {
            job_starts.lock().unwrap().insert(ctx.job());
            thread::sleep(Duration::from_millis(300));
            Ok(())
        });

        let start = Instant::now();
        let report = pper(&mut ctx, "X", &[slow]).unwrap();

        // two stagger delays before the last job starts
        assert!(start.elapsed() >= Duration::from_millis(200));
        assert_eq!(report.mode, SweepMode::Parallel { num_jobs: 3 });
        assert_eq!(starts.lock().unwrap().len(), 3);
    }

    #[cfg(unix)]
    #[test]
    fn test_interrupt_reaches_workers() {
        let mut ctx = get_context(2, false);
        ctx.bindings.assign("X", "before").unwrap();
        ctx.bindings.assign_list("X", vec![1, 2, 3, 4]).unwrap();
        let token = ctx.cancel_token();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(200));
            token.cancel();
        });

        let start = Instant::now();
        let result = pper(&mut ctx, "X", &[Command::from("sleep 30")]);
        canceller.join().unwrap();

        assert!(matches!(result, Err(SweepError::Interrupted { .. })));
        assert!(start.elapsed() < Duration::from_secs(10));
        assert_eq!(ctx.bindings.get("X").unwrap(), Some(&Value::from("before")));
    }

    #[test]
    fn test_interrupt_during_stagger() {
        let mut ctx = get_context(3, false);
        ctx.config.job_stagger = Duration::from_secs(30);
        ctx.bindings.assign_list("X", vec![1, 2, 3]).unwrap();
        let wait = Command::call("wait", |ctx| {
            while !ctx.is_cancelled() {
                thread::sleep(Duration::from_millis(10));
            }
            Err(CommandError::Interrupted {
                command: "wait".into(),
            })
        });
        let token = ctx.cancel_token();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(200));
            token.cancel();
        });

        let start = Instant::now();
        let result = pper(&mut ctx, "X", &[wait]);
        canceller.join().unwrap();

        assert!(matches!(result, Err(SweepError::Interrupted { .. })));
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_interrupt_before_start() {
        let mut ctx = get_context(2, false);
        ctx.bindings.assign_list("X", vec![1, 2]).unwrap();
        let (record, seen) = recorder("X");
        ctx.cancel_token().cancel();

        assert!(matches!(
            pper(&mut ctx, "X", &[record.clone()]),
            Err(SweepError::Interrupted { .. })
        ));
        assert!(matches!(
            per(&mut ctx, "X", &[record]),
            Err(SweepError::Interrupted { .. })
        ));
        assert!(seen.lock().unwrap().is_empty());
    }
}
