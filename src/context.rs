//! The execution context that sweeps and commands run against.

use crate::{bindings::Bindings, command::CommandRegistry, sweep::SweepConfig};
use crossbeam_utils::atomic::AtomicCell;
use std::sync::Arc;

/// A shareable flag used to request that running work stops.
///
/// Clones share the same flag. Cancellation is sticky: once cancelled, a
/// token stays cancelled until it is [reset](CancelToken::reset).
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicCell<bool>>);

impl CancelToken {
    /// A fresh, uncancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load()
    }

    /// Clear a previous cancellation, for every clone of this token.
    pub fn reset(&self) {
        self.0.store(false);
    }
}

/// Everything a sweep or a command needs: the bindings, the sweep
/// configuration, the named commands, and a cancellation token.
///
/// Sweep workers run against their own clone of the context, so a worker
/// never sees another worker's bindings.
#[derive(Clone, Debug, Default)]
pub struct Context {
    /// Current variable bindings
    pub bindings: Bindings,
    /// Worker count, stagger delay and failure policy
    pub config: SweepConfig,
    /// Commands that string tokens can refer to by name
    pub commands: CommandRegistry,
    cancel: CancelToken,
    job: Option<usize>,
}

impl Context {
    /// A context with the given bindings and configuration, and no named commands.
    pub fn new(bindings: Bindings, config: SweepConfig) -> Self {
        Self {
            bindings,
            config,
            ..Self::default()
        }
    }

    /// A handle that can be used (from any thread) to interrupt sweeps
    /// running against this context.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Interrupt sweeps on this context through `cancel` from now on, e.g. a
    /// token cancelled by a signal handler.
    pub fn set_cancel_token(&mut self, cancel: CancelToken) {
        self.cancel = cancel;
    }

    /// Make an interrupted context usable again. Sweeps started on a
    /// cancelled context are interrupted straight away.
    pub fn reset_cancel(&self) {
        self.cancel.reset();
    }

    /// Whether this context has been asked to stop.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// The index of the sweep worker this context belongs to, or `None` in
    /// the invoking context.
    pub fn job(&self) -> Option<usize> {
        self.job
    }

    /// An independent copy of this context for sweep worker `job`, along with
    /// the token the parent uses to interrupt it.
    pub(crate) fn fork(&self, job: usize) -> (Context, CancelToken) {
        let cancel = CancelToken::new();
        let ctx = Context {
            bindings: self.bindings.clone(),
            config: self.config.clone(),
            commands: self.commands.clone(),
            cancel: cancel.clone(),
            job: Some(job),
        };
        (ctx, cancel)
    }
}
