//! Invoking sequences of commands against a [`Context`].
//!
//! A command is either an in-process callable or a string token. Tokens that
//! name a command in the context's [`CommandRegistry`] run that command;
//! any other token is split with shell quoting rules and run as an external
//! program, with the top-level bindings exported into its environment.

pub mod error;
pub use error::CommandError;

use crate::{context::Context, sweep::SweepError};
use log::{debug, trace};
use std::{
    collections::BTreeMap,
    fmt::{self, Debug},
    process,
    sync::Arc,
    thread,
    time::Duration,
};

/// How often a running external command is checked for completion or cancellation.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// An in-process command.
pub type Callable = Arc<dyn Fn(&mut Context) -> Result<(), CommandError> + Send + Sync>;

/// One step of a sweep.
#[derive(Clone)]
pub enum Command {
    /// Call a function in this process
    Call {
        /// Name used in log messages
        name: String,
        /// The function to call
        func: Callable,
    },
    /// A named command from the registry, or an external command line
    Token(String),
}

impl Command {
    /// An in-process command.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use pyxis::{invoke, Command, Context};
    ///
    /// let mut ctx = Context::default();
    /// let set_flag = Command::call("set_flag", |ctx| {
    ///     ctx.bindings.assign("FLAG", 1)?;
    ///     Ok(())
    /// });
    /// invoke(&mut ctx, &[set_flag]).unwrap();
    /// assert_eq!(ctx.bindings.get("FLAG").unwrap(), Some(&1.into()));
    /// ```
    pub fn call<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&mut Context) -> Result<(), CommandError> + Send + Sync + 'static,
    {
        Self::Call {
            name: name.into(),
            func: Arc::new(func),
        }
    }

    /// A command token.
    pub fn token(token: impl Into<String>) -> Self {
        Self::Token(token.into())
    }

    /// The name of the command, for log messages.
    pub fn name(&self) -> &str {
        match self {
            Self::Call { name, .. } => name,
            Self::Token(token) => token,
        }
    }
}

impl Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Call { name, .. } => f.debug_tuple("Call").field(name).finish(),
            Self::Token(token) => f.debug_tuple("Token").field(token).finish(),
        }
    }
}

impl From<&str> for Command {
    fn from(token: &str) -> Self {
        Self::token(token)
    }
}

impl From<String> for Command {
    fn from(token: String) -> Self {
        Self::Token(token)
    }
}

/// Named in-process commands that tokens can refer to.
#[derive(Clone, Default)]
pub struct CommandRegistry {
    commands: BTreeMap<String, Callable>,
}

impl CommandRegistry {
    /// Register `func` under `name`, replacing any previous command of that name.
    pub fn register<F>(&mut self, name: impl Into<String>, func: F)
    where
        F: Fn(&mut Context) -> Result<(), CommandError> + Send + Sync + 'static,
    {
        self.commands.insert(name.into(), Arc::new(func));
    }

    /// Look up a command by name.
    pub fn get(&self, name: &str) -> Option<Callable> {
        self.commands.get(name).cloned()
    }
}

impl Debug for CommandRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.commands.keys()).finish()
    }
}

/// Comma-separated command names, for log messages.
pub(crate) fn describe(commands: &[Command]) -> String {
    commands.iter().map(Command::name).collect::<Vec<_>>().join(",")
}

/// Run `commands` in order against `ctx`, stopping at the first error.
///
/// Errors are returned exactly as the failing command produced them; there is
/// no retrying here.
///
/// # Errors
///
/// - whatever an in-process command returns
/// - [`CommandError::Interrupted`] if the context is cancelled before or
///   during a command
/// - see [`run_external`] for tokens that run external programs
pub fn invoke(ctx: &mut Context, commands: &[Command]) -> Result<(), CommandError> {
    for command in commands {
        if ctx.is_cancelled() {
            return Err(CommandError::Interrupted {
                command: command.name().to_string(),
            });
        }
        trace!("invoking {}", command.name());
        match command {
            Command::Call { func, .. } => func(ctx)?,
            Command::Token(token) => match ctx.commands.get(token) {
                Some(func) => func(ctx)?,
                None => run_external(ctx, token)?,
            },
        }
    }
    Ok(())
}

/// Run an external command line, waiting for it to exit. The top-level
/// bindings are exported as environment variables. If the context is
/// cancelled while the command runs, the process is killed.
///
/// # Errors
///
/// - [`CommandError::BadQuoting`] or [`CommandError::EmptyCommand`] if the token can't be split
/// - [`CommandError::Spawn`] or [`CommandError::Wait`] on OS errors
/// - [`CommandError::ExitStatus`] if the command exits unsuccessfully
/// - [`CommandError::Interrupted`] if the command was killed due to cancellation
pub fn run_external(ctx: &Context, token: &str) -> Result<(), CommandError> {
    let argv = shlex::split(token).ok_or_else(|| CommandError::BadQuoting {
        token: token.to_string(),
    })?;
    let (program, args) = argv.split_first().ok_or(CommandError::EmptyCommand)?;

    debug!("running {:?}", argv);
    let mut child = process::Command::new(program)
        .args(args)
        .envs(ctx.bindings.exports())
        .spawn()
        .map_err(|source| CommandError::Spawn {
            program: program.clone(),
            source,
        })?;

    loop {
        let status = child.try_wait().map_err(|source| CommandError::Wait {
            program: program.clone(),
            source,
        })?;
        if let Some(status) = status {
            return if status.success() {
                Ok(())
            } else {
                Err(CommandError::ExitStatus {
                    command: token.to_string(),
                    status,
                })
            };
        }
        if ctx.is_cancelled() {
            debug!("killing {} (pid {})", program, child.id());
            // the process may have exited in the meantime, which is fine.
            let _ = child.kill();
            let _ = child.wait();
            return Err(CommandError::Interrupted {
                command: token.to_string(),
            });
        }
        thread::sleep(POLL_INTERVAL);
    }
}

impl CommandError {
    /// Whether this error comes from cancellation rather than from a command failing.
    pub fn is_interrupt(&self) -> bool {
        match self {
            Self::Interrupted { .. } => true,
            Self::Sweep(e) => matches!(**e, SweepError::Interrupted { .. }),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{invoke, run_external, Command, CommandError};
    use crate::{test_common::recorder, Context};
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_invoke_in_order() {
        let mut ctx = Context::default();
        let calls = Arc::new(Mutex::new(vec![]));
        let commands = ["a", "b", "c"]
            .into_iter()
            .map(|name| {
                let calls = calls.clone();
                Command::call(name, move |_| {
                    calls.lock().unwrap().push(name);
                    Ok(())
                })
            })
            .collect::<Vec<_>>();
        invoke(&mut ctx, &commands).unwrap();
        assert_eq!(*calls.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_invoke_stops_at_first_error() {
        let mut ctx = Context::default();
        let (record, seen) = recorder("MS");
        let commands = vec![
            Command::call("fail", |_| Err(CommandError::msg("no such file"))),
            record,
        ];
        ctx.bindings.assign("MS", "a.ms").unwrap();
        let result = invoke(&mut ctx, &commands);
        assert!(matches!(result, Err(CommandError::Failed(msg)) if msg == "no such file"));
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_invoke_registered_token() {
        let mut ctx = Context::default();
        ctx.commands.register("make_image", |ctx| {
            ctx.bindings.assign("IMAGED", 1)?;
            Ok(())
        });
        invoke(&mut ctx, &[Command::from("make_image")]).unwrap();
        assert_eq!(ctx.bindings.get("IMAGED").unwrap(), Some(&1.into()));
    }

    #[test]
    fn test_invoke_cancelled_does_nothing() {
        let mut ctx = Context::default();
        let (record, seen) = recorder("MS");
        ctx.cancel_token().cancel();
        let result = invoke(&mut ctx, &[record]);
        assert!(matches!(result, Err(ref e) if e.is_interrupt()));
        assert!(seen.lock().unwrap().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_run_external_success_and_failure() {
        let ctx = Context::default();
        run_external(&ctx, "true").unwrap();
        assert!(matches!(
            run_external(&ctx, "false"),
            Err(CommandError::ExitStatus { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_run_external_sees_bindings() {
        let mut ctx = Context::default();
        ctx.bindings.assign("MS", "obs 1.ms").unwrap();
        run_external(&ctx, r#"sh -c 'test "$MS" = "obs 1.ms"'"#).unwrap();
    }

    #[test]
    fn test_run_external_bad_tokens() {
        let ctx = Context::default();
        assert!(matches!(
            run_external(&ctx, "echo 'unbalanced"),
            Err(CommandError::BadQuoting { .. })
        ));
        assert!(matches!(
            run_external(&ctx, "   "),
            Err(CommandError::EmptyCommand)
        ));
        assert!(matches!(
            run_external(&ctx, "/nonexistent/pyxis-test-program"),
            Err(CommandError::Spawn { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_run_external_killed_on_cancel() {
        let ctx = Context::default();
        let token = ctx.cancel_token();
        let canceller = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(100));
            token.cancel();
        });
        let start = std::time::Instant::now();
        let result = run_external(&ctx, "sleep 30");
        canceller.join().unwrap();
        assert!(matches!(result, Err(CommandError::Interrupted { .. })));
        assert!(start.elapsed() < std::time::Duration::from_secs(10));
    }
}
