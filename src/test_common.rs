//! Shared fixtures for unit tests.

use crate::{
    bindings::{Bindings, Value},
    command::{Command, CommandError},
    context::Context,
    sweep::SweepConfigBuilder,
};
use std::sync::{Arc, Mutex};

/// A context with no bindings, sweeping with up to `jobs` workers.
pub fn get_context(jobs: usize, persist: bool) -> Context {
    let config = SweepConfigBuilder::default()
        .jobs(jobs)
        .persist(persist)
        .build()
        .unwrap();
    Context::new(Bindings::new(), config)
}

/// A command that records the current value of `var` each time it runs,
/// along with the shared log it records into.
pub fn recorder(var: &str) -> (Command, Arc<Mutex<Vec<Value>>>) {
    let seen = Arc::new(Mutex::new(vec![]));
    let log = seen.clone();
    let var = var.to_string();
    let command = Command::call(format!("record({var})"), move |ctx| {
        if let Some(value) = ctx.bindings.get(&var)? {
            log.lock().unwrap().push(value.clone());
        }
        Ok(())
    });
    (command, seen)
}

/// A command that fails whenever `var` is bound to one of `values`.
pub fn fail_on(var: &str, values: &[i64]) -> Command {
    let var = var.to_string();
    let values: Vec<Value> = values.iter().copied().map(Value::Int).collect();
    Command::call(format!("fail_on({var})"), move |ctx| {
        match ctx.bindings.get(&var)? {
            Some(value) if values.contains(value) => {
                Err(CommandError::msg(format!("refusing {var}={value}")))
            }
            _ => Ok(()),
        }
    })
}
