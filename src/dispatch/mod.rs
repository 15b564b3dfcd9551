//! Call dispatcher.
//!
//! Resolves a call target to a loader and a function handle, records a frame
//! on the runtime stack, converts arguments to the kinds the signature
//! declares, invokes under the loader's lock and converts the result back.
//! Guest code re-enters through the same dispatcher for callbacks.

use std::{
    fmt,
    sync::{Arc, Weak},
    time::{Duration, Instant},
};

use rayon::prelude::*;
use tracing::{debug, instrument, warn};

use crate::{
    bridge::Core,
    error::{CallError, Error, Result, Stage},
    loader::{LoaderRef, LoaderSlot},
    value::{FunctionHandle, Value},
};

mod target;

pub use target::Target;

/// Entry point for every cross-boundary call.
///
/// Cheap to clone. Holds the bridge weakly, so a dispatcher captured by guest
/// code never keeps a destroyed bridge alive; calls through it then fail with
/// `NotInitialized`.
#[derive(Clone)]
pub struct Dispatcher {
    core: Weak<Core>,
}

impl Dispatcher {
    pub(crate) fn new(core: Weak<Core>) -> Self {
        Self { core }
    }

    fn core(&self) -> Result<Arc<Core>> {
        self.core.upgrade().ok_or(Error::NotInitialized)
    }

    /// Calls `target` (`"tag:name"`, a bare name, or a handle) with `args`.
    #[instrument(name = "dispatch::call", level = "trace", skip_all)]
    pub fn call<'a>(&self, target: impl Into<Target<'a>>, args: Vec<Value>) -> Result<Value> {
        let target = target.into();
        let core = self.core()?;
        let (slot, function) = self.locate(&core, &target)?;
        self.dispatch(&core, &slot, &function, args)
    }

    pub fn call_handle(&self, function: &FunctionHandle, args: Vec<Value>) -> Result<Value> {
        self.call(function, args)
    }

    /// Calls `target` and, if it returns a future, waits for it.
    pub fn call_await<'a>(
        &self,
        target: impl Into<Target<'a>>,
        args: Vec<Value>,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        match self.call(target, args)? {
            Value::Future(future) => future.wait(timeout),
            value => Ok(value),
        }
    }

    /// Runs independent calls on the rayon pool. Calls into different tags
    /// proceed in parallel; calls into the same tag serialize on its lock.
    pub fn call_all(&self, calls: Vec<(String, Vec<Value>)>) -> Vec<Result<Value>> {
        calls
            .into_par_iter()
            .map(|(target, args)| self.call(target.as_str(), args))
            .collect()
    }

    /// Resolves a target to a handle without calling it.
    pub fn resolve(&self, target: &str) -> Result<FunctionHandle> {
        let core = self.core()?;
        let (_, function) = self.locate(&core, &Target::parse(target))?;
        Ok(function)
    }

    /// Frames on the calling thread.
    pub fn depth(&self) -> usize {
        self.core().map_or(0, |core| core.stack.depth())
    }

    fn locate(&self, core: &Core, target: &Target<'_>) -> Result<(LoaderRef, FunctionHandle)> {
        let label = target.to_string();
        let resolve_error = |cause: Error| Error::Call(CallError::new(Stage::Resolve, &label, cause));
        let unknown = || {
            resolve_error(Error::UnknownSymbol {
                name: label.clone(),
            })
        };

        let (slot, function) = match target {
            Target::Qualified { tag, name } => {
                if tag.is_empty() || name.is_empty() {
                    return Err(resolve_error(Error::InvalidTarget {
                        target: label.clone(),
                    }));
                }
                let slot = core
                    .registry
                    .acquire(tag, core.config.loader(tag), self.clone())
                    .map_err(resolve_error)?;
                let function = slot.loader().resolve(name).ok_or_else(unknown)?;
                (slot, function)
            }
            Target::Global(name) => core
                .registry
                .loaders()
                .into_iter()
                .find_map(|slot| {
                    let function = slot.loader().resolve(name)?;
                    Some((slot, function))
                })
                .ok_or_else(unknown)?,
            Target::Handle(function) => {
                let slot = core
                    .registry
                    .get(function.tag())
                    .filter(|slot| slot.id() == function.owner() && slot.is_ready())
                    .ok_or_else(|| {
                        resolve_error(Error::StaleHandle {
                            tag: function.tag().to_string(),
                            name: function.name().to_string(),
                        })
                    })?;
                return Ok((slot, (*function).clone()));
            }
        };

        // A loader may re-export a symbol owned by another runtime.
        if function.owner() != slot.id() {
            return self.locate(core, &Target::Handle(&function));
        }
        Ok((slot, function))
    }

    fn dispatch(
        &self,
        core: &Core,
        slot: &LoaderSlot,
        function: &FunctionHandle,
        args: Vec<Value>,
    ) -> Result<Value> {
        let target = function.qualified_name();
        let _frame = core.stack.push(slot.tag(), function.name())?;
        debug!(call = %target, depth = core.stack.depth(), argc = args.len(), "dispatch");

        let args = marshal_args(function, args)
            .map_err(|e| Error::Call(CallError::new(Stage::Marshal, &target, e)))?;

        let started = Instant::now();
        let result = {
            let _entered = slot.enter();
            if !slot.is_ready() {
                return Err(Error::Call(CallError::new(
                    Stage::Resolve,
                    &target,
                    Error::StaleHandle {
                        tag: slot.tag().to_string(),
                        name: function.name().to_string(),
                    },
                )));
            }
            slot.loader().invoke(function, args)
        };
        check_timeout(core, slot, &target, started.elapsed());

        let value = result.map_err(|failure| {
            Error::Call(CallError::new(failure.stage, &target, failure.error))
        })?;
        unmarshal_result(function, value)
            .map_err(|e| Error::Call(CallError::new(Stage::Unmarshal, &target, e)))
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("alive", &(self.core.strong_count() > 0))
            .finish()
    }
}

/// Checks arity and converts arguments to their declared kinds.
fn marshal_args(function: &FunctionHandle, args: Vec<Value>) -> Result<Vec<Value>> {
    let signature = function.signature();
    if !signature.accepts(args.len()) {
        return Err(Error::Arity {
            name: function.name().to_string(),
            expected: signature.arity(),
            got: args.len(),
        });
    }

    args.into_iter()
        .enumerate()
        .map(|(i, arg)| match signature.params.get(i).and_then(|p| p.kind) {
            Some(kind) if arg.kind() != kind => arg.convert(kind),
            _ => Ok(arg),
        })
        .collect()
}

fn unmarshal_result(function: &FunctionHandle, value: Value) -> Result<Value> {
    match function.signature().returns {
        Some(kind) if value.kind() != kind => value.convert(kind),
        _ => Ok(value),
    }
}

fn check_timeout(core: &Core, slot: &LoaderSlot, target: &str, elapsed: Duration) {
    let Some(limit) = core.config.invoke_timeout() else {
        return;
    };
    if elapsed > limit && !slot.is_degraded() {
        slot.mark_degraded();
        warn!(
            tag = slot.tag(),
            call = target,
            elapsed_ms = elapsed.as_millis() as u64,
            "invoke exceeded its timeout; loader marked degraded"
        );
    }
}

#[cfg(test)]
mod target_test;
