//! Process-wide, C-shaped entry points.
//!
//! One [`Bridge`] lives in a global slot between [`initialize`] and
//! [`destroy`]. Every function here returns a [`Status`] (or a `Result` for
//! calls that produce a value) and never panics across the boundary. The slot
//! lock is only held long enough to clone the bridge out of it, so guest code
//! may call back into this module freely.

use std::path::Path;

use parking_lot::Mutex;
use serde_json::Value as Json;
use tracing::{error, warn};

use crate::{
    bridge::Bridge,
    config::BridgeConfig,
    dispatch::Target,
    error::{Error, Result},
    loader::LoaderFactory,
    value::{FunctionHandle, Value},
};

static BRIDGE: Mutex<Option<Bridge>> = Mutex::new(None);

/// Outcome code of an entry point. `Ok` is zero; every error family has its
/// own code.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Ok = 0,
    Init = 1,
    Load = 2,
    UnknownSymbol = 3,
    UnknownLoader = 4,
    InvalidTarget = 5,
    Conversion = 6,
    Guest = 7,
    StaleHandle = 8,
    StackOverflow = 9,
    Teardown = 10,
    NotInitialized = 11,
    FutureTimeout = 12,
    Config = 13,
    Io = 14,
}

impl Status {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn is_ok(self) -> bool {
        self == Status::Ok
    }
}

impl From<&Error> for Status {
    /// Call errors report the family of the failure that started the chain.
    fn from(err: &Error) -> Self {
        match err.root_cause() {
            Error::Init { .. } => Status::Init,
            Error::Load { .. } => Status::Load,
            Error::UnknownSymbol { .. } => Status::UnknownSymbol,
            Error::UnknownLoader { .. } => Status::UnknownLoader,
            Error::InvalidTarget { .. } => Status::InvalidTarget,
            Error::TypeMismatch { .. } | Error::PrecisionLoss { .. } | Error::Arity { .. } => {
                Status::Conversion
            }
            Error::Guest { .. } => Status::Guest,
            Error::StaleHandle { .. } => Status::StaleHandle,
            Error::StackOverflow { .. } => Status::StackOverflow,
            Error::BusyTeardown { .. }
            | Error::TeardownWhileActive { .. }
            | Error::Teardown(_) => Status::Teardown,
            Error::NotInitialized => Status::NotInitialized,
            Error::FutureTimeout => Status::FutureTimeout,
            Error::Config(_) => Status::Config,
            Error::Io(_) => Status::Io,
            Error::Call(_) => Status::Guest,
        }
    }
}

impl<T> From<&Result<T>> for Status {
    fn from(result: &Result<T>) -> Self {
        match result {
            Ok(_) => Status::Ok,
            Err(err) => Status::from(err),
        }
    }
}

fn status<T>(operation: &str, result: Result<T>) -> Status {
    let status = Status::from(&result);
    if let Err(err) = &result {
        warn!(operation, code = status.code(), error = %err, "api call failed");
    }
    status
}

/// The live bridge, cloned out of the slot.
pub fn bridge() -> Result<Bridge> {
    BRIDGE.lock().clone().ok_or(Error::NotInitialized)
}

/// Initializes the process-wide bridge from the environment. A no-op if one
/// is already live.
pub fn initialize() -> Status {
    match BridgeConfig::from_env() {
        Ok(config) => initialize_with(config),
        Err(err) => status("initialize", Err::<(), _>(err)),
    }
}

pub fn initialize_with(config: BridgeConfig) -> Status {
    let mut slot = BRIDGE.lock();
    if slot.is_some() {
        return Status::Ok;
    }
    match Bridge::new(config) {
        Ok(bridge) => {
            *slot = Some(bridge);
            Status::Ok
        }
        Err(err) => status("initialize", Err::<(), _>(err)),
    }
}

/// Tears the bridge down. The slot is emptied once the registry is closed,
/// even if some loaders failed to stop; a refused teardown leaves it in place.
pub fn destroy() -> Status {
    let bridge = match bridge() {
        Ok(bridge) => bridge,
        Err(err) => return status("destroy", Err::<(), _>(err)),
    };
    let result = bridge.destroy();
    if bridge.is_destroyed() {
        let previous = BRIDGE.lock().take();
        drop(previous);
    }
    if let Err(err) = &result {
        error!(error = %err, "teardown failed");
    }
    Status::from(&result)
}

pub fn load_from_memory(tag: &str, source: &str, origin: &str) -> Status {
    let result = bridge().and_then(|bridge| bridge.load_from_memory(tag, source, origin));
    status("load_from_memory", result)
}

/// Loads each path into `tag`, in order, with the path as the origin.
pub fn load_from_file<P: AsRef<Path>>(tag: &str, paths: &[P]) -> Status {
    let result = bridge().and_then(|bridge| bridge.load_from_files(tag, paths));
    status("load_from_file", result)
}

pub fn call<'a>(target: impl Into<Target<'a>>, args: Vec<Value>) -> Result<Value> {
    bridge()?.call(target, args)
}

pub fn call_handle(function: &FunctionHandle, args: Vec<Value>) -> Result<Value> {
    bridge()?.call(function, args)
}

/// Handle for `name` (`"tag:name"` or bare), if it resolves.
pub fn function(name: &str) -> Option<FunctionHandle> {
    bridge().ok()?.function(name)
}

pub fn register_loader(tag: &str, factory: impl LoaderFactory + 'static) -> Status {
    let result = bridge().and_then(|bridge| bridge.register_loader(tag, factory));
    status("register_loader", result)
}

/// Loader and symbol summary, or `null` when no bridge is live.
pub fn inspect() -> Json {
    bridge().map_or(Json::Null, |bridge| bridge.inspect())
}
