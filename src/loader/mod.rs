//! The loader contract.
//!
//! A loader adapts one guest runtime to the bridge. The registry creates one
//! loader per tag from a registered [`LoaderFactory`], hands it a
//! [`LoaderContext`], and from then on talks to it only through [`Loader`].
//!
//! Guest code that needs another runtime (or the host) goes through the
//! context's [`Dispatcher`]; loaders never keep references to each other.

use std::{fmt, sync::Weak};

use sha2::{Digest, Sha256};

use crate::{
    config::LoaderConfig,
    dispatch::Dispatcher,
    error::{Error, Result, Stage},
    value::{FunctionHandle, LoaderId, Pointer, Releaser, Signature, SymbolId, Value},
};

pub mod host;
pub mod mock;
pub mod registry;
pub mod script;

pub use host::{HostFn, HostLoader};
pub use mock::MockLoader;
pub use registry::{LoaderRef, LoaderSlot, Registry};
pub use script::ScriptLoader;

pub trait Loader: Send + Sync {
    /// Starts the runtime. A failure here is fatal for the tag.
    fn initialize(&self, context: LoaderContext) -> Result<()>;

    /// Compiles and evaluates `source`, replacing whatever `origin` exported
    /// before. On failure previously loaded symbols stay untouched. Returns the
    /// names `origin` now exports.
    fn load(&self, source: &str, origin: &str) -> Result<Vec<String>>;

    fn resolve(&self, name: &str) -> Option<FunctionHandle>;

    /// Marshals `args` into the runtime, runs the function, and marshals the
    /// result back. Must leave the loader usable when it fails.
    fn invoke(
        &self,
        function: &FunctionHandle,
        args: Vec<Value>,
    ) -> std::result::Result<Value, InvokeFailure>;

    /// The last value referencing an ephemeral symbol or pointer was dropped.
    fn release(&self, _symbol: SymbolId) {}

    /// Named symbols currently exported, for inspection.
    fn symbols(&self) -> Vec<FunctionHandle>;

    fn destroy(&self) -> Result<()>;
}

/// SHA-256 of a source text. Loaders compare it per origin to skip reloading
/// byte-identical source.
pub(crate) fn source_digest(source: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    let result = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&result);
    out
}

/// Creates loaders for one tag.
pub trait LoaderFactory: Send + Sync {
    fn create(&self) -> Box<dyn Loader>;
}

impl<F, L> LoaderFactory for F
where
    F: Fn() -> L + Send + Sync,
    L: Loader + 'static,
{
    fn create(&self) -> Box<dyn Loader> {
        Box::new(self())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoaderState {
    Uninitialized,
    Ready,
    Destroyed,
}

impl fmt::Display for LoaderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LoaderState::Uninitialized => "uninitialized",
            LoaderState::Ready => "ready",
            LoaderState::Destroyed => "destroyed",
        };
        f.write_str(name)
    }
}

/// Loader failure tagged with the stage it happened in.
#[derive(Debug, Clone)]
pub struct InvokeFailure {
    pub stage: Stage,
    pub error: Error,
}

impl InvokeFailure {
    pub fn marshal(error: Error) -> Self {
        Self {
            stage: Stage::Marshal,
            error,
        }
    }

    pub fn invoke(error: Error) -> Self {
        Self {
            stage: Stage::Invoke,
            error,
        }
    }

    pub fn unmarshal(error: Error) -> Self {
        Self {
            stage: Stage::Unmarshal,
            error,
        }
    }
}

impl From<Error> for InvokeFailure {
    fn from(error: Error) -> Self {
        InvokeFailure::invoke(error)
    }
}

/// Everything a loader receives from the bridge at initialization.
#[derive(Clone)]
pub struct LoaderContext {
    id: LoaderId,
    config: LoaderConfig,
    dispatcher: Dispatcher,
    releaser: Weak<dyn Releaser>,
}

impl LoaderContext {
    pub(crate) fn new(
        id: LoaderId,
        config: LoaderConfig,
        dispatcher: Dispatcher,
        releaser: Weak<dyn Releaser>,
    ) -> Self {
        Self {
            id,
            config,
            dispatcher,
            releaser,
        }
    }

    pub fn id(&self) -> &LoaderId {
        &self.id
    }

    pub fn tag(&self) -> &str {
        &self.id.tag
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Handle for a named, resolvable symbol.
    pub fn function(
        &self,
        symbol: SymbolId,
        name: impl Into<String>,
        signature: Signature,
    ) -> FunctionHandle {
        FunctionHandle::new(
            self.id.clone(),
            symbol,
            name,
            signature,
            false,
            self.releaser.clone(),
        )
    }

    /// Handle whose target is released when the last clone drops.
    pub fn ephemeral_function(
        &self,
        symbol: SymbolId,
        name: impl Into<String>,
        signature: Signature,
    ) -> FunctionHandle {
        FunctionHandle::new(
            self.id.clone(),
            symbol,
            name,
            signature,
            true,
            self.releaser.clone(),
        )
    }

    pub fn pointer(&self, address: SymbolId) -> Pointer {
        Pointer::new(self.id.clone(), address, self.releaser.clone())
    }

    /// Whether `function` was minted by this loader instance.
    pub fn owns(&self, function: &FunctionHandle) -> bool {
        function.owner() == &self.id
    }
}

impl fmt::Debug for LoaderContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoaderContext")
            .field("id", &self.id)
            .field("config", &self.config)
            .finish()
    }
}
