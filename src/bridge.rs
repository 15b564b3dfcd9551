//! Runtime context.
//!
//! A [`Bridge`] owns the loader registry, the runtime stack and the
//! configuration. Creating one is the initialize step; [`Bridge::destroy`] is
//! its counterpart. Clones share the same context.

use std::{fs, path::Path, sync::Arc};

use serde_json::{Map, Value as Json, json};
use tracing::{debug, info, instrument, warn};

use crate::{
    config::BridgeConfig,
    dispatch::{Dispatcher, Target},
    error::{Error, Result},
    loader::{HostLoader, LoaderFactory, LoaderRef, MockLoader, Registry, ScriptLoader},
    runtime::RuntimeStack,
    value::{FunctionHandle, Signature, Value},
};

pub(crate) struct Core {
    pub(crate) config: BridgeConfig,
    pub(crate) registry: Registry,
    pub(crate) stack: RuntimeStack,
}

impl Drop for Core {
    fn drop(&mut self) {
        if self.registry.is_closed() {
            return;
        }
        if let Err(err) = self.registry.release_all(&self.stack) {
            warn!(error = %err, "bridge dropped without a clean teardown");
        }
    }
}

#[derive(Clone)]
pub struct Bridge {
    core: Arc<Core>,
    pub(crate) host: HostLoader,
}

impl Bridge {
    /// Initializes a bridge: registers the built-in loader factories and
    /// creates the host loader first, so it is torn down last.
    #[instrument(name = "bridge::new", level = "debug", skip_all)]
    pub fn new(config: BridgeConfig) -> Result<Self> {
        config.validate()?;
        let core = Arc::new(Core {
            stack: RuntimeStack::new(config.max_call_depth),
            registry: Registry::new(),
            config,
        });
        core.stack.reset();

        let host = HostLoader::new();
        let shared = host.clone();
        core.registry
            .register(HostLoader::TAG, move || shared.clone());
        core.registry.register(MockLoader::TAG, MockLoader::new);
        core.registry.register(ScriptLoader::TAG, ScriptLoader::new);

        let bridge = Bridge { core, host };
        bridge.acquire(HostLoader::TAG)?;
        info!(
            max_call_depth = bridge.core.config.max_call_depth,
            "bridge initialized"
        );
        Ok(bridge)
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.core.config
    }

    pub fn registry(&self) -> &Registry {
        &self.core.registry
    }

    pub fn stack(&self) -> &RuntimeStack {
        &self.core.stack
    }

    pub fn dispatcher(&self) -> Dispatcher {
        Dispatcher::new(Arc::downgrade(&self.core))
    }

    /// Adds a runtime under `tag`.
    pub fn register_loader(&self, tag: &str, factory: impl LoaderFactory + 'static) -> Result<()> {
        if self.is_destroyed() {
            return Err(Error::NotInitialized);
        }
        self.core.registry.register(tag, factory);
        Ok(())
    }

    /// Creates-or-returns the loader for `tag`.
    pub fn acquire(&self, tag: &str) -> Result<LoaderRef> {
        self.core
            .registry
            .acquire(tag, self.core.config.loader(tag), self.dispatcher())
    }

    /// Loads `source` into `tag` under `origin`. Returns the names that origin
    /// now exports.
    #[instrument(name = "bridge::load", level = "debug", skip(self, source))]
    pub fn load_from_memory(&self, tag: &str, source: &str, origin: &str) -> Result<Vec<String>> {
        let slot = self.acquire(tag)?;
        let _frame = self.core.stack.push(tag, origin)?;
        let _entered = slot.enter();
        if !slot.is_ready() {
            return Err(Error::NotInitialized);
        }
        let names = slot.loader().load(source, origin)?;
        debug!(tag, origin, exported = names.len(), "source loaded");
        Ok(names)
    }

    pub fn load_from_file(&self, tag: &str, path: impl AsRef<Path>) -> Result<Vec<String>> {
        let path = path.as_ref();
        let source = fs::read_to_string(path)
            .map_err(|err| Error::load(tag, &path.display().to_string(), err.to_string()))?;
        self.load_from_memory(tag, &source, &path.display().to_string())
    }

    /// Loads every path in order and stops at the first failure.
    pub fn load_from_files<P: AsRef<Path>>(&self, tag: &str, paths: &[P]) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for path in paths {
            names.extend(self.load_from_file(tag, path)?);
        }
        Ok(names)
    }

    pub fn call<'a>(&self, target: impl Into<Target<'a>>, args: Vec<Value>) -> Result<Value> {
        self.dispatcher().call(target, args)
    }

    /// Handle for `target`, if it resolves.
    pub fn function(&self, target: &str) -> Option<FunctionHandle> {
        self.dispatcher().resolve(target).ok()
    }

    /// Defines (or redefines) a variadic host function callable as
    /// `host:<name>`.
    pub fn host_function<F>(&self, name: &str, body: F) -> Result<FunctionHandle>
    where
        F: Fn(&Dispatcher, Vec<Value>) -> Result<Value> + Send + Sync + 'static,
    {
        self.host.define(name, Signature::variadic(), body)
    }

    pub fn host_function_with_signature<F>(
        &self,
        name: &str,
        signature: Signature,
        body: F,
    ) -> Result<FunctionHandle>
    where
        F: Fn(&Dispatcher, Vec<Value>) -> Result<Value> + Send + Sync + 'static,
    {
        self.host.define(name, signature, body)
    }

    /// Anonymous host callback. Released when the last handle drops.
    pub fn closure<F>(&self, body: F) -> Result<FunctionHandle>
    where
        F: Fn(&Dispatcher, Vec<Value>) -> Result<Value> + Send + Sync + 'static,
    {
        self.host.closure(body)
    }

    /// Live loaders and their exported functions, in creation order.
    pub fn inspect(&self) -> Json {
        let mut loaders = Map::new();
        for slot in self.core.registry.loaders() {
            let functions: Vec<Json> = slot
                .loader()
                .symbols()
                .iter()
                .map(|function| {
                    let signature = function.signature();
                    json!({
                        "name": function.name(),
                        "params": signature.params,
                        "variadic": signature.variadic,
                        "returns": signature.returns,
                    })
                })
                .collect();
            loaders.insert(
                slot.tag().to_string(),
                json!({
                    "state": slot.state().to_string(),
                    "degraded": slot.is_degraded(),
                    "instance": slot.id().instance,
                    "functions": functions,
                }),
            );
        }
        Json::Object(loaders)
    }

    /// Tears down every loader, newest first. Refused while any call is in
    /// flight. Calls made afterwards fail with `NotInitialized`.
    #[instrument(name = "bridge::destroy", level = "debug", skip_all)]
    pub fn destroy(&self) -> Result<()> {
        let frames = self.core.stack.len();
        if frames > 0 {
            return Err(Error::TeardownWhileActive { frames });
        }
        self.core.registry.release_all(&self.core.stack)?;
        info!("bridge destroyed");
        Ok(())
    }

    pub fn is_destroyed(&self) -> bool {
        self.core.registry.is_closed()
    }
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("registry", &self.core.registry)
            .field("frames", &self.core.stack.len())
            .finish()
    }
}
