//! Functions provided by the host program itself.
//!
//! The host loader never loads source. Its symbols are Rust closures that the
//! embedding program defines at runtime; anonymous closures are handed out as
//! ephemeral handles so guest code can call back into the host.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use indexmap::IndexMap;
use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use tracing::debug;

use crate::{
    dispatch::Dispatcher,
    error::{Error, Result, Stage},
    value::{FunctionHandle, Signature, SymbolId, Value},
};

use super::{InvokeFailure, Loader, LoaderContext};

pub type HostFn = Arc<dyn Fn(&Dispatcher, Vec<Value>) -> Result<Value> + Send + Sync>;

#[derive(Default)]
struct HostState {
    context: OnceCell<LoaderContext>,
    bodies: RwLock<HashMap<SymbolId, HostFn>>,
    exports: RwLock<IndexMap<String, FunctionHandle>>,
    next_symbol: AtomicU64,
}

/// Shared handle to the host function table. Clones see the same table.
#[derive(Clone, Default)]
pub struct HostLoader {
    state: Arc<HostState>,
}

impl HostLoader {
    pub const TAG: &'static str = "host";

    pub fn new() -> Self {
        Self::default()
    }

    fn context(&self) -> Result<&LoaderContext> {
        self.state.context.get().ok_or(Error::NotInitialized)
    }

    fn next_symbol(&self) -> SymbolId {
        SymbolId(self.state.next_symbol.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Defines `name`. Redefining a name gives it a fresh symbol, so handles
    /// to the previous body go stale.
    pub fn define<F>(&self, name: &str, signature: Signature, body: F) -> Result<FunctionHandle>
    where
        F: Fn(&Dispatcher, Vec<Value>) -> Result<Value> + Send + Sync + 'static,
    {
        let context = self.context()?;
        let symbol = self.next_symbol();
        let handle = context.function(symbol, name, signature);

        self.state.bodies.write().insert(symbol, Arc::new(body));
        let previous = self.state.exports.write().insert(name.to_string(), handle.clone());
        if let Some(previous) = previous {
            let removed = self.state.bodies.write().remove(&previous.symbol());
            drop(removed);
        }
        debug!(name, symbol = symbol.0, "host function defined");
        Ok(handle)
    }

    pub fn closure<F>(&self, body: F) -> Result<FunctionHandle>
    where
        F: Fn(&Dispatcher, Vec<Value>) -> Result<Value> + Send + Sync + 'static,
    {
        let context = self.context()?;
        let symbol = self.next_symbol();
        self.state.bodies.write().insert(symbol, Arc::new(body));
        Ok(context.ephemeral_function(
            symbol,
            format!("closure#{}", symbol.0),
            Signature::variadic(),
        ))
    }

    /// Live bodies, exported or not.
    pub fn len(&self) -> usize {
        self.state.bodies.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Loader for HostLoader {
    fn initialize(&self, context: LoaderContext) -> Result<()> {
        let tag = context.tag().to_string();
        self.state.context.set(context).map_err(|_| Error::Init {
            tag,
            message: "host loader initialized twice".to_string(),
        })
    }

    fn load(&self, _source: &str, origin: &str) -> Result<Vec<String>> {
        Err(Error::load(
            Self::TAG,
            origin,
            "the host runtime has no source to load; define functions instead",
        ))
    }

    fn resolve(&self, name: &str) -> Option<FunctionHandle> {
        self.state.exports.read().get(name).cloned()
    }

    fn invoke(
        &self,
        function: &FunctionHandle,
        args: Vec<Value>,
    ) -> std::result::Result<Value, InvokeFailure> {
        let context = self.context()?;
        let body = self
            .state
            .bodies
            .read()
            .get(&function.symbol())
            .cloned()
            .ok_or_else(|| InvokeFailure {
                stage: Stage::Resolve,
                error: Error::StaleHandle {
                    tag: function.tag().to_string(),
                    name: function.name().to_string(),
                },
            })?;
        body(context.dispatcher(), args).map_err(InvokeFailure::invoke)
    }

    fn release(&self, symbol: SymbolId) {
        let removed = self.state.bodies.write().remove(&symbol);
        drop(removed);
    }

    fn symbols(&self) -> Vec<FunctionHandle> {
        self.state.exports.read().values().cloned().collect()
    }

    fn destroy(&self) -> Result<()> {
        let exports = std::mem::take(&mut *self.state.exports.write());
        let bodies = std::mem::take(&mut *self.state.bodies.write());
        drop(exports);
        drop(bodies);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Bridge, BridgeConfig};

    #[test]
    fn defined_functions_resolve_by_name() {
        let bridge = Bridge::new(BridgeConfig::default()).unwrap();
        bridge
            .host_function("add", |_, args| {
                let sum: i64 = args.iter().filter_map(Value::as_i64).sum();
                Ok(Value::Long(sum))
            })
            .unwrap();

        let result = bridge
            .call("host:add", vec![Value::Int(2), Value::Int(40)])
            .unwrap();
        assert_eq!(result, Value::Long(42));
    }

    #[test]
    fn redefinition_makes_old_handle_stale() {
        let bridge = Bridge::new(BridgeConfig::default()).unwrap();
        let old = bridge.host_function("f", |_, _| Ok(Value::Int(1))).unwrap();
        bridge.host_function("f", |_, _| Ok(Value::Int(2))).unwrap();

        assert_eq!(bridge.call("host:f", vec![]).unwrap(), Value::Int(2));
        let err = bridge.call(&old, vec![]).unwrap_err();
        assert!(matches!(err.root_cause(), Error::StaleHandle { .. }));
    }

    #[test]
    fn dropping_closure_releases_body() {
        let bridge = Bridge::new(BridgeConfig::default()).unwrap();
        let before = bridge.host.len();

        let closure = bridge.closure(|_, args| Ok(Value::Int(args.len() as i32))).unwrap();
        assert!(closure.is_ephemeral());
        assert_eq!(
            bridge.call(&closure, vec![Value::Null, Value::Null]).unwrap(),
            Value::Int(2)
        );
        assert_eq!(bridge.host.len(), before + 1);

        drop(closure);
        assert_eq!(bridge.host.len(), before);
    }

    #[test]
    fn source_loading_is_rejected() {
        let bridge = Bridge::new(BridgeConfig::default()).unwrap();
        let err = bridge
            .load_from_memory(HostLoader::TAG, "anything", "inline")
            .unwrap_err();
        assert!(matches!(err, Error::Load { .. }));
    }
}
