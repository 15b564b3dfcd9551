//! Embedded scripting runtime.
//!
//! A small indentation-based language (`def`, `lambda`, `return`,
//! `if`/`elif`/`else`, assignment, `from <path> import <names>`) evaluated by a
//! tree walker. Every loaded origin is a module; its top-level functions, and
//! the foreign functions it imports, are exported unless their name starts
//! with `_`.
//!
//! `from a.b import f` resolves `f` in the runtime tagged `b` through the
//! dispatcher. Functions crossing the boundary travel as handles: script
//! lambdas handed out become ephemeral handles, and handles owned by this
//! loader come back in as the original function.

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
use tracing::{debug, instrument};

use crate::{
    error::{Error, Result, Stage},
    value::{FunctionHandle, Signature, SymbolId, Value, ValueMap},
};

use super::{InvokeFailure, Loader, LoaderContext, source_digest};

mod ast;
mod error;
mod interpreter;
mod lexer;
mod object;
mod parser;
mod precedence;
mod token;

pub use error::ScriptError;

use interpreter::{Foreign, Interpreter};
use object::{Globals, Object, ScriptFunction};

struct Module {
    digest: [u8; 32],
    /// Keeps the module's functions able to see their globals.
    #[allow(dead_code)]
    globals: Globals,
    names: Vec<String>,
}

struct Export {
    origin: String,
    handle: FunctionHandle,
    /// `None` for re-exported foreign functions.
    function: Option<Arc<ScriptFunction>>,
}

#[derive(Default)]
pub struct ScriptLoader {
    context: OnceCell<LoaderContext>,
    modules: RwLock<IndexMap<String, Module>>,
    exports: RwLock<IndexMap<String, Export>>,
    functions: RwLock<HashMap<SymbolId, Arc<ScriptFunction>>>,
    next_symbol: AtomicU64,
}

impl ScriptLoader {
    pub const TAG: &'static str = "script";

    pub fn new() -> Self {
        Self::default()
    }

    fn context(&self) -> Result<&LoaderContext> {
        self.context.get().ok_or(Error::NotInitialized)
    }

    fn next_symbol(&self) -> SymbolId {
        SymbolId(self.next_symbol.fetch_add(1, Ordering::Relaxed) + 1)
    }

    fn signature(function: &ScriptFunction) -> Signature {
        Signature::untyped(function.params.iter().cloned())
    }

    fn to_object(&self, value: Value) -> Object {
        match value {
            Value::Null => Object::None,
            Value::Bool(b) => Object::Bool(b),
            Value::Char(c) => Object::Str(c.to_string()),
            Value::Short(i) => Object::Int(i.into()),
            Value::Int(i) => Object::Int(i.into()),
            Value::Long(i) => Object::Int(i),
            Value::Float(x) => Object::Float(x.into()),
            Value::Double(x) => Object::Float(x),
            Value::String(s) => Object::Str(s),
            Value::Array(items) => {
                Object::List(items.into_iter().map(|v| self.to_object(v)).collect())
            }
            Value::Map(map) => Object::Dict(
                map.into_iter()
                    .map(|(k, v)| (self.to_object(k), self.to_object(v)))
                    .collect(),
            ),
            Value::Function(handle) => {
                let owned = self
                    .context
                    .get()
                    .is_some_and(|context| context.owns(&handle));
                if owned {
                    let function = self.functions.read().get(&handle.symbol()).cloned();
                    if let Some(function) = function {
                        return Object::Function(function);
                    }
                }
                Object::Foreign(handle)
            }
            value @ (Value::Buffer(_) | Value::Pointer(_) | Value::Future(_)) => {
                Object::Opaque(value)
            }
        }
    }

    fn to_value(&self, object: Object) -> std::result::Result<Value, ScriptError> {
        let value = match object {
            Object::None => Value::Null,
            Object::Bool(b) => Value::Bool(b),
            Object::Int(i) => match i32::try_from(i) {
                Ok(i) => Value::Int(i),
                Err(_) => Value::Long(i),
            },
            Object::Float(x) => Value::Double(x),
            Object::Str(s) => Value::String(s),
            Object::List(items) => Value::Array(
                items
                    .into_iter()
                    .map(|item| self.to_value(item))
                    .collect::<std::result::Result<_, _>>()?,
            ),
            Object::Dict(pairs) => {
                let mut map = ValueMap::new();
                for (key, value) in pairs {
                    map.insert(self.to_value(key)?, self.to_value(value)?);
                }
                Value::Map(map)
            }
            Object::Function(function) => Value::Function(self.export_function(function)?),
            Object::Builtin(name, _) => {
                return Err(ScriptError::type_error(format!(
                    "built-in function `{name}` cannot leave the script runtime"
                )));
            }
            Object::Foreign(handle) => Value::Function(handle),
            Object::Opaque(value) => value,
        };
        Ok(value)
    }

    /// Handle for a script function leaving the runtime: the named export if
    /// it is one, otherwise a fresh ephemeral handle.
    fn export_function(&self, function: Arc<ScriptFunction>) -> Result<FunctionHandle> {
        let named = self.exports.read().values().find_map(|export| {
            export
                .function
                .as_ref()
                .filter(|f| Arc::ptr_eq(f, &function))
                .map(|_| export.handle.clone())
        });
        if let Some(handle) = named {
            return Ok(handle);
        }

        let context = self.context()?;
        let symbol = self.next_symbol();
        let handle = context.ephemeral_function(symbol, &function.name, Self::signature(&function));
        self.functions.write().insert(symbol, function);
        Ok(handle)
    }

    fn guest_failure(&self, tag: &str, error: ScriptError) -> InvokeFailure {
        match error {
            ScriptError::Bridge(error) => InvokeFailure::invoke(error),
            other => InvokeFailure::invoke(Error::guest(tag, other.to_string())),
        }
    }
}

impl Foreign for ScriptLoader {
    fn call_foreign(
        &self,
        function: &FunctionHandle,
        args: Vec<Object>,
    ) -> std::result::Result<Object, ScriptError> {
        let context = self.context()?;
        let args = args
            .into_iter()
            .map(|arg| self.to_value(arg))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let result = context.dispatcher().call_handle(function, args)?;
        Ok(self.to_object(result))
    }

    fn import(&self, tag: &str, name: &str) -> std::result::Result<Object, ScriptError> {
        let context = self.context()?;
        let handle = context.dispatcher().resolve(&format!("{tag}:{name}"))?;
        Ok(self.to_object(Value::Function(handle)))
    }
}

impl Loader for ScriptLoader {
    fn initialize(&self, context: LoaderContext) -> Result<()> {
        let tag = context.tag().to_string();
        self.context.set(context).map_err(|_| Error::Init {
            tag,
            message: "script loader initialized twice".to_string(),
        })
    }

    #[instrument(name = "script::load", level = "debug", skip(self, source))]
    fn load(&self, source: &str, origin: &str) -> Result<Vec<String>> {
        let context = self.context()?;
        let tag = context.tag();
        let digest = source_digest(source);
        if let Some(module) = self.modules.read().get(origin) {
            if module.digest == digest {
                debug!(origin, "module unchanged");
                return Ok(module.names.clone());
            }
        }

        let program =
            parser::parse(source).map_err(|e| Error::load(tag, origin, e.to_string()))?;
        let globals: Globals = Arc::default();
        Interpreter::new(self)
            .run_module(&program, &globals)
            .map_err(|e| Error::load(tag, origin, e.to_string()))?;

        let bindings: Vec<(String, Object)> = globals
            .read()
            .iter()
            .filter(|(name, object)| {
                !name.starts_with('_') && matches!(object, Object::Function(_) | Object::Foreign(_))
            })
            .map(|(name, object)| (name.clone(), object.clone()))
            .collect();

        let mut fresh = Vec::with_capacity(bindings.len());
        for (name, object) in bindings {
            let export = match object {
                Object::Function(function) => Export {
                    origin: origin.to_string(),
                    handle: context.function(
                        self.next_symbol(),
                        &name,
                        Self::signature(&function),
                    ),
                    function: Some(function),
                },
                Object::Foreign(handle) => Export {
                    origin: origin.to_string(),
                    handle,
                    function: None,
                },
                _ => continue,
            };
            fresh.push((name, export));
        }
        let names: Vec<String> = fresh.iter().map(|(name, _)| name.clone()).collect();

        let (replaced, released) = {
            let mut exports = self.exports.write();
            let mut functions = self.functions.write();
            let mut replaced = Vec::new();
            let mut released = Vec::new();

            let stale: Vec<String> = exports
                .iter()
                .filter(|(_, export)| export.origin == origin)
                .map(|(name, _)| name.clone())
                .collect();
            for name in stale {
                replaced.extend(exports.shift_remove(&name));
            }
            for (name, export) in fresh {
                if let Some(function) = &export.function {
                    functions.insert(export.handle.symbol(), function.clone());
                }
                replaced.extend(exports.insert(name, export));
            }
            for old in &replaced {
                if old.function.is_some() {
                    released.extend(functions.remove(&old.handle.symbol()));
                }
            }
            (replaced, released)
        };
        let previous = self.modules.write().insert(
            origin.to_string(),
            Module {
                digest,
                globals,
                names: names.clone(),
            },
        );
        drop((replaced, released, previous));

        debug!(tag, origin, exported = names.len(), "module loaded");
        Ok(names)
    }

    fn resolve(&self, name: &str) -> Option<FunctionHandle> {
        self.exports.read().get(name).map(|export| export.handle.clone())
    }

    fn invoke(
        &self,
        function: &FunctionHandle,
        args: Vec<Value>,
    ) -> std::result::Result<Value, InvokeFailure> {
        let context = self.context()?;
        let tag = context.tag();
        let target = self
            .functions
            .read()
            .get(&function.symbol())
            .cloned()
            .ok_or_else(|| InvokeFailure {
                stage: Stage::Resolve,
                error: Error::StaleHandle {
                    tag: tag.to_string(),
                    name: function.name().to_string(),
                },
            })?;

        let args: Vec<Object> = args.into_iter().map(|arg| self.to_object(arg)).collect();
        let result = Interpreter::new(self)
            .call_function(&target, args)
            .map_err(|e| self.guest_failure(tag, e))?;
        self.to_value(result).map_err(|e| match e {
            ScriptError::Bridge(error) => InvokeFailure::unmarshal(error),
            other => InvokeFailure::unmarshal(Error::guest(tag, other.to_string())),
        })
    }

    fn release(&self, symbol: SymbolId) {
        let removed = self.functions.write().remove(&symbol);
        drop(removed);
    }

    fn symbols(&self) -> Vec<FunctionHandle> {
        self.exports
            .read()
            .values()
            .map(|export| export.handle.clone())
            .collect()
    }

    fn destroy(&self) -> Result<()> {
        let exports = std::mem::take(&mut *self.exports.write());
        let functions = std::mem::take(&mut *self.functions.write());
        let modules = std::mem::take(&mut *self.modules.write());
        drop((exports, functions, modules));
        Ok(())
    }
}

#[cfg(test)]
mod lexer_test;
#[cfg(test)]
mod parser_test;
