//! Fixture runtime.
//!
//! Functions are declared one per line with a fixed signature and a canned
//! JSON result:
//!
//! ```text
//! # comment
//! two_doubles(double, double) -> double = 3.1416
//! log(string, ...) -> null = null
//! later() -> future = "done"
//! ```
//!
//! A `future` return wraps the canned value in an already-resolved future.

use std::{
    collections::HashMap,
    sync::atomic::{AtomicU64, Ordering},
};

use indexmap::IndexMap;
use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use serde_json::Value as Json;
use tracing::debug;

use crate::{
    error::{Error, Result},
    value::{FunctionHandle, Future, Kind, Param, Signature, SymbolId, Value},
};

use super::{InvokeFailure, Loader, LoaderContext, source_digest};

/// Loaded at initialization under the origin `<fixtures>`.
pub const FIXTURES: &str = "\
two_doubles(double, double) -> double = 3.1416
my_empty_func() -> int = 1234
three_str(string, string, string) -> string = \"Hello World\"
mixed_args(char, int, long, double, pointer) -> double = 3.1416
new_args(string) -> string = \"Hello World\"
empty() -> null = null
";

pub const FIXTURES_ORIGIN: &str = "<fixtures>";

struct Fixture {
    name: String,
    signature: Signature,
    result: Value,
}

struct Export {
    origin: String,
    handle: FunctionHandle,
    result: Value,
}

struct Module {
    digest: [u8; 32],
    names: Vec<String>,
}

#[derive(Default)]
pub struct MockLoader {
    context: OnceCell<LoaderContext>,
    modules: RwLock<HashMap<String, Module>>,
    exports: RwLock<IndexMap<String, Export>>,
    next_symbol: AtomicU64,
}

impl MockLoader {
    pub const TAG: &'static str = "mock";

    pub fn new() -> Self {
        Self::default()
    }

    fn context(&self) -> Result<&LoaderContext> {
        self.context.get().ok_or(Error::NotInitialized)
    }
}

impl Loader for MockLoader {
    fn initialize(&self, context: LoaderContext) -> Result<()> {
        let tag = context.tag().to_string();
        self.context.set(context).map_err(|_| Error::Init {
            tag,
            message: "mock loader initialized twice".to_string(),
        })?;
        self.load(FIXTURES, FIXTURES_ORIGIN)?;
        Ok(())
    }

    fn load(&self, source: &str, origin: &str) -> Result<Vec<String>> {
        let context = self.context()?;
        let digest = source_digest(source);
        if let Some(module) = self.modules.read().get(origin) {
            if module.digest == digest {
                debug!(origin, "fixtures unchanged");
                return Ok(module.names.clone());
            }
        }

        let fixtures = parse_fixtures(source)
            .map_err(|message| Error::load(context.tag(), origin, message))?;

        let names: Vec<String> = fixtures.iter().map(|f| f.name.clone()).collect();
        let replaced = {
            let mut exports = self.exports.write();
            let stale: Vec<String> = exports
                .iter()
                .filter(|(_, export)| export.origin == origin)
                .map(|(name, _)| name.clone())
                .collect();
            let mut replaced = Vec::with_capacity(stale.len());
            for name in stale {
                replaced.extend(exports.shift_remove(&name));
            }
            for fixture in fixtures {
                let symbol = SymbolId(self.next_symbol.fetch_add(1, Ordering::Relaxed) + 1);
                let handle = context.function(symbol, &fixture.name, fixture.signature);
                let export = Export {
                    origin: origin.to_string(),
                    handle,
                    result: fixture.result,
                };
                replaced.extend(exports.insert(fixture.name, export));
            }
            replaced
        };
        drop(replaced);

        self.modules.write().insert(
            origin.to_string(),
            Module {
                digest,
                names: names.clone(),
            },
        );
        debug!(origin, functions = names.len(), "fixtures loaded");
        Ok(names)
    }

    fn resolve(&self, name: &str) -> Option<FunctionHandle> {
        self.exports.read().get(name).map(|e| e.handle.clone())
    }

    fn invoke(
        &self,
        function: &FunctionHandle,
        args: Vec<Value>,
    ) -> std::result::Result<Value, InvokeFailure> {
        let (signature, result) = {
            let exports = self.exports.read();
            let export = exports
                .get(function.name())
                .filter(|e| e.handle.same(function))
                .ok_or_else(|| {
                    InvokeFailure::invoke(Error::StaleHandle {
                        tag: function.tag().to_string(),
                        name: function.name().to_string(),
                    })
                })?;
            (export.handle.signature().clone(), export.result.clone())
        };

        // The dispatcher has already converted typed arguments; this guards
        // callers that invoke the loader directly.
        for (param, arg) in signature.params.iter().zip(&args) {
            if let Some(kind) = param.kind {
                if arg.kind() != kind {
                    return Err(InvokeFailure::marshal(Error::TypeMismatch {
                        from: arg.kind(),
                        to: kind,
                    }));
                }
            }
        }

        if signature.returns == Some(Kind::Future) {
            return Ok(Value::Future(Future::resolved(result)));
        }
        Ok(result)
    }

    fn symbols(&self) -> Vec<FunctionHandle> {
        self.exports.read().values().map(|e| e.handle.clone()).collect()
    }

    fn destroy(&self) -> Result<()> {
        let exports = std::mem::take(&mut *self.exports.write());
        self.modules.write().clear();
        drop(exports);
        Ok(())
    }
}

fn parse_fixtures(source: &str) -> std::result::Result<Vec<Fixture>, String> {
    let mut fixtures = Vec::new();
    for (index, line) in source.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fixture =
            parse_fixture(line).map_err(|message| format!("line {}: {message}", index + 1))?;
        fixtures.push(fixture);
    }
    Ok(fixtures)
}

fn parse_fixture(line: &str) -> std::result::Result<Fixture, String> {
    let (declaration, canned) = line
        .split_once('=')
        .ok_or("expected `= <json>` after the signature")?;
    let (head, returns) = declaration
        .split_once("->")
        .ok_or("expected `-> <kind>`")?;
    let (name, params) = head.split_once('(').ok_or("expected `(`")?;
    let params = params.trim().strip_suffix(')').ok_or("expected `)`")?;

    let name = name.trim();
    if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '_') {
        return Err(format!("invalid function name `{name}`"));
    }

    let mut signature = Signature::default();
    for (i, param) in params.split(',').map(str::trim).enumerate() {
        match param {
            "" if i == 0 => break,
            "..." => signature.variadic = true,
            _ if signature.variadic => return Err("`...` must be the last parameter".into()),
            kind => {
                let kind: Kind = kind.parse()?;
                signature.params.push(Param::new(format!("arg{i}"), Some(kind)));
            }
        }
    }

    let returns: Kind = returns.parse()?;
    signature.returns = Some(returns);

    let json: Json = serde_json::from_str(canned.trim())
        .map_err(|e| format!("invalid canned result: {e}"))?;
    let value = Value::from_json(&json);
    let result = match returns {
        Kind::Future => value,
        Kind::Function | Kind::Pointer => {
            return Err(format!("a fixture cannot return a {returns}"));
        }
        kind => value.convert(kind).map_err(|e| e.to_string())?,
    };

    Ok(Fixture {
        name: name.to_string(),
        signature,
        result,
    })
}
