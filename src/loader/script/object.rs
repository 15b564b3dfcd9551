use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Weak},
};

use indexmap::IndexMap;
use parking_lot::RwLock;

use crate::value::{FunctionHandle, Value};

use super::{
    ast::{Block, Expression},
    error::{ScriptError, ScriptResult},
};

/// Module-level bindings of one loaded origin.
pub type Globals = Arc<RwLock<IndexMap<String, Object>>>;

pub type BuiltinFn = fn(Vec<Object>) -> ScriptResult<Object>;

#[derive(Debug)]
pub enum Body {
    Block(Arc<Block>),
    Expression(Arc<Expression>),
}

/// A `def` or `lambda`. Module globals are held weakly: the module owns its
/// functions, not the other way round.
#[derive(Debug)]
pub struct ScriptFunction {
    pub name: String,
    pub params: Vec<String>,
    pub body: Body,
    pub captured: HashMap<String, Object>,
    pub globals: Weak<RwLock<IndexMap<String, Object>>>,
    /// Defined inside another function; sees itself through its locals.
    pub nested: bool,
}

#[derive(Debug, Clone)]
pub enum Object {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Object>),
    /// Insertion-ordered pairs.
    Dict(Vec<(Object, Object)>),
    Function(Arc<ScriptFunction>),
    Builtin(&'static str, BuiltinFn),
    /// Callable owned by another runtime.
    Foreign(FunctionHandle),
    /// Bridge value with no script counterpart, passed through untouched.
    Opaque(Value),
}

impl Object {
    pub fn type_name(&self) -> &'static str {
        match self {
            Object::None => "NoneType",
            Object::Bool(_) => "bool",
            Object::Int(_) => "int",
            Object::Float(_) => "float",
            Object::Str(_) => "str",
            Object::List(_) => "list",
            Object::Dict(_) => "dict",
            Object::Function(_) => "function",
            Object::Builtin(..) => "builtin_function",
            Object::Foreign(_) => "foreign_function",
            Object::Opaque(value) => value.kind().name(),
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Object::None => false,
            Object::Bool(b) => *b,
            Object::Int(i) => *i != 0,
            Object::Float(f) => *f != 0.0,
            Object::Str(s) => !s.is_empty(),
            Object::List(items) => !items.is_empty(),
            Object::Dict(pairs) => !pairs.is_empty(),
            Object::Function(_) | Object::Builtin(..) | Object::Foreign(_) => true,
            Object::Opaque(value) => !value.is_null(),
        }
    }

    fn repr(&self) -> String {
        match self {
            Object::Str(s) => format!("{s:?}"),
            other => other.to_string(),
        }
    }
}

impl PartialEq for Object {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Object::None, Object::None) => true,
            (Object::Bool(a), Object::Bool(b)) => a == b,
            (Object::Int(a), Object::Int(b)) => a == b,
            (Object::Float(a), Object::Float(b)) => a == b,
            (Object::Int(a), Object::Float(b)) | (Object::Float(b), Object::Int(a)) => {
                (*a as f64) == *b
            }
            (Object::Str(a), Object::Str(b)) => a == b,
            (Object::List(a), Object::List(b)) => a == b,
            (Object::Dict(a), Object::Dict(b)) => a == b,
            (Object::Function(a), Object::Function(b)) => Arc::ptr_eq(a, b),
            (Object::Builtin(a, _), Object::Builtin(b, _)) => a == b,
            (Object::Foreign(a), Object::Foreign(b)) => a.same(b),
            (Object::Opaque(a), Object::Opaque(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Object::None => write!(f, "None"),
            Object::Bool(true) => write!(f, "True"),
            Object::Bool(false) => write!(f, "False"),
            Object::Int(i) => write!(f, "{i}"),
            Object::Float(x) => write!(f, "{x:?}"),
            Object::Str(s) => write!(f, "{s}"),
            Object::List(items) => {
                let items: Vec<String> = items.iter().map(Object::repr).collect();
                write!(f, "[{}]", items.join(", "))
            }
            Object::Dict(pairs) => {
                let pairs: Vec<String> = pairs
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k.repr(), v.repr()))
                    .collect();
                write!(f, "{{{}}}", pairs.join(", "))
            }
            Object::Function(function) => write!(f, "<function {}>", function.name),
            Object::Builtin(name, _) => write!(f, "<built-in function {name}>"),
            Object::Foreign(handle) => write!(f, "<foreign function {}>", handle.qualified_name()),
            Object::Opaque(value) => write!(f, "<{} {value}>", value.kind()),
        }
    }
}

const BUILTINS: &[(&str, BuiltinFn)] = &[
    ("len", builtin_len as BuiltinFn),
    ("str", builtin_str as BuiltinFn),
    ("int", builtin_int as BuiltinFn),
    ("float", builtin_float as BuiltinFn),
    ("abs", builtin_abs as BuiltinFn),
];

pub fn lookup_builtin(name: &str) -> Option<Object> {
    BUILTINS
        .iter()
        .find(|(builtin, _)| *builtin == name)
        .map(|(name, function)| Object::Builtin(*name, *function))
}

fn single(name: &str, mut args: Vec<Object>) -> ScriptResult<Object> {
    if args.len() != 1 {
        return Err(ScriptError::type_error(format!(
            "{name}() takes exactly one argument ({} given)",
            args.len()
        )));
    }
    Ok(args.remove(0))
}

fn builtin_len(args: Vec<Object>) -> ScriptResult<Object> {
    let len = match single("len", args)? {
        Object::Str(s) => s.chars().count(),
        Object::List(items) => items.len(),
        Object::Dict(pairs) => pairs.len(),
        other => {
            return Err(ScriptError::type_error(format!(
                "object of type '{}' has no len()",
                other.type_name()
            )));
        }
    };
    Ok(Object::Int(len as i64))
}

fn builtin_str(args: Vec<Object>) -> ScriptResult<Object> {
    Ok(Object::Str(single("str", args)?.to_string()))
}

fn builtin_int(args: Vec<Object>) -> ScriptResult<Object> {
    match single("int", args)? {
        Object::Int(i) => Ok(Object::Int(i)),
        Object::Bool(b) => Ok(Object::Int(b as i64)),
        Object::Float(x) if x.is_finite() => Ok(Object::Int(x.trunc() as i64)),
        Object::Str(s) => s
            .trim()
            .parse()
            .map(Object::Int)
            .map_err(|_| ScriptError::runtime(format!("invalid literal for int(): '{s}'"))),
        other => Err(ScriptError::type_error(format!(
            "int() argument must be a string or a number, not '{}'",
            other.type_name()
        ))),
    }
}

fn builtin_float(args: Vec<Object>) -> ScriptResult<Object> {
    match single("float", args)? {
        Object::Int(i) => Ok(Object::Float(i as f64)),
        Object::Float(x) => Ok(Object::Float(x)),
        Object::Bool(b) => Ok(Object::Float(if b { 1.0 } else { 0.0 })),
        Object::Str(s) => s
            .trim()
            .parse()
            .map(Object::Float)
            .map_err(|_| ScriptError::runtime(format!("could not convert string to float: '{s}'"))),
        other => Err(ScriptError::type_error(format!(
            "float() argument must be a string or a number, not '{}'",
            other.type_name()
        ))),
    }
}

fn builtin_abs(args: Vec<Object>) -> ScriptResult<Object> {
    match single("abs", args)? {
        Object::Int(i) => i
            .checked_abs()
            .map(Object::Int)
            .ok_or_else(|| ScriptError::runtime("integer overflow")),
        Object::Float(x) => Ok(Object::Float(x.abs())),
        other => Err(ScriptError::type_error(format!(
            "bad operand type for abs(): '{}'",
            other.type_name()
        ))),
    }
}
