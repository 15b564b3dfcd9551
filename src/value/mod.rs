//! Runtime-agnostic values.
//!
//! # Ownership
//! A [`Value`] owns its payload. Arrays and maps exclusively own their
//! elements: cloning a container deep-copies it, so no two runtimes ever alias
//! the same container through the bridge.
//!
//! `Function` and `Pointer` are the exception. They hold a non-owning reference
//! into the loader that created them plus a weak back-reference to that loader;
//! the loader's release hook is the only place their target is destroyed.
//!
//! A value's kind is fixed at construction. [`Value::convert`] builds a new
//! value rather than mutating.
use std::{fmt, str::FromStr};

use serde::Serialize;

mod convert;
mod function;
mod future;
mod json;
mod map;

pub use function::{FunctionHandle, LoaderId, Param, Pointer, Signature, SymbolId};
pub(crate) use function::Releaser;
pub use future::{Future, Promise};
pub use map::ValueMap;

/// Discriminant of a [`Value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    Null,
    Bool,
    Char,
    Short,
    Int,
    Long,
    Float,
    Double,
    String,
    Buffer,
    Array,
    Map,
    Pointer,
    Function,
    Future,
}

impl Kind {
    pub const ALL: [Kind; 15] = [
        Kind::Null,
        Kind::Bool,
        Kind::Char,
        Kind::Short,
        Kind::Int,
        Kind::Long,
        Kind::Float,
        Kind::Double,
        Kind::String,
        Kind::Buffer,
        Kind::Array,
        Kind::Map,
        Kind::Pointer,
        Kind::Function,
        Kind::Future,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Kind::Null => "null",
            Kind::Bool => "bool",
            Kind::Char => "char",
            Kind::Short => "short",
            Kind::Int => "int",
            Kind::Long => "long",
            Kind::Float => "float",
            Kind::Double => "double",
            Kind::String => "string",
            Kind::Buffer => "buffer",
            Kind::Array => "array",
            Kind::Map => "map",
            Kind::Pointer => "pointer",
            Kind::Function => "function",
            Kind::Future => "future",
        }
    }

    pub fn is_integer(self) -> bool {
        matches!(self, Kind::Short | Kind::Int | Kind::Long)
    }

    pub fn is_floating(self) -> bool {
        matches!(self, Kind::Float | Kind::Double)
    }

    pub fn is_numeric(self) -> bool {
        self.is_integer() || self.is_floating()
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Kind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        Kind::ALL
            .into_iter()
            .find(|kind| kind.name() == lowered)
            .ok_or_else(|| format!("unknown value kind `{}`", s.trim()))
    }
}

/// Any datum crossing a language boundary.
#[derive(Debug, Clone)]
pub enum Value {
    /// Absence of value.
    Null,
    Bool(bool),
    Char(char),
    /// 16-bit signed integer.
    Short(i16),
    /// 32-bit signed integer, the default integer width.
    Int(i32),
    /// 64-bit signed integer.
    Long(i64),
    /// 32-bit float.
    Float(f32),
    /// 64-bit float, the default floating width.
    Double(f64),
    String(String),
    /// Raw bytes, not necessarily UTF-8.
    Buffer(Vec<u8>),
    /// Ordered sequence, deep-owned.
    Array(Vec<Value>),
    /// Insertion-ordered mapping, deep-owned.
    Map(ValueMap),
    /// Opaque handle owned by a loader.
    Pointer(Pointer),
    /// Callable owned by a loader.
    Function(FunctionHandle),
    /// Pending asynchronous result.
    Future(Future),
}

impl Value {
    /// Never fails.
    pub fn kind(&self) -> Kind {
        match self {
            Value::Null => Kind::Null,
            Value::Bool(_) => Kind::Bool,
            Value::Char(_) => Kind::Char,
            Value::Short(_) => Kind::Short,
            Value::Int(_) => Kind::Int,
            Value::Long(_) => Kind::Long,
            Value::Float(_) => Kind::Float,
            Value::Double(_) => Kind::Double,
            Value::String(_) => Kind::String,
            Value::Buffer(_) => Kind::Buffer,
            Value::Array(_) => Kind::Array,
            Value::Map(_) => Kind::Map,
            Value::Pointer(_) => Kind::Pointer,
            Value::Function(_) => Kind::Function,
            Value::Future(_) => Kind::Future,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Integer payload widened to `i64`, for any integer kind.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Short(v) => Some(i64::from(*v)),
            Value::Int(v) => Some(i64::from(*v)),
            Value::Long(v) => Some(*v),
            _ => None,
        }
    }

    /// Floating payload widened to `f64`, for any floating kind.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(f64::from(*v)),
            Value::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&FunctionHandle> {
        match self {
            Value::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Char(a), Value::Char(b)) => a == b,
            (Value::Short(a), Value::Short(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Long(a), Value::Long(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Double(a), Value::Double(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Buffer(a), Value::Buffer(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Pointer(a), Value::Pointer(b)) => a.same(b),
            (Value::Function(a), Value::Function(b)) => a.same(b),
            (Value::Future(a), Value::Future(b)) => a.same(b),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Char(v) => write!(f, "'{}'", v),
            Value::Short(v) => write!(f, "{}", v),
            Value::Int(v) => write!(f, "{}", v),
            Value::Long(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Double(v) => write!(f, "{}", v),
            Value::String(v) => write!(f, "\"{}\"", v),
            Value::Buffer(bytes) => write!(f, "<buffer {} bytes>", bytes.len()),
            Value::Array(items) => {
                let items: Vec<String> = items.iter().map(|e| e.to_string()).collect();
                write!(f, "[{}]", items.join(", "))
            }
            Value::Map(map) => {
                let items: Vec<String> = map
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k, v))
                    .collect();
                write!(f, "{{{}}}", items.join(", "))
            }
            Value::Pointer(p) => write!(f, "<pointer {}#{}>", p.owner().tag, p.address().0),
            Value::Function(func) => write!(f, "<function {}:{}>", func.tag(), func.name()),
            Value::Future(_) => write!(f, "<future>"),
        }
    }
}

macro_rules! impl_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v)
                }
            }
        )*
    };
}

impl_from! {
    bool => Bool,
    char => Char,
    i16 => Short,
    i32 => Int,
    i64 => Long,
    f32 => Float,
    f64 => Double,
    String => String,
    Vec<u8> => Buffer,
    Vec<Value> => Array,
    ValueMap => Map,
    Pointer => Pointer,
    FunctionHandle => Function,
    Future => Future,
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Null
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

#[cfg(test)]
mod convert_test;
