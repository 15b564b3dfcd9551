//! Kind conversion.
//!
//! Numeric conversion follows promotion only:
//!
//! ```text
//! short -> int -> long        float -> double
//! short -> float, short -> double, int -> double
//! ```
//!
//! Every other numeric pair is narrowing and fails with `PrecisionLoss`
//! unless the caller explicitly asks to truncate.

use crate::error::{Error, Result};

use super::{Kind, Value};

impl Value {
    pub fn convert(&self, to: Kind) -> Result<Value> {
        self.convert_with(to, false)
    }

    /// Like [`Value::convert`], but narrowing numeric conversions saturate
    /// instead of failing.
    pub fn convert_truncating(&self, to: Kind) -> Result<Value> {
        self.convert_with(to, true)
    }

    fn convert_with(&self, to: Kind, truncate: bool) -> Result<Value> {
        let from = self.kind();
        if from == to {
            return Ok(self.clone());
        }

        if from.is_numeric() && to.is_numeric() {
            if !truncate && !widens(from, to) {
                return Err(Error::PrecisionLoss { from, to });
            }
            return Ok(cast_numeric(self, to));
        }

        let mismatch = || Error::TypeMismatch { from, to };
        match (self, to) {
            (Value::Char(c), Kind::String) => Ok(Value::String(c.to_string())),
            (Value::String(s), Kind::Char) => {
                let mut chars = s.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => Ok(Value::Char(c)),
                    _ => Err(mismatch()),
                }
            }
            (Value::String(s), Kind::Buffer) => Ok(Value::Buffer(s.as_bytes().to_vec())),
            (Value::Buffer(bytes), Kind::String) => String::from_utf8(bytes.clone())
                .map(Value::String)
                .map_err(|_| mismatch()),
            _ => Err(mismatch()),
        }
    }
}

fn widens(from: Kind, to: Kind) -> bool {
    matches!(
        (from, to),
        (Kind::Short, Kind::Int)
            | (Kind::Short, Kind::Long)
            | (Kind::Int, Kind::Long)
            | (Kind::Float, Kind::Double)
            | (Kind::Short, Kind::Float)
            | (Kind::Short, Kind::Double)
            | (Kind::Int, Kind::Double)
    )
}

fn cast_numeric(value: &Value, to: Kind) -> Value {
    if let Some(f) = value.as_f64() {
        return match to {
            Kind::Short => Value::Short(f as i16),
            Kind::Int => Value::Int(f as i32),
            Kind::Long => Value::Long(f as i64),
            Kind::Float => Value::Float(f as f32),
            _ => Value::Double(f),
        };
    }

    let i = value.as_i64().unwrap_or_default();
    match to {
        Kind::Short => Value::Short(i.clamp(i64::from(i16::MIN), i64::from(i16::MAX)) as i16),
        Kind::Int => Value::Int(i.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32),
        Kind::Long => Value::Long(i),
        Kind::Float => Value::Float(i as f32),
        _ => Value::Double(i as f64),
    }
}
