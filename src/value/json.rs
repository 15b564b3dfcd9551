use serde::{
    Serialize, Serializer,
    ser::{SerializeMap, SerializeSeq},
};
use serde_json::Value as Json;

use super::{Value, ValueMap};

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(v) => serializer.serialize_bool(*v),
            Value::Char(v) => serializer.serialize_char(*v),
            Value::Short(v) => serializer.serialize_i16(*v),
            Value::Int(v) => serializer.serialize_i32(*v),
            Value::Long(v) => serializer.serialize_i64(*v),
            Value::Float(v) => serializer.serialize_f32(*v),
            Value::Double(v) => serializer.serialize_f64(*v),
            Value::String(v) => serializer.serialize_str(v),
            Value::Buffer(bytes) => {
                let mut seq = serializer.serialize_seq(Some(bytes.len()))?;
                for b in bytes {
                    seq.serialize_element(b)?;
                }
                seq.end()
            }
            Value::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Map(map) if map.keys().all(|k| k.as_str().is_some()) => {
                let mut out = serializer.serialize_map(Some(map.len()))?;
                for (k, v) in map.iter() {
                    out.serialize_entry(k, v)?;
                }
                out.end()
            }
            // Non-string keys cannot be JSON object keys; emit `[key, value]` pairs.
            Value::Map(map) => {
                let mut seq = serializer.serialize_seq(Some(map.len()))?;
                for pair in map.iter() {
                    seq.serialize_element(&pair)?;
                }
                seq.end()
            }
            Value::Pointer(_) | Value::Function(_) | Value::Future(_) => {
                serializer.serialize_str(&self.to_string())
            }
        }
    }
}

impl Value {
    /// Builds a value from JSON. Integers that fit 32 bits become `Int`, wider
    /// ones `Long`; every other number becomes `Double`.
    pub fn from_json(json: &Json) -> Value {
        match json {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(*b),
            Json::Number(n) => match n.as_i64() {
                Some(i) => i32::try_from(i).map_or(Value::Long(i), Value::Int),
                None => Value::Double(n.as_f64().unwrap_or(f64::NAN)),
            },
            Json::String(s) => Value::String(s.clone()),
            Json::Array(items) => Value::Array(items.iter().map(Value::from_json).collect()),
            Json::Object(fields) => Value::Map(
                fields
                    .iter()
                    .map(|(k, v)| (Value::String(k.clone()), Value::from_json(v)))
                    .collect::<ValueMap>(),
            ),
        }
    }

    pub fn to_json(&self) -> Json {
        serde_json::to_value(self).unwrap_or(Json::Null)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn from_json_picks_narrowest_integer() {
        assert_eq!(Value::from_json(&json!(3)), Value::Int(3));
        assert_eq!(Value::from_json(&json!(1u64 << 40)), Value::Long(1 << 40));
        assert_eq!(Value::from_json(&json!(3.5)), Value::Double(3.5));
    }

    #[test]
    fn objects_keep_field_order() {
        let value = Value::from_json(&json!({"b": 1, "a": [true, null]}));
        assert_eq!(value.to_json(), json!({"b": 1, "a": [true, null]}));
    }

    #[test]
    fn non_string_keys_serialize_as_pairs() {
        let mut map = ValueMap::new();
        map.insert(Value::Int(1), Value::from("one"));
        assert_eq!(Value::Map(map).to_json(), json!([[1, "one"]]));
    }
}
