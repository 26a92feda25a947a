//! Canonical value model for content hashing.
//!
//! Payloads are reduced to a [`CanonicalValue`] and written with a single
//! encoder: mapping keys sorted by code point, no insignificant whitespace,
//! `,` and `:` as separators. Two payloads that differ only in key order or
//! formatting therefore encode to the same bytes.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use crate::error::SerializationError;

mod ser;

/// Numeric leaf. Integers and floats are kept apart so `1` and `1.0` encode
/// differently, matching how JSON producers emit them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CanonicalNumber {
    Int(i64),
    UInt(u64),
    /// Always finite; see [`CanonicalValue::float`].
    Float(f64),
}

#[derive(Debug, Clone, PartialEq)]
pub enum CanonicalValue {
    Null,
    Bool(bool),
    Number(CanonicalNumber),
    String(String),
    Sequence(Vec<CanonicalValue>),
    Mapping(BTreeMap<String, CanonicalValue>),
}

impl CanonicalValue {
    /// Build a float leaf, rejecting NaN and infinities.
    pub fn float(value: f64) -> Result<Self, SerializationError> {
        if value.is_finite() {
            Ok(Self::Number(CanonicalNumber::Float(value)))
        } else {
            Err(SerializationError::NonFiniteNumber(value))
        }
    }

    /// Canonicalize any `Serialize` value.
    ///
    /// Fails for non-finite floats and for map keys that are neither strings
    /// nor integers.
    pub fn from_serialize<T: Serialize + ?Sized>(value: &T) -> Result<Self, SerializationError> {
        value.serialize(ser::CanonicalSerializer)
    }

    /// Compact, key-sorted encoding.
    pub fn to_canonical_string(&self) -> String {
        let mut out = String::new();
        self.write_canonical(&mut out);
        out
    }

    pub fn write_canonical(&self, out: &mut String) {
        match self {
            Self::Null => out.push_str("null"),
            Self::Bool(true) => out.push_str("true"),
            Self::Bool(false) => out.push_str("false"),
            Self::Number(number) => write_number(*number, out),
            Self::String(s) => write_string(s, out),
            Self::Sequence(items) => {
                out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    item.write_canonical(out);
                }
                out.push(']');
            }
            Self::Mapping(entries) => {
                out.push('{');
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    write_string(key, out);
                    out.push(':');
                    value.write_canonical(out);
                }
                out.push('}');
            }
        }
    }

    /// Convert back into a `serde_json::Value` (for storage next to manifests).
    pub fn to_json(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Bool(b) => Value::Bool(*b),
            Self::Number(CanonicalNumber::Int(n)) => Value::from(*n),
            Self::Number(CanonicalNumber::UInt(n)) => Value::from(*n),
            Self::Number(CanonicalNumber::Float(f)) => Value::from(*f),
            Self::String(s) => Value::String(s.clone()),
            Self::Sequence(items) => Value::Array(items.iter().map(Self::to_json).collect()),
            Self::Mapping(entries) => Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }
}

impl From<&Value> for CanonicalValue {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Self::Number(CanonicalNumber::Int(i))
                } else if let Some(u) = n.as_u64() {
                    Self::Number(CanonicalNumber::UInt(u))
                } else {
                    // serde_json never stores non-finite floats
                    Self::Number(CanonicalNumber::Float(n.as_f64().unwrap_or_default()))
                }
            }
            Value::String(s) => Self::String(s.clone()),
            Value::Array(items) => Self::Sequence(items.iter().map(Self::from).collect()),
            Value::Object(map) => Self::Mapping(
                map.iter()
                    .map(|(k, v)| (k.clone(), Self::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<Value> for CanonicalValue {
    fn from(value: Value) -> Self {
        Self::from(&value)
    }
}

impl From<&str> for CanonicalValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for CanonicalValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<bool> for CanonicalValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for CanonicalValue {
    fn from(value: i64) -> Self {
        Self::Number(CanonicalNumber::Int(value))
    }
}

impl From<i32> for CanonicalValue {
    fn from(value: i32) -> Self {
        Self::Number(CanonicalNumber::Int(i64::from(value)))
    }
}

impl From<u64> for CanonicalValue {
    fn from(value: u64) -> Self {
        match i64::try_from(value) {
            Ok(v) => Self::Number(CanonicalNumber::Int(v)),
            Err(_) => Self::Number(CanonicalNumber::UInt(value)),
        }
    }
}

fn write_number(number: CanonicalNumber, out: &mut String) {
    match number {
        CanonicalNumber::Int(n) => out.push_str(&n.to_string()),
        CanonicalNumber::UInt(n) => out.push_str(&n.to_string()),
        CanonicalNumber::Float(f) => match serde_json::Number::from_f64(f) {
            Some(n) => out.push_str(&n.to_string()),
            None => out.push_str("null"),
        },
    }
}

/// JSON string literal with serde_json's escaping.
fn write_string(s: &str, out: &mut String) {
    out.push_str(&Value::from(s).to_string());
}
