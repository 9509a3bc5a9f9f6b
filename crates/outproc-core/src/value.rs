//! Bounded schema of values that can cross the channel.
//!
//! Arguments and return values are restricted to [`Value`]: primitives,
//! strings, byte sequences and composite records/lists of those. Hosted types
//! convert their Rust arguments with `TryFrom<Value>` and their results with
//! `From<T> for Value`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::OutprocError;

/// A transmittable value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub enum Value {
    #[default]
    Unit,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Str(String),
    Bytes(#[serde(with = "serde_bytes")] Vec<u8>),
    List(Vec<Value>),
    Record(BTreeMap<String, Value>),
}

impl Value {
    /// Name of the variant, used in mismatch errors and log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Unit => "unit",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::UInt(_) => "uint",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::Bytes(_) => "bytes",
            Value::List(_) => "list",
            Value::Record(_) => "record",
        }
    }

    /// Build a record from `(field, value)` pairs.
    pub fn record<K, I>(fields: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Value::Record(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Look up a field of a record value.
    pub fn field(&self, name: &str) -> Option<&Value> {
        match self {
            Value::Record(fields) => fields.get(name),
            _ => None,
        }
    }

    fn mismatch(expected: &'static str, actual: &Value) -> OutprocError {
        OutprocError::TypeMismatch {
            expected,
            actual: actual.kind(),
        }
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Unit
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::UInt(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::UInt(u64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::List(v)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(v: BTreeMap<String, Value>) -> Self {
        Value::Record(v)
    }
}

impl TryFrom<Value> for () {
    type Error = OutprocError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Unit => Ok(()),
            other => Err(Value::mismatch("unit", &other)),
        }
    }
}

impl TryFrom<Value> for bool {
    type Error = OutprocError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Bool(v) => Ok(v),
            other => Err(Value::mismatch("bool", &other)),
        }
    }
}

impl TryFrom<Value> for i64 {
    type Error = OutprocError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Int(v) => Ok(v),
            Value::UInt(v) => i64::try_from(v).map_err(|_| OutprocError::TypeMismatch {
                expected: "int",
                actual: "uint",
            }),
            other => Err(Value::mismatch("int", &other)),
        }
    }
}

impl TryFrom<Value> for i32 {
    type Error = OutprocError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        let kind = value.kind();
        let wide = i64::try_from(value)?;
        i32::try_from(wide).map_err(|_| OutprocError::TypeMismatch {
            expected: "i32",
            actual: kind,
        })
    }
}

impl TryFrom<Value> for u64 {
    type Error = OutprocError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::UInt(v) => Ok(v),
            Value::Int(v) => u64::try_from(v).map_err(|_| OutprocError::TypeMismatch {
                expected: "uint",
                actual: "int",
            }),
            other => Err(Value::mismatch("uint", &other)),
        }
    }
}

impl TryFrom<Value> for u32 {
    type Error = OutprocError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        let kind = value.kind();
        let wide = u64::try_from(value)?;
        u32::try_from(wide).map_err(|_| OutprocError::TypeMismatch {
            expected: "u32",
            actual: kind,
        })
    }
}

impl TryFrom<Value> for f64 {
    type Error = OutprocError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Float(v) => Ok(v),
            // Integers widen; precision loss above 2^53 is accepted.
            Value::Int(v) => Ok(v as f64),
            Value::UInt(v) => Ok(v as f64),
            other => Err(Value::mismatch("float", &other)),
        }
    }
}

impl TryFrom<Value> for String {
    type Error = OutprocError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Str(v) => Ok(v),
            other => Err(Value::mismatch("str", &other)),
        }
    }
}

impl TryFrom<Value> for Vec<u8> {
    type Error = OutprocError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Bytes(v) => Ok(v),
            other => Err(Value::mismatch("bytes", &other)),
        }
    }
}

impl TryFrom<Value> for Vec<Value> {
    type Error = OutprocError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::List(v) => Ok(v),
            other => Err(Value::mismatch("list", &other)),
        }
    }
}

impl From<Value> for serde_json::Value {
    fn from(value: Value) -> Self {
        match value {
            Value::Unit => serde_json::Value::Null,
            Value::Bool(v) => serde_json::Value::Bool(v),
            Value::Int(v) => serde_json::Value::from(v),
            Value::UInt(v) => serde_json::Value::from(v),
            // Non-finite floats have no JSON form and become null.
            Value::Float(v) => serde_json::Number::from_f64(v)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Str(v) => serde_json::Value::String(v),
            Value::Bytes(v) => {
                serde_json::Value::Array(v.into_iter().map(serde_json::Value::from).collect())
            }
            Value::List(v) => serde_json::Value::Array(v.into_iter().map(Into::into).collect()),
            Value::Record(fields) => serde_json::Value::Object(
                fields.into_iter().map(|(k, v)| (k, v.into())).collect(),
            ),
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Unit,
            serde_json::Value::Bool(v) => Value::Bool(v),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else if let Some(u) = n.as_u64() {
                    Value::UInt(u)
                } else {
                    Value::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Value::Str(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Into::into).collect())
            }
            serde_json::Value::Object(fields) => {
                Value::Record(fields.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
        }
    }
}
