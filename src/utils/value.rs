//! Typed access and coercion over `serde_json::Value`.
//!
//! Node configs and plugin parameters arrive as untyped JSON from the
//! declarative document. Rather than reflecting over arbitrary shapes,
//! flowloom keeps a small closed matrix: each declared data type knows
//! how to coerce the handful of source shapes that can legally carry it
//! (`"42"` into an int, `1` into a bool is rejected, and so on).

use serde_json::{Map, Value};
use std::fmt;

/// The closed set of data types a multi-input parameter or plugin
/// parameter may declare.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DataType {
    String,
    Int,
    Long,
    Double,
    Bool,
    Array,
    Object,
}

impl DataType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::String => "string",
            DataType::Int => "int",
            DataType::Long => "long",
            DataType::Double => "double",
            DataType::Bool => "bool",
            DataType::Array => "array",
            DataType::Object => "object",
        }
    }

    /// Parse the document spelling of a data type.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "string" => Some(DataType::String),
            "int" => Some(DataType::Int),
            "long" => Some(DataType::Long),
            "double" => Some(DataType::Double),
            "bool" | "boolean" => Some(DataType::Bool),
            "array" => Some(DataType::Array),
            "object" => Some(DataType::Object),
            _ => None,
        }
    }

    /// Check whether `value` already satisfies this type, without
    /// coercion.
    #[must_use]
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            DataType::String => value.is_string(),
            DataType::Int | DataType::Long => value.is_i64() || value.is_u64(),
            DataType::Double => value.is_number(),
            DataType::Bool => value.is_boolean(),
            DataType::Array => value.is_array(),
            DataType::Object => value.is_object(),
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error from a failed coercion: names the declared type and the shape
/// that could not carry it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CoercionError {
    pub expected: DataType,
    pub found: &'static str,
}

impl fmt::Display for CoercionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "expected {}, found {}", self.expected, self.found)
    }
}

impl std::error::Error for CoercionError {}

/// Human label for the JSON shape of a value, used in error messages.
#[must_use]
pub fn shape_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Coerce `value` into `target`, handling the bounded matrix of legal
/// source shapes. Strings parse into numbers and booleans; numbers
/// never silently become booleans; arrays and objects only match
/// themselves.
pub fn coerce(value: &Value, target: DataType) -> Result<Value, CoercionError> {
    let err = || CoercionError {
        expected: target,
        found: shape_of(value),
    };
    match target {
        DataType::String => match value {
            Value::String(_) => Ok(value.clone()),
            Value::Number(n) => Ok(Value::String(n.to_string())),
            Value::Bool(b) => Ok(Value::String(b.to_string())),
            _ => Err(err()),
        },
        DataType::Int | DataType::Long => match value {
            Value::Number(n) if n.is_i64() || n.is_u64() => Ok(value.clone()),
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map(Value::from)
                .map_err(|_| err()),
            _ => Err(err()),
        },
        DataType::Double => match value {
            Value::Number(_) => Ok(value.clone()),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .ok_or_else(err),
            _ => Err(err()),
        },
        DataType::Bool => match value {
            Value::Bool(_) => Ok(value.clone()),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                _ => Err(err()),
            },
            _ => Err(err()),
        },
        DataType::Array => match value {
            Value::Array(_) => Ok(value.clone()),
            _ => Err(err()),
        },
        DataType::Object => match value {
            Value::Object(_) => Ok(value.clone()),
            _ => Err(err()),
        },
    }
}

/// Read an optional string field from a config map.
#[must_use]
pub fn opt_str(config: &Map<String, Value>, key: &str) -> Option<String> {
    config.get(key).and_then(Value::as_str).map(str::to_owned)
}

/// Read a string field, falling back to `default` when absent.
#[must_use]
pub fn str_or<'a>(config: &'a Map<String, Value>, key: &str, default: &'a str) -> String {
    config
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or(default)
        .to_owned()
}

/// Read an optional unsigned integer field (accepts JSON numbers only).
#[must_use]
pub fn opt_u64(config: &Map<String, Value>, key: &str) -> Option<u64> {
    config.get(key).and_then(Value::as_u64)
}

/// Read an optional f64 field.
#[must_use]
pub fn opt_f64(config: &Map<String, Value>, key: &str) -> Option<f64> {
    config.get(key).and_then(Value::as_f64)
}

/// Read a bool field, falling back to `default` when absent.
#[must_use]
pub fn bool_or(config: &Map<String, Value>, key: &str, default: bool) -> bool {
    config.get(key).and_then(Value::as_bool).unwrap_or(default)
}

/// Read an optional list of strings (a JSON array whose elements are
/// strings; non-string elements are skipped).
#[must_use]
pub fn opt_string_list(config: &Map<String, Value>, key: &str) -> Vec<String> {
    config
        .get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_owned)
                .collect()
        })
        .unwrap_or_default()
}

/// Loose truthiness used by conditional expressions: `false`, `null`,
/// `0`, `""`, `[]`, and `{}` are false; everything else is true.
#[must_use]
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}
