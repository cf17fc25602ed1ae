//! Database values.
//!
//! `Value` is the wire-neutral representation of a single column value. It
//! doubles as the identifier type for entity identity: the engine keys its
//! identity cache by `(node, Value)`, so `Value` implements `Hash`/`Eq`
//! directly (floats compare by bit pattern, JSON by canonical text).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

/// A single database value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    /// SQL NULL.
    Null,
    /// Boolean.
    Bool(bool),
    /// Any integer type; drivers widen to 64 bits.
    Int(i64),
    /// Any floating point type; drivers widen to 64 bits.
    Float(f64),
    /// Character data.
    Text(String),
    /// Raw binary data.
    Bytes(Vec<u8>),
    /// UUID as 16 raw bytes.
    Uuid([u8; 16]),
    /// JSON document.
    Json(serde_json::Value),
    /// Composite value, used for multi-column identifiers.
    Composite(Vec<Value>),
}

impl Value {
    /// Check whether this value is SQL NULL.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Human-readable name of the variant, for error messages.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::Bytes(_) => "bytes",
            Value::Uuid(_) => "uuid",
            Value::Json(_) => "json",
            Value::Composite(_) => "composite",
        }
    }

    /// Interpret as a boolean, coercing integer 0/1.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Int(0) => Some(false),
            Value::Int(1) => Some(true),
            _ => None,
        }
    }

    /// Interpret as a 64-bit integer.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    /// Interpret as a 64-bit float, widening integers.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Interpret as text.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Wrap an optional value, mapping `None` to NULL.
    pub fn from_option<T: Into<Value>>(opt: Option<T>) -> Value {
        opt.map_or(Value::Null, Into::into)
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            // Bitwise comparison keeps Eq/Hash consistent for NaN and -0.0.
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Uuid(a), Value::Uuid(b)) => a == b,
            (Value::Json(a), Value::Json(b)) => a == b,
            (Value::Composite(a), Value::Composite(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Value::Null => 0u8.hash(state),
            Value::Bool(b) => {
                1u8.hash(state);
                b.hash(state);
            }
            Value::Int(i) => {
                2u8.hash(state);
                i.hash(state);
            }
            Value::Float(f) => {
                3u8.hash(state);
                f.to_bits().hash(state);
            }
            Value::Text(s) => {
                4u8.hash(state);
                s.hash(state);
            }
            Value::Bytes(b) => {
                5u8.hash(state);
                b.hash(state);
            }
            Value::Uuid(u) => {
                6u8.hash(state);
                u.hash(state);
            }
            Value::Json(j) => {
                // serde_json objects iterate in key order, so the rendered
                // text is canonical for equal documents.
                7u8.hash(state);
                j.to_string().hash(state);
            }
            Value::Composite(parts) => {
                8u8.hash(state);
                parts.len().hash(state);
                for part in parts {
                    part.hash(state);
                }
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Text(s) => write!(f, "'{s}'"),
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Value::Uuid(u) => {
                for byte in u {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
            Value::Json(j) => write!(f, "{j}"),
            Value::Composite(parts) => {
                write!(f, "(")?;
                for (i, part) in parts.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{part}")?;
                }
                write!(f, ")")
            }
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Value::Json(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn null_checks() {
        assert!(Value::Null.is_null());
        assert!(!Value::Int(0).is_null());
        assert_eq!(Value::from_option::<i64>(None), Value::Null);
        assert_eq!(Value::from_option(Some(7_i64)), Value::Int(7));
    }

    #[test]
    fn coercions() {
        assert_eq!(Value::Int(1).as_bool(), Some(true));
        assert_eq!(Value::Bool(true).as_i64(), Some(1));
        assert_eq!(Value::Int(3).as_f64(), Some(3.0));
        assert_eq!(Value::Text("x".into()).as_str(), Some("x"));
        assert_eq!(Value::Text("x".into()).as_i64(), None);
    }

    #[test]
    fn values_key_a_map() {
        let mut map = HashMap::new();
        map.insert(Value::Int(1), "one");
        map.insert(Value::Text("a".into()), "a");
        map.insert(Value::Composite(vec![Value::Int(1), Value::Text("a".into())]), "pair");

        assert_eq!(map.get(&Value::Int(1)), Some(&"one"));
        assert_eq!(
            map.get(&Value::Composite(vec![Value::Int(1), Value::Text("a".into())])),
            Some(&"pair")
        );
        assert_eq!(map.get(&Value::Int(2)), None);
    }

    #[test]
    fn float_identity_is_bitwise() {
        assert_eq!(Value::Float(f64::NAN), Value::Float(f64::NAN));
        assert_ne!(Value::Float(0.0), Value::Float(-0.0));
    }

    #[test]
    fn composite_inequality() {
        let a = Value::Composite(vec![Value::Int(1), Value::Text("a".into())]);
        let b = Value::Composite(vec![Value::Int(1), Value::Text("b".into())]);
        assert_ne!(a, b);
    }

    #[test]
    fn display_formats() {
        assert_eq!(Value::Null.to_string(), "NULL");
        assert_eq!(Value::Int(42).to_string(), "42");
        assert_eq!(Value::Text("hi".into()).to_string(), "'hi'");
        assert_eq!(
            Value::Composite(vec![Value::Int(1), Value::Int(2)]).to_string(),
            "(1, 2)"
        );
    }
}
