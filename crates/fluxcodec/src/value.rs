//! # Values
//!
//! The dynamic value model that crosses the proxy boundary, and the type
//! descriptors that say what a method expects back.
//!
//! ## Invariants
//! - **Recursion Safety**: `TypeDesc::conform` is bounded by `MAX_RECURSION_DEPTH`.
//! - **Lossless Widening Only**: conformance widens `Int` to `Float` and
//!   byte-valued lists to `Bytes`; it never narrows or parses.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::de::MapAccess;
use serde::de::SeqAccess;
use serde::de::Visitor;
use serde::ser::SerializeMap;
use serde::ser::SerializeSeq;
use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use serde::Serializer;

use crate::error::Error;
use crate::error::Result;

/// The maximum nesting depth accepted while conforming a value.
pub const MAX_RECURSION_DEPTH: usize = 64;

/// A dynamically typed argument or result.
///
/// Maps keep insertion order; structural hashing depends on it.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Map(Vec<(String, Value)>),
}

impl Value {
    /// Short name of the variant, used in mismatch errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_list(&self) -> bool {
        matches!(self, Value::List(_))
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self { Value::Bool(b) => Some(*b), _ => None }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self { Value::Int(i) => Some(*i), _ => None }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self { Value::String(s) => Some(s), _ => None }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self { Value::List(items) => Some(items), _ => None }
    }

    /// First entry under `key` when this is a map.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Map(entries) => entries.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    /// Builds a map value from `(key, value)` pairs.
    pub fn map<K: Into<String>>(entries: impl IntoIterator<Item = (K, Value)>) -> Self {
        Value::Map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Converts any serializable type into a `Value`.
    pub fn from_serialize<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        let json = serde_json::to_value(value).map_err(Error::convert)?;
        Value::deserialize(json).map_err(Error::convert)
    }

    /// Converts this value into any deserializable type.
    pub fn deserialize_into<T: DeserializeOwned>(&self) -> Result<T> {
        let json = serde_json::to_value(self).map_err(Error::convert)?;
        serde_json::from_value(json).map_err(Error::convert)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self { Value::Bool(v) }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self { Value::Int(v) }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self { Value::Int(v.into()) }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self { Value::Float(v) }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self { Value::String(v.to_string()) }
}

impl From<String> for Value {
    fn from(v: String) -> Self { Value::String(v) }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self { Value::List(v) }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::String(s) => write!(f, "{s:?}"),
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Value::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 { f.write_str(", ")?; }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Value::Map(entries) => {
                f.write_str("{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 { f.write_str(", ")?; }
                    write!(f, "{k:?}: {v}")?;
                }
                f.write_str("}")
            }
        }
    }
}

// ============================================================================
//  SERDE
// ============================================================================

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::Float(x) => serializer.serialize_f64(*x),
            Value::String(s) => serializer.serialize_str(s),
            Value::Bytes(b) => serializer.serialize_bytes(b),
            Value::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Map(entries) => {
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (k, v) in entries {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
        }
    }
}

struct ValueVisitor;

impl<'de> Visitor<'de> for ValueVisitor {
    type Value = Value;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("any self-describing value")
    }

    fn visit_bool<E: serde::de::Error>(self, v: bool) -> std::result::Result<Value, E> { Ok(Value::Bool(v)) }
    fn visit_i64<E: serde::de::Error>(self, v: i64) -> std::result::Result<Value, E> { Ok(Value::Int(v)) }

    fn visit_u64<E: serde::de::Error>(self, v: u64) -> std::result::Result<Value, E> {
        // Out-of-range unsigned values degrade to floats rather than wrapping.
        Ok(i64::try_from(v).map_or(Value::Float(v as f64), Value::Int))
    }

    fn visit_f64<E: serde::de::Error>(self, v: f64) -> std::result::Result<Value, E> { Ok(Value::Float(v)) }
    fn visit_str<E: serde::de::Error>(self, v: &str) -> std::result::Result<Value, E> { Ok(Value::String(v.to_string())) }
    fn visit_string<E: serde::de::Error>(self, v: String) -> std::result::Result<Value, E> { Ok(Value::String(v)) }
    fn visit_bytes<E: serde::de::Error>(self, v: &[u8]) -> std::result::Result<Value, E> { Ok(Value::Bytes(v.to_vec())) }
    fn visit_byte_buf<E: serde::de::Error>(self, v: Vec<u8>) -> std::result::Result<Value, E> { Ok(Value::Bytes(v)) }
    fn visit_unit<E: serde::de::Error>(self) -> std::result::Result<Value, E> { Ok(Value::Null) }
    fn visit_none<E: serde::de::Error>(self) -> std::result::Result<Value, E> { Ok(Value::Null) }

    fn visit_some<D: Deserializer<'de>>(self, d: D) -> std::result::Result<Value, D::Error> {
        Value::deserialize(d)
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> std::result::Result<Value, A::Error> {
        let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0).min(1024));
        while let Some(item) = seq.next_element()? {
            items.push(item);
        }
        Ok(Value::List(items))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<Value, A::Error> {
        let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0).min(1024));
        while let Some((k, v)) = map.next_entry::<Value, Value>()? {
            let key = match k {
                Value::String(s) => s,
                Value::Int(i) => i.to_string(),
                Value::Bool(b) => b.to_string(),
                other => {
                    return Err(serde::de::Error::custom(format!("unsupported map key of kind {}", other.kind())));
                }
            };
            entries.push((key, v));
        }
        Ok(Value::Map(entries))
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        d.deserialize_any(ValueVisitor)
    }
}

// ============================================================================
//  TYPE DESCRIPTORS
// ============================================================================

/// The declared shape of a parameter or return element.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum TypeDesc {
    /// Accepts any value unchanged.
    #[default]
    Any,
    Unit,
    Bool,
    Int,
    Float,
    String,
    Bytes,
    List(Box<TypeDesc>),
    /// String-keyed map with homogeneous values.
    Map(Box<TypeDesc>),
    /// `Null` or the inner type.
    Optional(Box<TypeDesc>),
}

impl TypeDesc {
    pub fn list(inner: TypeDesc) -> Self { TypeDesc::List(Box::new(inner)) }
    pub fn map(inner: TypeDesc) -> Self { TypeDesc::Map(Box::new(inner)) }
    pub fn optional(inner: TypeDesc) -> Self { TypeDesc::Optional(Box::new(inner)) }

    /// Checks `value` against this type, applying lossless widenings.
    ///
    /// # Errors
    /// Returns `Error::TypeMismatch` on a shape mismatch and
    /// `Error::RecursionLimitExceeded` past `MAX_RECURSION_DEPTH`.
    pub fn conform(&self, value: Value) -> Result<Value> {
        self.conform_impl(value, 0)
    }

    fn conform_impl(&self, value: Value, depth: usize) -> Result<Value> {
        if depth > MAX_RECURSION_DEPTH {
            return Err(Error::RecursionLimitExceeded);
        }
        match (self, value) {
            (TypeDesc::Any, v) => Ok(v),
            (TypeDesc::Unit, Value::Null) => Ok(Value::Null),
            (TypeDesc::Bool, v @ Value::Bool(_)) => Ok(v),
            (TypeDesc::Int, v @ Value::Int(_)) => Ok(v),
            (TypeDesc::Float, v @ Value::Float(_)) => Ok(v),
            (TypeDesc::Float, Value::Int(i)) => Ok(Value::Float(i as f64)),
            (TypeDesc::String, v @ Value::String(_)) => Ok(v),
            (TypeDesc::Bytes, v @ Value::Bytes(_)) => Ok(v),
            // Text formats carry bytes as arrays of small integers.
            (TypeDesc::Bytes, Value::List(items)) => items
                .iter()
                .map(|i| match i {
                    Value::Int(b) => u8::try_from(*b).ok(),
                    _ => None,
                })
                .collect::<Option<Vec<u8>>>()
                .map(Value::Bytes)
                .ok_or_else(|| self.mismatch("list")),
            (TypeDesc::List(inner), Value::List(items)) => items
                .into_iter()
                .map(|item| inner.conform_impl(item, depth + 1))
                .collect::<Result<Vec<_>>>()
                .map(Value::List),
            (TypeDesc::Map(inner), Value::Map(entries)) => entries
                .into_iter()
                .map(|(k, v)| Ok((k, inner.conform_impl(v, depth + 1)?)))
                .collect::<Result<Vec<_>>>()
                .map(Value::Map),
            (TypeDesc::Optional(_), Value::Null) => Ok(Value::Null),
            (TypeDesc::Optional(inner), v) => inner.conform_impl(v, depth + 1),
            (_, v) => Err(self.mismatch(v.kind())),
        }
    }

    fn mismatch(&self, found: &'static str) -> Error {
        Error::TypeMismatch { expected: self.to_string(), found }
    }
}

impl fmt::Display for TypeDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeDesc::Any => f.write_str("any"),
            TypeDesc::Unit => f.write_str("unit"),
            TypeDesc::Bool => f.write_str("bool"),
            TypeDesc::Int => f.write_str("int"),
            TypeDesc::Float => f.write_str("float"),
            TypeDesc::String => f.write_str("string"),
            TypeDesc::Bytes => f.write_str("bytes"),
            TypeDesc::List(t) => write!(f, "list<{t}>"),
            TypeDesc::Map(t) => write!(f, "map<{t}>"),
            TypeDesc::Optional(t) => write!(f, "option<{t}>"),
        }
    }
}
