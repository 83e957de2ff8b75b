//! Wire-level types shared by both listeners.
//!
//! Every request is one JSON object per line, `{"method": ..., "params":
//! [...]}`, and every reply is either `{"result": ...}` or `{"fault":
//! {"faultCode": ..., "faultString": ...}}`. Queue items are opaque bytes
//! that may not be valid UTF-8, so binary scalars travel as `{"b64": "..."}`
//! wrappers; everything else maps onto plain JSON. The encoding only exists
//! at this boundary, the rest of the daemon works on raw byte strings.

use std::collections::BTreeMap;
use std::fmt;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use serde::de::{self, MapAccess, SeqAccess, Visitor};
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use strum::Display;
use thiserror::Error;

#[cfg(test)]
mod tests;

/// Key marking a base64-wrapped binary scalar.
const BYTES_KEY: &str = "b64";

/// A value crossing the wire in either direction.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Double(f64),
    Str(String),
    Bytes(Vec<u8>),
    Array(Vec<Value>),
    Struct(BTreeMap<String, Value>),
}

impl Value {
    /// Short type name for fault messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "boolean",
            Value::Int(_) => "int",
            Value::Double(_) => "double",
            Value::Str(_) => "string",
            Value::Bytes(_) => "base64",
            Value::Array(_) => "array",
            Value::Struct(_) => "struct",
        }
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

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_owned())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::Array(v)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Bool(v) => serializer.serialize_bool(*v),
            Value::Int(v) => serializer.serialize_i64(*v),
            Value::Double(v) => serializer.serialize_f64(*v),
            Value::Str(v) => serializer.serialize_str(v),
            Value::Bytes(v) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry(BYTES_KEY, &B64.encode(v))?;
                map.end()
            }
            Value::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Struct(fields) => {
                let mut map = serializer.serialize_map(Some(fields.len()))?;
                for (key, value) in fields {
                    map.serialize_entry(key, value)?;
                }
                map.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ValueVisitor;

        impl<'de> Visitor<'de> for ValueVisitor {
            type Value = Value;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a boolean, number, string, array, struct or b64 wrapper")
            }

            fn visit_bool<E>(self, v: bool) -> Result<Value, E> {
                Ok(Value::Bool(v))
            }

            fn visit_i64<E>(self, v: i64) -> Result<Value, E> {
                Ok(Value::Int(v))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Value, E> {
                i64::try_from(v)
                    .map(Value::Int)
                    .map_err(|_| E::custom("integer out of range"))
            }

            fn visit_f64<E>(self, v: f64) -> Result<Value, E> {
                Ok(Value::Double(v))
            }

            fn visit_str<E>(self, v: &str) -> Result<Value, E> {
                Ok(Value::Str(v.to_owned()))
            }

            fn visit_string<E>(self, v: String) -> Result<Value, E> {
                Ok(Value::Str(v))
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Value, A::Error> {
                let mut items = Vec::new();
                while let Some(item) = seq.next_element()? {
                    items.push(item);
                }
                Ok(Value::Array(items))
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Value, A::Error> {
                let Some(first) = map.next_key::<String>()? else {
                    return Ok(Value::Struct(BTreeMap::new()));
                };
                if first == BYTES_KEY {
                    let encoded: String = map.next_value()?;
                    if map.next_key::<String>()?.is_some() {
                        return Err(de::Error::custom("b64 wrapper with extra fields"));
                    }
                    let bytes = B64
                        .decode(&encoded)
                        .map_err(|e| de::Error::custom(format!("bad base64: {e}")))?;
                    return Ok(Value::Bytes(bytes));
                }
                let mut fields = BTreeMap::new();
                fields.insert(first, map.next_value()?);
                while let Some((key, value)) = map.next_entry::<String, Value>()? {
                    fields.insert(key, value);
                }
                Ok(Value::Struct(fields))
            }
        }

        deserializer.deserialize_any(ValueVisitor)
    }
}

/// One call as it arrives off a connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub method: String,
    #[serde(default)]
    pub params: Vec<Value>,
}

/// The reply for one call.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Result(Value),
    Fault(Fault),
}

impl Serialize for Response {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        match self {
            Response::Result(value) => map.serialize_entry("result", value)?,
            Response::Fault(fault) => map.serialize_entry("fault", fault)?,
        }
        map.end()
    }
}

impl Response {
    pub fn into_line(self) -> String {
        // Only string keys and finite-width payloads ever reach this point,
        // so serialization cannot fail.
        serde_json::to_string(&self).unwrap_or_else(|_| {
            r#"{"fault":{"faultCode":-500,"faultString":"unencodable response"}}"#.to_owned()
        })
    }
}

// Fault codes borrowed from xmlrpc-c.
pub const INTERNAL_ERROR: i64 = -500;
pub const TYPE_ERROR: i64 = -501;
pub const INDEX_ERROR: i64 = -502;
pub const PARSE_ERROR: i64 = -503;
pub const NO_SUCH_METHOD_ERROR: i64 = -506;
pub const REQUEST_REFUSED_ERROR: i64 = -507;
pub const INTROSPECTION_DISABLED_ERROR: i64 = -508;
pub const INVALID_UTF8_ERROR: i64 = -510;
/// Generic application fault, used for invalid-argument conditions.
pub const APPLICATION_ERROR: i64 = 1;

/// A structured method failure, serialized verbatim into fault replies and
/// into the per-element fault structs of `system.multicall`.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("{string}")]
pub struct Fault {
    #[serde(rename = "faultCode")]
    pub code: i64,
    #[serde(rename = "faultString")]
    pub string: String,
}

impl Fault {
    pub fn new(code: i64, string: impl Into<String>) -> Self {
        Fault { code, string: string.into() }
    }

    pub fn type_error(msg: impl Into<String>) -> Self {
        Fault::new(TYPE_ERROR, msg)
    }

    pub fn index_error(msg: impl Into<String>) -> Self {
        Fault::new(INDEX_ERROR, msg)
    }

    pub fn parse_error(msg: impl Into<String>) -> Self {
        Fault::new(PARSE_ERROR, msg)
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Fault::new(APPLICATION_ERROR, msg)
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Fault::new(INTERNAL_ERROR, msg)
    }

    pub fn invalid_utf8(msg: impl Into<String>) -> Self {
        Fault::new(INVALID_UTF8_ERROR, msg)
    }

    pub fn no_such_method(name: &str) -> Self {
        Fault::new(NO_SUCH_METHOD_ERROR, format!("Method '{name}' not found"))
    }

    pub fn request_refused(msg: impl Into<String>) -> Self {
        Fault::new(REQUEST_REFUSED_ERROR, msg)
    }

    pub fn introspection_disabled() -> Self {
        Fault::new(
            INTROSPECTION_DISABLED_ERROR,
            "Introspection has been disabled on this server",
        )
    }

    /// The `{faultCode, faultString}` struct used inside multicall results.
    pub fn to_struct(&self) -> Value {
        let mut fields = BTreeMap::new();
        fields.insert("faultCode".to_owned(), Value::Int(self.code));
        fields.insert("faultString".to_owned(), Value::Str(self.string.clone()));
        Value::Struct(fields)
    }
}

/// Type tokens used in method signature vectors, rendered lowercase on the
/// wire (`boolean`, `array`, `base64`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum TypeToken {
    Int,
    Boolean,
    Double,
    String,
    Base64,
    Array,
    Struct,
}
