//! [`PayloadValue`] is the dynamic value carried by event, ack and connect packets.
//!
//! It is a json value that may additionally hold binary leaves. Text parsers
//! move those leaves out as attachments, binary parsers encode them natively.
use std::{collections::BTreeMap, fmt};

use bytes::Bytes;
use serde::{
    Deserialize, Deserializer, Serialize, Serializer,
    de::{MapAccess, SeqAccess, Visitor},
    ser::{SerializeMap, SerializeSeq},
};

mod de;
mod ser;

pub use de::{from_args, from_value};
pub use ser::{to_args, to_value};

/// A json-like value with binary leaves.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum PayloadValue {
    /// `null`
    #[default]
    Null,
    /// A boolean
    Bool(bool),
    /// An integer or a float
    Number(serde_json::Number),
    /// A utf8 string
    String(String),
    /// A binary blob
    Binary(Bytes),
    /// An ordered list
    Array(Vec<PayloadValue>),
    /// A string keyed map
    Object(BTreeMap<String, PayloadValue>),
}

/// Error produced when converting between a [`PayloadValue`] and a rust type.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct ValueError(String);

impl serde::ser::Error for ValueError {
    fn custom<T: fmt::Display>(msg: T) -> Self {
        ValueError(msg.to_string())
    }
}
impl serde::de::Error for ValueError {
    fn custom<T: fmt::Display>(msg: T) -> Self {
        ValueError(msg.to_string())
    }
}

impl PayloadValue {
    /// Returns true if any leaf of this value is binary.
    pub fn has_binary(&self) -> bool {
        match self {
            PayloadValue::Binary(_) => true,
            PayloadValue::Array(arr) => arr.iter().any(PayloadValue::has_binary),
            PayloadValue::Object(map) => map.values().any(PayloadValue::has_binary),
            _ => false,
        }
    }

    /// Count the binary leaves of this value.
    pub fn binary_count(&self) -> usize {
        match self {
            PayloadValue::Binary(_) => 1,
            PayloadValue::Array(arr) => arr.iter().map(PayloadValue::binary_count).sum(),
            PayloadValue::Object(map) => map.values().map(PayloadValue::binary_count).sum(),
            _ => 0,
        }
    }

    /// The string value if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PayloadValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// The binary value if this is binary.
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            PayloadValue::Binary(b) => Some(b),
            _ => None,
        }
    }

    /// The items if this is an array.
    pub fn as_array(&self) -> Option<&Vec<PayloadValue>> {
        match self {
            PayloadValue::Array(arr) => Some(arr),
            _ => None,
        }
    }

    /// The entries if this is an object.
    pub fn as_object(&self) -> Option<&BTreeMap<String, PayloadValue>> {
        match self {
            PayloadValue::Object(map) => Some(map),
            _ => None,
        }
    }

    /// Index into an object.
    pub fn get(&self, key: &str) -> Option<&PayloadValue> {
        self.as_object().and_then(|map| map.get(key))
    }

    /// Returns true if this is `null`.
    pub fn is_null(&self) -> bool {
        matches!(self, PayloadValue::Null)
    }
}

impl From<serde_json::Value> for PayloadValue {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::Null => PayloadValue::Null,
            Value::Bool(b) => PayloadValue::Bool(b),
            Value::Number(n) => PayloadValue::Number(n),
            Value::String(s) => PayloadValue::String(s),
            Value::Array(arr) => PayloadValue::Array(arr.into_iter().map(Into::into).collect()),
            Value::Object(map) => {
                PayloadValue::Object(map.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
        }
    }
}

impl From<&str> for PayloadValue {
    fn from(s: &str) -> Self {
        PayloadValue::String(s.to_owned())
    }
}
impl From<String> for PayloadValue {
    fn from(s: String) -> Self {
        PayloadValue::String(s)
    }
}
impl From<bool> for PayloadValue {
    fn from(b: bool) -> Self {
        PayloadValue::Bool(b)
    }
}
impl From<i64> for PayloadValue {
    fn from(n: i64) -> Self {
        PayloadValue::Number(n.into())
    }
}
impl From<u64> for PayloadValue {
    fn from(n: u64) -> Self {
        PayloadValue::Number(n.into())
    }
}
impl From<Bytes> for PayloadValue {
    fn from(b: Bytes) -> Self {
        PayloadValue::Binary(b)
    }
}
impl From<Vec<PayloadValue>> for PayloadValue {
    fn from(arr: Vec<PayloadValue>) -> Self {
        PayloadValue::Array(arr)
    }
}

impl Serialize for PayloadValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            PayloadValue::Null => serializer.serialize_unit(),
            PayloadValue::Bool(b) => serializer.serialize_bool(*b),
            PayloadValue::Number(n) => n.serialize(serializer),
            PayloadValue::String(s) => serializer.serialize_str(s),
            PayloadValue::Binary(b) => serializer.serialize_bytes(b),
            PayloadValue::Array(arr) => {
                let mut seq = serializer.serialize_seq(Some(arr.len()))?;
                for item in arr {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            PayloadValue::Object(obj) => {
                let mut map = serializer.serialize_map(Some(obj.len()))?;
                for (k, v) in obj {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
        }
    }
}

struct PayloadValueVisitor;
impl<'de> Visitor<'de> for PayloadValueVisitor {
    type Value = PayloadValue;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("any json value or binary data")
    }
    fn visit_unit<E>(self) -> Result<Self::Value, E> {
        Ok(PayloadValue::Null)
    }
    fn visit_none<E>(self) -> Result<Self::Value, E> {
        Ok(PayloadValue::Null)
    }
    fn visit_some<D: Deserializer<'de>>(self, d: D) -> Result<Self::Value, D::Error> {
        PayloadValue::deserialize(d)
    }
    fn visit_bool<E>(self, v: bool) -> Result<Self::Value, E> {
        Ok(PayloadValue::Bool(v))
    }
    fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E> {
        Ok(PayloadValue::Number(v.into()))
    }
    fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E> {
        Ok(PayloadValue::Number(v.into()))
    }
    fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E> {
        Ok(serde_json::Number::from_f64(v)
            .map(PayloadValue::Number)
            .unwrap_or(PayloadValue::Null))
    }
    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E> {
        Ok(PayloadValue::String(v.to_owned()))
    }
    fn visit_string<E>(self, v: String) -> Result<Self::Value, E> {
        Ok(PayloadValue::String(v))
    }
    fn visit_bytes<E>(self, v: &[u8]) -> Result<Self::Value, E> {
        Ok(PayloadValue::Binary(Bytes::copy_from_slice(v)))
    }
    fn visit_byte_buf<E>(self, v: Vec<u8>) -> Result<Self::Value, E> {
        Ok(PayloadValue::Binary(Bytes::from(v)))
    }
    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
        let mut arr = Vec::with_capacity(seq.size_hint().unwrap_or(0).min(4096));
        while let Some(item) = seq.next_element()? {
            arr.push(item);
        }
        Ok(PayloadValue::Array(arr))
    }
    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
        let mut map = BTreeMap::new();
        while let Some((k, v)) = access.next_entry::<String, PayloadValue>()? {
            map.insert(k, v);
        }
        Ok(PayloadValue::Object(map))
    }
}

impl<'de> Deserialize<'de> for PayloadValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(PayloadValueVisitor)
    }
}
