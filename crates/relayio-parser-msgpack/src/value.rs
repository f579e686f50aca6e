//! A MessagePack value and its conversions from and to [`PayloadValue`].
use std::collections::BTreeMap;

use bytes::Bytes;
use relayio_core::PayloadValue;
use serde::Serialize;

use crate::{de, ser};

/// The ext type reserved by msgpack for timestamps.
pub const TIMESTAMP_EXT_TYPE: i8 = -1;

/// Any MessagePack value.
///
/// Floats compare by their bit pattern, so that a decoded NaN equals the encoded one.
#[derive(Debug, Clone)]
pub enum Value {
    /// `nil`
    Nil,
    /// `true` or `false`
    Bool(bool),
    /// Any integer from the fixint, uint or int families
    Integer(Integer),
    /// A float32
    F32(f32),
    /// A float64
    F64(f64),
    /// A utf-8 string
    String(String),
    /// A binary blob
    Binary(Bytes),
    /// An array of values
    Array(Vec<Value>),
    /// A map, in its encoded order
    Map(Vec<(Value, Value)>),
    /// An application specific extension
    Ext(i8, Bytes),
    /// The timestamp extension (type `-1`)
    Timestamp {
        /// Seconds since the unix epoch
        secs: i64,
        /// Nanoseconds, lower than 1e9
        nanos: u32,
    },
}

/// A msgpack integer.
///
/// Non negative integers are always held unsigned so that every integer has a single representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Integer(pub(crate) IntRepr);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum IntRepr {
    PosInt(u64),
    NegInt(i64),
}

impl Integer {
    /// The integer as an `i64`, if it fits.
    pub fn as_i64(self) -> Option<i64> {
        match self.0 {
            IntRepr::PosInt(n) => i64::try_from(n).ok(),
            IntRepr::NegInt(n) => Some(n),
        }
    }

    /// The integer as an `u64`, if it is not negative.
    pub fn as_u64(self) -> Option<u64> {
        match self.0 {
            IntRepr::PosInt(n) => Some(n),
            IntRepr::NegInt(_) => None,
        }
    }
}

impl From<u64> for Integer {
    fn from(n: u64) -> Self {
        Integer(IntRepr::PosInt(n))
    }
}

impl From<i64> for Integer {
    fn from(n: i64) -> Self {
        match u64::try_from(n) {
            Ok(n) => Integer(IntRepr::PosInt(n)),
            Err(_) => Integer(IntRepr::NegInt(n)),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        use Value::*;
        match (self, other) {
            (Nil, Nil) => true,
            (Bool(a), Bool(b)) => a == b,
            (Integer(a), Integer(b)) => a == b,
            (F32(a), F32(b)) => a.to_bits() == b.to_bits(),
            (F64(a), F64(b)) => a.to_bits() == b.to_bits(),
            (String(a), String(b)) => a == b,
            (Binary(a), Binary(b)) => a == b,
            (Array(a), Array(b)) => a == b,
            (Map(a), Map(b)) => a == b,
            (Ext(ta, a), Ext(tb, b)) => ta == tb && a == b,
            (
                Timestamp { secs, nanos },
                Timestamp {
                    secs: secs2,
                    nanos: nanos2,
                },
            ) => secs == secs2 && nanos == nanos2,
            _ => false,
        }
    }
}

macro_rules! impl_from_int {
    ($($t:ty => $via:ty),*) => {
        $(impl From<$t> for Value {
            fn from(n: $t) -> Self {
                Value::Integer(Integer::from(n as $via))
            }
        })*
    };
}
impl_from_int!(u8 => u64, u16 => u64, u32 => u64, u64 => u64, i8 => i64, i16 => i64, i32 => i64, i64 => i64);

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}
impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}
impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}
impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::F64(f)
    }
}
impl From<Bytes> for Value {
    fn from(b: Bytes) -> Self {
        Value::Binary(b)
    }
}

impl Value {
    /// Encode the value with the smallest representation of each item.
    pub fn encode(&self) -> Vec<u8> {
        ser::encode(self)
    }

    /// Decode a single value. Trailing bytes are an error.
    pub fn decode(data: &[u8]) -> Result<Value, de::DecodeError> {
        de::decode(data)
    }

    /// Serialize any rust value to a msgpack value, structs being written as maps.
    pub fn from_serialize<T: ?Sized + Serialize>(data: &T) -> Result<Value, ValueError> {
        let data = rmp_serde::to_vec_named(data)?;
        Ok(de::decode(&data)?)
    }
}

/// Errors when converting to or from a [`Value`].
#[derive(Debug, thiserror::Error)]
pub enum ValueError {
    /// The rust value could not be serialized
    #[error("serialization error: {0}")]
    Serialize(#[from] rmp_serde::encode::Error),
    /// The serialized bytes could not be read back
    #[error("decode error: {0}")]
    Decode(#[from] de::DecodeError),
    /// A map key that can't be used as an object key
    #[error("unsupported map key: {0:?}")]
    MapKey(Value),
}

/// Serialize any rust value to a msgpack value. See [`Value::from_serialize`].
pub fn to_value<T: ?Sized + Serialize>(data: &T) -> Result<Value, ValueError> {
    Value::from_serialize(data)
}

impl From<PayloadValue> for Value {
    fn from(value: PayloadValue) -> Self {
        match value {
            PayloadValue::Null => Value::Nil,
            PayloadValue::Bool(b) => Value::Bool(b),
            PayloadValue::Number(n) => {
                if let Some(n) = n.as_u64() {
                    Value::Integer(n.into())
                } else if let Some(n) = n.as_i64() {
                    Value::Integer(n.into())
                } else {
                    Value::F64(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            PayloadValue::String(s) => Value::String(s),
            PayloadValue::Binary(b) => Value::Binary(b),
            PayloadValue::Array(arr) => Value::Array(arr.into_iter().map(Value::from).collect()),
            PayloadValue::Object(obj) => Value::Map(
                obj.into_iter()
                    .map(|(k, v)| (Value::String(k), Value::from(v)))
                    .collect(),
            ),
        }
    }
}

impl TryFrom<Value> for PayloadValue {
    type Error = ValueError;

    /// Map keys must be strings or numbers, numbers being stringified.
    /// Extensions become binary blobs except the `undefined` marker of js clients,
    /// and timestamps become milliseconds since the unix epoch.
    fn try_from(value: Value) -> Result<Self, Self::Error> {
        let value = match value {
            Value::Nil => PayloadValue::Null,
            Value::Bool(b) => PayloadValue::Bool(b),
            Value::Integer(n) => match n.0 {
                IntRepr::PosInt(n) => PayloadValue::Number(n.into()),
                IntRepr::NegInt(n) => PayloadValue::Number(n.into()),
            },
            Value::F32(f) => float(f as f64),
            Value::F64(f) => float(f),
            Value::String(s) => PayloadValue::String(s),
            Value::Binary(b) => PayloadValue::Binary(b),
            Value::Array(arr) => PayloadValue::Array(
                arr.into_iter()
                    .map(PayloadValue::try_from)
                    .collect::<Result<_, _>>()?,
            ),
            Value::Map(entries) => {
                let mut obj = BTreeMap::new();
                for (k, v) in entries {
                    let key = match k {
                        Value::String(s) => s,
                        Value::Integer(Integer(IntRepr::PosInt(n))) => n.to_string(),
                        Value::Integer(Integer(IntRepr::NegInt(n))) => n.to_string(),
                        Value::F64(f) => f.to_string(),
                        Value::F32(f) => f.to_string(),
                        key => return Err(ValueError::MapKey(key)),
                    };
                    obj.insert(key, PayloadValue::try_from(v)?);
                }
                PayloadValue::Object(obj)
            }
            // js clients write `undefined` as a zeroed fixext1
            Value::Ext(0, data) if data.as_ref() == [0] => PayloadValue::Null,
            Value::Ext(_, data) => PayloadValue::Binary(data),
            Value::Timestamp { secs, nanos } => {
                let millis = secs.saturating_mul(1000).saturating_add((nanos / 1_000_000) as i64);
                PayloadValue::Number(millis.into())
            }
        };
        Ok(value)
    }
}

fn float(f: f64) -> PayloadValue {
    serde_json::Number::from_f64(f)
        .map(PayloadValue::Number)
        .unwrap_or(PayloadValue::Null)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integers_are_normalized() {
        assert_eq!(Value::from(5i64), Value::from(5u8));
        assert_ne!(Value::from(-5i64), Value::from(5u64));
        assert_eq!(Integer::from(-1i64).as_u64(), None);
        assert_eq!(Integer::from(u64::MAX).as_i64(), None);
    }

    #[test]
    fn nan_equals_itself() {
        assert_eq!(Value::F64(f64::NAN), Value::F64(f64::NAN));
        assert_ne!(Value::F64(1.0), Value::F32(1.0));
    }

    #[test]
    fn from_serialize_writes_structs_as_maps() {
        #[derive(Serialize)]
        struct Foo {
            a: u8,
            b: &'static str,
        }
        let value = to_value(&Foo { a: 1, b: "x" }).unwrap();
        assert_eq!(
            value,
            Value::Map(vec![("a".into(), 1u8.into()), ("b".into(), "x".into())])
        );
    }

    #[test]
    fn payload_value_conversion() {
        let value = Value::Map(vec![
            (1u8.into(), Value::Ext(0, Bytes::from_static(&[0]))),
            ("bin".into(), Value::Binary(Bytes::from_static(&[1, 2]))),
            (
                "date".into(),
                Value::Timestamp {
                    secs: 2,
                    nanos: 5_000_000,
                },
            ),
        ]);
        let payload = PayloadValue::try_from(value).unwrap();
        assert_eq!(payload.get("1"), Some(&PayloadValue::Null));
        assert_eq!(
            payload.get("bin"),
            Some(&PayloadValue::Binary(Bytes::from_static(&[1, 2])))
        );
        assert_eq!(payload.get("date"), Some(&PayloadValue::from(2005i64)));

        let err = PayloadValue::try_from(Value::Map(vec![(Value::Nil, Value::Nil)]));
        assert!(matches!(err, Err(ValueError::MapKey(Value::Nil))));
    }
}
