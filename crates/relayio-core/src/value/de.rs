//! A serde [`Deserializer`](de::Deserializer) reading from [`PayloadValue`]s.
use serde::de::{
    self, DeserializeOwned, DeserializeSeed, Deserializer, EnumAccess, IntoDeserializer, Unexpected,
    VariantAccess, Visitor,
    value::{MapDeserializer, SeqDeserializer},
};

use super::{PayloadValue, ValueError};

/// Deserialize a rust value from a [`PayloadValue`].
pub fn from_value<T: DeserializeOwned>(value: PayloadValue) -> Result<T, ValueError> {
    T::deserialize(value)
}

/// Deserialize a rust value from event arguments.
///
/// Tuples read every argument in order. Any other type reads the first argument,
/// or `null` when there is none.
pub fn from_args<T: DeserializeOwned>(args: Vec<PayloadValue>) -> Result<T, ValueError> {
    T::deserialize(ArgsDeserializer(args))
}

impl<'de> IntoDeserializer<'de, ValueError> for PayloadValue {
    type Deserializer = Self;
    fn into_deserializer(self) -> Self {
        self
    }
}

impl PayloadValue {
    fn unexpected(&self) -> Unexpected<'_> {
        match self {
            PayloadValue::Null => Unexpected::Unit,
            PayloadValue::Bool(b) => Unexpected::Bool(*b),
            PayloadValue::Number(n) => match n.as_f64() {
                Some(f) if n.is_f64() => Unexpected::Float(f),
                _ => Unexpected::Other("integer"),
            },
            PayloadValue::String(s) => Unexpected::Str(s),
            PayloadValue::Binary(b) => Unexpected::Bytes(b),
            PayloadValue::Array(_) => Unexpected::Seq,
            PayloadValue::Object(_) => Unexpected::Map,
        }
    }

    fn invalid_type<E: de::Error>(&self, exp: &dyn de::Expected) -> E {
        E::invalid_type(self.unexpected(), exp)
    }
}

fn visit_number<'de, V: Visitor<'de>>(
    n: serde_json::Number,
    visitor: V,
) -> Result<V::Value, ValueError> {
    if let Some(u) = n.as_u64() {
        visitor.visit_u64(u)
    } else if let Some(i) = n.as_i64() {
        visitor.visit_i64(i)
    } else {
        visitor.visit_f64(n.as_f64().unwrap_or(f64::NAN))
    }
}

impl<'de> de::Deserializer<'de> for PayloadValue {
    type Error = ValueError;

    fn deserialize_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, ValueError> {
        match self {
            PayloadValue::Null => visitor.visit_unit(),
            PayloadValue::Bool(b) => visitor.visit_bool(b),
            PayloadValue::Number(n) => visit_number(n, visitor),
            PayloadValue::String(s) => visitor.visit_string(s),
            PayloadValue::Binary(b) => visitor.visit_byte_buf(b.into()),
            PayloadValue::Array(arr) => {
                let mut seq = SeqDeserializer::new(arr.into_iter());
                let value = visitor.visit_seq(&mut seq)?;
                seq.end()?;
                Ok(value)
            }
            PayloadValue::Object(obj) => {
                let mut map = MapDeserializer::new(obj.into_iter());
                let value = visitor.visit_map(&mut map)?;
                map.end()?;
                Ok(value)
            }
        }
    }

    fn deserialize_option<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, ValueError> {
        match self {
            PayloadValue::Null => visitor.visit_none(),
            value => visitor.visit_some(value),
        }
    }

    fn deserialize_newtype_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value, ValueError> {
        visitor.visit_newtype_struct(self)
    }

    /// A binary leaf can also be read as a sequence of bytes, e.g. into a `Vec<u8>`.
    fn deserialize_seq<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, ValueError> {
        match self {
            PayloadValue::Binary(b) => {
                let mut seq = SeqDeserializer::new(b.into_iter());
                let value = visitor.visit_seq(&mut seq)?;
                seq.end()?;
                Ok(value)
            }
            value => value.deserialize_any(visitor),
        }
    }

    fn deserialize_enum<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _variants: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, ValueError> {
        match self {
            PayloadValue::String(variant) => visitor.visit_enum(variant.into_deserializer()),
            PayloadValue::Object(obj) if obj.len() == 1 => {
                let mut iter = obj.into_iter();
                match iter.next() {
                    Some((variant, value)) => visitor.visit_enum(EnumDeserializer { variant, value }),
                    None => Err(de::Error::invalid_length(0, &"exactly one variant")),
                }
            }
            value => Err(value.invalid_type(&"a string or a single key map")),
        }
    }

    serde::forward_to_deserialize_any! {
        bool i8 i16 i32 i64 i128 u8 u16 u32 u64 u128 f32 f64 char str string
        bytes byte_buf unit unit_struct tuple
        tuple_struct map struct identifier ignored_any
    }
}

struct EnumDeserializer {
    variant: String,
    value: PayloadValue,
}

impl<'de> EnumAccess<'de> for EnumDeserializer {
    type Error = ValueError;
    type Variant = PayloadValue;

    fn variant_seed<V: DeserializeSeed<'de>>(
        self,
        seed: V,
    ) -> Result<(V::Value, PayloadValue), ValueError> {
        let variant = seed.deserialize(self.variant.into_deserializer())?;
        Ok((variant, self.value))
    }
}

impl<'de> VariantAccess<'de> for PayloadValue {
    type Error = ValueError;

    fn unit_variant(self) -> Result<(), ValueError> {
        match self {
            PayloadValue::Null => Ok(()),
            value => Err(value.invalid_type(&"unit variant")),
        }
    }

    fn newtype_variant_seed<T: DeserializeSeed<'de>>(
        self,
        seed: T,
    ) -> Result<T::Value, ValueError> {
        seed.deserialize(self)
    }

    fn tuple_variant<V: Visitor<'de>>(
        self,
        _len: usize,
        visitor: V,
    ) -> Result<V::Value, ValueError> {
        de::Deserializer::deserialize_seq(self, visitor)
    }

    fn struct_variant<V: Visitor<'de>>(
        self,
        _fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, ValueError> {
        de::Deserializer::deserialize_map(self, visitor)
    }
}

struct ArgsDeserializer(Vec<PayloadValue>);

impl ArgsDeserializer {
    fn first(self) -> PayloadValue {
        self.0.into_iter().next().unwrap_or_default()
    }
    fn visit_all<'de, V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, ValueError> {
        let mut seq = SeqDeserializer::new(self.0.into_iter());
        let value = visitor.visit_seq(&mut seq)?;
        seq.end()?;
        Ok(value)
    }
}

macro_rules! forward_to_first {
    ($($fn:ident)*) => {
        $(
            fn $fn<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, ValueError> {
                de::Deserializer::$fn(self.first(), visitor)
            }
        )*
    };
}

impl<'de> de::Deserializer<'de> for ArgsDeserializer {
    type Error = ValueError;

    /// Self describing targets get the only argument, or every argument as an array.
    fn deserialize_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, ValueError> {
        if self.0.len() == 1 {
            self.first().deserialize_any(visitor)
        } else {
            PayloadValue::Array(self.0).deserialize_any(visitor)
        }
    }

    fn deserialize_tuple<V: Visitor<'de>>(
        self,
        _len: usize,
        visitor: V,
    ) -> Result<V::Value, ValueError> {
        self.visit_all(visitor)
    }

    fn deserialize_unit<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, ValueError> {
        visitor.visit_unit()
    }

    fn deserialize_unit_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value, ValueError> {
        visitor.visit_unit()
    }

    fn deserialize_tuple_struct<V: Visitor<'de>>(
        self,
        name: &'static str,
        len: usize,
        visitor: V,
    ) -> Result<V::Value, ValueError> {
        de::Deserializer::deserialize_tuple_struct(self.first(), name, len, visitor)
    }

    fn deserialize_newtype_struct<V: Visitor<'de>>(
        self,
        name: &'static str,
        visitor: V,
    ) -> Result<V::Value, ValueError> {
        de::Deserializer::deserialize_newtype_struct(self.first(), name, visitor)
    }

    fn deserialize_struct<V: Visitor<'de>>(
        self,
        name: &'static str,
        fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, ValueError> {
        de::Deserializer::deserialize_struct(self.first(), name, fields, visitor)
    }

    fn deserialize_enum<V: Visitor<'de>>(
        self,
        name: &'static str,
        variants: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, ValueError> {
        de::Deserializer::deserialize_enum(self.first(), name, variants, visitor)
    }

    forward_to_first! {
        deserialize_bool deserialize_i8 deserialize_i16 deserialize_i32 deserialize_i64
        deserialize_u8 deserialize_u16 deserialize_u32 deserialize_u64 deserialize_f32
        deserialize_f64 deserialize_char deserialize_str deserialize_string deserialize_bytes
        deserialize_byte_buf deserialize_option deserialize_seq deserialize_map
        deserialize_identifier deserialize_ignored_any
    }
}
