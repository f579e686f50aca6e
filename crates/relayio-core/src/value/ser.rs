//! A serde [`Serializer`](ser::Serializer) producing [`PayloadValue`]s.
//!
//! Byte slices and buffers serialized through `serialize_bytes` become
//! [`PayloadValue::Binary`] leaves.
use std::collections::BTreeMap;

use bytes::Bytes;
use serde::ser::{
    self, Impossible, Serialize, SerializeMap, SerializeSeq, SerializeStruct,
    SerializeStructVariant, SerializeTuple, SerializeTupleStruct, SerializeTupleVariant,
};

use super::{PayloadValue, ValueError};

/// Serialize any rust value into a [`PayloadValue`].
pub fn to_value<T: ?Sized + Serialize>(data: &T) -> Result<PayloadValue, ValueError> {
    data.serialize(ValueSerializer)
}

/// Serialize any rust value into a list of event arguments.
///
/// A top level tuple is spread into several arguments and `()` produces no
/// argument at all. Anything else is a single argument.
pub fn to_args<T: ?Sized + Serialize>(data: &T) -> Result<Vec<PayloadValue>, ValueError> {
    data.serialize(ArgsSerializer)
}

struct ValueSerializer;

fn number(n: impl Into<serde_json::Number>) -> PayloadValue {
    PayloadValue::Number(n.into())
}

impl ser::Serializer for ValueSerializer {
    type Ok = PayloadValue;
    type Error = ValueError;

    type SerializeSeq = SerializeVec;
    type SerializeTuple = SerializeVec;
    type SerializeTupleStruct = SerializeVec;
    type SerializeTupleVariant = SerializeTupleVariantValue;
    type SerializeMap = SerializeObject;
    type SerializeStruct = SerializeObject;
    type SerializeStructVariant = SerializeStructVariantValue;

    fn serialize_bool(self, v: bool) -> Result<PayloadValue, ValueError> {
        Ok(PayloadValue::Bool(v))
    }
    fn serialize_i8(self, v: i8) -> Result<PayloadValue, ValueError> {
        Ok(number(v))
    }
    fn serialize_i16(self, v: i16) -> Result<PayloadValue, ValueError> {
        Ok(number(v))
    }
    fn serialize_i32(self, v: i32) -> Result<PayloadValue, ValueError> {
        Ok(number(v))
    }
    fn serialize_i64(self, v: i64) -> Result<PayloadValue, ValueError> {
        Ok(number(v))
    }
    fn serialize_u8(self, v: u8) -> Result<PayloadValue, ValueError> {
        Ok(number(v))
    }
    fn serialize_u16(self, v: u16) -> Result<PayloadValue, ValueError> {
        Ok(number(v))
    }
    fn serialize_u32(self, v: u32) -> Result<PayloadValue, ValueError> {
        Ok(number(v))
    }
    fn serialize_u64(self, v: u64) -> Result<PayloadValue, ValueError> {
        Ok(number(v))
    }
    fn serialize_f32(self, v: f32) -> Result<PayloadValue, ValueError> {
        self.serialize_f64(v as f64)
    }
    fn serialize_f64(self, v: f64) -> Result<PayloadValue, ValueError> {
        // NaN and infinities have no json representation
        Ok(serde_json::Number::from_f64(v)
            .map(PayloadValue::Number)
            .unwrap_or(PayloadValue::Null))
    }
    fn serialize_char(self, v: char) -> Result<PayloadValue, ValueError> {
        Ok(PayloadValue::String(v.to_string()))
    }
    fn serialize_str(self, v: &str) -> Result<PayloadValue, ValueError> {
        Ok(PayloadValue::String(v.to_owned()))
    }
    fn serialize_bytes(self, v: &[u8]) -> Result<PayloadValue, ValueError> {
        Ok(PayloadValue::Binary(Bytes::copy_from_slice(v)))
    }
    fn serialize_none(self) -> Result<PayloadValue, ValueError> {
        Ok(PayloadValue::Null)
    }
    fn serialize_some<T: ?Sized + Serialize>(self, value: &T) -> Result<PayloadValue, ValueError> {
        value.serialize(self)
    }
    fn serialize_unit(self) -> Result<PayloadValue, ValueError> {
        Ok(PayloadValue::Null)
    }
    fn serialize_unit_struct(self, _name: &'static str) -> Result<PayloadValue, ValueError> {
        Ok(PayloadValue::Null)
    }
    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
    ) -> Result<PayloadValue, ValueError> {
        Ok(PayloadValue::String(variant.to_owned()))
    }
    fn serialize_newtype_struct<T: ?Sized + Serialize>(
        self,
        _name: &'static str,
        value: &T,
    ) -> Result<PayloadValue, ValueError> {
        value.serialize(self)
    }
    fn serialize_newtype_variant<T: ?Sized + Serialize>(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
        value: &T,
    ) -> Result<PayloadValue, ValueError> {
        let mut obj = BTreeMap::new();
        obj.insert(variant.to_owned(), to_value(value)?);
        Ok(PayloadValue::Object(obj))
    }
    fn serialize_seq(self, len: Option<usize>) -> Result<SerializeVec, ValueError> {
        Ok(SerializeVec {
            vec: Vec::with_capacity(len.unwrap_or(0)),
        })
    }
    fn serialize_tuple(self, len: usize) -> Result<SerializeVec, ValueError> {
        self.serialize_seq(Some(len))
    }
    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        len: usize,
    ) -> Result<SerializeVec, ValueError> {
        self.serialize_seq(Some(len))
    }
    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
        len: usize,
    ) -> Result<SerializeTupleVariantValue, ValueError> {
        Ok(SerializeTupleVariantValue {
            name: variant,
            vec: Vec::with_capacity(len),
        })
    }
    fn serialize_map(self, _len: Option<usize>) -> Result<SerializeObject, ValueError> {
        Ok(SerializeObject {
            map: BTreeMap::new(),
            next_key: None,
        })
    }
    fn serialize_struct(
        self,
        _name: &'static str,
        len: usize,
    ) -> Result<SerializeObject, ValueError> {
        self.serialize_map(Some(len))
    }
    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
        _len: usize,
    ) -> Result<SerializeStructVariantValue, ValueError> {
        Ok(SerializeStructVariantValue {
            name: variant,
            map: BTreeMap::new(),
        })
    }
}

struct SerializeVec {
    vec: Vec<PayloadValue>,
}
struct SerializeTupleVariantValue {
    name: &'static str,
    vec: Vec<PayloadValue>,
}
struct SerializeObject {
    map: BTreeMap<String, PayloadValue>,
    next_key: Option<String>,
}
struct SerializeStructVariantValue {
    name: &'static str,
    map: BTreeMap<String, PayloadValue>,
}

impl SerializeSeq for SerializeVec {
    type Ok = PayloadValue;
    type Error = ValueError;

    fn serialize_element<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), ValueError> {
        self.vec.push(to_value(value)?);
        Ok(())
    }
    fn end(self) -> Result<PayloadValue, ValueError> {
        Ok(PayloadValue::Array(self.vec))
    }
}
impl SerializeTuple for SerializeVec {
    type Ok = PayloadValue;
    type Error = ValueError;

    fn serialize_element<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), ValueError> {
        SerializeSeq::serialize_element(self, value)
    }
    fn end(self) -> Result<PayloadValue, ValueError> {
        SerializeSeq::end(self)
    }
}
impl SerializeTupleStruct for SerializeVec {
    type Ok = PayloadValue;
    type Error = ValueError;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), ValueError> {
        SerializeSeq::serialize_element(self, value)
    }
    fn end(self) -> Result<PayloadValue, ValueError> {
        SerializeSeq::end(self)
    }
}
impl SerializeTupleVariant for SerializeTupleVariantValue {
    type Ok = PayloadValue;
    type Error = ValueError;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), ValueError> {
        self.vec.push(to_value(value)?);
        Ok(())
    }
    fn end(self) -> Result<PayloadValue, ValueError> {
        let mut obj = BTreeMap::new();
        obj.insert(self.name.to_owned(), PayloadValue::Array(self.vec));
        Ok(PayloadValue::Object(obj))
    }
}
impl SerializeMap for SerializeObject {
    type Ok = PayloadValue;
    type Error = ValueError;

    fn serialize_key<T: ?Sized + Serialize>(&mut self, key: &T) -> Result<(), ValueError> {
        self.next_key = Some(key.serialize(KeySerializer)?);
        Ok(())
    }
    fn serialize_value<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), ValueError> {
        let key = self
            .next_key
            .take()
            .ok_or_else(|| <ValueError as ser::Error>::custom("value without a key"))?;
        self.map.insert(key, to_value(value)?);
        Ok(())
    }
    fn end(self) -> Result<PayloadValue, ValueError> {
        Ok(PayloadValue::Object(self.map))
    }
}
impl SerializeStruct for SerializeObject {
    type Ok = PayloadValue;
    type Error = ValueError;

    fn serialize_field<T: ?Sized + Serialize>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> Result<(), ValueError> {
        self.map.insert(key.to_owned(), to_value(value)?);
        Ok(())
    }
    fn end(self) -> Result<PayloadValue, ValueError> {
        SerializeMap::end(self)
    }
}
impl SerializeStructVariant for SerializeStructVariantValue {
    type Ok = PayloadValue;
    type Error = ValueError;

    fn serialize_field<T: ?Sized + Serialize>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> Result<(), ValueError> {
        self.map.insert(key.to_owned(), to_value(value)?);
        Ok(())
    }
    fn end(self) -> Result<PayloadValue, ValueError> {
        let mut obj = BTreeMap::new();
        obj.insert(self.name.to_owned(), PayloadValue::Object(self.map));
        Ok(PayloadValue::Object(obj))
    }
}

/// Map keys must be strings. Numbers and chars are stringified like json does.
struct KeySerializer;

fn key_must_be_a_string() -> ValueError {
    <ValueError as ser::Error>::custom("map key must be a string")
}

impl ser::Serializer for KeySerializer {
    type Ok = String;
    type Error = ValueError;

    type SerializeSeq = Impossible<String, ValueError>;
    type SerializeTuple = Impossible<String, ValueError>;
    type SerializeTupleStruct = Impossible<String, ValueError>;
    type SerializeTupleVariant = Impossible<String, ValueError>;
    type SerializeMap = Impossible<String, ValueError>;
    type SerializeStruct = Impossible<String, ValueError>;
    type SerializeStructVariant = Impossible<String, ValueError>;

    fn serialize_bool(self, v: bool) -> Result<String, ValueError> {
        Ok(v.to_string())
    }
    fn serialize_i8(self, v: i8) -> Result<String, ValueError> {
        Ok(v.to_string())
    }
    fn serialize_i16(self, v: i16) -> Result<String, ValueError> {
        Ok(v.to_string())
    }
    fn serialize_i32(self, v: i32) -> Result<String, ValueError> {
        Ok(v.to_string())
    }
    fn serialize_i64(self, v: i64) -> Result<String, ValueError> {
        Ok(v.to_string())
    }
    fn serialize_u8(self, v: u8) -> Result<String, ValueError> {
        Ok(v.to_string())
    }
    fn serialize_u16(self, v: u16) -> Result<String, ValueError> {
        Ok(v.to_string())
    }
    fn serialize_u32(self, v: u32) -> Result<String, ValueError> {
        Ok(v.to_string())
    }
    fn serialize_u64(self, v: u64) -> Result<String, ValueError> {
        Ok(v.to_string())
    }
    fn serialize_f32(self, _v: f32) -> Result<String, ValueError> {
        Err(key_must_be_a_string())
    }
    fn serialize_f64(self, _v: f64) -> Result<String, ValueError> {
        Err(key_must_be_a_string())
    }
    fn serialize_char(self, v: char) -> Result<String, ValueError> {
        Ok(v.to_string())
    }
    fn serialize_str(self, v: &str) -> Result<String, ValueError> {
        Ok(v.to_owned())
    }
    fn serialize_bytes(self, _v: &[u8]) -> Result<String, ValueError> {
        Err(key_must_be_a_string())
    }
    fn serialize_none(self) -> Result<String, ValueError> {
        Err(key_must_be_a_string())
    }
    fn serialize_some<T: ?Sized + Serialize>(self, value: &T) -> Result<String, ValueError> {
        value.serialize(self)
    }
    fn serialize_unit(self) -> Result<String, ValueError> {
        Err(key_must_be_a_string())
    }
    fn serialize_unit_struct(self, _name: &'static str) -> Result<String, ValueError> {
        Err(key_must_be_a_string())
    }
    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
    ) -> Result<String, ValueError> {
        Ok(variant.to_owned())
    }
    fn serialize_newtype_struct<T: ?Sized + Serialize>(
        self,
        _name: &'static str,
        value: &T,
    ) -> Result<String, ValueError> {
        value.serialize(self)
    }
    fn serialize_newtype_variant<T: ?Sized + Serialize>(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _value: &T,
    ) -> Result<String, ValueError> {
        Err(key_must_be_a_string())
    }
    fn serialize_seq(self, _len: Option<usize>) -> Result<Self::SerializeSeq, ValueError> {
        Err(key_must_be_a_string())
    }
    fn serialize_tuple(self, _len: usize) -> Result<Self::SerializeTuple, ValueError> {
        Err(key_must_be_a_string())
    }
    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeTupleStruct, ValueError> {
        Err(key_must_be_a_string())
    }
    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeTupleVariant, ValueError> {
        Err(key_must_be_a_string())
    }
    fn serialize_map(self, _len: Option<usize>) -> Result<Self::SerializeMap, ValueError> {
        Err(key_must_be_a_string())
    }
    fn serialize_struct(
        self,
        _name: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeStruct, ValueError> {
        Err(key_must_be_a_string())
    }
    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeStructVariant, ValueError> {
        Err(key_must_be_a_string())
    }
}

/// The root serializer of [`to_args`]. Every value becomes a single argument
/// except tuples and `()`.
struct ArgsSerializer;

/// Wraps a compound serializer of [`ValueSerializer`] and turns its output into arguments.
struct ArgsCompound<C> {
    inner: C,
    spread: bool,
}

impl<C> ArgsCompound<C> {
    fn single(inner: C) -> Self {
        ArgsCompound {
            inner,
            spread: false,
        }
    }
}

macro_rules! single_arg {
    ($($fn:ident($ty:ty)),* $(,)?) => {
        $(
            fn $fn(self, v: $ty) -> Result<Vec<PayloadValue>, ValueError> {
                Ok(vec![ValueSerializer.$fn(v)?])
            }
        )*
    };
}

impl ser::Serializer for ArgsSerializer {
    type Ok = Vec<PayloadValue>;
    type Error = ValueError;

    type SerializeSeq = ArgsCompound<SerializeVec>;
    type SerializeTuple = ArgsCompound<SerializeVec>;
    type SerializeTupleStruct = ArgsCompound<SerializeVec>;
    type SerializeTupleVariant = ArgsCompound<SerializeTupleVariantValue>;
    type SerializeMap = ArgsCompound<SerializeObject>;
    type SerializeStruct = ArgsCompound<SerializeObject>;
    type SerializeStructVariant = ArgsCompound<SerializeStructVariantValue>;

    single_arg!(
        serialize_bool(bool),
        serialize_i8(i8),
        serialize_i16(i16),
        serialize_i32(i32),
        serialize_i64(i64),
        serialize_u8(u8),
        serialize_u16(u16),
        serialize_u32(u32),
        serialize_u64(u64),
        serialize_f32(f32),
        serialize_f64(f64),
        serialize_char(char),
        serialize_str(&str),
        serialize_bytes(&[u8]),
    );

    fn serialize_none(self) -> Result<Vec<PayloadValue>, ValueError> {
        Ok(vec![PayloadValue::Null])
    }
    fn serialize_some<T: ?Sized + Serialize>(
        self,
        value: &T,
    ) -> Result<Vec<PayloadValue>, ValueError> {
        Ok(vec![to_value(value)?])
    }
    fn serialize_unit(self) -> Result<Vec<PayloadValue>, ValueError> {
        Ok(Vec::new())
    }
    fn serialize_unit_struct(self, name: &'static str) -> Result<Vec<PayloadValue>, ValueError> {
        Ok(vec![ValueSerializer.serialize_unit_struct(name)?])
    }
    fn serialize_unit_variant(
        self,
        name: &'static str,
        variant_index: u32,
        variant: &'static str,
    ) -> Result<Vec<PayloadValue>, ValueError> {
        Ok(vec![ValueSerializer.serialize_unit_variant(
            name,
            variant_index,
            variant,
        )?])
    }
    fn serialize_newtype_struct<T: ?Sized + Serialize>(
        self,
        _name: &'static str,
        value: &T,
    ) -> Result<Vec<PayloadValue>, ValueError> {
        Ok(vec![to_value(value)?])
    }
    fn serialize_newtype_variant<T: ?Sized + Serialize>(
        self,
        name: &'static str,
        variant_index: u32,
        variant: &'static str,
        value: &T,
    ) -> Result<Vec<PayloadValue>, ValueError> {
        Ok(vec![ValueSerializer.serialize_newtype_variant(
            name,
            variant_index,
            variant,
            value,
        )?])
    }
    fn serialize_seq(self, len: Option<usize>) -> Result<Self::SerializeSeq, ValueError> {
        Ok(ArgsCompound::single(ValueSerializer.serialize_seq(len)?))
    }
    fn serialize_tuple(self, len: usize) -> Result<Self::SerializeTuple, ValueError> {
        Ok(ArgsCompound {
            inner: ValueSerializer.serialize_tuple(len)?,
            spread: true,
        })
    }
    fn serialize_tuple_struct(
        self,
        name: &'static str,
        len: usize,
    ) -> Result<Self::SerializeTupleStruct, ValueError> {
        Ok(ArgsCompound::single(
            ValueSerializer.serialize_tuple_struct(name, len)?,
        ))
    }
    fn serialize_tuple_variant(
        self,
        name: &'static str,
        variant_index: u32,
        variant: &'static str,
        len: usize,
    ) -> Result<Self::SerializeTupleVariant, ValueError> {
        Ok(ArgsCompound::single(ValueSerializer.serialize_tuple_variant(
            name,
            variant_index,
            variant,
            len,
        )?))
    }
    fn serialize_map(self, len: Option<usize>) -> Result<Self::SerializeMap, ValueError> {
        Ok(ArgsCompound::single(ValueSerializer.serialize_map(len)?))
    }
    fn serialize_struct(
        self,
        name: &'static str,
        len: usize,
    ) -> Result<Self::SerializeStruct, ValueError> {
        Ok(ArgsCompound::single(
            ValueSerializer.serialize_struct(name, len)?,
        ))
    }
    fn serialize_struct_variant(
        self,
        name: &'static str,
        variant_index: u32,
        variant: &'static str,
        len: usize,
    ) -> Result<Self::SerializeStructVariant, ValueError> {
        Ok(ArgsCompound::single(ValueSerializer.serialize_struct_variant(
            name,
            variant_index,
            variant,
            len,
        )?))
    }
}

impl SerializeSeq for ArgsCompound<SerializeVec> {
    type Ok = Vec<PayloadValue>;
    type Error = ValueError;

    fn serialize_element<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), ValueError> {
        SerializeSeq::serialize_element(&mut self.inner, value)
    }
    fn end(self) -> Result<Vec<PayloadValue>, ValueError> {
        let value = SerializeSeq::end(self.inner)?;
        Ok(vec![value])
    }
}
impl SerializeTuple for ArgsCompound<SerializeVec> {
    type Ok = Vec<PayloadValue>;
    type Error = ValueError;

    fn serialize_element<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), ValueError> {
        SerializeSeq::serialize_element(&mut self.inner, value)
    }
    fn end(self) -> Result<Vec<PayloadValue>, ValueError> {
        match SerializeSeq::end(self.inner)? {
            PayloadValue::Array(args) if self.spread => Ok(args),
            value => Ok(vec![value]),
        }
    }
}
impl SerializeTupleStruct for ArgsCompound<SerializeVec> {
    type Ok = Vec<PayloadValue>;
    type Error = ValueError;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), ValueError> {
        SerializeSeq::serialize_element(&mut self.inner, value)
    }
    fn end(self) -> Result<Vec<PayloadValue>, ValueError> {
        Ok(vec![SerializeSeq::end(self.inner)?])
    }
}
impl SerializeTupleVariant for ArgsCompound<SerializeTupleVariantValue> {
    type Ok = Vec<PayloadValue>;
    type Error = ValueError;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), ValueError> {
        self.inner.serialize_field(value)
    }
    fn end(self) -> Result<Vec<PayloadValue>, ValueError> {
        Ok(vec![self.inner.end()?])
    }
}
impl SerializeMap for ArgsCompound<SerializeObject> {
    type Ok = Vec<PayloadValue>;
    type Error = ValueError;

    fn serialize_key<T: ?Sized + Serialize>(&mut self, key: &T) -> Result<(), ValueError> {
        self.inner.serialize_key(key)
    }
    fn serialize_value<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), ValueError> {
        self.inner.serialize_value(value)
    }
    fn end(self) -> Result<Vec<PayloadValue>, ValueError> {
        Ok(vec![SerializeMap::end(self.inner)?])
    }
}
impl SerializeStruct for ArgsCompound<SerializeObject> {
    type Ok = Vec<PayloadValue>;
    type Error = ValueError;

    fn serialize_field<T: ?Sized + Serialize>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> Result<(), ValueError> {
        SerializeStruct::serialize_field(&mut self.inner, key, value)
    }
    fn end(self) -> Result<Vec<PayloadValue>, ValueError> {
        Ok(vec![SerializeMap::end(self.inner)?])
    }
}
impl SerializeStructVariant for ArgsCompound<SerializeStructVariantValue> {
    type Ok = Vec<PayloadValue>;
    type Error = ValueError;

    fn serialize_field<T: ?Sized + Serialize>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> Result<(), ValueError> {
        self.inner.serialize_field(key, value)
    }
    fn end(self) -> Result<Vec<PayloadValue>, ValueError> {
        Ok(vec![self.inner.end()?])
    }
}

#[cfg(test)]
mod tests {
    use serde::Serialize;

    use super::*;

    #[derive(Serialize)]
    struct Data {
        name: &'static str,
        #[serde(with = "serde_bytes_like")]
        file: Vec<u8>,
    }

    mod serde_bytes_like {
        pub fn serialize<S: serde::Serializer>(v: &[u8], s: S) -> Result<S::Ok, S::Error> {
            s.serialize_bytes(v)
        }
    }

    #[test]
    fn bytes_become_binary() {
        let value = to_value(&Data {
            name: "foo",
            file: vec![1, 2, 3],
        })
        .unwrap();
        assert_eq!(
            value.get("file").unwrap(),
            &PayloadValue::Binary(Bytes::from_static(&[1, 2, 3]))
        );
        assert_eq!(value.get("name").unwrap(), &PayloadValue::from("foo"));
        assert_eq!(
            to_value(&Bytes::from_static(b"abc")).unwrap(),
            PayloadValue::Binary(Bytes::from_static(b"abc"))
        );
    }

    #[test]
    fn tuples_are_spread() {
        assert_eq!(to_args(&()).unwrap(), vec![]);
        assert_eq!(to_args(&"foo").unwrap(), vec![PayloadValue::from("foo")]);
        assert_eq!(
            to_args(&(1, "foo")).unwrap(),
            vec![PayloadValue::Number(1.into()), PayloadValue::from("foo")]
        );
        assert_eq!(
            to_args(&vec![1, 2]).unwrap(),
            vec![PayloadValue::Array(vec![
                PayloadValue::Number(1.into()),
                PayloadValue::Number(2.into())
            ])]
        );
        // nested tuples stay arrays
        assert_eq!(
            to_args(&((1, 2),)).unwrap(),
            vec![PayloadValue::Array(vec![
                PayloadValue::Number(1.into()),
                PayloadValue::Number(2.into())
            ])]
        );
    }

    #[test]
    fn enum_variants() {
        #[derive(Serialize)]
        enum Msg {
            Unit,
            Pair(u8, u8),
        }
        assert_eq!(to_value(&Msg::Unit).unwrap(), PayloadValue::from("Unit"));
        let value = to_value(&Msg::Pair(1, 2)).unwrap();
        assert!(value.get("Pair").unwrap().as_array().is_some());
    }
}
