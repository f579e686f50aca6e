use bytes::{Buf, Bytes};
use relayio_core::{
    PayloadValue, Str,
    packet::{Packet, PacketData},
    parser::ParseError,
};
use rmp::Marker;

use crate::value::{TIMESTAMP_EXT_TYPE, Value};

/// Nesting deeper than this is rejected instead of overflowing the stack.
const MAX_DEPTH: usize = 512;

/// Other implementations might add keys we don't read,
/// but a packet map with more entries than this is rejected.
const MAX_PACKET_KEYS: usize = 20;

/// Errors when decoding a msgpack value.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DecodeError {
    /// The input ends in the middle of a value
    #[error("unexpected end of input")]
    UnexpectedEof,
    /// The never used `0xc1` marker
    #[error("reserved marker")]
    ReservedMarker,
    /// A string that is not valid utf-8
    #[error("invalid utf-8 string")]
    InvalidUtf8,
    /// A timestamp extension with an invalid size or nanoseconds
    #[error("invalid timestamp")]
    InvalidTimestamp,
    /// The value is nested too deeply
    #[error("max nesting depth exceeded")]
    DepthLimitExceeded,
    /// Bytes remain after the value
    #[error("{0} trailing bytes after the value")]
    TrailingBytes(usize),
}

/// Decode exactly one value from `data`.
pub fn decode(mut data: &[u8]) -> Result<Value, DecodeError> {
    let value = read_value(&mut data, 0)?;
    if !data.is_empty() {
        return Err(DecodeError::TrailingBytes(data.len()));
    }
    Ok(value)
}

fn read_value(rd: &mut &[u8], depth: usize) -> Result<Value, DecodeError> {
    if depth > MAX_DEPTH {
        return Err(DecodeError::DepthLimitExceeded);
    }
    let value = match Marker::from_u8(read_u8(rd)?) {
        Marker::Null => Value::Nil,
        Marker::True => Value::Bool(true),
        Marker::False => Value::Bool(false),
        Marker::FixPos(n) => Value::from(n),
        Marker::FixNeg(n) => Value::from(n),
        Marker::U8 => Value::from(read_u8(rd)?),
        Marker::U16 => Value::from(u16::from_be_bytes(read_array(rd)?)),
        Marker::U32 => Value::from(u32::from_be_bytes(read_array(rd)?)),
        Marker::U64 => Value::from(u64::from_be_bytes(read_array(rd)?)),
        Marker::I8 => Value::from(i8::from_be_bytes(read_array(rd)?)),
        Marker::I16 => Value::from(i16::from_be_bytes(read_array(rd)?)),
        Marker::I32 => Value::from(i32::from_be_bytes(read_array(rd)?)),
        Marker::I64 => Value::from(i64::from_be_bytes(read_array(rd)?)),
        Marker::F32 => Value::F32(f32::from_be_bytes(read_array(rd)?)),
        Marker::F64 => Value::F64(f64::from_be_bytes(read_array(rd)?)),
        Marker::FixStr(len) => read_str(rd, len as usize)?,
        Marker::Str8 => {
            let len = read_u8(rd)? as usize;
            read_str(rd, len)?
        }
        Marker::Str16 => {
            let len = read_len16(rd)?;
            read_str(rd, len)?
        }
        Marker::Str32 => {
            let len = read_len32(rd)?;
            read_str(rd, len)?
        }
        Marker::Bin8 => {
            let len = read_u8(rd)? as usize;
            Value::Binary(read_bytes(rd, len)?)
        }
        Marker::Bin16 => {
            let len = read_len16(rd)?;
            Value::Binary(read_bytes(rd, len)?)
        }
        Marker::Bin32 => {
            let len = read_len32(rd)?;
            Value::Binary(read_bytes(rd, len)?)
        }
        Marker::FixArray(len) => read_array_items(rd, len as usize, depth)?,
        Marker::Array16 => {
            let len = read_len16(rd)?;
            read_array_items(rd, len, depth)?
        }
        Marker::Array32 => {
            let len = read_len32(rd)?;
            read_array_items(rd, len, depth)?
        }
        Marker::FixMap(len) => read_map_entries(rd, len as usize, depth)?,
        Marker::Map16 => {
            let len = read_len16(rd)?;
            read_map_entries(rd, len, depth)?
        }
        Marker::Map32 => {
            let len = read_len32(rd)?;
            read_map_entries(rd, len, depth)?
        }
        Marker::FixExt1 => read_ext(rd, 1)?,
        Marker::FixExt2 => read_ext(rd, 2)?,
        Marker::FixExt4 => read_ext(rd, 4)?,
        Marker::FixExt8 => read_ext(rd, 8)?,
        Marker::FixExt16 => read_ext(rd, 16)?,
        Marker::Ext8 => {
            let len = read_u8(rd)? as usize;
            read_ext(rd, len)?
        }
        Marker::Ext16 => {
            let len = read_len16(rd)?;
            read_ext(rd, len)?
        }
        Marker::Ext32 => {
            let len = read_len32(rd)?;
            read_ext(rd, len)?
        }
        Marker::Reserved => return Err(DecodeError::ReservedMarker),
    };
    Ok(value)
}

fn read_u8(rd: &mut &[u8]) -> Result<u8, DecodeError> {
    if !rd.has_remaining() {
        return Err(DecodeError::UnexpectedEof);
    }
    Ok(rd.get_u8())
}

fn read_array<const N: usize>(rd: &mut &[u8]) -> Result<[u8; N], DecodeError> {
    if rd.remaining() < N {
        return Err(DecodeError::UnexpectedEof);
    }
    let mut buf = [0u8; N];
    rd.copy_to_slice(&mut buf);
    Ok(buf)
}

fn read_len16(rd: &mut &[u8]) -> Result<usize, DecodeError> {
    Ok(u16::from_be_bytes(read_array(rd)?) as usize)
}

fn read_len32(rd: &mut &[u8]) -> Result<usize, DecodeError> {
    Ok(u32::from_be_bytes(read_array(rd)?) as usize)
}

fn read_bytes(rd: &mut &[u8], len: usize) -> Result<Bytes, DecodeError> {
    if rd.remaining() < len {
        return Err(DecodeError::UnexpectedEof);
    }
    Ok(rd.copy_to_bytes(len))
}

fn read_str(rd: &mut &[u8], len: usize) -> Result<Value, DecodeError> {
    let data = read_bytes(rd, len)?;
    let s = std::str::from_utf8(&data).map_err(|_| DecodeError::InvalidUtf8)?;
    Ok(Value::String(s.to_string()))
}

/// Each item takes at least one byte, so a length above the remaining input is truncated.
fn read_array_items(rd: &mut &[u8], len: usize, depth: usize) -> Result<Value, DecodeError> {
    let mut items = Vec::with_capacity(len.min(rd.remaining()));
    for _ in 0..len {
        items.push(read_value(rd, depth + 1)?);
    }
    Ok(Value::Array(items))
}

fn read_map_entries(rd: &mut &[u8], len: usize, depth: usize) -> Result<Value, DecodeError> {
    let mut entries = Vec::with_capacity(len.min(rd.remaining() / 2));
    for _ in 0..len {
        let key = read_value(rd, depth + 1)?;
        let value = read_value(rd, depth + 1)?;
        entries.push((key, value));
    }
    Ok(Value::Map(entries))
}

fn read_ext(rd: &mut &[u8], len: usize) -> Result<Value, DecodeError> {
    let ty = read_u8(rd)? as i8;
    let data = read_bytes(rd, len)?;
    if ty != TIMESTAMP_EXT_TYPE {
        return Ok(Value::Ext(ty, data));
    }
    let (secs, nanos) = match data.len() {
        4 => (u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as i64, 0),
        8 => {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&data);
            let packed = u64::from_be_bytes(buf);
            ((packed & ((1 << 34) - 1)) as i64, (packed >> 34) as u32)
        }
        12 => {
            let mut nanos = [0u8; 4];
            nanos.copy_from_slice(&data[..4]);
            let mut secs = [0u8; 8];
            secs.copy_from_slice(&data[4..]);
            (i64::from_be_bytes(secs), u32::from_be_bytes(nanos))
        }
        _ => return Err(DecodeError::InvalidTimestamp),
    };
    if nanos >= 1_000_000_000 {
        return Err(DecodeError::InvalidTimestamp);
    }
    Ok(Value::Timestamp { secs, nanos })
}

/// Deserialize a packet map: `{ type, nsp, data?, id? }`.
pub fn deserialize_packet(buff: &[u8]) -> Result<Packet, ParseError> {
    let Value::Map(entries) = decode(buff).map_err(ParseError::parser)? else {
        return Err(ParseError::InvalidData);
    };
    if entries.is_empty() || entries.len() > MAX_PACKET_KEYS {
        return Err(ParseError::InvalidData);
    }

    let mut index = None;
    let mut nsp = None;
    let mut data = None;
    let mut id = None;
    for (key, value) in entries {
        let Value::String(key) = key else {
            continue;
        };
        match (key.as_str(), value) {
            ("type", Value::Integer(n)) => index = n.as_u64(),
            ("nsp", Value::String(ns)) => nsp = Some(ns),
            ("nsp", _) => return Err(ParseError::InvalidNamespace),
            ("data", value) => data = Some(PayloadValue::try_from(value).map_err(ParseError::parser)?),
            ("id", Value::Integer(n)) => id = Some(n.as_i64().ok_or(ParseError::InvalidData)?),
            ("id", Value::Nil) => id = None,
            ("id", _) => return Err(ParseError::InvalidData),
            _ => (),
        }
    }

    let ns = nsp.map(Str::from).unwrap_or_else(|| Str::from("/"));
    let inner = match index.ok_or(ParseError::InvalidPacketType)? {
        // some implementations omit the data field
        0 => PacketData::Connect(data),
        1 => PacketData::Disconnect,
        2 | 5 => {
            let Some(PayloadValue::Array(mut args)) = data else {
                return Err(ParseError::InvalidData);
            };
            if args.is_empty() {
                return Err(ParseError::InvalidEventName);
            }
            let PayloadValue::String(event) = args.remove(0) else {
                return Err(ParseError::InvalidEventName);
            };
            PacketData::Event(Str::from(event), args, id)
        }
        3 | 6 => {
            let args = match data {
                Some(PayloadValue::Array(args)) => args,
                Some(PayloadValue::Null) | None => Vec::new(),
                Some(_) => return Err(ParseError::InvalidData),
            };
            PacketData::EventAck(args, id.ok_or(ParseError::InvalidData)?)
        }
        4 => {
            let message = match data {
                Some(PayloadValue::String(message)) => message,
                Some(PayloadValue::Object(mut obj)) => match obj.remove("message") {
                    Some(PayloadValue::String(message)) => message,
                    _ => return Err(ParseError::InvalidData),
                },
                _ => return Err(ParseError::InvalidData),
            };
            PacketData::ConnectError(message)
        }
        _ => return Err(ParseError::InvalidPacketType),
    };
    Ok(Packet {
        inner: inner.normalize_binary(),
        ns,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ser::encode, value::Integer};

    fn int(n: i64) -> Value {
        Value::Integer(Integer::from(n))
    }

    fn round_trip(value: Value) {
        let encoded = encode(&value);
        assert_eq!(decode(&encoded), Ok(value));
    }

    #[test]
    fn round_trip_every_family() {
        for n in [
            0,
            127,
            128,
            255,
            256,
            65535,
            65536,
            u32::MAX as i64,
            1 << 53,
            i64::MAX,
            -1,
            -32,
            -33,
            -128,
            -129,
            -32768,
            -32769,
            i32::MIN as i64,
            -(1 << 53) - 1,
            i64::MIN,
        ] {
            round_trip(int(n));
        }
        round_trip(Value::from(u64::MAX));
        round_trip(Value::Nil);
        round_trip(Value::Bool(true));
        round_trip(Value::Bool(false));
        round_trip(Value::F32(1.5));
        round_trip(Value::F64(-0.1));
        round_trip(Value::F64(f64::NAN));
        round_trip(Value::F64(f64::INFINITY));
        for len in [0, 31, 32, 255, 256, 65535, 65536] {
            round_trip(Value::String("é".repeat(len / 2) + &"a".repeat(len % 2)));
            round_trip(Value::Binary(Bytes::from(vec![7u8; len])));
        }
        for len in [0, 15, 16, 65536] {
            round_trip(Value::Array(vec![Value::Nil; len]));
            round_trip(Value::Map((0..len).map(|i| (int(i as i64), Value::Nil)).collect()));
        }
        for len in [1, 2, 4, 8, 16, 3, 255, 256, 65536] {
            round_trip(Value::Ext(42, Bytes::from(vec![1u8; len])));
        }
        for (secs, nanos) in [(0, 0), (u32::MAX as i64, 0), (1, 999_999_999), (-1, 5), (1 << 40, 1)] {
            round_trip(Value::Timestamp { secs, nanos });
        }
    }

    #[test]
    fn nested_round_trip() {
        round_trip(Value::Map(vec![
            (
                "a".into(),
                Value::Array(vec![int(-5), Value::Binary(Bytes::from_static(&[1]))]),
            ),
            (int(3), Value::Map(vec![("b".into(), Value::F64(2.0))])),
        ]));
    }

    #[test]
    fn decode_errors() {
        assert_eq!(decode(&[]), Err(DecodeError::UnexpectedEof));
        assert_eq!(decode(&[0xc1]), Err(DecodeError::ReservedMarker));
        assert_eq!(decode(&[0x01, 0x02]), Err(DecodeError::TrailingBytes(1)));
        assert_eq!(decode(&[0xa2, b'a']), Err(DecodeError::UnexpectedEof));
        assert_eq!(decode(&[0xa1, 0xff]), Err(DecodeError::InvalidUtf8));
        assert_eq!(decode(&[0xdd, 0xff, 0xff, 0xff, 0xff]), Err(DecodeError::UnexpectedEof));
        assert_eq!(decode(&[0xd5, 0xff, 0, 0]), Err(DecodeError::InvalidTimestamp));
        let deep = vec![0x91; MAX_DEPTH + 2];
        assert_eq!(decode(&deep), Err(DecodeError::DepthLimitExceeded));
    }

    #[test]
    fn packet_without_type() {
        let data = encode(&Value::Map(vec![("nsp".into(), "/".into())]));
        assert!(matches!(
            deserialize_packet(&data),
            Err(ParseError::InvalidPacketType)
        ));
    }
}
