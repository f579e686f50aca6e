use std::convert::Infallible;

use bytes::Bytes;
use relayio_core::packet::{Packet, PacketData};
use rmp::encode::{self, ByteBuf, RmpWrite, ValueWriteError};

use crate::value::{IntRepr, Integer, TIMESTAMP_EXT_TYPE, Value};

type WriteResult<E> = Result<(), ValueWriteError<E>>;

/// Encode a value, always picking the smallest representation.
pub fn encode(value: &Value) -> Vec<u8> {
    let mut buf = ByteBuf::new();
    infallible(write_value(&mut buf, value));
    buf.into_vec()
}

fn infallible(res: WriteResult<Infallible>) {
    match res {
        Ok(()) => (),
        Err(ValueWriteError::InvalidMarkerWrite(e) | ValueWriteError::InvalidDataWrite(e)) => {
            match e {}
        }
    }
}

fn write_value<W: RmpWrite>(wr: &mut W, value: &Value) -> WriteResult<W::Error> {
    match value {
        Value::Nil => encode::write_nil(wr).map_err(ValueWriteError::InvalidMarkerWrite)?,
        Value::Bool(b) => encode::write_bool(wr, *b).map_err(ValueWriteError::InvalidMarkerWrite)?,
        Value::Integer(Integer(IntRepr::PosInt(n))) => {
            encode::write_uint(wr, *n)?;
        }
        Value::Integer(Integer(IntRepr::NegInt(n))) => {
            encode::write_sint(wr, *n)?;
        }
        Value::F32(f) => encode::write_f32(wr, *f)?,
        Value::F64(f) => encode::write_f64(wr, *f)?,
        Value::String(s) => encode::write_str(wr, s)?,
        Value::Binary(b) => encode::write_bin(wr, b)?,
        Value::Array(arr) => {
            encode::write_array_len(wr, len_u32(arr.len()))?;
            for item in arr {
                write_value(wr, item)?;
            }
        }
        Value::Map(entries) => {
            encode::write_map_len(wr, len_u32(entries.len()))?;
            for (k, v) in entries {
                write_value(wr, k)?;
                write_value(wr, v)?;
            }
        }
        Value::Ext(ty, data) => {
            encode::write_ext_meta(wr, len_u32(data.len()), *ty)?;
            wr.write_bytes(data).map_err(ValueWriteError::InvalidDataWrite)?;
        }
        Value::Timestamp { secs, nanos } => write_timestamp(wr, *secs, *nanos)?,
    }
    Ok(())
}

/// The timestamp extension has a 32, 64 and 96 bit form.
fn write_timestamp<W: RmpWrite>(wr: &mut W, secs: i64, nanos: u32) -> WriteResult<W::Error> {
    let mut data = [0u8; 12];
    let data: &[u8] = if nanos == 0 && (0..=u32::MAX as i64).contains(&secs) {
        data[..4].copy_from_slice(&(secs as u32).to_be_bytes());
        &data[..4]
    } else if (0..1i64 << 34).contains(&secs) {
        let packed = ((nanos as u64) << 34) | secs as u64;
        data[..8].copy_from_slice(&packed.to_be_bytes());
        &data[..8]
    } else {
        data[..4].copy_from_slice(&nanos.to_be_bytes());
        data[4..].copy_from_slice(&secs.to_be_bytes());
        &data
    };
    encode::write_ext_meta(wr, data.len() as u32, TIMESTAMP_EXT_TYPE)?;
    wr.write_bytes(data).map_err(ValueWriteError::InvalidDataWrite)
}

/// Lengths above `u32::MAX` can't be represented and are saturated.
fn len_u32(len: usize) -> u32 {
    u32::try_from(len).unwrap_or(u32::MAX)
}

/// Serialize a packet to a msgpack map: `{ type, nsp, data?, id? }`.
///
/// Binary leaves stay in place as msgpack bin, so binary packets use the plain
/// event and ack types.
pub fn serialize_packet(packet: Packet) -> Bytes {
    let Packet { inner, ns } = packet;
    let (index, data, id) = match inner {
        PacketData::Connect(data) => (0u8, data.map(Value::from), None),
        PacketData::Disconnect => (1, None, None),
        PacketData::Event(event, args, id) | PacketData::BinaryEvent(event, args, id) => {
            let mut arr = Vec::with_capacity(args.len() + 1);
            arr.push(Value::String(event.into()));
            arr.extend(args.into_iter().map(Value::from));
            (2, Some(Value::Array(arr)), id)
        }
        PacketData::EventAck(args, id) | PacketData::BinaryAck(args, id) => {
            let arr = args.into_iter().map(Value::from).collect();
            (3, Some(Value::Array(arr)), Some(id))
        }
        PacketData::ConnectError(message) => {
            let data = Value::Map(vec![("message".into(), Value::String(message))]);
            (4, Some(data), None)
        }
    };

    let mut map = Vec::with_capacity(4);
    map.push(("type".into(), Value::from(index)));
    map.push(("nsp".into(), Value::String(ns.into())));
    if let Some(data) = data {
        map.push(("data".into(), data));
    }
    if let Some(id) = id {
        map.push(("id".into(), Value::from(id)));
    }
    Bytes::from(encode(&Value::Map(map)))
}
