use std::collections::BTreeMap;

use bytes::{BufMut, Bytes, BytesMut};
use relayio_core::{
    PayloadValue, Str,
    packet::{Packet, PacketData},
    parser::Encoded,
};

/// Serialize a packet to the text format, moving its binary leaves out as attachments.
///
/// Events and acks are promoted to their binary variant when they hold binary leaves,
/// and demoted to the plain one when they don't.
pub fn serialize_packet(packet: Packet) -> Encoded {
    let Packet { inner, ns } = packet;
    let mut attachments = Vec::new();

    // the json body and the packet type digit
    let (index, ack, body) = match inner {
        PacketData::Connect(data) => (b'0', None, data),
        PacketData::Disconnect => (b'1', None, None),
        PacketData::Event(event, args, ack) | PacketData::BinaryEvent(event, args, ack) => {
            let mut arr = Vec::with_capacity(args.len() + 1);
            arr.push(PayloadValue::String(event.into()));
            arr.extend(args);
            let mut body = PayloadValue::Array(arr);
            extract_binaries(&mut body, &mut attachments);
            let index = if attachments.is_empty() { b'2' } else { b'5' };
            (index, ack, Some(body))
        }
        PacketData::EventAck(args, ack) | PacketData::BinaryAck(args, ack) => {
            let mut body = PayloadValue::Array(args);
            extract_binaries(&mut body, &mut attachments);
            let index = if attachments.is_empty() { b'3' } else { b'6' };
            (index, Some(ack), Some(body))
        }
        PacketData::ConnectError(message) => {
            let mut obj = BTreeMap::new();
            obj.insert("message".to_string(), PayloadValue::String(message));
            (b'4', None, Some(PayloadValue::Object(obj)))
        }
    };

    // a body without binary leaves always serializes
    let json = body
        .as_ref()
        .and_then(|body| serde_json::to_vec(body).ok())
        .unwrap_or_default();

    let mut buffer = BytesMut::with_capacity(get_size_hint(&ns, ack, attachments.len(), &json));
    buffer.put_u8(index);
    if !attachments.is_empty() {
        serialize_attachments(&mut buffer, attachments.len());
    }
    serialize_nsp(&mut buffer, &ns);
    serialize_ack(&mut buffer, ack);
    buffer.put_slice(&json);

    // SAFETY: the buffer only holds ascii chars, the namespace str and serde_json output
    let data = unsafe { Str::from_bytes_unchecked(buffer.freeze()) };
    Encoded::Str(data, attachments)
}

/// Replace every binary leaf with a `{"_placeholder":true,"num":<index>}` object,
/// depth-first and pre-order, collecting the leaves in that order.
fn extract_binaries(value: &mut PayloadValue, attachments: &mut Vec<Bytes>) {
    match value {
        PayloadValue::Binary(data) => {
            let data = std::mem::take(data);
            *value = placeholder(attachments.len());
            attachments.push(data);
        }
        PayloadValue::Array(arr) => {
            for item in arr {
                extract_binaries(item, attachments);
            }
        }
        PayloadValue::Object(obj) => {
            for item in obj.values_mut() {
                extract_binaries(item, attachments);
            }
        }
        _ => {}
    }
}

fn placeholder(num: usize) -> PayloadValue {
    let mut obj = BTreeMap::new();
    obj.insert("_placeholder".to_string(), PayloadValue::Bool(true));
    obj.insert("num".to_string(), PayloadValue::Number((num as u64).into()));
    PayloadValue::Object(obj)
}

fn serialize_attachments(buffer: &mut BytesMut, attachments: usize) {
    let mut itoa_buf = itoa::Buffer::new();
    buffer.put_slice(itoa_buf.format(attachments).as_bytes());
    buffer.put_u8(b'-');
}

/// The namespace is omitted for the main namespace.
fn serialize_nsp(buffer: &mut BytesMut, nsp: &str) {
    if !nsp.is_empty() && nsp != "/" {
        if !nsp.starts_with('/') {
            buffer.put_u8(b'/');
        }
        buffer.put_slice(nsp.as_bytes());
        buffer.put_u8(b',');
    }
}

fn serialize_ack(buffer: &mut BytesMut, ack: Option<i64>) {
    if let Some(ack) = ack {
        let mut itoa_buf = itoa::Buffer::new();
        buffer.put_slice(itoa_buf.format(ack).as_bytes());
    }
}

fn get_size_hint(ns: &str, ack: Option<i64>, attachments: usize, json: &[u8]) -> usize {
    const PACKET_INDEX_SIZE: usize = 1;
    const DIGITS_MAX: usize = 20;
    let nsp_size = if ns == "/" { 0 } else { ns.len() + 2 };
    let ack_size = ack.map(|_| DIGITS_MAX).unwrap_or(0);
    let attachments_size = if attachments > 0 { DIGITS_MAX + 1 } else { 0 };
    PACKET_INDEX_SIZE + attachments_size + nsp_size + ack_size + json.len()
}
