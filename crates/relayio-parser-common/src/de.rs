use std::io::Cursor;

use bytes::{Buf, Bytes};
use relayio_core::{
    PayloadValue, Str,
    packet::{Packet, PacketData},
    parser::ParseError,
};

/// Deserialize the text part of a packet.
///
/// Returns the packet and, for binary packets, the number of attachments announced by the header.
/// Binary leaves of a binary packet are still placeholders at this point.
pub fn deserialize_packet(data: Str) -> Result<(Packet, Option<usize>), ParseError> {
    if data.is_empty() {
        return Err(ParseError::InvalidPacketType);
    }
    // Separators are ascii only so the header can be read byte by byte
    let mut reader = Cursor::new(data.as_bytes());
    let index = reader.get_u8();
    if !(b'0'..=b'6').contains(&index) {
        return Err(ParseError::InvalidPacketType);
    }

    let attachments = if index == b'5' || index == b'6' {
        Some(read_attachments(&mut reader).ok_or(ParseError::InvalidAttachments)?)
    } else {
        None
    };

    // Custom namespaces start with a slash
    let ns = if reader.has_remaining() && reader.chunk()[0] == b'/' {
        read_nsp(&mut reader, &data)?
    } else {
        Str::from("/")
    };
    let ack = read_ack(&mut reader)?;
    let body = &data.as_str()[reader.position() as usize..];

    let inner = match index {
        b'0' if body.is_empty() => PacketData::Connect(None),
        b'0' => PacketData::Connect(Some(parse_json(body)?)),
        b'1' => PacketData::Disconnect,
        b'2' | b'5' => {
            let (event, args) = read_event(parse_json(body)?)?;
            if index == b'2' {
                PacketData::Event(event, args, ack)
            } else {
                PacketData::BinaryEvent(event, args, ack)
            }
        }
        b'3' | b'6' => {
            let PayloadValue::Array(args) = parse_json(body)? else {
                return Err(ParseError::InvalidData);
            };
            let ack = ack.ok_or(ParseError::InvalidData)?;
            if index == b'3' {
                PacketData::EventAck(args, ack)
            } else {
                PacketData::BinaryAck(args, ack)
            }
        }
        b'4' => PacketData::ConnectError(read_connect_error(parse_json(body)?)?),
        _ => return Err(ParseError::InvalidPacketType),
    };
    Ok((Packet { inner, ns }, attachments))
}

fn parse_json(body: &str) -> Result<PayloadValue, ParseError> {
    serde_json::from_str(body).map_err(ParseError::parser)
}

fn read_event(value: PayloadValue) -> Result<(Str, Vec<PayloadValue>), ParseError> {
    let PayloadValue::Array(mut arr) = value else {
        return Err(ParseError::InvalidData);
    };
    if arr.is_empty() {
        return Err(ParseError::InvalidEventName);
    }
    match arr.remove(0) {
        PayloadValue::String(event) => Ok((Str::from(event), arr)),
        _ => Err(ParseError::InvalidEventName),
    }
}

fn read_connect_error(value: PayloadValue) -> Result<String, ParseError> {
    match value {
        PayloadValue::String(message) => Ok(message),
        PayloadValue::Object(mut obj) => match obj.remove("message") {
            Some(PayloadValue::String(message)) => Ok(message),
            _ => Err(ParseError::InvalidData),
        },
        _ => Err(ParseError::InvalidData),
    }
}

/// Upper bound on the attachment count a binary header may announce.
pub const MAX_ATTACHMENTS: usize = 1024;

fn read_attachments(reader: &mut Cursor<&[u8]>) -> Option<usize> {
    let start = reader.position() as usize;
    while reader.has_remaining() {
        match reader.get_u8() {
            c if c.is_ascii_digit() => (),
            b'-' if reader.position() as usize - 1 > start => {
                let digits = &reader.get_ref()[start..reader.position() as usize - 1];
                let count: usize = std::str::from_utf8(digits).ok()?.parse().ok()?;
                return (count <= MAX_ATTACHMENTS).then_some(count);
            }
            _ => return None,
        }
    }
    None
}

/// Reads the namespace up to the next comma.
/// Some clients omit the comma when nothing follows the namespace, e.g. `1/custom`.
fn read_nsp(reader: &mut Cursor<&[u8]>, data: &Str) -> Result<Str, ParseError> {
    let start = reader.position() as usize;
    let rest = &reader.get_ref()[start..];
    let (end, skip) = match rest.iter().position(|&c| c == b',') {
        Some(i) => (start + i, 1),
        None => (data.len(), 0),
    };
    let nsp = data.slice(start..end);
    if nsp.as_bytes().iter().any(|c| matches!(c, b'[' | b'{' | b'"')) {
        return Err(ParseError::InvalidNamespace);
    }
    reader.set_position((end + skip) as u64);
    Ok(nsp)
}

fn read_ack(reader: &mut Cursor<&[u8]>) -> Result<Option<i64>, ParseError> {
    let start = reader.position() as usize;
    let data = *reader.get_ref();
    let len = data[start..]
        .iter()
        .take_while(|c| c.is_ascii_digit())
        .count();
    if len == 0 {
        return Ok(None);
    }
    let end = start + len;
    // digits must be followed by the json body or end the packet
    if end < data.len() && !matches!(data[end], b'[' | b'{') {
        return Err(ParseError::InvalidData);
    }
    let ack = std::str::from_utf8(&data[start..end])
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(ParseError::InvalidData)?;
    reader.set_position(end as u64);
    Ok(Some(ack))
}

/// Replace every placeholder of the packet with its attachment.
///
/// The placeholders must reference each attachment exactly once.
pub fn reinject_attachments(data: &mut PacketData, attachments: Vec<Bytes>) -> Result<(), ParseError> {
    let mut slots: Vec<Option<Bytes>> = attachments.into_iter().map(Some).collect();
    let args = match data {
        PacketData::BinaryEvent(_, args, _) | PacketData::BinaryAck(args, _) => args,
        _ => return Err(ParseError::InvalidAttachments),
    };
    for arg in args.iter_mut() {
        replace_placeholders(arg, &mut slots)?;
    }
    if slots.iter().any(Option::is_some) {
        return Err(ParseError::InvalidAttachments);
    }
    Ok(())
}

fn replace_placeholders(
    value: &mut PayloadValue,
    slots: &mut [Option<Bytes>],
) -> Result<(), ParseError> {
    match value {
        PayloadValue::Object(obj) if is_placeholder(obj) => {
            let num = obj
                .get("num")
                .and_then(|n| match n {
                    PayloadValue::Number(n) => n.as_u64(),
                    _ => None,
                })
                .ok_or(ParseError::InvalidAttachments)?;
            let slot = usize::try_from(num)
                .ok()
                .and_then(|num| slots.get_mut(num))
                .ok_or(ParseError::InvalidAttachments)?;
            // a taken slot means the index is referenced twice
            *value = PayloadValue::Binary(slot.take().ok_or(ParseError::InvalidAttachments)?);
        }
        PayloadValue::Object(obj) => {
            for item in obj.values_mut() {
                replace_placeholders(item, slots)?;
            }
        }
        PayloadValue::Array(arr) => {
            for item in arr {
                replace_placeholders(item, slots)?;
            }
        }
        _ => {}
    }
    Ok(())
}

fn is_placeholder(obj: &std::collections::BTreeMap<String, PayloadValue>) -> bool {
    obj.len() == 2 && matches!(obj.get("_placeholder"), Some(PayloadValue::Bool(true)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(data: &'static str) -> Result<(Packet, Option<usize>), ParseError> {
        deserialize_packet(Str::from(data))
    }

    #[test]
    fn header_parts() {
        let (packet, attachments) = decode(r#"51-/admin,456["ev",{"_placeholder":true,"num":0}]"#).unwrap();
        assert_eq!(attachments, Some(1));
        assert_eq!(packet.ns, "/admin");
        let PacketData::BinaryEvent(event, args, ack) = packet.inner else {
            panic!("expected a binary event");
        };
        assert_eq!(event, "ev");
        assert_eq!(ack, Some(456));
        assert_eq!(args.len(), 1);
    }

    #[test]
    fn main_namespace_is_implicit() {
        let (packet, _) = decode(r#"2["ev","foo"]"#).unwrap();
        assert_eq!(packet.ns, "/");
        assert_eq!(
            packet.inner,
            PacketData::Event("ev".into(), vec!["foo".into()], None)
        );
    }

    #[test]
    fn namespace_without_trailing_comma() {
        let (packet, _) = decode("1/custom").unwrap();
        assert_eq!(packet.ns, "/custom");
        assert_eq!(packet.inner, PacketData::Disconnect);
    }

    #[test]
    fn connect_with_and_without_auth() {
        let (packet, _) = decode("0/admin,").unwrap();
        assert_eq!(packet.inner, PacketData::Connect(None));
        let (packet, _) = decode(r#"0{"token":"123"}"#).unwrap();
        let PacketData::Connect(Some(auth)) = packet.inner else {
            panic!("expected auth data");
        };
        assert_eq!(auth.get("token"), Some(&"123".into()));
    }

    #[test]
    fn connect_error_message() {
        let (packet, _) = decode(r#"4{"message":"unauthorized"}"#).unwrap();
        assert_eq!(packet.inner, PacketData::ConnectError("unauthorized".into()));
    }

    #[test]
    fn invalid_packets() {
        assert!(matches!(decode(""), Err(ParseError::InvalidPacketType)));
        assert!(matches!(decode("7[]"), Err(ParseError::InvalidPacketType)));
        assert!(matches!(decode("2[1]"), Err(ParseError::InvalidEventName)));
        assert!(matches!(decode("2[]"), Err(ParseError::InvalidEventName)));
        assert!(matches!(decode(r#"3["foo"]"#), Err(ParseError::InvalidData)));
        assert!(matches!(decode(r#"5["ev"]"#), Err(ParseError::InvalidAttachments)));
        assert!(matches!(decode("2[\"ev\""), Err(ParseError::ParserError(_))));
    }

    #[test]
    fn oversized_attachment_count() {
        let res = decode(r#"51000000000000000-["ev"]"#);
        assert!(matches!(res, Err(ParseError::InvalidAttachments)));
        let res = decode(r#"51025-["ev"]"#);
        assert!(matches!(res, Err(ParseError::InvalidAttachments)));
        let (_, attachments) = decode(r#"51024-["ev"]"#).unwrap();
        assert_eq!(attachments, Some(MAX_ATTACHMENTS));
    }

    #[test]
    fn reinject_validates_indexes() {
        let packet = || {
            decode(r#"52-["ev",{"_placeholder":true,"num":1},{"_placeholder":true,"num":0}]"#)
                .unwrap()
                .0
                .inner
        };
        let bins = || vec![Bytes::from_static(b"a"), Bytes::from_static(b"b")];

        let mut data = packet();
        reinject_attachments(&mut data, bins()).unwrap();
        assert_eq!(
            data.args().unwrap(),
            [
                PayloadValue::Binary(Bytes::from_static(b"b")),
                PayloadValue::Binary(Bytes::from_static(b"a"))
            ]
        );

        let mut data = packet();
        let res = reinject_attachments(&mut data, vec![Bytes::from_static(b"a")]);
        assert!(matches!(res, Err(ParseError::InvalidAttachments)));

        let mut data = decode(r#"52-["ev",{"_placeholder":true,"num":0},{"_placeholder":true,"num":0}]"#)
            .unwrap()
            .0
            .inner;
        let res = reinject_attachments(&mut data, bins());
        assert!(matches!(res, Err(ParseError::InvalidAttachments)));
    }
}
