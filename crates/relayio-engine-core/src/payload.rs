//! Payload framing for the polling transport: packets joined by a record separator.
use crate::{Packet, PacketParseError, Str};

/// Separator between two packets of a payload.
pub const PACKET_SEPARATOR: u8 = 0x1e;

/// Encode packets into a payload. Binary packets are always base64 encoded.
pub fn encode_payload(packets: impl IntoIterator<Item = Packet>) -> String {
    let mut data = String::new();
    for packet in packets {
        if !data.is_empty() {
            data.push(PACKET_SEPARATOR as char);
        }
        data.push_str(&String::from(packet));
    }
    data
}

/// Decode a payload into its packets.
///
/// The returned iterator yields every packet in order and stops right after
/// the first [`PacketParseError`].
pub fn decode_payload(data: Str) -> PayloadDecoder {
    PayloadDecoder {
        data,
        pos: 0,
        done: false,
    }
}

/// Iterator returned by [`decode_payload`].
#[derive(Debug)]
pub struct PayloadDecoder {
    data: Str,
    pos: usize,
    done: bool,
}

impl Iterator for PayloadDecoder {
    type Item = Result<Packet, PacketParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let rest = &self.data.as_bytes()[self.pos..];
        let end = match rest.iter().position(|b| *b == PACKET_SEPARATOR) {
            Some(i) => self.pos + i,
            None => {
                self.done = true;
                self.data.len()
            }
        };
        // the separator is ascii so both bounds fall on char boundaries
        let chunk = self.data.slice(self.pos..end);
        self.pos = end + 1;

        let res = Packet::try_from(chunk);
        if res.is_err() {
            self.done = true;
        }
        Some(res)
    }
}

impl std::iter::FusedIterator for PayloadDecoder {}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    #[test]
    fn payload_roundtrip() {
        let packets = vec![
            Packet::Message("hello".into()),
            Packet::Binary(Bytes::from_static(&[1, 2, 3])),
            Packet::Ping,
            Packet::Message("€uro".into()),
        ];
        let payload = encode_payload(packets.clone());
        assert_eq!(payload, "4hello\x1ebAQID\x1e2\x1e4€uro");
        let decoded: Vec<Packet> = decode_payload(payload.into())
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(decoded, packets);
    }

    #[test]
    fn payload_stops_at_first_error() {
        let payload = Str::from("4a\x1e2\x1ez\x1e4never");
        let res: Vec<_> = decode_payload(payload).collect();
        assert_eq!(res.len(), 3);
        assert_eq!(res[0].as_ref().unwrap(), &Packet::Message("a".into()));
        assert_eq!(res[1].as_ref().unwrap(), &Packet::Ping);
        assert!(matches!(
            res[2],
            Err(PacketParseError::InvalidPacketType(Some('z')))
        ));
        let err = res[2].as_ref().unwrap_err();
        assert_eq!(err.to_string(), "parser error");
    }

    #[test]
    fn empty_segment_is_an_error() {
        let res: Vec<_> = decode_payload(Str::from("4a\x1e")).collect();
        assert_eq!(res.len(), 2);
        assert!(res[1].is_err());
    }

    #[test]
    fn single_packet_payload() {
        let res: Vec<_> = decode_payload(Str::from("1")).collect();
        assert_eq!(res.len(), 1);
        assert_eq!(res[0].as_ref().unwrap(), &Packet::Close);
    }
}
