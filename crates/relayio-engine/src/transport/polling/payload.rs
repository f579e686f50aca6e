//! Joins the queued packets of a session into one http payload.
//!
//! Packets are separated by the record separator until the next [`PacketBuf`] would overflow
//! `max_payload`. A buffer is never split across two payloads.

use relayio_engine_core::{PACKET_SEPARATOR, Packet, PacketBuf};
use tokio::sync::MutexGuard;

use crate::{errors::Error, lookahead::LookaheadRx};

type Outbox<'a> = MutexGuard<'a, LookaheadRx<PacketBuf>>;

/// A dequeued close packet ends the session: the outbox stops taking packets.
fn close_after(outbox: &mut Outbox<'_>, packets: &PacketBuf) {
    if packets.first() == Some(&Packet::Close) {
        #[cfg(feature = "tracing")]
        tracing::debug!("close packet dequeued, the outbox is closed");
        outbox.close();
    }
}

/// The next queued buffer, if there is one and it fits next to `payload`.
fn next_fitting(outbox: &mut Outbox<'_>, payload: &str, max_payload: u64) -> Option<PacketBuf> {
    let len: usize = outbox.peek()?.iter().map(|p| p.max_encoded_len(true)).sum();
    let separated = payload.len() + 1 + len;
    if separated as u64 > max_payload {
        #[cfg(feature = "tracing")]
        tracing::debug!("next packets would overflow the payload ({separated} > {max_payload})");
        return None;
    }
    let packets = outbox.try_recv().ok()?;
    close_after(outbox, &packets);
    Some(packets)
}

fn append(payload: &mut String, packets: PacketBuf) {
    for packet in packets {
        if !payload.is_empty() {
            payload.push(PACKET_SEPARATOR as char);
        }
        payload.push_str(&String::from(packet));
    }
}

/// Encodes the queued packets that fit in `max_payload`.
///
/// With nothing queued it waits for the next buffer, which is sent whatever its size.
pub async fn encode_payload(mut outbox: Outbox<'_>, max_payload: u64) -> Result<String, Error> {
    let mut payload = String::new();
    while let Some(packets) = next_fitting(&mut outbox, &payload, max_payload) {
        append(&mut payload, packets);
    }

    if payload.is_empty() {
        let packets = outbox.recv().await.ok_or(Error::Aborted)?;
        close_after(&mut outbox, &packets);
        append(&mut payload, packets);
    }

    #[cfg(feature = "tracing")]
    tracing::trace!("payload ready: {payload:?}");
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use smallvec::smallvec;
    use tokio::sync::{Mutex, mpsc};

    use super::*;

    const UNLIMITED: u64 = 100_000;

    /// An outbox holding `bufs`.
    fn outbox(bufs: impl IntoIterator<Item = PacketBuf>) -> (mpsc::Sender<PacketBuf>, Mutex<LookaheadRx<PacketBuf>>) {
        let (tx, rx) = mpsc::channel::<PacketBuf>(10);
        for buf in bufs {
            tx.try_send(buf).unwrap();
        }
        (tx, Mutex::new(LookaheadRx::new(rx)))
    }

    fn msg(text: &'static str) -> PacketBuf {
        smallvec![Packet::Message(text.into())]
    }

    fn bin(data: &'static [u8]) -> PacketBuf {
        smallvec![Packet::Binary(Bytes::from_static(data))]
    }

    #[tokio::test]
    async fn packets_are_separated() {
        let (_tx, rx) = outbox([msg("hi€"), bin(&[1, 2, 3, 4]), msg("bye")]);
        let payload = encode_payload(rx.lock().await, UNLIMITED).await.unwrap();
        assert_eq!(payload, "4hi€\x1ebAQIDBA==\x1e4bye");
    }

    #[tokio::test]
    async fn payloads_stop_before_the_limit() {
        let (_tx, rx) = outbox([msg("hello€"), bin(&[1, 2, 3, 4]), msg("hello€"), msg("hello€")]);
        // "4hello€" is 9 bytes, with its separator it fills 10
        assert_eq!(encode_payload(rx.lock().await, 10).await.unwrap(), "4hello€");
        assert_eq!(encode_payload(rx.lock().await, 20).await.unwrap(), "bAQIDBA==\x1e4hello€");
        assert_eq!(encode_payload(rx.lock().await, 20).await.unwrap(), "4hello€");
    }

    #[tokio::test]
    async fn oversized_packet_is_sent_alone() {
        let (_tx, rx) = outbox([msg("a very long message")]);
        let payload = encode_payload(rx.lock().await, 4).await.unwrap();
        assert_eq!(payload, "4a very long message");
    }

    #[tokio::test]
    async fn attachments_are_never_split() {
        let event: PacketBuf = msg("51-[\"ev\"]").into_iter().chain(bin(&[1])).collect();
        let (_tx, rx) = outbox([event, msg("after")]);
        // the second buffer does not fit next to the first one
        let payload = encode_payload(rx.lock().await, 20).await.unwrap();
        assert_eq!(payload, "451-[\"ev\"]\x1ebAQ==");
    }

    #[tokio::test]
    async fn close_packet_closes_the_outbox() {
        let (tx, rx) = outbox([msg("bye"), smallvec![Packet::Close]]);
        let payload = encode_payload(rx.lock().await, UNLIMITED).await.unwrap();
        assert_eq!(payload, "4bye\x1e1");
        assert!(tx.is_closed());
        let err = encode_payload(rx.lock().await, UNLIMITED).await.unwrap_err();
        assert!(matches!(err, Error::Aborted));
    }

    #[tokio::test]
    async fn empty_outbox_waits_for_packets() {
        let (tx, rx) = outbox([]);
        let pending = tokio::spawn(async move { encode_payload(rx.lock().await, UNLIMITED).await.unwrap() });
        tokio::task::yield_now().await;
        tx.try_send(msg("late")).unwrap();
        assert_eq!(pending.await.unwrap(), "4late");
    }
}
