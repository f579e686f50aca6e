use std::collections::VecDeque;

use bytes::Bytes;
use relayio_engine_core::{Packet, PacketBuf, Str};
use smallvec::smallvec;
use tokio::sync::mpsc;

/// A reserved slot in the queue of a [`Socket`](super::Socket), used by one emit.
pub struct Permit<'a>(mpsc::Permit<'a, PacketBuf>);

impl<'a> Permit<'a> {
    pub(super) fn new(slot: mpsc::Permit<'a, PacketBuf>) -> Self {
        Permit(slot)
    }

    /// Queues a text message.
    #[inline]
    pub fn emit(self, msg: Str) {
        self.0.send(smallvec![Packet::Message(msg)]);
    }

    /// Queues a binary message.
    #[inline]
    pub fn emit_binary(self, data: Bytes) {
        self.0.send(smallvec![Packet::Binary(data)]);
    }

    /// Queues a text message followed by its binary attachments.
    /// No other packet can be flushed between them.
    pub fn emit_many(self, msg: Str, attachments: VecDeque<Bytes>) {
        let packets: PacketBuf = std::iter::once(Packet::Message(msg))
            .chain(attachments.into_iter().map(Packet::Binary))
            .collect();
        self.0.send(packets);
    }
}
