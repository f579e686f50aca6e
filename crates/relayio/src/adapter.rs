//! Room membership and broadcasts of a namespace.
//!
//! Every namespace owns an adapter. The [`LocalAdapter`] keeps the rooms in memory and only
//! knows the sockets of this server. The `relayio-cluster` crate provides one that forwards
//! the operations to the other servers through a message bus.

use std::{convert::Infallible, future, time::Duration};

use relayio_core::{adapter::LocalAckStream, packet::Packet};

use crate::ack::SocketAcks;

pub use crate::ns::Emitter;

pub use relayio_core::adapter::{
    AckItem, BroadcastFlags, BroadcastOptions, CoreAdapter, CoreLocalAdapter, RemoteSocketData,
    Room, RoomEvent, RoomParam, ServerReplies, SocketEmitter,
};

/// A [`CoreAdapter`] driving the sockets of this crate. Implemented for every such adapter.
pub trait Adapter: CoreAdapter<Emitter> + Sized {}
impl<T: CoreAdapter<Emitter>> Adapter for T {}

/// The single server adapter, every operation stays in memory.
#[derive(Debug)]
pub struct LocalAdapter(CoreLocalAdapter<Emitter>);

impl CoreAdapter<Emitter> for LocalAdapter {
    type State = ();
    type Error = Infallible;
    type AckStream = LocalAckStream<SocketAcks>;

    fn new(_state: &Self::State, local: CoreLocalAdapter<Emitter>) -> Self {
        Self(local)
    }

    fn broadcast_with_ack(
        &self,
        packet: Packet,
        opts: BroadcastOptions,
        timeout: Option<Duration>,
    ) -> impl Future<Output = Result<Self::AckStream, Infallible>> + Send {
        // the count only matters to remote servers
        let (acks, _) = self.0.broadcast_with_ack(packet, &opts, timeout);
        future::ready(Ok(LocalAckStream::new(acks)))
    }

    fn get_local(&self) -> &CoreLocalAdapter<Emitter> {
        &self.0
    }
}
