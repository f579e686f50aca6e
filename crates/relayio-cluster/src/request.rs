//! Messages exchanged between the servers of a cluster, encoded with msgpack.
//!
//! A request is written from borrowed data ([`RequestOut`]) and read into owned data
//! ([`RequestIn`]). Both are the same generic [`Request`], so their layouts can't drift apart.
use std::time::Duration;

use relayio_core::{
    PayloadValue, Sid, Uid,
    adapter::{AckResult, BroadcastOptions, RemoteSocketData, Room},
    packet::Packet,
};
use serde::{Deserialize, Serialize};

/// The operation a request asks for, over packets `P`, room lists `R` and event arguments `A`.
#[derive(Debug, Serialize, Deserialize)]
pub enum Op<P, R, A> {
    /// Send the packet to the selected sockets
    Broadcast(P),
    /// Same, then answer with the ack count and the acks, waiting at most the given milliseconds
    BroadcastWithAck(P, Option<u64>),
    DisconnectSockets,
    /// Answer with the rooms of the selected sockets
    AllRooms,
    AddSockets(R),
    DelSockets(R),
    /// Answer with the selected sockets
    FetchSockets,
    /// Run the server event handler
    ServerSideEmit(A),
    /// Run the server event handler and answer with what it returns
    ServerSideEmitWithAck(A),
}

pub type OpOut<'a> = Op<&'a Packet, &'a [Room], &'a [PayloadValue]>;
pub type OpIn = Op<Packet, Vec<Room>, Vec<PayloadValue>>;

impl OpIn {
    /// True if the sender waits for an answer.
    pub fn expects_reply(&self) -> bool {
        matches!(
            self,
            Op::BroadcastWithAck(..) | Op::AllRooms | Op::FetchSockets | Op::ServerSideEmitWithAck(_)
        )
    }
}

/// An operation sent by server `from`, targeting the sockets selected by `opts`.
#[derive(Debug, Serialize, Deserialize)]
pub struct Request<O, B> {
    pub from: Uid,
    /// Answers carry it back
    pub id: Sid,
    pub op: O,
    /// Absent for operations on servers rather than sockets
    pub opts: Option<B>,
}

pub type RequestOut<'a> = Request<OpOut<'a>, &'a BroadcastOptions>;
pub type RequestIn = Request<OpIn, BroadcastOptions>;

impl<'a> RequestOut<'a> {
    pub fn new(from: Uid, op: OpOut<'a>, opts: &'a BroadcastOptions) -> Self {
        Request { from, id: Sid::new(), op, opts: Some(opts) }
    }

    /// A request for the servers themselves.
    pub fn without_opts(from: Uid, op: OpOut<'a>) -> Self {
        Request { from, id: Sid::new(), op, opts: None }
    }
}

impl RequestIn {
    pub fn opts(&self) -> BroadcastOptions {
        self.opts.clone().unwrap_or_default()
    }
}

/// Milliseconds on the wire.
pub fn timeout_to_millis(timeout: Option<Duration>) -> Option<u64> {
    timeout.map(|t| u64::try_from(t.as_millis()).unwrap_or(u64::MAX))
}

/// One answer of server `from` to request `req`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub from: Uid,
    pub req: Sid,
    pub kind: ResponseKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ResponseKind {
    /// The ack of one socket
    BroadcastAck(Sid, AckResult),
    /// How many sockets the answering server addressed
    BroadcastAckCount(u32),
    AllRooms(Vec<Room>),
    FetchSockets(Vec<RemoteSocketData>),
    /// What the server event handler returned
    ServerSideEmit(Vec<PayloadValue>),
}

impl ResponseKind {
    pub fn into_rooms(self) -> Option<Vec<Room>> {
        let Self::AllRooms(rooms) = self else { return None };
        Some(rooms)
    }

    pub fn into_fetch_sockets(self) -> Option<Vec<RemoteSocketData>> {
        let Self::FetchSockets(sockets) = self else { return None };
        Some(sockets)
    }

    pub fn into_server_event(self) -> Option<Vec<PayloadValue>> {
        let Self::ServerSideEmit(reply) = self else { return None };
        Some(reply)
    }
}
