//! Adapters decide which sockets a broadcast reaches.
//!
//! [`CoreLocalAdapter`] keeps the rooms of a namespace on this server. A [`CoreAdapter`]
//! wraps it, and a clustered one also forwards every operation to the other servers.
use std::{
    borrow::Cow,
    error::Error as StdError,
    future::Future,
    iter,
    sync::Arc,
    time::Duration,
};

use futures_core::{Stream, stream::FusedStream};

use crate::{
    PayloadValue, Sid, Str, Uid,
    errors::{AckError, AdapterError, BroadcastError, DisconnectError, SocketError},
    packet::Packet,
    parser::{Encoded, Parse},
};

mod local;
mod options;
mod remote;
mod room_index;

pub use local::{CoreLocalAdapter, LocalAckStream};
pub use options::{BroadcastFlags, BroadcastOptions};
pub use remote::{RemoteSocketData, ServerReplies};
pub use room_index::{RoomEvent, RoomIndex};

/// A room name.
pub type Room = Cow<'static, str>;

/// The arguments of an ack, or why it never came.
pub type AckResult = Result<Vec<PayloadValue>, AckError>;

/// One room or several. Implemented for string types, their vectors and arrays, and [`Sid`].
pub trait RoomParam: Send + 'static {
    /// The rooms, one by one.
    type IntoIter: Iterator<Item = Room>;

    /// Lists the rooms.
    fn into_room_iter(self) -> Self::IntoIter;
}

macro_rules! room_param {
    (one: $($ty:ty),*) => {$(
        impl RoomParam for $ty {
            type IntoIter = iter::Once<Room>;
            #[inline]
            fn into_room_iter(self) -> Self::IntoIter {
                iter::once(Room::from(self))
            }
        }
    )*};
    (many: $([$($gen:tt)*] $ty:ty => $item:ty),*) => {$(
        impl<$($gen)*> RoomParam for $ty {
            type IntoIter = iter::Map<<$ty as IntoIterator>::IntoIter, fn($item) -> Room>;
            #[inline]
            fn into_room_iter(self) -> Self::IntoIter {
                self.into_iter().map(Room::from as fn($item) -> Room)
            }
        }
    )*};
}

room_param!(one: Room, String, &'static str);
room_param!(many:
    [] Vec<Room> => Room,
    [] Vec<String> => String,
    [] Vec<&'static str> => &'static str,
    [const N: usize] [String; N] => String,
    [const N: usize] [&'static str; N] => &'static str
);

/// The own room of a socket, named after its id.
impl RoomParam for Sid {
    type IntoIter = iter::Once<Room>;
    #[inline]
    fn into_room_iter(self) -> Self::IntoIter {
        iter::once(Room::Owned(self.to_string()))
    }
}

/// An item of the ack stream of a broadcast.
#[derive(Debug, Clone, PartialEq)]
pub enum AckItem {
    /// What one socket answered.
    Ack(Sid, AckResult),
    /// The timeout hit while servers or acks were still missing. It comes last, at most once.
    Shortfall {
        /// Servers that never told how many sockets they reached.
        servers: u16,
        /// Acks announced but never received.
        acks: u32,
    },
}

/// How an adapter reaches the sockets of its namespace, implemented by the namespaces
/// of `relayio`.
pub trait SocketEmitter: Send + Sync + 'static {
    /// The acks of several sockets, each bounded by the timeout.
    type AckStream: Stream<Item = (Sid, AckResult)> + FusedStream + Send + 'static;

    /// Ids of the connected sockets kept by `filter`.
    fn get_all_sids(&self, filter: impl Fn(&Sid) -> bool) -> Vec<Sid>;
    /// Data of the given sockets. Unknown ids are skipped.
    fn get_remote_sockets(&self, sids: Vec<Sid>) -> Vec<RemoteSocketData>;
    /// Writes an encoded packet to the sockets.
    fn send_many(
        &self,
        sids: impl Iterator<Item = Sid>,
        data: Encoded,
    ) -> Result<(), Vec<SocketError>>;
    /// Writes the packet to the sockets, each one with its own ack id.
    /// It returns their acks and how many sockets were written to.
    fn send_many_with_ack(
        &self,
        sids: impl Iterator<Item = Sid>,
        packet: Packet,
        timeout: Option<Duration>,
    ) -> (Self::AckStream, u32);
    /// Disconnects the sockets.
    fn disconnect_many(&self, sids: Vec<Sid>) -> Result<(), Vec<DisconnectError>>;
    /// Runs the server event handler of the namespace and returns its answer.
    fn server_event(
        &self,
        args: Vec<PayloadValue>,
    ) -> impl Future<Output = Vec<PayloadValue>> + Send + 'static;
    /// The namespace path.
    fn path(&self) -> &Str;
    /// The parser of the namespace.
    fn parser(&self) -> impl Parse;
    /// The id of this server.
    fn server_id(&self) -> Uid;
    /// The default ack timeout.
    fn ack_timeout(&self) -> Duration;
}

/// The rooms and the broadcasts of a namespace.
///
/// The provided methods only act on this server through [`CoreAdapter::get_local`].
/// A cluster adapter overrides them to reach the other servers too.
pub trait CoreAdapter<E: SocketEmitter>: Sized + Send + Sync + 'static {
    /// What can go wrong with this adapter.
    type Error: StdError + Into<AdapterError> + Send + 'static;
    /// Shared by the adapters of every namespace, like a connection to a message broker.
    type State: Send + Sync + 'static;
    /// The stream of [`CoreAdapter::broadcast_with_ack`].
    type AckStream: Stream<Item = AckItem> + FusedStream + Send + 'static;

    /// Builds the adapter of a namespace.
    fn new(state: &Self::State, local: CoreLocalAdapter<E>) -> Self;

    /// Prepares the adapter before the namespace accepts sockets.
    fn init(self: Arc<Self>) -> impl Future<Output = Result<(), Self::Error>> + Send {
        async { Ok::<_, Self::Error>(()) }
    }

    /// Releases the adapter. The rooms are forgotten.
    fn close(&self) -> impl Future<Output = Result<(), Self::Error>> + Send {
        self.get_local().close();
        async { Ok::<_, Self::Error>(()) }
    }

    /// How many servers share the namespace.
    fn server_count(&self) -> impl Future<Output = Result<u16, Self::Error>> + Send {
        async { Ok::<_, Self::Error>(1) }
    }

    /// Sends the packet to the sockets selected by `opts`.
    fn broadcast(
        &self,
        packet: Packet,
        opts: BroadcastOptions,
    ) -> impl Future<Output = Result<(), BroadcastError>> + Send {
        let res = self.get_local().broadcast(packet, &opts);
        async { res }
    }

    /// Sends the packet to the sockets selected by `opts` and streams their acks.
    fn broadcast_with_ack(
        &self,
        packet: Packet,
        opts: BroadcastOptions,
        timeout: Option<Duration>,
    ) -> impl Future<Output = Result<Self::AckStream, Self::Error>> + Send;

    /// Puts the sockets selected by `opts` in `rooms`.
    fn add_sockets(
        &self,
        opts: BroadcastOptions,
        rooms: impl RoomParam,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send {
        self.get_local().add_sockets(&opts, rooms);
        async { Ok::<_, Self::Error>(()) }
    }

    /// Takes the sockets selected by `opts` out of `rooms`.
    fn del_sockets(
        &self,
        opts: BroadcastOptions,
        rooms: impl RoomParam,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send {
        self.get_local().del_sockets(&opts, rooms);
        async { Ok::<_, Self::Error>(()) }
    }

    /// Disconnects the sockets selected by `opts`.
    fn disconnect_socket(
        &self,
        opts: BroadcastOptions,
    ) -> impl Future<Output = Result<(), BroadcastError>> + Send {
        let res = self.get_local().disconnect_socket(&opts);
        async { res.map_err(BroadcastError::from) }
    }

    /// The rooms of the sockets selected by `opts`, or every room without a selection.
    fn rooms(
        &self,
        opts: BroadcastOptions,
    ) -> impl Future<Output = Result<Vec<Room>, Self::Error>> + Send {
        let rooms = self.get_local().rooms(&opts);
        async { Ok::<_, Self::Error>(rooms) }
    }

    /// The data of the sockets selected by `opts`.
    fn fetch_sockets(
        &self,
        opts: BroadcastOptions,
    ) -> impl Future<Output = Result<Vec<RemoteSocketData>, Self::Error>> + Send {
        let sockets = self.get_local().fetch_sockets(&opts);
        async { Ok::<_, Self::Error>(sockets) }
    }

    /// Sends data to the server event handler of the other servers.
    fn server_side_emit(
        &self,
        _args: Vec<PayloadValue>,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send {
        async { Ok::<_, Self::Error>(()) }
    }

    /// Like [`CoreAdapter::server_side_emit`], collecting one answer per server.
    fn server_side_emit_with_ack(
        &self,
        _args: Vec<PayloadValue>,
        _timeout: Option<Duration>,
    ) -> impl Future<Output = Result<ServerReplies<Vec<PayloadValue>>, Self::Error>> + Send {
        async { Ok::<_, Self::Error>(ServerReplies::default()) }
    }

    /// The rooms of this server.
    fn get_local(&self) -> &CoreLocalAdapter<E>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(rooms: impl RoomParam) -> Vec<Room> {
        rooms.into_room_iter().collect()
    }

    #[test]
    fn room_params() {
        assert_eq!(names("a"), ["a"]);
        assert_eq!(names(String::from("a")), ["a"]);
        assert_eq!(names(["a", "b"]), ["a", "b"]);
        assert_eq!(names([String::from("a"), String::from("b")]), ["a", "b"]);
        assert_eq!(names(vec!["a", "b"]), ["a", "b"]);
        assert_eq!(names(vec![Room::Borrowed("a")]), ["a"]);

        let sid = Sid::new();
        assert_eq!(names(sid), [sid.to_string()]);
    }
}
