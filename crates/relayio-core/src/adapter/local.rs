//! Room membership of one namespace on this server.
use std::{
    collections::HashSet,
    fmt,
    pin::Pin,
    sync::{PoisonError, RwLock, RwLockReadGuard},
    task::{Context, Poll},
    time::Duration,
};

use futures_core::{Stream, ready, stream::FusedStream};

use super::{
    AckItem, AckResult, BroadcastFlags, BroadcastOptions, RemoteSocketData, Room, RoomEvent,
    RoomIndex, RoomParam, SocketEmitter,
};
use crate::{
    Sid, Str, Uid,
    errors::{BroadcastError, DisconnectError, SocketError},
    packet::Packet,
    parser::Parse,
};

type RoomListener = Box<dyn Fn(&Str, &RoomEvent) + Send + Sync + 'static>;

/// The rooms of a namespace and the way to its sockets.
///
/// Every [`CoreAdapter`](super::CoreAdapter) wraps one to act on this server.
pub struct CoreLocalAdapter<E> {
    index: RwLock<RoomIndex>,
    listeners: RwLock<Vec<RoomListener>>,
    emitter: E,
}

impl<E: SocketEmitter> CoreLocalAdapter<E> {
    /// An adapter without rooms, reaching its sockets through `emitter`.
    pub fn new(emitter: E) -> Self {
        CoreLocalAdapter {
            index: RwLock::default(),
            listeners: RwLock::default(),
            emitter,
        }
    }

    /// The sockets of the namespace.
    pub fn emitter(&self) -> &E {
        &self.emitter
    }

    /// Calls `listener` for every room created, joined, left or deleted from now on.
    pub fn on_room_event(&self, listener: impl Fn(&Str, &RoomEvent) + Send + Sync + 'static) {
        let mut listeners = self.listeners.write().unwrap_or_else(PoisonError::into_inner);
        listeners.push(Box::new(listener));
    }

    /// Forgets every room, without any event.
    pub fn close(&self) {
        #[cfg(feature = "tracing")]
        tracing::debug!(ns = %self.path(), "clearing rooms");
        self.index
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn read(&self) -> RwLockReadGuard<'_, RoomIndex> {
        self.index.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Applies `change` to the index, then tells the listeners once the lock is released.
    fn update(&self, change: impl FnOnce(&mut RoomIndex, &mut Vec<RoomEvent>)) {
        let mut events = Vec::new();
        change(
            &mut self.index.write().unwrap_or_else(PoisonError::into_inner),
            &mut events,
        );
        if events.is_empty() {
            return;
        }
        let listeners = self.listeners.read().unwrap_or_else(PoisonError::into_inner);
        let ns = self.emitter.path();
        for event in &events {
            listeners.iter().for_each(|listener| listener(ns, event));
        }
    }

    /// Puts `sid` in every room of `rooms`.
    pub fn add_all(&self, sid: Sid, rooms: impl RoomParam) {
        self.update(|index, events| index.add_all(sid, rooms.into_room_iter(), events));
    }

    /// Takes `sid` out of `rooms`.
    pub fn del(&self, sid: Sid, rooms: impl RoomParam) {
        self.update(|index, events| index.del(sid, rooms.into_room_iter(), events));
    }

    /// Takes `sid` out of all its rooms.
    pub fn del_all(&self, sid: Sid) {
        self.update(|index, events| index.del_all(sid, events));
    }

    /// Sends the packet to the selected sockets, encoding it once.
    ///
    /// With [`BroadcastFlags::Volatile`], full buffers are not errors.
    pub fn broadcast(&self, packet: Packet, opts: &BroadcastOptions) -> Result<(), BroadcastError> {
        let sids = self.targets(opts);
        if sids.is_empty() {
            return Ok(());
        }
        #[cfg(feature = "tracing")]
        tracing::debug!(count = sids.len(), "broadcasting packet");

        let data = self.emitter.parser().encode(packet);
        let Err(mut errs) = self.emitter.send_many(sids.into_iter(), data) else {
            return Ok(());
        };
        if opts.has_flag(BroadcastFlags::Volatile) {
            errs.retain(|err| *err != SocketError::InternalChannelFull);
        }
        if errs.is_empty() {
            Ok(())
        } else {
            Err(errs.into())
        }
    }

    /// Sends the packet to the selected sockets. It returns their acks and how many were asked.
    pub fn broadcast_with_ack(
        &self,
        packet: Packet,
        opts: &BroadcastOptions,
        timeout: Option<Duration>,
    ) -> (E::AckStream, u32) {
        let sids = self.targets(opts);
        #[cfg(feature = "tracing")]
        tracing::debug!(count = sids.len(), "broadcasting packet with ack");
        self.emitter.send_many_with_ack(sids.into_iter(), packet, timeout)
    }

    /// The ids of the selected sockets.
    pub fn sockets(&self, opts: &BroadcastOptions) -> Vec<Sid> {
        self.targets(opts)
    }

    /// The rooms of one socket.
    pub fn socket_rooms(&self, sid: Sid) -> Vec<Room> {
        let index = self.read();
        index.socket_rooms(&sid).into_iter().flatten().cloned().collect()
    }

    /// Puts the selected sockets in `rooms`.
    pub fn add_sockets(&self, opts: &BroadcastOptions, rooms: impl RoomParam) {
        let sids = self.targets(opts);
        let rooms: Vec<Room> = rooms.into_room_iter().collect();
        self.update(|index, events| {
            for sid in sids {
                index.add_all(sid, rooms.iter().cloned(), events);
            }
        });
    }

    /// Takes the selected sockets out of `rooms`.
    pub fn del_sockets(&self, opts: &BroadcastOptions, rooms: impl RoomParam) {
        let sids = self.targets(opts);
        let rooms: Vec<Room> = rooms.into_room_iter().collect();
        self.update(|index, events| {
            for sid in sids {
                index.del(sid, rooms.iter().cloned(), events);
            }
        });
    }

    /// Disconnects the selected sockets.
    pub fn disconnect_socket(&self, opts: &BroadcastOptions) -> Result<(), Vec<DisconnectError>> {
        self.emitter.disconnect_many(self.targets(opts))
    }

    /// The rooms of the selected sockets. Without rooms nor sender, every room of the namespace.
    pub fn rooms(&self, opts: &BroadcastOptions) -> Vec<Room> {
        if opts.rooms.is_empty() && opts.sid.is_none() {
            return self.read().rooms().cloned().collect();
        }
        let sids = self.targets(opts);
        let index = self.read();
        let mut rooms = HashSet::new();
        for sid in &sids {
            rooms.extend(index.socket_rooms(sid).into_iter().flatten());
        }
        rooms.into_iter().cloned().collect()
    }

    /// The data of the selected sockets.
    pub fn fetch_sockets(&self, opts: &BroadcastOptions) -> Vec<RemoteSocketData> {
        self.emitter.get_remote_sockets(self.targets(opts))
    }

    /// The namespace path.
    pub fn path(&self) -> &Str {
        self.emitter.path()
    }

    /// The parser of the namespace.
    pub fn parser(&self) -> impl Parse {
        self.emitter.parser()
    }

    /// The id of this server.
    pub fn server_id(&self) -> Uid {
        self.emitter.server_id()
    }

    /// Resolves the selection of `opts`.
    ///
    /// It starts from the members of its rooms if any, every socket when broadcasting,
    /// the sender otherwise. The members of the excepted rooms are then removed,
    /// and the sender too when broadcasting.
    /// A selection bound to another server is empty.
    pub fn targets(&self, opts: &BroadcastOptions) -> Vec<Sid> {
        if opts.server_id.is_some_and(|id| id != self.server_id()) {
            return Vec::new();
        }
        let broadcasting = opts.has_flag(BroadcastFlags::Broadcast);
        let index = self.read();
        let excluded: HashSet<Sid> = opts
            .except
            .iter()
            .filter_map(|room| index.members(room))
            .flatten()
            .copied()
            .collect();
        let skip = |sid: &Sid| excluded.contains(sid) || (broadcasting && opts.sid == Some(*sid));

        if !opts.rooms.is_empty() {
            let selected: HashSet<Sid> = opts
                .rooms
                .iter()
                .filter_map(|room| index.members(room))
                .flatten()
                .filter(|sid| !skip(sid))
                .copied()
                .collect();
            return selected.into_iter().collect();
        }
        drop(index);
        match opts.sid {
            _ if broadcasting => self.emitter.get_all_sids(|sid| !skip(sid)),
            Some(sid) => vec![sid],
            None => Vec::new(),
        }
    }
}

impl<E> fmt::Debug for CoreLocalAdapter<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoreLocalAdapter")
            .field("index", &self.index)
            .finish_non_exhaustive()
    }
}

pin_project_lite::pin_project! {
    /// The acks of a lone server, each one wrapped in an [`AckItem::Ack`].
    pub struct LocalAckStream<S> {
        #[pin]
        acks: S,
    }
}

impl<S> LocalAckStream<S> {
    /// Wraps the ack stream of a [`SocketEmitter`].
    pub fn new(acks: S) -> Self {
        LocalAckStream { acks }
    }
}

impl<S: Stream<Item = (Sid, AckResult)>> Stream for LocalAckStream<S> {
    type Item = AckItem;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<AckItem>> {
        let next = ready!(self.project().acks.poll_next(cx));
        Poll::Ready(next.map(|(sid, ack)| AckItem::Ack(sid, ack)))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.acks.size_hint()
    }
}

impl<S: FusedStream<Item = (Sid, AckResult)>> FusedStream for LocalAckStream<S> {
    fn is_terminated(&self) -> bool {
        self.acks.is_terminated()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        future::{self, Future},
        sync::{Arc, Mutex},
    };

    use bytes::Bytes;

    use super::*;
    use crate::{
        PayloadValue,
        parser::{Encoded, ParseError, ParserState},
    };

    #[derive(Clone, Copy, Default)]
    struct NullParser;

    impl Parse for NullParser {
        fn encode(self, _: Packet) -> Encoded {
            Encoded::Bytes(Bytes::new())
        }
        fn decode_str(self, _: &ParserState, _: Str) -> Result<Packet, ParseError> {
            Err(ParseError::InvalidPacketType)
        }
        fn decode_bin(self, _: &ParserState, _: Bytes) -> Result<Packet, ParseError> {
            Err(ParseError::InvalidPacketType)
        }
    }

    struct NoAcks;

    impl Stream for NoAcks {
        type Item = (Sid, AckResult);
        fn poll_next(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Option<Self::Item>> {
            Poll::Ready(None)
        }
    }

    impl FusedStream for NoAcks {
        fn is_terminated(&self) -> bool {
            true
        }
    }

    /// A namespace recording what it is asked to send.
    struct FakeNs {
        sids: Vec<Sid>,
        full: HashSet<Sid>,
        received: Mutex<Vec<Sid>>,
        path: Str,
        server_id: Uid,
    }

    impl FakeNs {
        fn with(sids: &[Sid]) -> Self {
            FakeNs {
                sids: sids.to_vec(),
                full: HashSet::new(),
                received: Mutex::default(),
                path: Str::from("/"),
                server_id: Uid::new(),
            }
        }
    }

    impl SocketEmitter for FakeNs {
        type AckStream = NoAcks;

        fn get_all_sids(&self, filter: impl Fn(&Sid) -> bool) -> Vec<Sid> {
            self.sids.iter().filter(|sid| filter(sid)).copied().collect()
        }
        fn get_remote_sockets(&self, sids: Vec<Sid>) -> Vec<RemoteSocketData> {
            let known = sids.into_iter().filter(|sid| self.sids.contains(sid));
            known
                .map(|id| RemoteSocketData {
                    id,
                    server_id: self.server_id,
                    ns: self.path.clone(),
                })
                .collect()
        }
        fn send_many(
            &self,
            sids: impl Iterator<Item = Sid>,
            _: Encoded,
        ) -> Result<(), Vec<SocketError>> {
            let (full, ok): (Vec<Sid>, Vec<Sid>) = sids.partition(|sid| self.full.contains(sid));
            self.received.lock().unwrap().extend(ok);
            match full.len() {
                0 => Ok(()),
                n => Err(vec![SocketError::InternalChannelFull; n]),
            }
        }
        fn send_many_with_ack(
            &self,
            sids: impl Iterator<Item = Sid>,
            _: Packet,
            _: Option<Duration>,
        ) -> (NoAcks, u32) {
            (NoAcks, sids.count() as u32)
        }
        fn disconnect_many(&self, _: Vec<Sid>) -> Result<(), Vec<DisconnectError>> {
            Ok(())
        }
        fn server_event(
            &self,
            args: Vec<PayloadValue>,
        ) -> impl Future<Output = Vec<PayloadValue>> + Send + 'static {
            future::ready(args)
        }
        fn path(&self) -> &Str {
            &self.path
        }
        fn parser(&self) -> impl Parse {
            NullParser
        }
        fn server_id(&self) -> Uid {
            self.server_id
        }
        fn ack_timeout(&self) -> Duration {
            Duration::from_secs(5)
        }
    }

    fn adapter(sids: &[Sid]) -> CoreLocalAdapter<FakeNs> {
        CoreLocalAdapter::new(FakeNs::with(sids))
    }

    fn rooms<const N: usize>(rooms: [&'static str; N]) -> HashSet<Room> {
        rooms.into_iter().map(Room::Borrowed).collect()
    }

    fn sorted(mut sids: Vec<Sid>) -> Vec<Sid> {
        sids.sort();
        sids
    }

    #[test]
    fn join_and_leave() {
        let sid = Sid::new();
        let adapter = adapter(&[sid]);
        adapter.add_all(sid, ["a", "b", "c"]);
        assert_eq!(adapter.read().len(), 3);

        adapter.del(sid, "b");
        assert!(adapter.read().members("b").is_none());
        assert_eq!(adapter.read().members("a").map(HashSet::len), Some(1));

        adapter.del_all(sid);
        assert!(adapter.read().is_empty());
        assert!(adapter.socket_rooms(sid).is_empty());
    }

    #[test]
    fn rooms_of_each_socket() {
        let (a, b) = (Sid::new(), Sid::new());
        let adapter = adapter(&[a, b]);
        adapter.add_all(a, ["x", "y"]);
        adapter.add_all(b, ["y"]);

        let mut of_a = adapter.socket_rooms(a);
        of_a.sort();
        assert_eq!(of_a, ["x", "y"]);
        assert_eq!(adapter.socket_rooms(b), ["y"]);
    }

    #[test]
    fn selected_sockets_join_and_leave() {
        let (a, b) = (Sid::new(), Sid::new());
        let adapter = adapter(&[a, b]);
        adapter.add_all(a, "x");

        let mut opts = BroadcastOptions::default();
        opts.rooms = rooms(["x"]);
        adapter.add_sockets(&opts, ["y", "z"]);
        assert_eq!(adapter.socket_rooms(a).len(), 3);
        assert!(adapter.socket_rooms(b).is_empty());

        adapter.del_sockets(&opts, "y");
        assert!(adapter.read().members("y").is_none());
        assert!(adapter.read().members("z").unwrap().contains(&a));
    }

    #[test]
    fn listeners_see_the_room_lifecycle() {
        let sid = Sid::new();
        let adapter = adapter(&[sid]);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_ = seen.clone();
        adapter.on_room_event(move |ns, event| {
            assert_eq!(ns, "/");
            seen_.lock().unwrap().push(event.clone());
        });

        adapter.add_all(sid, "x");
        adapter.add_all(sid, "x");
        adapter.del(sid, "x");
        let room = || Room::Borrowed("x");
        assert_eq!(
            *seen.lock().unwrap(),
            [
                RoomEvent::Create(room()),
                RoomEvent::Join(room(), sid),
                RoomEvent::Leave(room(), sid),
                RoomEvent::Delete(room()),
            ]
        );
    }

    #[test]
    fn selection_rules() {
        let (a, b, sender) = (Sid::new(), Sid::new(), Sid::new());
        let adapter = adapter(&[a, b, sender]);
        adapter.add_all(a, ["all", "left-out"]);
        adapter.add_all(b, ["all"]);
        adapter.add_all(sender, ["all"]);

        let mut opts = BroadcastOptions::new(sender);
        assert_eq!(adapter.targets(&opts), [sender]);

        opts.add_flag(BroadcastFlags::Broadcast);
        assert_eq!(sorted(adapter.targets(&opts)), sorted(vec![a, b]));

        opts.rooms = rooms(["all"]);
        opts.except = rooms(["left-out"]);
        assert_eq!(adapter.targets(&opts), [b]);

        opts.rooms = rooms(["nowhere"]);
        assert!(adapter.targets(&opts).is_empty());
        assert!(adapter.targets(&BroadcastOptions::default()).is_empty());
    }

    #[test]
    fn selection_bound_to_another_server() {
        let sid = Sid::new();
        let adapter = adapter(&[sid]);
        let mut opts = BroadcastOptions::new(sid);
        opts.server_id = Some(Uid::new());
        assert!(adapter.sockets(&opts).is_empty());
        opts.server_id = Some(adapter.server_id());
        assert_eq!(adapter.sockets(&opts), [sid]);
    }

    #[test]
    fn broadcast_skips_excepted_rooms() {
        let (a, b) = (Sid::new(), Sid::new());
        let adapter = adapter(&[a, b]);
        adapter.add_all(a, ["chat", "muted"]);
        adapter.add_all(b, "chat");

        let mut opts = BroadcastOptions::default();
        opts.rooms = rooms(["chat"]);
        opts.except = rooms(["muted"]);
        adapter.broadcast(Packet::event("/", "msg", vec![]), &opts).unwrap();
        assert_eq!(*adapter.emitter().received.lock().unwrap(), [b]);
    }

    #[test]
    fn volatile_broadcast_ignores_full_buffers() {
        let (a, b) = (Sid::new(), Sid::new());
        let mut ns = FakeNs::with(&[a, b]);
        ns.full.insert(a);
        let adapter = CoreLocalAdapter::new(ns);

        let mut opts = BroadcastOptions::default();
        opts.add_flag(BroadcastFlags::Broadcast);
        let packet = || Packet::event("/", "msg", vec![]);
        let err = adapter.broadcast(packet(), &opts).unwrap_err();
        assert!(matches!(err, BroadcastError::Socket(errs) if errs.len() == 1));

        opts.add_flag(BroadcastFlags::Volatile);
        adapter.broadcast(packet(), &opts).unwrap();
    }

    #[test]
    fn fetched_sockets_and_their_rooms() {
        let (a, b) = (Sid::new(), Sid::new());
        let adapter = adapter(&[a, b]);
        adapter.add_all(a, ["x", "y"]);
        adapter.add_all(b, "z");

        let mut opts = BroadcastOptions::default();
        opts.rooms = rooms(["x"]);
        let fetched = adapter.fetch_sockets(&opts);
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0].id, a);

        let mut found = adapter.rooms(&opts);
        found.sort();
        assert_eq!(found, ["x", "y"]);
        assert_eq!(adapter.rooms(&BroadcastOptions::default()).len(), 3);
    }
}
