//! What the adapter of a namespace may do with its local sockets.
use std::{
    fmt,
    future::Future,
    sync::{Arc, PoisonError, Weak},
    time::Duration,
};

use futures_util::{FutureExt, future::BoxFuture};
use relayio_core::{
    PayloadValue, Sid, Str, Uid,
    adapter::{RemoteSocketData, SocketEmitter},
    errors::{DisconnectError, SocketError},
    packet::Packet,
    parser::{Encoded, Parse},
};

use super::Namespace;
use crate::{ack::SocketAcks, adapter::Adapter, parser::Parser, socket::Socket};

/// The socket operations of a [`Namespace`], without its adapter type.
pub(super) trait LocalSockets: Send + Sync + 'static {
    fn sids(&self, keep: &dyn Fn(&Sid) -> bool) -> Vec<Sid>;
    fn describe(&self, sids: Vec<Sid>, server_id: Uid) -> Vec<RemoteSocketData>;
    fn send(&self, sids: &mut dyn Iterator<Item = Sid>, data: Encoded) -> Result<(), Vec<SocketError>>;
    fn send_with_ack(
        &self,
        sids: &mut dyn Iterator<Item = Sid>,
        packet: Packet,
        timeout: Duration,
    ) -> (SocketAcks, u32);
    fn disconnect(&self, sids: Vec<Sid>) -> Result<(), Vec<DisconnectError>>;
    fn server_event(&self, args: Vec<PayloadValue>) -> BoxFuture<'static, Vec<PayloadValue>>;
}

fn all_or_errors<E>(errs: Vec<E>) -> Result<(), Vec<E>> {
    match errs.is_empty() {
        true => Ok(()),
        false => Err(errs),
    }
}

impl<A: Adapter> Namespace<A> {
    fn pick(&self, sids: &mut dyn Iterator<Item = Sid>) -> Vec<Arc<Socket<A>>> {
        let sockets = self.sockets.read().unwrap_or_else(PoisonError::into_inner);
        sids.filter_map(|id| sockets.get(&id).cloned()).collect()
    }
}

impl<A: Adapter> LocalSockets for Namespace<A> {
    fn sids(&self, keep: &dyn Fn(&Sid) -> bool) -> Vec<Sid> {
        let sockets = self.sockets.read().unwrap_or_else(PoisonError::into_inner);
        sockets.keys().copied().filter(keep).collect()
    }

    fn describe(&self, sids: Vec<Sid>, server_id: Uid) -> Vec<RemoteSocketData> {
        let ns = self.path.clone();
        self.pick(&mut sids.into_iter())
            .into_iter()
            .map(|socket| RemoteSocketData {
                id: socket.id,
                ns: ns.clone(),
                server_id,
            })
            .collect()
    }

    fn send(&self, sids: &mut dyn Iterator<Item = Sid>, data: Encoded) -> Result<(), Vec<SocketError>> {
        let failed = self.pick(sids).into_iter().filter_map(|s| s.send_raw(data.clone()).err());
        all_or_errors(failed.collect())
    }

    /// Every socket receives the packet with the same ack id.
    fn send_with_ack(
        &self,
        sids: &mut dyn Iterator<Item = Sid>,
        mut packet: Packet,
        timeout: Duration,
    ) -> (SocketAcks, u32) {
        let targets = self.pick(sids);
        let ack_id = self.next_ack_id();
        packet.inner.set_ack_id(ack_id);
        SocketAcks::broadcast(ack_id, self.parser.encode(packet), targets.iter(), timeout)
    }

    /// Sockets already gone are not an error.
    fn disconnect(&self, sids: Vec<Sid>) -> Result<(), Vec<DisconnectError>> {
        let failed = self.pick(&mut sids.into_iter()).into_iter().filter_map(|socket| {
            match socket.disconnect() {
                Err(SocketError::InternalChannelFull) => Some(DisconnectError::InternalChannelFull),
                Err(SocketError::Closed) | Ok(()) => None,
            }
        });
        all_or_errors(failed.collect())
    }

    fn server_event(&self, args: Vec<PayloadValue>) -> BoxFuture<'static, Vec<PayloadValue>> {
        let handler = self.server_handler.read().unwrap_or_else(PoisonError::into_inner);
        match handler.as_ref() {
            Some(handler) => handler(args),
            None => no_reply(),
        }
    }
}

pub(super) fn no_reply() -> BoxFuture<'static, Vec<PayloadValue>> {
    futures_util::future::ready(Vec::new()).boxed()
}

/// The [`SocketEmitter`] given to the adapter of every namespace.
///
/// It only holds a weak reference to its namespace: once the namespace is dropped every
/// operation finds no socket.
pub struct Emitter {
    pub(super) ns: Weak<dyn LocalSockets>,
    pub(super) path: Str,
    pub(super) parser: Parser,
    pub(super) server_id: Uid,
    pub(super) ack_timeout: Duration,
}

impl Emitter {
    fn with_ns<R>(&self, gone: R, f: impl FnOnce(&dyn LocalSockets) -> R) -> R {
        match self.ns.upgrade() {
            Some(ns) => f(&*ns),
            None => gone,
        }
    }
}

impl fmt::Debug for Emitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Emitter({}@{})", self.path, self.server_id)
    }
}

impl SocketEmitter for Emitter {
    type AckStream = SocketAcks;

    fn get_all_sids(&self, filter: impl Fn(&Sid) -> bool) -> Vec<Sid> {
        self.with_ns(Vec::new(), |ns| ns.sids(&filter))
    }

    fn get_remote_sockets(&self, sids: Vec<Sid>) -> Vec<RemoteSocketData> {
        self.with_ns(Vec::new(), |ns| ns.describe(sids, self.server_id))
    }

    fn send_many(&self, mut sids: impl Iterator<Item = Sid>, data: Encoded) -> Result<(), Vec<SocketError>> {
        self.with_ns(Ok(()), |ns| ns.send(&mut sids, data))
    }

    fn send_many_with_ack(
        &self,
        mut sids: impl Iterator<Item = Sid>,
        packet: Packet,
        timeout: Option<Duration>,
    ) -> (Self::AckStream, u32) {
        let timeout = timeout.unwrap_or(self.ack_timeout);
        self.with_ns((SocketAcks::empty(), 0), |ns| {
            ns.send_with_ack(&mut sids, packet, timeout)
        })
    }

    fn disconnect_many(&self, sids: Vec<Sid>) -> Result<(), Vec<DisconnectError>> {
        self.with_ns(Ok(()), |ns| ns.disconnect(sids))
    }

    fn server_event(&self, args: Vec<PayloadValue>) -> impl Future<Output = Vec<PayloadValue>> + Send + 'static {
        self.ns
            .upgrade()
            .map_or_else(no_reply, |ns| ns.server_event(args))
    }

    fn path(&self) -> &Str {
        &self.path
    }

    fn parser(&self) -> impl Parse {
        self.parser
    }

    fn server_id(&self) -> Uid {
        self.server_id
    }

    fn ack_timeout(&self) -> Duration {
        self.ack_timeout
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use futures_util::StreamExt;
    use relayio_core::{adapter::CoreAdapter, packet::PacketData};

    use super::*;

    #[tokio::test]
    async fn only_known_sockets_are_reached() {
        let (a, b) = (Sid::new(), Sid::new());
        let ns = Namespace::new_dummy([a, b]);
        let emitter = ns.adapter.get_local().emitter();

        let mut sids = emitter.get_all_sids(|_| true);
        sids.sort();
        let mut both = vec![a, b];
        both.sort();
        assert_eq!(sids, both);
        assert_eq!(emitter.get_all_sids(|sid| *sid == b), [b]);

        let described = emitter.get_remote_sockets(vec![a, Sid::new()]);
        assert_eq!(described.len(), 1);
        assert_eq!((described[0].id, described[0].ns.as_str()), (a, "/"));

        let data = ns.parser.encode(Packet::event("/", "news", vec![]));
        assert!(emitter.send_many([a, Sid::new()].into_iter(), data).is_ok());
    }

    #[tokio::test]
    async fn one_ack_id_for_the_whole_broadcast() {
        let (a, b) = (Sid::new(), Sid::new());
        let ns = Namespace::new_dummy([a, b]);
        let emitter = ns.adapter.get_local().emitter();
        let packet = Packet::event("/", "news", vec![]);
        let timeout = Some(Duration::from_millis(10));
        let (acks, count) = emitter.send_many_with_ack([a, b].into_iter(), packet, timeout);
        assert_eq!(count, 2);

        let ack_id = ns.ack_counter.load(Ordering::SeqCst);
        for sid in [a, b] {
            let answer = PacketData::EventAck(vec![1i64.into()], ack_id);
            ns.get_socket(sid).unwrap().recv(answer).unwrap();
        }
        let answers: Vec<_> = acks.collect().await;
        assert_eq!(answers.len(), 2);
        assert!(answers.iter().all(|(_, res)| res.is_ok()));
    }

    #[tokio::test]
    async fn dropped_namespace_reaches_nobody() {
        let ns = Namespace::new_dummy([]);
        let emitter = Emitter {
            ns: Arc::downgrade(&ns) as Weak<dyn LocalSockets>,
            path: ns.path.clone(),
            parser: ns.parser,
            server_id: Uid::new(),
            ack_timeout: Duration::from_millis(10),
        };
        drop(ns);
        assert!(emitter.ns.upgrade().is_none());
        assert!(emitter.get_all_sids(|_| true).is_empty());
        let packet = Packet::disconnect("/");
        assert_eq!(emitter.send_many_with_ack([Sid::new()].into_iter(), packet, None).1, 0);
        assert!(emitter.server_event(vec![]).await.is_empty());
    }

    #[tokio::test]
    async fn server_event_without_handler_answers_nothing() {
        let ns = Namespace::new_dummy([]);
        let emitter = ns.adapter.get_local().emitter();
        assert!(emitter.server_event(vec![1i64.into()]).await.is_empty());

        ns.on_server_event(async |n: i64| n + 1);
        let reply = emitter.server_event(vec![1i64.into()]).await;
        assert_eq!(reply, vec![PayloadValue::from(2i64)]);
    }
}
