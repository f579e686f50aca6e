//! Engine.io sessions.
//!
//! A [`Socket`] is one session, whatever transport carries it. Packets emitted on it wait
//! in a bounded queue read by the transport: the next polling request or the websocket
//! writer. A full queue makes emitting fail instead of blocking.
//!
//! ```rust
//! # use bytes::Bytes;
//! # use relayio_engine::{handler::EngineIoHandler, service::EngineIoService};
//! # use relayio_engine::{Socket, DisconnectReason, Str};
//! # use std::sync::Arc;
//! /// Sends every message back, once the client proved it knows the password.
//! #[derive(Debug)]
//! struct Echo;
//!
//! impl EngineIoHandler for Echo {
//!     type Data = ();
//!
//!     fn on_connect(self: Arc<Self>, socket: Arc<Socket<()>>) {
//!         let query = socket.req_parts.uri.query().unwrap_or_default();
//!         if !query.contains("password=relay") {
//!             socket.close(DisconnectReason::TransportError);
//!         }
//!     }
//!     fn on_disconnect(&self, _: Arc<Socket<()>>, _: DisconnectReason) {}
//!     fn on_message(self: &Arc<Self>, msg: Str, socket: Arc<Socket<()>>) {
//!         socket.emit(msg).ok();
//!     }
//!     fn on_binary(self: &Arc<Self>, data: Bytes, socket: Arc<Socket<()>>) {
//!         socket.emit_binary(data).ok();
//!     }
//! }
//!
//! let svc = EngineIoService::new(Arc::new(Echo));
//! ```
use std::{
    fmt,
    sync::{Arc, Mutex as StdMutex, PoisonError},
    time::Duration,
};

use bytes::Bytes;
use http::request::Parts;
use relayio_engine_core::{Packet, PacketBuf, ProtocolVersion, Str, TransportType};
use smallvec::smallvec;
use tokio::{
    sync::{
        Mutex,
        mpsc::{self, error::TrySendError},
    },
    task::JoinHandle,
    time::Instant,
};

use crate::{config::EngineIoConfig, errors::Error, lookahead::LookaheadRx};

mod permit;
mod state;

pub use permit::Permit;
pub use relayio_engine_core::Sid;
pub use state::{ReadyState, UpgradeState};
use state::Shared;

/// Why a [`Socket`] was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The client sent a close packet or closed its websocket
    TransportClose,
    /// Two polling requests of the session overlapped
    MultipleHttpPollingError,
    /// A packet could not be decoded or was not expected
    PacketParsingError,
    /// The transport failed: a connection lost without close packet, a payload too large...
    TransportError,
    /// The client did not answer a ping in time
    HeartbeatTimeout,
    /// The engine is shutting down
    ClosingServer,
}

impl fmt::Display for DisconnectReason {
    /// The reason names of the engine.io protocol.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DisconnectReason::TransportClose => "transport close",
            DisconnectReason::MultipleHttpPollingError | DisconnectReason::TransportError => {
                "transport error"
            }
            DisconnectReason::PacketParsingError => "parse error",
            DisconnectReason::HeartbeatTimeout => "ping timeout",
            DisconnectReason::ClosingServer => "forced close",
        })
    }
}

type CloseFn = Box<dyn Fn(Sid, DisconnectReason) + Send + Sync>;

/// An engine.io session.
///
/// It owns the queue of outgoing packets, the heartbeat task and the data `D` attached by the
/// [`EngineIoHandler`](crate::handler::EngineIoHandler).
pub struct Socket<D>
where
    D: Default + Send + Sync + 'static,
{
    /// Session id, sent to the client in the open packet
    pub id: Sid,

    /// Protocol revision negotiated with the `EIO` query parameter
    pub protocol: ProtocolVersion,

    /// Handler data
    pub data: D,

    /// The request that opened the session
    pub req_parts: Parts,

    transport: Shared<TransportType>,
    ready: Shared<ReadyState>,
    upgrade: Shared<UpgradeState>,

    /// Outgoing packets, drained by one transport at a time: a polling request or the
    /// websocket writer holds the lock while reading.
    /// Packets of one [`PacketBuf`] are flushed together.
    pub(crate) outbox: Mutex<LookaheadRx<PacketBuf>>,
    outbox_tx: mpsc::Sender<PacketBuf>,

    pongs: Mutex<mpsc::Receiver<()>>,
    pongs_tx: mpsc::Sender<()>,
    heartbeat: StdMutex<Option<JoinHandle<()>>>,

    on_close: CloseFn,
}

impl<D> Socket<D>
where
    D: Default + Send + Sync + 'static,
{
    pub(crate) fn new(
        protocol: ProtocolVersion,
        transport: TransportType,
        config: &EngineIoConfig,
        req_parts: Parts,
        on_close: CloseFn,
    ) -> Self {
        let (outbox_tx, outbox) = mpsc::channel(config.max_buffer_size);
        let (pongs_tx, pongs) = mpsc::channel(1);
        Socket {
            id: Sid::new(),
            protocol,
            data: D::default(),
            req_parts,
            transport: Shared::new(transport),
            ready: Shared::new(ReadyState::Opening),
            upgrade: Shared::new(UpgradeState::NotUpgraded),
            outbox: Mutex::new(LookaheadRx::new(outbox)),
            outbox_tx,
            pongs: Mutex::new(pongs),
            pongs_tx,
            heartbeat: StdMutex::new(None),
            on_close,
        }
    }

    /// Queues a packet for the client.
    pub(crate) fn send(&self, packet: Packet) -> Result<(), TrySendError<Packet>> {
        #[cfg(feature = "tracing")]
        tracing::trace!(sid = ?self.id, ?packet, "queuing packet");
        let unqueued = |mut buf: PacketBuf| buf.drain(..).next().unwrap_or(Packet::Noop);
        match self.outbox_tx.try_send(smallvec![packet]) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(buf)) => Err(TrySendError::Full(unqueued(buf))),
            Err(TrySendError::Closed(buf)) => Err(TrySendError::Closed(unqueued(buf))),
        }
    }

    /// Hands a pong to the heartbeat task.
    pub(crate) fn pong(&self) {
        self.pongs_tx.try_send(()).ok();
    }

    /// Where the session stands in its lifecycle.
    pub fn ready_state(&self) -> ReadyState {
        self.ready.get()
    }

    /// Called once the open packet is handed to the transport
    pub(crate) fn set_open(&self) {
        self.ready.swap_from(ReadyState::Opening, ReadyState::Open);
    }

    pub(crate) fn set_closed(&self) {
        self.ready.set(ReadyState::Closed);
    }

    /// Where the session stands regarding a websocket upgrade.
    pub fn upgrade_state(&self) -> UpgradeState {
        self.upgrade.get()
    }

    pub(crate) fn is_upgrading(&self) -> bool {
        self.upgrade_state() == UpgradeState::Upgrading
    }

    /// Only one upgrade may happen during the lifetime of a session
    pub(crate) fn try_start_upgrade(&self) -> bool {
        self.upgrade
            .swap_from(UpgradeState::NotUpgraded, UpgradeState::Upgrading)
    }

    pub(crate) fn cancel_upgrade(&self) {
        self.upgrade
            .swap_from(UpgradeState::Upgrading, UpgradeState::NotUpgraded);
    }

    /// Marks the session as carried by a websocket for good.
    pub(crate) fn upgrade_to_websocket(&self) {
        self.transport.set(TransportType::Websocket);
        self.upgrade.set(UpgradeState::Upgraded);
    }

    /// The transport currently carrying the session.
    pub fn transport_type(&self) -> TransportType {
        self.transport.get()
    }

    pub(crate) fn is_ws(&self) -> bool {
        self.transport_type() == TransportType::Websocket
    }

    pub(crate) fn is_http(&self) -> bool {
        self.transport_type() == TransportType::Polling
    }

    /// Starts pinging the client, every `interval`. The session is closed with
    /// [`DisconnectReason::HeartbeatTimeout`] when a pong takes more than `timeout`.
    pub(crate) fn spawn_heartbeat(self: Arc<Self>, interval: Duration, timeout: Duration) {
        let socket = self.clone();
        let task = tokio::spawn(async move {
            if let Err(_e) = socket.heartbeat_loop(interval, timeout).await {
                #[cfg(feature = "tracing")]
                tracing::debug!(sid = ?socket.id, "heartbeat stopped: {_e}");
                socket.close(DisconnectReason::HeartbeatTimeout);
            }
        });
        let previous = self
            .heartbeat
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(task);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    pub(crate) fn abort_heartbeat(&self) {
        let task = self
            .heartbeat
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.abort();
        }
    }

    /// No ping goes out while an upgrade is in flight.
    async fn heartbeat_loop(&self, interval: Duration, timeout: Duration) -> Result<(), Error> {
        let mut pongs = self.pongs.try_lock().map_err(|_| Error::Aborted)?;
        let mut ticks = tokio::time::interval_at(Instant::now() + interval, interval);
        loop {
            ticks.tick().await;
            if self.is_upgrading() {
                #[cfg(feature = "tracing")]
                tracing::trace!(sid = ?self.id, "upgrading, ping skipped");
                continue;
            }
            // pongs received out of a ping window are ignored
            while pongs.try_recv().is_ok() {}

            self.outbox_tx
                .try_send(smallvec![Packet::Ping])
                .map_err(|_| Error::HeartbeatTimeout)?;
            match tokio::time::timeout(timeout, pongs.recv()).await {
                Ok(Some(())) => {}
                Ok(None) | Err(_) => return Err(Error::HeartbeatTimeout),
            }
        }
    }

    /// Takes a slot in the queue, or tells why there is none.
    #[inline]
    pub fn reserve(&self) -> Result<Permit<'_>, TrySendError<()>> {
        self.outbox_tx.try_reserve().map(Permit::new)
    }

    /// Queues a text message. On a full queue or a closed session, the message comes back
    /// in the error.
    pub fn emit(&self, msg: impl Into<Str>) -> Result<(), TrySendError<Str>> {
        let msg = msg.into();
        match self.reserve() {
            Ok(permit) => {
                permit.emit(msg);
                Ok(())
            }
            Err(err) => Err(give_back(err, msg)),
        }
    }

    /// Queues a binary message. Polling clients receive it base64 encoded.
    /// On a full queue or a closed session, the data comes back in the error.
    pub fn emit_binary<B: Into<Bytes>>(&self, data: B) -> Result<(), TrySendError<Bytes>> {
        let data = data.into();
        match self.reserve() {
            Ok(permit) => {
                permit.emit_binary(data);
                Ok(())
            }
            Err(err) => Err(give_back(err, data)),
        }
    }

    /// Queues a close packet and removes the session from the engine, which notifies
    /// the handler. The transport closes once the queue is flushed.
    ///
    /// Only the first call has an effect.
    pub fn close(&self, reason: DisconnectReason) {
        if !self.ready.swap_if(ReadyState::Closing, |s| s < ReadyState::Closing) {
            return;
        }
        self.send(Packet::Close).ok();
        (self.on_close)(self.id, reason);
    }

    /// True once the queue can't take packets anymore.
    pub fn is_closed(&self) -> bool {
        self.outbox_tx.is_closed()
    }

    /// Resolves once the queue can't take packets anymore.
    pub async fn closed(&self) {
        self.outbox_tx.closed().await
    }
}

fn give_back<T>(err: TrySendError<()>, value: T) -> TrySendError<T> {
    match err {
        TrySendError::Full(()) => TrySendError::Full(value),
        TrySendError::Closed(()) => TrySendError::Closed(value),
    }
}

impl<D: Default + Send + Sync + 'static> fmt::Debug for Socket<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Socket")
            .field("id", &self.id)
            .field("protocol", &self.protocol)
            .field("transport", &self.transport_type())
            .field("ready_state", &self.ready_state())
            .field("upgrade_state", &self.upgrade_state())
            .field("uri", &self.req_parts.uri)
            .finish_non_exhaustive()
    }
}

#[doc(hidden)]
#[cfg(feature = "__test_harness")]
impl<D> Socket<D>
where
    D: Default + Send + Sync + 'static,
{
    /// An open websocket session whose packets are discarded.
    pub fn new_dummy(sid: Sid, on_close: CloseFn) -> Arc<Socket<D>> {
        let (socket, mut rx) = Socket::new_dummy_piped(sid, on_close, 1024);
        tokio::spawn(async move { while rx.recv().await.is_some() {} });
        socket
    }

    /// An open websocket session whose packets are forwarded to the returned receiver.
    pub fn new_dummy_piped(
        sid: Sid,
        on_close: CloseFn,
        buffer_size: usize,
    ) -> (Arc<Socket<D>>, mpsc::Receiver<Packet>) {
        let config = EngineIoConfig::builder()
            .max_buffer_size(buffer_size)
            .build();
        let (parts, ()) = http::Request::default().into_parts();
        let mut socket = Socket::new(
            ProtocolVersion::V4,
            TransportType::Websocket,
            &config,
            parts,
            on_close,
        );
        socket.id = sid;
        socket.set_open();
        let socket = Arc::new(socket);

        let (tx, rx) = mpsc::channel(buffer_size);
        let reader = socket.clone();
        tokio::spawn(async move {
            let mut outbox = reader.outbox.lock().await;
            while let Some(packets) = outbox.recv().await {
                for packet in packets {
                    if tx.send(packet).await.is_err() {
                        return;
                    }
                }
            }
        });
        (socket, rx)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        sync::atomic::{AtomicUsize, Ordering},
    };

    use super::*;

    fn socket(on_close: CloseFn, buffer: usize) -> Arc<Socket<()>> {
        let config = EngineIoConfig::builder().max_buffer_size(buffer).build();
        let (parts, ()) = http::Request::default().into_parts();
        Arc::new(Socket::new(
            ProtocolVersion::V4,
            TransportType::Polling,
            &config,
            parts,
            on_close,
        ))
    }

    fn reporting(tx: mpsc::Sender<DisconnectReason>) -> CloseFn {
        Box::new(move |_, reason| {
            tx.try_send(reason).ok();
        })
    }

    #[test]
    fn protocol_reason_names() {
        assert_eq!(DisconnectReason::TransportClose.to_string(), "transport close");
        assert_eq!(DisconnectReason::TransportError.to_string(), "transport error");
        assert_eq!(
            DisconnectReason::MultipleHttpPollingError.to_string(),
            "transport error"
        );
        assert_eq!(DisconnectReason::PacketParsingError.to_string(), "parse error");
        assert_eq!(DisconnectReason::HeartbeatTimeout.to_string(), "ping timeout");
        assert_eq!(DisconnectReason::ClosingServer.to_string(), "forced close");
    }

    #[tokio::test]
    async fn close_runs_once_after_queued_packets() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let socket = socket(
            Box::new(move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
            8,
        );
        socket.set_open();
        assert_eq!(socket.ready_state(), ReadyState::Open);

        socket.emit("hello").unwrap();
        socket.close(DisconnectReason::TransportClose);
        socket.close(DisconnectReason::HeartbeatTimeout);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(socket.ready_state(), ReadyState::Closing);

        let mut outbox = socket.outbox.lock().await;
        assert_eq!(outbox.recv().await.unwrap()[0], Packet::Message("hello".into()));
        assert_eq!(outbox.recv().await.unwrap()[0], Packet::Close);
    }

    #[tokio::test]
    async fn full_queue_gives_data_back() {
        let socket = socket(Box::new(|_, _| ()), 1);
        socket.emit("a").unwrap();
        let err = socket.emit("b").unwrap_err();
        assert!(matches!(err, TrySendError::Full(msg) if msg == "b"));
        let err = socket.emit_binary(vec![1u8]).unwrap_err();
        assert!(matches!(err, TrySendError::Full(bin) if bin.as_ref() == [1]));
    }

    #[tokio::test]
    async fn attachments_share_one_slot() {
        let socket = socket(Box::new(|_, _| ()), 4);
        let bins = VecDeque::from([Bytes::from_static(&[1]), Bytes::from_static(&[2])]);
        socket.reserve().unwrap().emit_many("msg".into(), bins);
        let mut outbox = socket.outbox.lock().await;
        let packets = outbox.recv().await.unwrap();
        assert_eq!(packets.len(), 3);
        assert_eq!(packets[2], Packet::Binary(Bytes::from_static(&[2])));
    }

    #[test]
    fn a_single_upgrade() {
        let socket = socket(Box::new(|_, _| ()), 1);
        assert_eq!(socket.upgrade_state(), UpgradeState::NotUpgraded);
        assert!(socket.try_start_upgrade());
        assert!(!socket.try_start_upgrade());
        assert!(socket.is_upgrading());
        socket.cancel_upgrade();
        assert_eq!(socket.upgrade_state(), UpgradeState::NotUpgraded);
        assert!(socket.try_start_upgrade());
        socket.upgrade_to_websocket();
        assert!(socket.is_ws());
        assert_eq!(socket.upgrade_state(), UpgradeState::Upgraded);
        assert!(!socket.try_start_upgrade());
    }

    #[tokio::test]
    async fn unanswered_ping_closes_the_session() {
        let (tx, mut rx) = mpsc::channel(1);
        let socket = socket(reporting(tx), 8);
        socket
            .clone()
            .spawn_heartbeat(Duration::from_millis(10), Duration::from_millis(5));
        let reason = tokio::time::timeout(Duration::from_millis(200), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reason, DisconnectReason::HeartbeatTimeout);
        assert_eq!(reason.to_string(), "ping timeout");
    }

    #[tokio::test]
    async fn pongs_keep_the_session() {
        let (tx, mut rx) = mpsc::channel(1);
        let socket = socket(reporting(tx), 8);
        socket
            .clone()
            .spawn_heartbeat(Duration::from_millis(10), Duration::from_millis(20));
        let client = socket.clone();
        tokio::spawn(async move {
            let mut outbox = client.outbox.lock().await;
            while let Some(packets) = outbox.recv().await {
                if packets[0] == Packet::Ping {
                    client.pong();
                }
            }
        });
        let res = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
        assert!(res.is_err(), "the session was closed");
        socket.abort_heartbeat();
    }
}
