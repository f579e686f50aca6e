#![allow(dead_code)]

use std::time::Duration;

use relayio::{SocketIo, adapter::Emitter, handler::ConnectHandler};
use relayio_cluster::{
    ClusterAdapter, ClusterAdapterConfig, ClusterAdapterCtr, drivers::memory::InMemoryDriver,
};
use relayio_core::Sid;
use relayio_engine::Packet;
use tokio::sync::mpsc;

pub type Adapter = ClusterAdapter<Emitter, InMemoryDriver>;

/// The request channel of the root namespace, with the default prefix.
pub const ROOT_REQ_CHAN: &str = "relayio-request#/#";

/// How long a client waits for a packet before the test fails.
const PATIENCE: Duration = Duration::from_millis(100);
/// How long a client listens to make sure nothing comes.
const SILENCE: Duration = Duration::from_millis(20);

/// Servers sharing one in-memory bus.
pub fn servers<const N: usize>() -> [SocketIo<Adapter>; N] {
    servers_on(InMemoryDriver::new(), ClusterAdapterConfig::default())
}

/// Servers sharing `bus`.
pub fn servers_on<const N: usize>(bus: InMemoryDriver, config: ClusterAdapterConfig) -> [SocketIo<Adapter>; N] {
    std::array::from_fn(|_| {
        let ctr = ClusterAdapterCtr::new_with_driver(bus.clone(), config.clone());
        let (_svc, io) = SocketIo::builder()
            .ack_timeout(Duration::from_millis(200))
            .with_adapter::<Adapter>(ctr)
            .build_svc();
        io
    })
}

/// Serves the root namespace of every server with `handler`.
pub async fn serve_root<C, T>(ios: &[&SocketIo<Adapter>], handler: C)
where
    C: ConnectHandler<Adapter, T> + Clone,
    T: 'static,
{
    for io in ios {
        io.ns_init("/", handler.clone()).await.unwrap();
    }
}

/// A client connected to the root namespace of one server.
pub struct Client {
    pub sid: Sid,
    tx: mpsc::Sender<Packet>,
    rx: mpsc::Receiver<Packet>,
}

impl Client {
    /// Connects and reads the CONNECT packet.
    pub async fn connect(io: &SocketIo<Adapter>) -> Self {
        let (tx, rx) = io.new_dummy_sock("/", ()).await;
        let mut client = Client { sid: Sid::ZERO, tx, rx };
        let connect = client.recv().await;
        let sid = connect.split("\"sid\":\"").nth(1).and_then(|s| s.get(..16));
        client.sid = sid.and_then(|sid| sid.parse().ok()).expect("no sid in CONNECT");
        client
    }

    /// The next text packet.
    pub async fn recv(&mut self) -> String {
        self.recv_within(PATIENCE).await
    }

    pub async fn recv_within(&mut self, patience: Duration) -> String {
        let packet = tokio::time::timeout(patience, self.rx.recv()).await;
        String::from(packet.expect("nothing received").expect("session closed"))
    }

    /// Fails if a packet arrives soon.
    pub async fn assert_silent(&mut self) {
        let packet = tokio::time::timeout(SILENCE, self.rx.recv()).await;
        assert!(packet.is_err(), "unexpected packet {packet:?}");
    }

    /// Sends a text packet to the server.
    pub fn send(&self, packet: &str) {
        let packet = Packet::try_from(packet.to_string()).unwrap();
        self.tx.try_send(packet).unwrap();
    }
}
