//! Websocket transport.
//!
//! [`new_req`] answers the http upgrade request and spawns a task that owns the websocket.
//! That task either opens a fresh session or takes over a polling session through the
//! `2probe` / `3probe` / `5` exchange, then pumps frames in both directions until one side closes.

use std::{sync::Arc, time::Duration};

use futures_util::{
    SinkExt, StreamExt, TryStreamExt,
    stream::{SplitSink, SplitStream},
};
use http::{HeaderValue, Request, Response, StatusCode, header, request::Parts};
use relayio_engine_core::{EncodedPacket, Packet, ProtocolVersion, Sid, Str, TransportType};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    task::JoinHandle,
    time::Instant,
};
use tokio_tungstenite::{
    WebSocketStream,
    tungstenite::{Message, Utf8Bytes, handshake::derive_accept_key, protocol::Role},
};

use crate::{
    Socket,
    body::ResponseBody,
    engine::EngineIo,
    errors::{Error, RequestError},
    handler::EngineIoHandler,
    socket::DisconnectReason,
    transport::make_open_packet,
};

/// Period of the noop packets that release polling requests while an upgrade is in flight
const NOOP_PERIOD: Duration = Duration::from_millis(100);

type Ws<S> = WebSocketStream<S>;

/// Answers a websocket upgrade request with `101 Switching Protocols` and serves the connection
/// in a background task once hyper hands it over.
///
/// With a `sid` the connection takes over an existing polling session.
pub fn new_req<R: Send + 'static, B, H: EngineIoHandler>(
    engine: Arc<EngineIo<H>>,
    protocol: ProtocolVersion,
    sid: Option<Sid>,
    req: Request<R>,
) -> Result<Response<ResponseBody<B>>, Error> {
    let accept = req
        .headers()
        .get(header::SEC_WEBSOCKET_KEY)
        .map(|key| derive_accept_key(key.as_bytes()))
        .ok_or(Error::InvalidWebSocketKey)?;
    let accept = HeaderValue::from_str(&accept).map_err(|_| Error::InvalidWebSocketKey)?;

    let (parts, body) = req.into_parts();
    let upgrade = hyper::upgrade::on(Request::from_parts(parts.clone(), body));
    tokio::spawn(async move {
        let outcome = match upgrade.await {
            Ok(io) => serve(engine, hyper_util::rt::TokioIo::new(io), protocol, sid, parts).await,
            Err(_e) => {
                #[cfg(feature = "tracing")]
                tracing::debug!("http upgrade failed: {_e}");
                return;
            }
        };
        if let Err(_e) = outcome {
            #[cfg(feature = "tracing")]
            tracing::debug!("websocket closed: {_e:?}");
        }
    });

    Ok(Response::builder()
        .status(StatusCode::SWITCHING_PROTOCOLS)
        .header(header::UPGRADE, "websocket")
        .header(header::CONNECTION, "Upgrade")
        .header(header::SEC_WEBSOCKET_ACCEPT, accept)
        .body(ResponseBody::empty_response())?)
}

/// Serves an upgraded connection until it closes.
pub(crate) async fn serve<H: EngineIoHandler, S>(
    engine: Arc<EngineIo<H>>,
    io: S,
    protocol: ProtocolVersion,
    sid: Option<Sid>,
    parts: Parts,
) -> Result<(), Error>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let mut ws = Ws::from_raw_socket(io, Role::Server, None).await;
    let attached = match sid {
        Some(sid) => take_over(&engine, sid, &mut ws).await,
        None => open_session(&engine, protocol, parts, &mut ws).await,
    };
    let socket = match attached {
        Ok(socket) => socket,
        Err(e) => {
            ws.close(None).await.ok();
            return Err(e);
        }
    };

    let (sink, stream) = ws.split();
    let writer = spawn_writer(socket.clone(), sink);
    let reason = match read_frames(&engine, &socket, stream).await {
        Ok(()) => DisconnectReason::TransportClose,
        Err(e) => {
            #[cfg(feature = "tracing")]
            tracing::debug!("[sid={}] websocket read failed: {e:?}", socket.id);
            e.closing_reason().unwrap_or(DisconnectReason::TransportError)
        }
    };
    socket.close(reason);
    writer.abort();
    Ok(())
}

/// Creates a websocket session and sends its open packet.
async fn open_session<H: EngineIoHandler, S>(
    engine: &Arc<EngineIo<H>>,
    protocol: ProtocolVersion,
    parts: Parts,
    ws: &mut Ws<S>,
) -> Result<Arc<Socket<H::Data>>, Error>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let config = &engine.config;
    let socket = engine.open_session(protocol, TransportType::Websocket, parts);
    #[cfg(feature = "tracing")]
    tracing::debug!("[sid={}] websocket session opened", socket.id);

    let open = Packet::Open(make_open_packet(TransportType::Websocket, socket.id, config));
    ws.send(frame(open)).await?;
    socket.set_open();
    socket
        .clone()
        .spawn_heartbeat(config.ping_interval, config.ping_timeout);
    Ok(socket)
}

/// Moves a polling session onto this websocket.
///
/// On any failure the polling transport keeps serving the session.
async fn take_over<H: EngineIoHandler, S>(
    engine: &Arc<EngineIo<H>>,
    sid: Sid,
    ws: &mut Ws<S>,
) -> Result<Arc<Socket<H::Data>>, Error>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let socket = engine
        .get_socket(sid)
        .ok_or(RequestError::UnknownSessionId)?;
    if socket.is_ws() || !socket.try_start_upgrade() {
        #[cfg(feature = "tracing")]
        tracing::debug!("[sid={sid}] already upgraded or upgrading");
        return Err(Error::Upgrade);
    }

    let deadline = Instant::now() + engine.config.upgrade_timeout;
    match upgrade_exchange(&socket, ws, deadline).await {
        Ok(()) => {
            #[cfg(feature = "tracing")]
            tracing::debug!("[sid={sid}] upgraded to websocket");
            Ok(socket)
        }
        Err(e) => {
            socket.cancel_upgrade();
            Err(e)
        }
    }
}

/// The upgrade exchange, bounded by `deadline`:
/// ```text
/// client                          server
///   | ---- GET ?transport=websocket&sid=... ---> |
///   | <--- 101 Switching Protocols ------------- |
///   | ---- 2probe -----------------------------> |
///   | <--- 3probe ------------------------------ |  (noop to the pending poll)
///   | ---- 5 ----------------------------------> |
/// ```
async fn upgrade_exchange<D, S>(
    socket: &Arc<Socket<D>>,
    ws: &mut Ws<S>,
    deadline: Instant,
) -> Result<(), Error>
where
    D: Default + Send + Sync + 'static,
    S: AsyncRead + AsyncWrite + Unpin,
{
    match next_packet(ws, deadline).await? {
        Packet::PingUpgrade => ws.send(frame(Packet::PongUpgrade)).await?,
        p => return Err(Error::BadPacket(p)),
    }

    // polling requests issued until the upgrade packet are resolved with noops
    release_poll(socket);
    let ticker = NoopTicker::start(socket.clone());
    match next_packet(ws, deadline).await? {
        Packet::Upgrade => (),
        p => return Err(Error::BadPacket(p)),
    }
    drop(ticker);

    // a polling request still holding the receiver must be released before the switch
    release_poll(socket);
    let _rx = socket.outbox.lock().await;
    socket.upgrade_to_websocket();
    Ok(())
}

/// Keeps resolving pending polling requests with noop packets until dropped.
struct NoopTicker(JoinHandle<()>);

impl NoopTicker {
    fn start<D: Default + Send + Sync + 'static>(socket: Arc<Socket<D>>) -> Self {
        Self(tokio::spawn(async move {
            let mut period = tokio::time::interval_at(Instant::now() + NOOP_PERIOD, NOOP_PERIOD);
            loop {
                period.tick().await;
                release_poll(&socket);
            }
        }))
    }
}

impl Drop for NoopTicker {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Sends a noop to the polling request currently holding the receiver, if any.
fn release_poll<D: Default + Send + Sync + 'static>(socket: &Socket<D>) {
    if socket.outbox.try_lock().is_err() {
        socket.send(Packet::Noop).ok();
    }
}

async fn next_packet<S>(ws: &mut Ws<S>, deadline: Instant) -> Result<Packet, Error>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match tokio::time::timeout_at(deadline, ws.next()).await {
        Ok(Some(Ok(Message::Text(frame)))) => Ok(Packet::try_from(frame_str(frame))?),
        Ok(Some(Err(e))) => Err(e.into()),
        Ok(_) => Err(Error::Upgrade),
        Err(_) => Err(Error::UpgradeTimeout),
    }
}

/// Dispatches incoming frames to the handler until the client closes.
async fn read_frames<H: EngineIoHandler, S>(
    engine: &Arc<EngineIo<H>>,
    socket: &Arc<Socket<H::Data>>,
    mut stream: SplitStream<Ws<S>>,
) -> Result<(), Error>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let max_payload = engine.config.max_payload;
    while let Some(frame) = stream.try_next().await? {
        if frame.len() as u64 > max_payload {
            return Err(Error::PayloadTooLarge);
        }
        let packet = match frame {
            Message::Text(frame) => Packet::try_from(frame_str(frame))?,
            Message::Binary(data) => Packet::Binary(data),
            Message::Close(_) => return Ok(()),
            _ => continue,
        };
        match packet {
            Packet::Message(msg) => engine.handler.on_message(msg, socket.clone()),
            Packet::Binary(data) => engine.handler.on_binary(data, socket.clone()),
            Packet::Ping | Packet::Pong => {
                socket.pong();
            }
            Packet::Close => return Ok(()),
            p => return Err(Error::BadPacket(p)),
        }
    }
    Ok(())
}

/// Drains the socket's outgoing queue into the websocket.
///
/// The sink is flushed once the queue is empty so that bursts share a single write.
fn spawn_writer<D, S>(socket: Arc<Socket<D>>, mut sink: SplitSink<Ws<S>, Message>) -> JoinHandle<()>
where
    D: Default + Send + Sync + 'static,
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut queue = socket.outbox.lock().await;
        while let Some(batch) = queue.recv().await {
            let mut pending = vec![batch];
            while let Ok(batch) = queue.try_recv() {
                pending.push(batch);
            }
            for packet in pending.into_iter().flatten() {
                let sent = match packet {
                    Packet::Close => {
                        sink.send(Message::Close(None)).await.ok();
                        queue.close();
                        return;
                    }
                    // left over from a polling request released during the upgrade
                    Packet::Noop => continue,
                    packet => sink.feed(frame(packet)).await,
                };
                if let Err(_e) = sent {
                    #[cfg(feature = "tracing")]
                    tracing::debug!("[sid={}] websocket write failed: {_e}", socket.id);
                }
            }
            sink.flush().await.ok();
        }
    })
}

/// The websocket frame of a packet, binary data goes raw.
fn frame(packet: Packet) -> Message {
    match packet.encode(true) {
        EncodedPacket::Text(text) => Message::Text(Utf8Bytes::from(text)),
        EncodedPacket::Binary(data) => Message::Binary(data),
    }
}

fn frame_str(frame: Utf8Bytes) -> Str {
    // SAFETY: tungstenite only yields text frames that are valid utf8
    unsafe { Str::from_bytes_unchecked(frame.into()) }
}
