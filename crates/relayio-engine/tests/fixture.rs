#![allow(dead_code)]

use std::{collections::VecDeque, future::Future, sync::Arc, time::Duration};

use http::{Method, Request, StatusCode, response::Parts};
use http_body_util::{BodyExt, Either, Empty, Full};
use relayio_engine::{
    ProtocolVersion, Sid, config::EngineIoConfig, handler::EngineIoHandler,
    service::EngineIoService,
};
use serde::Deserialize;
use tokio::io::{DuplexStream, duplex};
use tokio_tungstenite::{WebSocketStream, tungstenite::protocol::Role};
use tower_service::Service;

/// The json of the open packet sent on handshakes.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    pub sid: String,
    pub upgrades: Vec<String>,
    pub ping_interval: u64,
    pub ping_timeout: u64,
    pub max_payload: u64,
}

impl Handshake {
    /// Reads an open packet, its leading `0` included.
    pub fn parse(packet: &str) -> Handshake {
        let json = packet.strip_prefix('0').expect("not an open packet");
        serde_json::from_str(json).unwrap()
    }
}

pub type ReqBody = Either<Full<VecDeque<u8>>, Empty<VecDeque<u8>>>;

pub fn req_body(data: Option<&str>) -> ReqBody {
    data.map_or_else(
        || Either::Right(Empty::new()),
        |data| Either::Left(Full::new(data.bytes().collect())),
    )
}

/// Calls the service and collects the whole response.
pub fn send_raw<H: EngineIoHandler>(
    svc: &mut EngineIoService<H>,
    req: Request<ReqBody>,
) -> impl Future<Output = (Parts, String)> + 'static {
    let pending = svc.call(req);
    async move {
        let (parts, body) = pending.await.unwrap().into_parts();
        let bytes = body.collect().await.unwrap().to_bytes();
        (parts, String::from_utf8(bytes.to_vec()).unwrap())
    }
}

/// Sends a request to the engine path. `query` looks like `EIO=4&transport=polling`.
pub fn send_req<H: EngineIoHandler>(
    svc: &mut EngineIoService<H>,
    query: String,
    method: Method,
    data: Option<&str>,
) -> impl Future<Output = (StatusCode, String)> + 'static {
    let req = Request::builder()
        .method(method)
        .uri(format!("http://127.0.0.1/engine.io/?{query}"))
        .body(req_body(data))
        .unwrap();
    let pending = send_raw(svc, req);
    async move {
        let (parts, body) = pending.await;
        (parts.status, body)
    }
}

/// Long-polls the session.
pub fn poll<H: EngineIoHandler>(
    svc: &mut EngineIoService<H>,
    sid: &str,
) -> impl Future<Output = (StatusCode, String)> + 'static {
    let query = format!("EIO=4&transport=polling&sid={sid}");
    send_req(svc, query, Method::GET, None)
}

/// Posts an encoded payload to the session.
pub fn post<H: EngineIoHandler>(
    svc: &mut EngineIoService<H>,
    sid: &str,
    payload: &str,
) -> impl Future<Output = (StatusCode, String)> + 'static {
    let query = format!("EIO=4&transport=polling&sid={sid}");
    send_req(svc, query, Method::POST, Some(payload))
}

/// Opens a polling session and returns its id.
pub async fn create_polling_connection<H: EngineIoHandler>(svc: &mut EngineIoService<H>) -> String {
    let query = "EIO=4&transport=polling".to_string();
    let (status, body) = send_req(svc, query, Method::GET, None).await;
    assert_eq!(status, StatusCode::OK);
    Handshake::parse(&body).sid
}

pub type WsClient = WebSocketStream<DuplexStream>;

/// Opens a websocket session.
pub async fn create_ws_connection<H: EngineIoHandler>(svc: &mut EngineIoService<H>) -> WsClient {
    join_ws(svc, None).await
}

/// Connects a websocket client through an in-memory pipe, upgrading the `sid` session if any.
pub async fn join_ws<H: EngineIoHandler>(svc: &mut EngineIoService<H>, sid: Option<Sid>) -> WsClient {
    let (server, client) = duplex(1 << 20);
    let (parts, _) = Request::builder()
        .uri("ws://127.0.0.1/engine.io/?EIO=4&transport=websocket")
        .header("Connection", "Upgrade")
        .header("Upgrade", "websocket")
        .body(())
        .unwrap()
        .into_parts();

    tokio::spawn(svc.ws_init(server, ProtocolVersion::V4, sid, parts));
    WebSocketStream::from_raw_socket(client, Role::Client, None).await
}

pub fn test_config() -> EngineIoConfig {
    EngineIoConfig::builder()
        .ping_interval(Duration::from_millis(300))
        .ping_timeout(Duration::from_millis(200))
        .max_payload(1_000_000)
        .build()
}

pub async fn create_server<H: EngineIoHandler>(handler: H) -> EngineIoService<H> {
    create_server_with_config(handler, test_config()).await
}

pub async fn create_server_with_config<H: EngineIoHandler>(
    handler: H,
    config: EngineIoConfig,
) -> EngineIoService<H> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init()
        .ok();
    EngineIoService::with_config(Arc::new(handler), config)
}
