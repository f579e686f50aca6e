//! Tests for the polling to websocket upgrade

use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use futures_util::{SinkExt, Stream, StreamExt};
use http::StatusCode;
use relayio_engine::{
    DisconnectReason, Socket, Str, TransportType, config::EngineIoConfig,
    handler::EngineIoHandler, socket::UpgradeState,
};
use tokio_tungstenite::tungstenite::Message;

mod fixture;

use fixture::{
    create_polling_connection, create_server, create_server_with_config, join_ws, poll,
    post,
};

#[derive(Debug, Clone)]
struct EchoHandler;

impl EngineIoHandler for EchoHandler {
    type Data = ();

    fn on_connect(self: Arc<Self>, _socket: Arc<Socket<()>>) {}
    fn on_disconnect(&self, _socket: Arc<Socket<()>>, _reason: DisconnectReason) {}

    fn on_message(self: &Arc<Self>, msg: Str, socket: Arc<Socket<()>>) {
        socket.emit(msg).ok();
    }

    fn on_binary(self: &Arc<Self>, data: Bytes, socket: Arc<Socket<()>>) {
        socket.emit_binary(data).ok();
    }
}

async fn next_msg<S>(ws: &mut S) -> Message
where
    S: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    tokio::time::timeout(Duration::from_millis(500), ws.next())
        .await
        .expect("timeout waiting for a ws message")
        .unwrap()
        .unwrap()
}

#[tokio::test]
pub async fn upgrade_with_outstanding_poll() {
    let mut svc = create_server(EchoHandler).await;
    let sid = create_polling_connection(&mut svc).await;

    let pending = tokio::spawn(poll(&mut svc, &sid));
    tokio::time::sleep(Duration::from_millis(10)).await;

    let mut ws = join_ws(&mut svc, Some(sid.parse().unwrap())).await;
    ws.send(Message::Text("2probe".into())).await.unwrap();
    assert_eq!(next_msg(&mut ws).await, Message::Text("3probe".into()));

    // the outstanding poll is released with a noop packet
    let (status, body) = pending.await.unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "6");

    ws.send(Message::Text("5".into())).await.unwrap();
    ws.send(Message::Text("4hello".into())).await.unwrap();
    assert_eq!(next_msg(&mut ws).await, Message::Text("4hello".into()));

    let socket = svc.engine().get_socket(sid.parse().unwrap()).unwrap();
    assert_eq!(socket.transport_type(), TransportType::Websocket);
    assert_eq!(socket.upgrade_state(), UpgradeState::Upgraded);

    // polling is no longer allowed on this session
    let (status, body) = poll(&mut svc, &sid).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, r#"{"code":3,"message":"Bad request"}"#);
}

#[tokio::test]
pub async fn buffered_packets_are_flushed_on_the_websocket() {
    let mut svc = create_server(EchoHandler).await;
    let sid = create_polling_connection(&mut svc).await;

    let mut ws = join_ws(&mut svc, Some(sid.parse().unwrap())).await;
    ws.send(Message::Text("2probe".into())).await.unwrap();
    assert_eq!(next_msg(&mut ws).await, Message::Text("3probe".into()));

    // echoed while no polling request is outstanding
    let (status, _) = post(&mut svc, &sid, "4buffered").await;
    assert_eq!(status, StatusCode::OK);

    ws.send(Message::Text("5".into())).await.unwrap();
    // the noop sent during the probe is discarded
    assert_eq!(next_msg(&mut ws).await, Message::Text("4buffered".into()));
}

#[tokio::test]
pub async fn upgrade_timeout_keeps_polling_session() {
    let config = EngineIoConfig::builder()
        .upgrade_timeout(Duration::from_millis(50))
        .build();
    let mut svc = create_server_with_config(EchoHandler, config).await;
    let sid = create_polling_connection(&mut svc).await;

    let mut ws = join_ws(&mut svc, Some(sid.parse().unwrap())).await;
    ws.send(Message::Text("2probe".into())).await.unwrap();
    assert_eq!(next_msg(&mut ws).await, Message::Text("3probe".into()));

    // no upgrade packet: only the new websocket is closed
    assert!(matches!(next_msg(&mut ws).await, Message::Close(_)));

    let socket = svc.engine().get_socket(sid.parse().unwrap()).unwrap();
    assert_eq!(socket.transport_type(), TransportType::Polling);
    assert_eq!(socket.upgrade_state(), UpgradeState::NotUpgraded);

    let (status, _) = post(&mut svc, &sid, "4still here").await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = poll(&mut svc, &sid).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.ends_with("4still here"), "{body}");
}

#[tokio::test]
pub async fn noops_stop_after_upgrade_timeout() {
    let config = EngineIoConfig::builder()
        .upgrade_timeout(Duration::from_millis(50))
        .build();
    let mut svc = create_server_with_config(EchoHandler, config).await;
    let sid = create_polling_connection(&mut svc).await;

    let mut ws = join_ws(&mut svc, Some(sid.parse().unwrap())).await;
    ws.send(Message::Text("2probe".into())).await.unwrap();
    assert_eq!(next_msg(&mut ws).await, Message::Text("3probe".into()));
    assert!(matches!(next_msg(&mut ws).await, Message::Close(_)));

    // several noop periods elapse without any pending poll
    tokio::time::sleep(Duration::from_millis(250)).await;

    for _ in 0..2 {
        let res = tokio::time::timeout(Duration::from_millis(300), poll(&mut svc, &sid)).await;
        assert!(res.is_err(), "poll resolved after the upgrade was abandoned: {res:?}");
    }
}

#[tokio::test]
pub async fn second_upgrade_is_refused() {
    let mut svc = create_server(EchoHandler).await;
    let sid = create_polling_connection(&mut svc).await;

    let mut ws = join_ws(&mut svc, Some(sid.parse().unwrap())).await;
    ws.send(Message::Text("2probe".into())).await.unwrap();
    assert_eq!(next_msg(&mut ws).await, Message::Text("3probe".into()));

    // an upgrade is already in flight
    let mut other =
        join_ws(&mut svc, Some(sid.parse().unwrap())).await;
    assert!(matches!(next_msg(&mut other).await, Message::Close(_)));

    ws.send(Message::Text("5".into())).await.unwrap();
    ws.send(Message::Text("4ok".into())).await.unwrap();
    assert_eq!(next_msg(&mut ws).await, Message::Text("4ok".into()));

    // and already done
    let mut other =
        join_ws(&mut svc, Some(sid.parse().unwrap())).await;
    assert!(matches!(next_msg(&mut other).await, Message::Close(_)));
}

#[tokio::test]
pub async fn polling_only_server_does_not_advertise_upgrades() {
    let config = EngineIoConfig::builder()
        .transports([TransportType::Polling])
        .build();
    let mut svc = create_server_with_config(EchoHandler, config).await;
    let (status, body) = fixture::send_req(
        &mut svc,
        "EIO=4&transport=polling".to_string(),
        http::Method::GET,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let open = fixture::Handshake::parse(&body);
    assert!(open.upgrades.is_empty());
}
