
use std::time::Duration;

use fixture::*;
use futures_util::SinkExt;
use relayio::{SocketIo, extract::SocketRef, socket::DisconnectReason};
use tokio::sync::mpsc;

fn attach_disconnect_handler(io: &SocketIo, ns: &'static str) -> mpsc::Receiver<DisconnectReason> {
    let (tx, rx) = mpsc::channel(4);
    io.ns(ns, move |s: SocketRef| async move {
        s.on_disconnect(move |reason: DisconnectReason| async move {
            tx.try_send(reason).unwrap();
        });
    });
    rx
}

#[tokio::test]
async fn client_ns_disconnect() {
    let (svc, io) = create_server();
    let mut rx = attach_disconnect_handler(&io, "/");

    let (mut ws, _) = connect_ws(&svc, "/", None).await;
    send_text(&mut ws, "41").await;

    assert_eq!(timeout_rcv(&mut rx).await, DisconnectReason::ClientNSDisconnect);
}

#[tokio::test]
async fn client_ns_disconnect_keeps_other_namespaces() {
    let (svc, io) = create_server();
    let mut root_rx = attach_disconnect_handler(&io, "/");
    let mut admin_rx = attach_disconnect_handler(&io, "/admin");

    let (mut ws, _) = connect_ws(&svc, "/", None).await;
    send_text(&mut ws, "40/admin,").await;
    assert!(recv_text(&mut ws).await.starts_with("0/admin,"));

    send_text(&mut ws, "41/admin,").await;
    assert_eq!(
        timeout_rcv(&mut admin_rx).await,
        DisconnectReason::ClientNSDisconnect
    );
    tokio::time::timeout(Duration::from_millis(50), root_rx.recv())
        .await
        .unwrap_err();
    assert_eq!(io.sockets().len(), 1);
}

#[tokio::test]
async fn transport_close() {
    let (svc, io) = create_server();
    let mut rx = attach_disconnect_handler(&io, "/");

    let (mut ws, _) = connect_ws(&svc, "/", None).await;
    ws.close(None).await.unwrap();

    assert_eq!(timeout_rcv(&mut rx).await, DisconnectReason::TransportClose);
}

#[tokio::test]
async fn heartbeat_timeout() {
    let (svc, io) = create_server();
    let mut rx = attach_disconnect_handler(&io, "/");

    // the pings are never answered
    let (_ws, _) = connect_ws(&svc, "/", None).await;

    let reason = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reason, DisconnectReason::HeartbeatTimeout);
}

#[tokio::test]
async fn server_ns_disconnect() {
    let (svc, io) = create_server();
    let mut rx = attach_disconnect_handler(&io, "/");

    let (mut ws, _) = connect_ws(&svc, "/", None).await;
    io.disconnect().await.unwrap();

    assert_eq!(timeout_rcv(&mut rx).await, DisconnectReason::ServerNSDisconnect);
    assert_eq!(recv_text(&mut ws).await, "1");
}

#[tokio::test]
async fn delete_ns_disconnects_sockets() {
    let (svc, io) = create_server();
    let mut rx = attach_disconnect_handler(&io, "/admin");

    let (mut ws, _) = connect_ws(&svc, "/admin", None).await;
    io.delete_ns("/admin").await;

    assert_eq!(timeout_rcv(&mut rx).await, DisconnectReason::ServerNSDisconnect);
    assert_eq!(recv_text(&mut ws).await, "1/admin,");
    assert!(io.of("/admin").is_none());
}

#[tokio::test]
async fn closing_server() {
    let (svc, io) = create_server();
    let mut rx = attach_disconnect_handler(&io, "/");

    let (_ws1, _) = connect_ws(&svc, "/", None).await;
    let (_ws2, _) = connect_ws(&svc, "/", None).await;
    io.close().await;

    assert_eq!(timeout_rcv(&mut rx).await, DisconnectReason::ClosingServer);
    assert_eq!(timeout_rcv(&mut rx).await, DisconnectReason::ClosingServer);
    assert!(io.nsps().is_empty());
}

#[tokio::test]
async fn disconnect_handler_sees_rooms() {
    let (svc, io) = create_server();
    let (tx, mut rx) = mpsc::channel(1);
    io.ns("/", move |s: SocketRef| async move {
        s.join("room");
        s.on_disconnecting(move |s: SocketRef| async move {
            tx.try_send(s.rooms().len()).unwrap();
        });
    });

    let (mut ws, _) = connect_ws(&svc, "/", None).await;
    send_text(&mut ws, "41").await;

    // own room and "room"
    assert_eq!(timeout_rcv(&mut rx).await, 2);
}
