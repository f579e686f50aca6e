
use std::time::Duration;

use fixture::*;
use futures_util::StreamExt;
use relayio::{
    AckError,
    extract::{AckSender, Data, SocketRef},
};
use tokio::sync::mpsc;

#[tokio::test]
async fn emit_with_ack() {
    let (svc, io) = create_server();
    let (tx, mut rx) = mpsc::channel(1);
    io.ns("/", move |s: SocketRef| async move {
        let ack = s.emit_with_ack::<_, String>("test", "foo").unwrap().await;
        tx.try_send(ack).unwrap();
    });

    let (mut ws, _) = connect_ws(&svc, "/", None).await;
    assert_eq!(recv_text(&mut ws).await, r#"21["test","foo"]"#);
    send_text(&mut ws, r#"431["oof"]"#).await;

    assert_eq!(timeout_rcv(&mut rx).await.unwrap(), "oof");
}

#[tokio::test]
async fn emit_with_ack_timeout() {
    let (svc, io) = create_server();
    let (tx, mut rx) = mpsc::channel(1);
    io.ns("/", move |s: SocketRef| async move {
        let ack = s
            .timeout(Duration::from_millis(50))
            .emit_with_ack::<_, String>("test", "foo")
            .unwrap()
            .await;
        tx.try_send(ack).unwrap();
    });

    let (mut ws, _) = connect_ws(&svc, "/", None).await;
    assert_eq!(recv_text(&mut ws).await, r#"21["test","foo"]"#);

    assert!(matches!(timeout_rcv(&mut rx).await, Err(AckError::Timeout)));
}

#[tokio::test]
async fn late_ack_is_ignored() {
    let (svc, io) = create_server();
    let (tx, mut rx) = mpsc::channel(1);
    io.ns("/", move |s: SocketRef| async move {
        let ack = s
            .timeout(Duration::from_millis(20))
            .emit_with_ack::<_, String>("test", "foo")
            .unwrap()
            .await;
        tx.try_send(ack).unwrap();
    });

    let (mut ws, _) = connect_ws(&svc, "/", None).await;
    assert_eq!(recv_text(&mut ws).await, r#"21["test","foo"]"#);
    assert!(matches!(timeout_rcv(&mut rx).await, Err(AckError::Timeout)));

    // the pending ack was removed, the session stays open
    send_text(&mut ws, r#"431["oof"]"#).await;
    assert_silent(&mut ws, Duration::from_millis(50)).await;
}

#[tokio::test]
async fn broadcast_with_ack() {
    let (svc, io) = create_server();
    let (tx, mut rx) = mpsc::channel(1);
    io.ns("/", async |s: SocketRef| {
        s.join("room");
    });

    let (mut ws1, _) = connect_ws(&svc, "/", None).await;
    let (mut ws2, _) = connect_ws(&svc, "/", None).await;

    let io2 = io.clone();
    tokio::spawn(async move {
        let acks: Vec<_> = io2
            .to("room")
            .emit_with_ack::<_, String>("ping", "all")
            .await
            .unwrap()
            .collect()
            .await;
        tx.try_send(acks).unwrap();
    });

    for ws in [&mut ws1, &mut ws2] {
        assert_eq!(recv_text(ws).await, r#"21["ping","all"]"#);
        send_text(ws, r#"431["pong"]"#).await;
    }

    let acks = timeout_rcv(&mut rx).await;
    assert_eq!(acks.len(), 2);
    for (_, ack) in acks {
        assert_eq!(ack.unwrap(), "pong");
    }
}

#[tokio::test]
async fn broadcast_with_ack_partial_timeout() {
    let (svc, io) = create_server();
    let (tx, mut rx) = mpsc::channel(1);
    io.ns("/", async || {});

    let (mut ws1, _) = connect_ws(&svc, "/", None).await;
    let (mut ws2, _) = connect_ws(&svc, "/", None).await;

    let io2 = io.clone();
    tokio::spawn(async move {
        let acks: Vec<_> = io2
            .timeout(Duration::from_millis(100))
            .emit_with_ack::<_, String>("ping", "all")
            .await
            .unwrap()
            .collect()
            .await;
        tx.try_send(acks).unwrap();
    });

    assert_eq!(recv_text(&mut ws1).await, r#"21["ping","all"]"#);
    send_text(&mut ws1, r#"431["pong"]"#).await;
    assert_eq!(recv_text(&mut ws2).await, r#"21["ping","all"]"#);

    let acks = timeout_rcv(&mut rx).await;
    assert_eq!(acks.len(), 2);
    let ok = acks.iter().filter(|(_, ack)| ack.is_ok()).count();
    let timeout = acks
        .iter()
        .filter(|(_, ack)| matches!(ack, Err(AckError::Timeout)))
        .count();
    assert_eq!((ok, timeout), (1, 1));
}

#[tokio::test]
async fn ack_sender() {
    let (svc, io) = create_server();
    io.ns("/", async |s: SocketRef| {
        s.on("ev", async |Data(data): Data<(String, i64)>, ack: AckSender| {
            ack.send(&(data.0, data.1 + 1)).ok();
        });
    });

    let (mut ws, _) = connect_ws(&svc, "/", None).await;
    send_text(&mut ws, r#"421["ev","foo",1]"#).await;
    assert_eq!(recv_text(&mut ws).await, r#"31["foo",2]"#);
}

#[tokio::test]
async fn ack_sender_on_custom_ns() {
    let (svc, io) = create_server();
    io.ns("/admin", async |s: SocketRef| {
        s.on("ev", async |ack: AckSender| {
            ack.send("ok").ok();
        });
    });

    let (mut ws, _) = connect_ws(&svc, "/admin", None).await;
    send_text(&mut ws, r#"42/admin,7["ev"]"#).await;
    assert_eq!(recv_text(&mut ws).await, r#"3/admin,7["ok"]"#);
}

#[tokio::test]
async fn ack_sender_without_ack_id_sends_nothing() {
    let (svc, io) = create_server();
    let (tx, mut rx) = mpsc::channel(1);
    io.ns("/", move |s: SocketRef| async move {
        s.on("ev", move |ack: AckSender| async move {
            tx.try_send(ack.expected()).unwrap();
            ack.send("ignored").ok();
        });
    });

    let (mut ws, _) = connect_ws(&svc, "/", None).await;
    send_text(&mut ws, r#"42["ev"]"#).await;
    assert!(!timeout_rcv(&mut rx).await);
    assert_silent(&mut ws, Duration::from_millis(50)).await;
}
