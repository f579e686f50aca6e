
use std::time::Duration;

use fixture::*;
use relayio::{
    SocketIo,
    extract::{Data, SocketRef},
};
use serde::Deserialize;
use tokio::sync::mpsc;

#[derive(Debug, Deserialize)]
struct Auth {
    room: String,
}

#[tokio::test]
async fn broadcast_to_room_except_sender() {
    let (svc, io) = create_server();
    io.ns("/", async |s: SocketRef| {
        s.join("room");
        s.on("say", async |s: SocketRef, Data(msg): Data<String>| {
            s.to("room").emit("said", &msg).await.ok();
        });
    });

    let (mut ws1, _) = connect_ws(&svc, "/", None).await;
    let (mut ws2, _) = connect_ws(&svc, "/", None).await;
    let (mut ws3, _) = connect_ws(&svc, "/", None).await;

    send_text(&mut ws1, r#"42["say","hello"]"#).await;
    assert_eq!(recv_text(&mut ws2).await, r#"2["said","hello"]"#);
    assert_eq!(recv_text(&mut ws3).await, r#"2["said","hello"]"#);
    assert_silent(&mut ws1, Duration::from_millis(50)).await;
}

#[tokio::test]
async fn broadcast_with_except() {
    let (svc, io) = create_server();
    let (tx, mut rx) = mpsc::channel(3);
    io.ns("/", move |s: SocketRef, Data(auth): Data<Auth>| async move {
        s.join(["all".to_string(), auth.room]);
        tx.try_send(()).unwrap();
    });

    let (mut ws1, _) = connect_ws(&svc, "/", Some(r#"{"room":"blue"}"#)).await;
    let (mut ws2, _) = connect_ws(&svc, "/", Some(r#"{"room":"red"}"#)).await;
    let (mut ws3, _) = connect_ws(&svc, "/", Some(r#"{"room":"red"}"#)).await;
    for _ in 0..3 {
        timeout_rcv(&mut rx).await;
    }

    io.to("all").except("red").emit("msg", "blue only").await.unwrap();
    assert_eq!(recv_text(&mut ws1).await, r#"2["msg","blue only"]"#);
    assert_silent(&mut ws2, Duration::from_millis(50)).await;
    assert_silent(&mut ws3, Duration::from_millis(50)).await;

    io.within("blue").within("red").emit("msg", "union").await.unwrap();
    for ws in [&mut ws1, &mut ws2, &mut ws3] {
        assert_eq!(recv_text(ws).await, r#"2["msg","union"]"#);
    }
}

#[tokio::test]
async fn broadcast_stays_in_namespace() {
    let (svc, io) = create_server();
    io.ns("/", async || {});
    io.ns("/admin", async || {});

    let (mut root, _) = connect_ws(&svc, "/", None).await;
    let (mut admin, _) = connect_ws(&svc, "/admin", None).await;

    io.of("/admin").unwrap().emit("news", "admins").await.unwrap();
    assert_eq!(recv_text(&mut admin).await, r#"2/admin,["news","admins"]"#);
    assert_silent(&mut root, Duration::from_millis(50)).await;

    io.emit("news", "root").await.unwrap();
    assert_eq!(recv_text(&mut root).await, r#"2["news","root"]"#);
    assert_silent(&mut admin, Duration::from_millis(50)).await;
}

#[tokio::test]
async fn broadcast_operator_excludes_sender() {
    let (svc, io) = create_server();
    io.ns("/", async |s: SocketRef| {
        s.on("shout", async |s: SocketRef| {
            s.broadcast().emit("shouted", &()).await.ok();
        });
    });

    let (mut ws1, _) = connect_ws(&svc, "/", None).await;
    let (mut ws2, _) = connect_ws(&svc, "/", None).await;

    send_text(&mut ws1, r#"42["shout"]"#).await;
    assert_eq!(recv_text(&mut ws2).await, r#"2["shouted"]"#);
    assert_silent(&mut ws1, Duration::from_millis(50)).await;
}

#[tokio::test]
async fn rooms_and_sockets_selection() {
    let (svc, io) = create_server();
    let (tx, mut rx) = mpsc::channel(2);
    io.ns("/", move |s: SocketRef| async move {
        s.join("room1");
        tx.try_send(s.id).unwrap();
    });

    let (_ws1, _) = connect_ws(&svc, "/", None).await;
    let (_ws2, _) = connect_ws(&svc, "/", None).await;
    let id1 = timeout_rcv(&mut rx).await;
    let id2 = timeout_rcv(&mut rx).await;

    io.to(id1).join("room2").await.unwrap();
    let mut rooms = io.rooms().await.unwrap();
    rooms.sort();
    let mut expected: Vec<String> = vec![
        "room1".into(),
        "room2".into(),
        id1.to_string(),
        id2.to_string(),
    ];
    expected.sort();
    assert_eq!(rooms, expected);

    assert_eq!(io.to("room2").sockets().len(), 1);
    assert_eq!(io.to("room1").sockets().len(), 2);
    assert_eq!(io.except("room2").sockets().len(), 1);
    assert_eq!(io.fetch_sockets().await.unwrap().len(), 2);

    io.leave("room1").await.unwrap();
    assert!(io.to("room1").sockets().is_empty());
    assert_eq!(io.get_socket(id2).unwrap().id, id2);
}

#[tokio::test]
async fn volatile_emit_drops_when_buffer_is_full() {
    let (svc, io) = SocketIo::builder().max_buffer_size(4).build_svc();
    let (tx, mut rx) = mpsc::channel(1);
    io.ns("/", move |s: SocketRef| async move {
        let mut errors = 0;
        for i in 0..20 {
            if s.volatile().emit("tick", &i).is_err() {
                errors += 1;
            }
        }
        let strict = (0..20).filter(|i| s.emit("tick", i).is_err()).count();
        tx.try_send((errors, strict)).unwrap();
    });

    let (_ws, _) = connect_ws(&svc, "/", None).await;
    let (volatile_errors, strict_errors) = timeout_rcv(&mut rx).await;
    assert_eq!(volatile_errors, 0);
    assert!(strict_errors > 0);
}
