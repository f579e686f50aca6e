//! Tests for the namespace connection flow

use std::time::Duration;

use fixture::*;
use relayio::{
    extract::{Data, SocketRef},
    handler::ConnectHandler,
};
use serde::Deserialize;
use tokio::sync::mpsc;

#[derive(Debug, Deserialize)]
struct Auth {
    token: String,
}

#[tokio::test]
async fn connect_to_root() {
    let (svc, io) = create_server();
    let (tx, mut rx) = mpsc::channel(1);
    io.ns("/", move |s: SocketRef| async move {
        tx.try_send(s.id).unwrap();
    });

    let (_ws, res) = connect_ws(&svc, "/", None).await;
    let sid = timeout_rcv(&mut rx).await;
    assert_eq!(res, format!("0{{\"sid\":\"{sid}\"}}"));
}

#[tokio::test]
async fn connect_to_custom_ns() {
    let (svc, io) = create_server();
    io.ns("/admin", async || {});

    let (_ws, res) = connect_ws(&svc, "/admin", None).await;
    assert!(res.starts_with("0/admin,{\"sid\":"), "got {res}");
}

#[tokio::test]
async fn connect_to_invalid_ns() {
    let (svc, io) = create_server();
    io.ns("/", async || {});

    let (_ws, res) = connect_ws(&svc, "/nope", None).await;
    assert_eq!(res, "4/nope,{\"message\":\"Invalid namespace\"}");
}

#[tokio::test]
async fn connect_to_dynamic_ns() {
    let (svc, io) = create_server();
    let (tx, mut rx) = mpsc::channel(2);
    io.dyn_ns("/tenant/{id}", move |s: SocketRef| async move {
        tx.try_send(s.ns().to_string()).unwrap();
    })
    .unwrap();

    let (_ws1, res) = connect_ws(&svc, "/tenant/1", None).await;
    assert!(res.starts_with("0/tenant/1,"), "got {res}");
    let (_ws2, res) = connect_ws(&svc, "/tenant/1", None).await;
    assert!(res.starts_with("0/tenant/1,"), "got {res}");

    assert_eq!(timeout_rcv(&mut rx).await, "/tenant/1");
    assert_eq!(timeout_rcv(&mut rx).await, "/tenant/1");
    assert_eq!(io.of("/tenant/1").unwrap().sockets().len(), 2);
}

#[tokio::test]
async fn connect_with_auth_middleware() {
    let (svc, io) = create_server();
    let (tx, mut rx) = mpsc::channel(2);
    let handler = move |s: SocketRef| async move {
        tx.try_send(s.id).unwrap();
    };
    let auth = async |Data(auth): Data<Auth>| {
        if auth.token == "secret" {
            Ok(())
        } else {
            Err("invalid token")
        }
    };
    io.ns("/", handler.with(auth));

    let (_ws, res) = connect_ws(&svc, "/", Some(r#"{"token":"wrong"}"#)).await;
    assert_eq!(res, "4{\"message\":\"invalid token\"}");
    tokio::time::timeout(Duration::from_millis(50), rx.recv())
        .await
        .unwrap_err();

    let (_ws, res) = connect_ws(&svc, "/", Some(r#"{"token":"secret"}"#)).await;
    assert!(res.starts_with("0{\"sid\":"), "got {res}");
    timeout_rcv(&mut rx).await;
}

#[tokio::test]
async fn middlewares_run_in_order() {
    let (svc, io) = create_server();
    let (tx, mut rx) = mpsc::channel(4);
    let tx1 = tx.clone();
    let tx2 = tx.clone();
    let handler = move || async move {
        tx.try_send(3).unwrap();
    };
    let first = move || async move {
        tx1.try_send(1).unwrap();
        Ok::<_, std::convert::Infallible>(())
    };
    let second = move || async move {
        tx2.try_send(2).unwrap();
        Ok::<_, std::convert::Infallible>(())
    };
    use relayio::adapter::LocalAdapter;
    let guarded = ConnectHandler::<LocalAdapter, _>::with(handler, first);
    io.ns("/", ConnectHandler::<LocalAdapter, _>::with(guarded, second));

    let (_ws, _) = connect_ws(&svc, "/", None).await;
    assert_eq!(timeout_rcv(&mut rx).await, 1);
    assert_eq!(timeout_rcv(&mut rx).await, 2);
    assert_eq!(timeout_rcv(&mut rx).await, 3);
}

#[tokio::test]
async fn emits_from_middleware_are_flushed_after_connect() {
    let (svc, io) = create_server();
    let middleware = async |s: SocketRef| {
        s.emit("early", "first").unwrap();
        s.emit("early", "second").unwrap();
        Ok::<_, std::convert::Infallible>(())
    };
    let handler = async |s: SocketRef| {
        s.emit("late", "third").unwrap();
    };
    io.ns("/", handler.with(middleware));

    let (mut ws, res) = connect_ws(&svc, "/", None).await;
    assert!(res.starts_with("0{\"sid\":"), "got {res}");
    assert_eq!(recv_text(&mut ws).await, r#"2["early","first"]"#);
    assert_eq!(recv_text(&mut ws).await, r#"2["early","second"]"#);
    assert_eq!(recv_text(&mut ws).await, r#"2["late","third"]"#);
}

#[tokio::test]
async fn rejected_middleware_drops_buffered_packets() {
    let (svc, io) = create_server();
    let middleware = async |s: SocketRef| {
        s.emit("early", "dropped").unwrap();
        Err("rejected")
    };
    io.ns("/", (async || {}).with(middleware));

    let (mut ws, res) = connect_ws(&svc, "/", None).await;
    assert_eq!(res, "4{\"message\":\"rejected\"}");
    assert_silent(&mut ws, Duration::from_millis(50)).await;
}

#[tokio::test]
async fn connect_timeout_closes_idle_session() {
    let (mut svc, _io) = create_server();
    let sid = create_polling_session(&mut svc).await;

    // the session is closed after the connect timeout of 300ms
    tokio::time::sleep(Duration::from_millis(400)).await;
    let packets = poll(&mut svc, &sid).await;
    assert!(packets.contains(&"1".to_string()), "got {packets:?}");
}

#[tokio::test]
async fn polling_connect_and_event() {
    let (mut svc, io) = create_server();
    let (tx, mut rx) = mpsc::channel(1);
    io.ns("/", move |s: SocketRef| async move {
        s.on("hello", move |Data(name): Data<String>| async move {
            tx.try_send(name).unwrap();
        });
    });

    let sid = create_polling_session(&mut svc).await;
    post(&mut svc, &sid, "40").await;
    let packets = poll(&mut svc, &sid).await;
    assert!(packets[0].starts_with("40{\"sid\":"), "got {packets:?}");

    post(&mut svc, &sid, r#"42["hello","world"]"#).await;
    assert_eq!(timeout_rcv(&mut rx).await, "world");
}
