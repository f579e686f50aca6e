
use bytes::Bytes;
use fixture::*;
use relayio::extract::{AckSender, Data, SocketRef};
use tokio::sync::mpsc;

#[tokio::test]
async fn receive_binary_event() {
    let (svc, io) = create_server();
    let (tx, mut rx) = mpsc::channel(1);
    io.ns("/", move |s: SocketRef| async move {
        s.on(
            "bin",
            move |Data((a, b)): Data<(Bytes, Bytes)>| async move {
                tx.try_send((a, b)).unwrap();
            },
        );
    });

    let (mut ws, _) = connect_ws(&svc, "/", None).await;
    send_text(
        &mut ws,
        r#"452-["bin",{"_placeholder":true,"num":0},{"_placeholder":true,"num":1}]"#,
    )
    .await;
    send_binary(&mut ws, &[1, 2, 3]).await;
    send_binary(&mut ws, &[4, 5, 6]).await;

    let (a, b) = timeout_rcv(&mut rx).await;
    assert_eq!(a, Bytes::from_static(&[1, 2, 3]));
    assert_eq!(b, Bytes::from_static(&[4, 5, 6]));
}

#[tokio::test]
async fn emit_binary_event() {
    let (svc, io) = create_server();
    io.ns("/", async |s: SocketRef| {
        let data = (
            "bin",
            Bytes::from_static(&[1, 2, 3]),
            Bytes::from_static(&[4, 5, 6]),
        );
        s.emit("event", &data).ok();
    });

    let (mut ws, _) = connect_ws(&svc, "/", None).await;
    assert_eq!(
        recv_text(&mut ws).await,
        r#"52-["event","bin",{"_placeholder":true,"num":0},{"_placeholder":true,"num":1}]"#
    );
    assert_eq!(recv_binary(&mut ws).await, Bytes::from_static(&[1, 2, 3]));
    assert_eq!(recv_binary(&mut ws).await, Bytes::from_static(&[4, 5, 6]));
}

#[tokio::test]
async fn binary_ack() {
    let (svc, io) = create_server();
    io.ns("/admin", async |s: SocketRef| {
        s.on("echo", async |Data(data): Data<Bytes>, ack: AckSender| {
            ack.send(&data).ok();
        });
    });

    let (mut ws, _) = connect_ws(&svc, "/admin", None).await;
    send_text(
        &mut ws,
        r#"451-/admin,3["echo",{"_placeholder":true,"num":0}]"#,
    )
    .await;
    send_binary(&mut ws, &[7, 8]).await;

    assert_eq!(
        recv_text(&mut ws).await,
        r#"61-/admin,3[{"_placeholder":true,"num":0}]"#
    );
    assert_eq!(recv_binary(&mut ws).await, Bytes::from_static(&[7, 8]));
}

#[tokio::test]
async fn text_frame_while_waiting_attachments_closes_session() {
    let (svc, io) = create_server();
    let (tx, mut rx) = mpsc::channel(1);
    io.ns("/", move |s: SocketRef| async move {
        s.on_disconnect(
            move |reason: relayio::socket::DisconnectReason| async move {
                tx.try_send(reason).unwrap();
            },
        );
    });

    let (mut ws, _) = connect_ws(&svc, "/", None).await;
    send_text(&mut ws, r#"451-["bin",{"_placeholder":true,"num":0}]"#).await;
    send_text(&mut ws, r#"42["text"]"#).await;

    assert_eq!(
        timeout_rcv(&mut rx).await,
        relayio::socket::DisconnectReason::PacketParsingError
    );
}
