//! The polling transport module handles polling, post and init requests
use std::sync::Arc;

use bytes::Bytes;
use http::{
    HeaderValue, Request, Response, StatusCode,
    header::{CONTENT_LENGTH, CONTENT_TYPE},
};
use http_body::Body;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use relayio_engine_core::{Packet, ProtocolVersion, Sid, Str, TransportType, decode_payload};

use crate::{
    body::ResponseBody,
    engine::EngineIo,
    errors::{Error, RequestError},
    handler::EngineIoHandler,
    socket::DisconnectReason,
    transport::make_open_packet,
};

mod payload;

/// Create a text/plain response with the given payload
fn http_response<B>(code: StatusCode, data: impl Into<Bytes>) -> Response<ResponseBody<B>> {
    let body: Bytes = data.into();
    let len = body.len();
    let mut res = Response::new(ResponseBody::custom_response(Full::new(body)));
    *res.status_mut() = code;
    let headers = res.headers_mut();
    headers.insert(CONTENT_LENGTH, HeaderValue::from(len));
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=UTF-8"),
    );
    res
}

/// Create a new polling session and respond with its open packet
pub fn open_req<B, R, H>(
    engine: Arc<EngineIo<H>>,
    protocol: ProtocolVersion,
    req: Request<R>,
) -> Result<Response<ResponseBody<B>>, Error>
where
    H: EngineIoHandler,
{
    let socket = engine.open_session(protocol, TransportType::Polling, req.into_parts().0);

    let packet = make_open_packet(TransportType::Polling, socket.id, &engine.config);
    let packet: String = Packet::Open(packet).into();
    socket.set_open();
    socket
        .clone()
        .spawn_heartbeat(engine.config.ping_interval, engine.config.ping_timeout);

    #[cfg(feature = "tracing")]
    tracing::debug!(sid = ?socket.id, "new polling session");
    Ok(http_response(StatusCode::OK, packet))
}

/// Handle http polling request
///
/// If there is packets in the socket buffer, it will return them
/// Otherwise, it will wait for the next packet to be sent from the socket
pub async fn polling_req<B, H>(
    engine: Arc<EngineIo<H>>,
    sid: Sid,
) -> Result<Response<ResponseBody<B>>, Error>
where
    H: EngineIoHandler,
{
    let socket = engine
        .get_socket(sid)
        .ok_or(RequestError::UnknownSessionId)?;

    // an upgrading socket keeps its polling transport until the upgrade completes
    if !socket.is_http() {
        return Err(RequestError::TransportMismatch.into());
    }

    // If the socket is already locked, it means that the socket is being used by another request
    // In case of multiple http polling, session should be closed
    let rx = match socket.outbox.try_lock() {
        Ok(s) => s,
        Err(_) => {
            socket.close(DisconnectReason::MultipleHttpPollingError);
            return Err(Error::MultipleHttpPolling);
        }
    };

    #[cfg(feature = "tracing")]
    tracing::debug!("[sid={sid}] polling request");

    let max_payload = engine.config.max_payload;
    let payload = payload::encode_payload(rx, max_payload).await?;
    Ok(http_response(StatusCode::OK, payload))
}

/// Handle http polling post request
///
/// Split the body into packets and send them to the internal socket
pub async fn post_req<R, B, H>(
    engine: Arc<EngineIo<H>>,
    sid: Sid,
    body: Request<R>,
) -> Result<Response<ResponseBody<B>>, Error>
where
    H: EngineIoHandler,
    R: Body + Send + Unpin + 'static,
    <R as Body>::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    <R as Body>::Data: Send,
{
    let socket = engine
        .get_socket(sid)
        .ok_or(RequestError::UnknownSessionId)?;

    if !socket.is_http() {
        return Err(RequestError::TransportMismatch.into());
    }

    let max_payload = usize::try_from(engine.config.max_payload).unwrap_or(usize::MAX);
    let body = Limited::new(body.into_body(), max_payload)
        .collect()
        .await
        .map_err(|e| {
            let err = if e.downcast_ref::<LengthLimitError>().is_some() {
                Error::PayloadTooLarge
            } else {
                #[cfg(feature = "tracing")]
                tracing::debug!("[sid={sid}] error reading body: {e}");
                Error::BodyRead
            };
            socket.close(DisconnectReason::TransportError);
            err
        })?
        .to_bytes();

    let data = Str::from_utf8(body).map_err(|e| {
        socket.close(DisconnectReason::PacketParsingError);
        Error::PacketParse(e.into())
    })?;

    for packet in decode_payload(data) {
        match packet {
            Ok(Packet::Close) => {
                #[cfg(feature = "tracing")]
                tracing::debug!("[sid={sid}] closing session");
                socket.close(DisconnectReason::TransportClose);
                break;
            }
            Ok(Packet::Pong | Packet::Ping) => {
                socket.pong();
            }
            Ok(Packet::Message(msg)) => {
                engine.handler.on_message(msg, socket.clone());
            }
            Ok(Packet::Binary(bin)) => {
                engine.handler.on_binary(bin, socket.clone());
            }
            Ok(p) => {
                #[cfg(feature = "tracing")]
                tracing::debug!("[sid={sid}] bad packet received: {:?}", &p);
                socket.close(DisconnectReason::PacketParsingError);
                return Err(Error::BadPacket(p));
            }
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::debug!("[sid={sid}] error parsing packet: {:?}", e);
                socket.close(DisconnectReason::PacketParsingError);
                return Err(e.into());
            }
        }
    }
    Ok(http_response(StatusCode::OK, "ok"))
}
