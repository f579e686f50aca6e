use std::borrow::Cow;

use bytes::Bytes;
use http::{HeaderValue, Response, StatusCode, header::CONTENT_TYPE};
use http_body_util::Full;
use tokio_tungstenite::tungstenite;

use crate::{body::ResponseBody, socket::DisconnectReason};
use relayio_engine_core::{Packet, PacketParseError};

/// Errors raised while serving an engine.io request or driving a session.
///
/// [`Error::closing_reason`] tells whether it ends the session.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A packet could not be decoded
    #[error("cannot decode packet: {0}")]
    PacketParse(#[from] PacketParseError),
    /// A packet that is not allowed at this point of the session
    #[error("unexpected packet")]
    BadPacket(Packet),
    /// The websocket stream failed
    #[error("websocket failure: {0}")]
    WsTransport(#[from] Box<tungstenite::Error>),
    /// A response could not be built
    #[error("cannot build response: {0}")]
    Http(#[from] http::Error),
    /// No pong received in time
    #[error("no pong in time")]
    HeartbeatTimeout,
    /// The upgrade handshake failed or was refused
    #[error("upgrade refused")]
    Upgrade,
    /// The upgrade packet was not received in time
    #[error("no upgrade packet in time")]
    UpgradeTimeout,
    /// Two polling requests overlapped
    #[error("overlapping polling requests")]
    MultipleHttpPolling,
    /// The `Sec-WebSocket-Key` header is missing or invalid
    #[error("missing or invalid Sec-WebSocket-Key header")]
    InvalidWebSocketKey,
    /// A request body or websocket frame is bigger than `max_payload`
    #[error("payload too large")]
    PayloadTooLarge,
    /// The request body could not be read
    #[error("error reading request body")]
    BodyRead,
    /// The session channel is closed
    #[error("socket channel closed")]
    Aborted,
    /// The request is rejected with an engine.io error code
    #[error("request rejected: {0}")]
    Request(#[from] RequestError),
}

impl From<tungstenite::Error> for Error {
    fn from(err: tungstenite::Error) -> Self {
        Box::new(err).into()
    }
}

impl Error {
    /// Why the session must be closed after this error, `None` when it can go on.
    pub fn closing_reason(&self) -> Option<DisconnectReason> {
        let reason = match self {
            Error::WsTransport(_) | Error::PayloadTooLarge | Error::BodyRead => {
                DisconnectReason::TransportError
            }
            Error::MultipleHttpPolling => DisconnectReason::MultipleHttpPollingError,
            Error::BadPacket(_) | Error::PacketParse(_) => DisconnectReason::PacketParsingError,
            Error::HeartbeatTimeout => DisconnectReason::HeartbeatTimeout,
            _ => return None,
        };
        Some(reason)
    }
}

/// A request rejected before reaching any session.
///
/// Each variant maps to an engine.io error code sent back to the client as
/// `{"code":<code>,"message":<message>}`.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    /// The `transport` query param is missing or unknown. Code `0`.
    #[error("transport unknown")]
    UnknownTransport,
    /// The `sid` query param is invalid or matches no session. Code `1`.
    #[error("session id unknown")]
    UnknownSessionId,
    /// A handshake with another method than `GET`. Code `2`.
    #[error("bad handshake method")]
    BadHandshakeMethod,
    /// The transport is disabled or does not match the session transport. Code `3`.
    #[error("transport mismatch")]
    TransportMismatch,
    /// The `allow_request` hook rejected the handshake. Code `4`, sent with a `403` status.
    #[error("forbidden: {0}")]
    Forbidden(Cow<'static, str>),
    /// The `EIO` query param is missing or not `4`. Code `5`.
    #[error("unsupported protocol version")]
    UnsupportedProtocolVersion,
}

impl RequestError {
    /// The engine.io error code
    pub fn code(&self) -> u8 {
        match self {
            RequestError::UnknownTransport => 0,
            RequestError::UnknownSessionId => 1,
            RequestError::BadHandshakeMethod => 2,
            RequestError::TransportMismatch => 3,
            RequestError::Forbidden(_) => 4,
            RequestError::UnsupportedProtocolVersion => 5,
        }
    }

    /// The message sent to the client
    pub fn message(&self) -> &str {
        match self {
            RequestError::UnknownTransport => "Transport unknown",
            RequestError::UnknownSessionId => "Session ID unknown",
            RequestError::BadHandshakeMethod => "Bad handshake method",
            RequestError::TransportMismatch => "Bad request",
            RequestError::Forbidden(msg) if msg.is_empty() => "Forbidden",
            RequestError::Forbidden(msg) => &**msg,
            RequestError::UnsupportedProtocolVersion => "Unsupported protocol version",
        }
    }

    /// The http status of the response
    pub fn status(&self) -> StatusCode {
        match self {
            RequestError::Forbidden(_) => StatusCode::FORBIDDEN,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

#[derive(serde::Serialize)]
struct ErrorBody<'a> {
    code: u8,
    message: &'a str,
}

impl<B> From<RequestError> for Response<ResponseBody<B>> {
    fn from(err: RequestError) -> Self {
        let body = ErrorBody {
            code: err.code(),
            message: err.message(),
        };
        let body = serde_json::to_vec(&body).unwrap_or_default();
        let mut res = Response::new(ResponseBody::custom_response(Full::new(Bytes::from(body))));
        *res.status_mut() = err.status();
        res.headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        res
    }
}

/// Convert an error into an http response
/// If it is a known error, return the appropriate http status code
/// Otherwise, return a 500
impl<B> From<Error> for Response<ResponseBody<B>> {
    fn from(err: Error) -> Self {
        let status = match err {
            Error::Request(err) => return err.into(),
            Error::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Error::BadPacket(_)
            | Error::PacketParse(_)
            | Error::MultipleHttpPolling
            | Error::InvalidWebSocketKey => StatusCode::BAD_REQUEST,
            _e => {
                #[cfg(feature = "tracing")]
                tracing::debug!("uncaught error {_e:?}");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let mut res = Response::new(ResponseBody::empty_response());
        *res.status_mut() = status;
        res
    }
}
