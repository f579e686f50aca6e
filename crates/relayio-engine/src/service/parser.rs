//! A Parser module to parse any `EngineIo` query

use http::{Method, Request};
use relayio_engine_core::{ProtocolVersion, Sid, TransportType};

use crate::{config::EngineIoConfig, errors::RequestError};

/// The request information extracted from the request URI.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestInfo {
    /// The protocol version used by the client.
    pub protocol: ProtocolVersion,
    /// The socket id if present in the request.
    pub sid: Option<Sid>,
    /// The transport type used by the client.
    pub transport: TransportType,
    /// The request method.
    pub method: Method,
}

impl RequestInfo {
    /// Parse the request URI to extract the [`TransportType`](crate::service::TransportType) and the socket id.
    ///
    /// Checks run in order: transport, protocol version, session id, method.
    pub fn parse<B>(req: &Request<B>, config: &EngineIoConfig) -> Result<Self, RequestError> {
        let query = req.uri().query().unwrap_or_default();

        let mut transport = None;
        let mut protocol = None;
        let mut sid = None;
        for (key, value) in query.split('&').filter_map(|pair| pair.split_once('=')) {
            match key {
                "transport" => transport = Some(value),
                "EIO" => protocol = Some(value),
                "sid" => sid = Some(value),
                _ => (),
            }
        }

        let transport: TransportType = transport
            .and_then(|t| t.parse().ok())
            .ok_or(RequestError::UnknownTransport)?;
        if !config.allowed_transport(transport) {
            return Err(RequestError::TransportMismatch);
        }

        let protocol: ProtocolVersion = protocol
            .and_then(|p| p.parse().ok())
            .ok_or(RequestError::UnsupportedProtocolVersion)?;

        let sid = sid
            .map(|s| s.parse::<Sid>().map_err(|_| RequestError::UnknownSessionId))
            .transpose()?;

        let method = req.method().clone();
        match (&method, sid) {
            (&Method::GET, _) => (),
            (_, None) => return Err(RequestError::BadHandshakeMethod),
            (&Method::POST, Some(_)) if transport == TransportType::Polling => (),
            (_, Some(_)) => return Err(RequestError::TransportMismatch),
        }

        Ok(RequestInfo {
            protocol,
            sid,
            transport,
            method,
        })
    }
}
