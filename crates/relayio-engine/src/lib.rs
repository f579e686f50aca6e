#![cfg_attr(docsrs, feature(doc_cfg))]
//! Engine.IO v4 server for relayio, exposed as a tower [`Service`](tower_service::Service) and [`Layer`](tower_layer::Layer).
//!
//! It handles the handshake, the http long-polling and websocket transports, the upgrade from one
//! to the other and the heartbeat of every session. Events are forwarded to an
//! [`EngineIoHandler`](handler::EngineIoHandler).

pub use relayio_engine_core::{ProtocolVersion, Sid, Str, TransportType};
pub use socket::{DisconnectReason, Socket};

#[doc(hidden)]
#[cfg(feature = "__test_harness")]
pub use relayio_engine_core::{OpenPacket, Packet, PacketParseError};

pub use cors::{CorsConfig, CorsOrigin, cors_headers};
pub use engine::EngineIo;
pub use errors::{Error, RequestError};

pub mod config;
pub mod cors;
pub mod handler;
pub mod layer;
pub mod service;
pub mod socket;

mod body;
mod engine;
mod errors;
mod lookahead;
mod transport;
