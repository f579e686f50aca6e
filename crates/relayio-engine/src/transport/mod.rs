//! The polling and websocket transports, and the handshake they share.

use relayio_engine_core::{OpenPacket, Sid, TransportType};

use crate::config::EngineIoConfig;

pub mod polling;
pub mod ws;

/// Only a polling session advertises the websocket upgrade, and only when websocket is enabled.
fn make_open_packet(transport: TransportType, id: Sid, config: &EngineIoConfig) -> OpenPacket {
    let ws = TransportType::Websocket;
    let can_upgrade = transport == TransportType::Polling && config.allowed_transport(ws);
    OpenPacket {
        sid: id,
        upgrades: can_upgrade.then(|| ws.as_str().to_owned()).into_iter().collect(),
        ping_timeout: config.ping_timeout.as_millis() as u64,
        ping_interval: config.ping_interval.as_millis() as u64,
        max_payload: config.max_payload,
    }
}
