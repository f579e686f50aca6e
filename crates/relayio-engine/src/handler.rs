//! Session callbacks of the engine.io server.
//!
//! The [`EngineIoHandler`] is shared by every session. Each session also carries its own
//! `Data`, created with [`Default`] at the handshake.
//!
//! ```rust
//! # use bytes::Bytes;
//! # use relayio_engine::{DisconnectReason, Socket, Str, handler::EngineIoHandler, service::EngineIoService};
//! # use std::sync::{Arc, atomic::{AtomicU64, Ordering}};
//! /// Echoes every message and counts them per session.
//! #[derive(Debug)]
//! struct Echo;
//!
//! #[derive(Debug, Default)]
//! struct Received(AtomicU64);
//!
//! impl EngineIoHandler for Echo {
//!     type Data = Received;
//!
//!     fn on_connect(self: Arc<Self>, socket: Arc<Socket<Received>>) {
//!         socket.emit("welcome").ok();
//!     }
//!     fn on_disconnect(&self, socket: Arc<Socket<Received>>, reason: DisconnectReason) {
//!         let total = socket.data.0.load(Ordering::Relaxed);
//!         println!("{} left ({reason}) after {total} messages", socket.id);
//!     }
//!     fn on_message(self: &Arc<Self>, msg: Str, socket: Arc<Socket<Received>>) {
//!         socket.data.0.fetch_add(1, Ordering::Relaxed);
//!         socket.emit(msg).ok();
//!     }
//!     fn on_binary(self: &Arc<Self>, data: Bytes, socket: Arc<Socket<Received>>) {
//!         socket.data.0.fetch_add(1, Ordering::Relaxed);
//!         socket.emit_binary(data).ok();
//!     }
//! }
//!
//! let svc = EngineIoService::new(Arc::new(Echo));
//! ```
use std::sync::Arc;

use bytes::Bytes;
use http::HeaderMap;

use crate::Str;
use crate::errors::RequestError;
use crate::socket::{DisconnectReason, Socket};

/// Callbacks invoked by the engine for every session.
pub trait EngineIoHandler: std::fmt::Debug + Send + Sync + 'static {
    /// Per session state, created when the session opens.
    type Data: Default + Send + Sync + 'static;

    /// The handshake succeeded, the session is open.
    fn on_connect(self: Arc<Self>, socket: Arc<Socket<Self::Data>>);

    /// The session is closed and removed from the session table.
    fn on_disconnect(&self, socket: Arc<Socket<Self::Data>>, reason: DisconnectReason);

    /// A text message arrived.
    fn on_message(self: &Arc<Self>, msg: Str, socket: Arc<Socket<Self::Data>>);

    /// A binary message arrived.
    fn on_binary(self: &Arc<Self>, data: Bytes, socket: Arc<Socket<Self::Data>>);

    /// Called when a request is rejected before reaching a session.
    fn on_connection_error(&self, err: &RequestError) {
        let _ = err;
    }

    /// Called with the headers of every handshake response, before [`on_headers`](Self::on_headers).
    fn on_initial_headers(&self, headers: &mut HeaderMap) {
        let _ = headers;
    }

    /// Called with the headers of every engine.io response.
    fn on_headers(&self, headers: &mut HeaderMap) {
        let _ = headers;
    }
}
