use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
};

use http::request::Parts;
use relayio_engine_core::{ProtocolVersion, Sid, TransportType};

use crate::{
    config::EngineIoConfig,
    handler::EngineIoHandler,
    socket::{DisconnectReason, Socket},
};

type Session<D> = Arc<Socket<D>>;

/// The open sessions of a server, with the handler receiving their events.
pub struct EngineIo<H: EngineIoHandler> {
    sessions: RwLock<HashMap<Sid, Session<H::Data>>>,

    /// Receives the events of every session
    pub handler: Arc<H>,

    /// Settings of the transports and heartbeats
    pub config: EngineIoConfig,
}

impl<H: EngineIoHandler> EngineIo<H> {
    /// A server without sessions.
    pub fn new(handler: Arc<H>, config: EngineIoConfig) -> Self {
        EngineIo {
            handler,
            config,
            sessions: RwLock::default(),
        }
    }

    /// Registers a new session and reports it to the handler.
    /// The session unregisters itself when it closes.
    pub(crate) fn open_session(
        self: &Arc<Self>,
        protocol: ProtocolVersion,
        transport: TransportType,
        req: Parts,
    ) -> Session<H::Data> {
        let engine = Arc::downgrade(self);
        let on_close = Box::new(move |sid, reason| {
            if let Some(engine) = engine.upgrade() {
                engine.close_session(sid, reason);
            }
        });
        let session = Arc::new(Socket::new(protocol, transport, &self.config, req, on_close));

        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        sessions.insert(session.id, Arc::clone(&session));
        drop(sessions);

        Arc::clone(&self.handler).on_connect(Arc::clone(&session));
        session
    }

    /// The open session `sid`, if any.
    pub fn get_socket(&self, sid: Sid) -> Option<Session<H::Data>> {
        let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
        sessions.get(&sid).cloned()
    }

    /// The number of open sessions
    pub fn count(&self) -> usize {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Unregisters the session `sid`, stops its heartbeat and its queue, then reports
    /// the closing to the handler. Calls for an unknown session do nothing, so the
    /// handler hears about each session once.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self)))]
    pub fn close_session(&self, sid: Sid, reason: DisconnectReason) {
        let removed = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&sid);
        let Some(session) = removed else {
            #[cfg(feature = "tracing")]
            tracing::debug!(?sid, "session already closed");
            return;
        };

        session.set_closed();
        session.abort_heartbeat();
        // a polling session has no request holding the queue between two polls
        if let Ok(mut outbox) = session.outbox.try_lock() {
            outbox.close();
        }
        self.handler.on_disconnect(session, reason);

        #[cfg(feature = "tracing")]
        tracing::debug!(open = self.count(), "session closed");
    }

    /// Closes every session with [`DisconnectReason::ClosingServer`].
    ///
    /// Their queued packets are flushed to the clients before their transport is closed.
    pub fn close(&self) {
        let sessions: Vec<Session<H::Data>> = {
            let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
            sessions.values().cloned().collect()
        };
        #[cfg(feature = "tracing")]
        tracing::debug!(count = sessions.len(), "closing every session");
        sessions
            .iter()
            .for_each(|session| session.close(DisconnectReason::ClosingServer));
    }
}

impl<H: EngineIoHandler> std::fmt::Debug for EngineIo<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineIo")
            .field("sessions", &self.count())
            .field("handler", &self.handler)
            .field("config", &self.config)
            .finish()
    }
}
