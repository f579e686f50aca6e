//! The table of the requests waiting for responses from the other servers.
//!
//! An entry is registered before its request is published and removed when the
//! [`PendingRequest`] handle is dropped or closed. A response matching no entry belongs to a
//! request that was already resolved, it is discarded.
use std::{
    collections::HashMap,
    pin::Pin,
    sync::{Arc, Mutex, PoisonError},
    task::{Context, Poll},
    time::Duration,
};

use futures_core::Stream;
use relayio_core::{Sid, adapter::ServerReplies};
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::request::{Response, ResponseKind};

#[derive(Debug, Default)]
pub struct PendingRequests {
    entries: Mutex<HashMap<Sid, mpsc::Sender<Response>>>,
}

impl PendingRequests {
    pub fn register(self: &Arc<Self>, req: Sid, buffer: usize) -> PendingRequest {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(req, tx);
        PendingRequest {
            req,
            rx,
            table: self.clone(),
        }
    }

    /// Routes a response to its pending request. Returns false if there is none.
    pub fn dispatch(&self, res: Response) -> bool {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(tx) = entries.get(&res.req) else {
            return false;
        };
        match tx.try_send(res) {
            Ok(()) => true,
            Err(TrySendError::Full(_res)) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(req = ?_res.req, "pending request buffer full, response dropped");
                true
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    fn remove(&self, req: &Sid) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(req);
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// The receiving side of a pending request. It yields the responses in arrival order.
#[derive(Debug)]
pub struct PendingRequest {
    req: Sid,
    rx: mpsc::Receiver<Response>,
    table: Arc<PendingRequests>,
}

impl PendingRequest {
    /// Resolves the request: the entry leaves the table and later responses are discarded.
    pub fn close(&mut self) {
        self.table.remove(&self.req);
        self.rx.close();
    }

    /// Collects one reply per server, until `expected` replies arrived or the timeout elapsed.
    /// Responses that `map` rejects are not counted.
    pub async fn collect<T>(
        mut self,
        expected: u16,
        timeout: Duration,
        map: impl Fn(ResponseKind) -> Option<T>,
    ) -> ServerReplies<T> {
        let mut replies = Vec::with_capacity(expected as usize);
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);
        while replies.len() < expected as usize {
            let res = tokio::select! {
                res = self.rx.recv() => res,
                _ = &mut deadline => None,
            };
            let Some(res) = res else { break };
            if let Some(reply) = map(res.kind) {
                replies.push(reply);
            } else {
                #[cfg(feature = "tracing")]
                tracing::debug!(from = ?res.from, req = ?res.req, "unexpected response type");
            }
        }
        self.close();
        ServerReplies { replies, expected }
    }
}

impl Stream for PendingRequest {
    type Item = Response;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Response>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for PendingRequest {
    fn drop(&mut self) {
        self.table.remove(&self.req);
    }
}
