use std::{
    fmt,
    future::Future,
    pin::Pin,
    task::{self, Poll},
    time::Duration,
};

use futures_core::{FusedStream, Stream};
use pin_project_lite::pin_project;
use relayio_core::adapter::AckItem;
use tokio::time::{self, Sleep};

use crate::{pending::PendingRequest, request::ResponseKind};

pin_project! {
    /// A stream of acknowledgements received from the local and remote servers.
    ///
    /// Local acks are yielded first when ready. Each remote server first answers with the number
    /// of sockets it addressed, then with one response per ack.
    // `serv_cnt` is the number of servers that have not sent their count yet.
    // `ack_cnt` is the number of announced acks not received yet.
    // The remote side is exhausted when both reach zero, or at the deadline.
    pub struct ClusterAckStream<S> {
        #[pin]
        local: S,
        remote: Option<PendingRequest>,
        deadline: Pin<Box<Sleep>>,
        serv_cnt: u16,
        ack_cnt: u32,
        total_ack_cnt: u32,
        remote_done: bool,
    }
}

impl<S> ClusterAckStream<S> {
    pub fn new(local: S, remote: PendingRequest, timeout: Duration, serv_cnt: u16) -> Self {
        Self {
            local,
            remote: Some(remote),
            deadline: Box::pin(time::sleep(timeout)),
            serv_cnt,
            ack_cnt: 0,
            total_ack_cnt: 0,
            remote_done: serv_cnt == 0,
        }
    }

    pub fn new_local(local: S) -> Self {
        Self {
            local,
            remote: None,
            deadline: Box::pin(time::sleep(Duration::ZERO)),
            serv_cnt: 0,
            ack_cnt: 0,
            total_ack_cnt: 0,
            remote_done: true,
        }
    }
}

impl<S> ClusterAckStream<S> {
    fn poll_remote(self: Pin<&mut Self>, cx: &mut task::Context<'_>) -> Poll<Option<AckItem>> {
        let this = self.project();
        loop {
            if *this.remote_done {
                return Poll::Ready(None);
            }
            if *this.serv_cnt == 0 && *this.ack_cnt == 0 {
                *this.remote_done = true;
                if let Some(remote) = this.remote.as_mut() {
                    remote.close();
                }
                return Poll::Ready(None);
            }
            let Some(remote) = this.remote.as_mut() else {
                *this.remote_done = true;
                return Poll::Ready(None);
            };
            match Pin::new(remote).poll_next(cx) {
                Poll::Ready(Some(res)) => match res.kind {
                    ResponseKind::BroadcastAckCount(count) if *this.serv_cnt > 0 => {
                        #[cfg(feature = "tracing")]
                        tracing::trace!(from = ?res.from, req = ?res.req, "receiving broadcast ack count {count}");
                        *this.serv_cnt -= 1;
                        *this.ack_cnt += count;
                        *this.total_ack_cnt += count;
                    }
                    ResponseKind::BroadcastAck(sid, ack) if *this.ack_cnt > 0 => {
                        #[cfg(feature = "tracing")]
                        tracing::trace!(from = ?res.from, req = ?res.req, "receiving broadcast ack {sid}");
                        *this.ack_cnt -= 1;
                        return Poll::Ready(Some(AckItem::Ack(sid, ack)));
                    }
                    _ => {
                        #[cfg(feature = "tracing")]
                        tracing::warn!(from = ?res.from, req = ?res.req, "unexpected ack response");
                    }
                },
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => {
                    if this.deadline.as_mut().poll(cx).is_pending() {
                        return Poll::Pending;
                    }
                    *this.remote_done = true;
                    if let Some(remote) = this.remote.as_mut() {
                        remote.close();
                    }
                    #[cfg(feature = "tracing")]
                    tracing::debug!(
                        servers = *this.serv_cnt,
                        acks = *this.ack_cnt,
                        "ack stream deadline reached"
                    );
                    return Poll::Ready(Some(AckItem::Shortfall {
                        servers: *this.serv_cnt,
                        acks: *this.ack_cnt,
                    }));
                }
            }
        }
    }
}

impl<S> Stream for ClusterAckStream<S>
where
    S: Stream<Item = AckItem> + FusedStream,
{
    type Item = AckItem;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut task::Context<'_>) -> Poll<Option<AckItem>> {
        let mut this = self.as_mut().project();
        if !this.local.is_terminated() {
            if let Poll::Ready(Some(item)) = this.local.as_mut().poll_next(cx) {
                return Poll::Ready(Some(item));
            }
        }
        match self.as_mut().poll_remote(cx) {
            Poll::Ready(Some(item)) => Poll::Ready(Some(item)),
            Poll::Ready(None) if self.local.is_terminated() => Poll::Ready(None),
            _ => Poll::Pending,
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let (lower, upper) = self.local.size_hint();
        if self.remote_done {
            (lower, upper)
        } else if self.serv_cnt == 0 {
            // at most one shortfall item after the announced acks
            let remote = self.ack_cnt as usize + 1;
            (lower, upper.map(|upper| upper + remote))
        } else {
            (lower, None)
        }
    }
}

impl<S> FusedStream for ClusterAckStream<S>
where
    S: Stream<Item = AckItem> + FusedStream,
{
    fn is_terminated(&self) -> bool {
        self.local.is_terminated() && self.remote_done
    }
}

impl<S> fmt::Debug for ClusterAckStream<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterAckStream")
            .field("serv_cnt", &self.serv_cnt)
            .field("ack_cnt", &self.ack_cnt)
            .field("total_ack_cnt", &self.total_ack_cnt)
            .field("remote_done", &self.remote_done)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use futures_util::{StreamExt, stream};
    use relayio_core::{Sid, Uid, errors::AckError};

    use super::*;
    use crate::{pending::PendingRequests, request::Response};

    fn res(req: Sid, kind: ResponseKind) -> Response {
        Response {
            from: Uid::new(),
            req,
            kind,
        }
    }

    fn local(items: Vec<AckItem>) -> stream::Fuse<stream::Iter<std::vec::IntoIter<AckItem>>> {
        stream::iter(items).fuse()
    }

    #[tokio::test]
    async fn merge_local_and_remote_acks() {
        let table = Arc::new(PendingRequests::default());
        let req = Sid::new();
        let pending = table.register(req, 16);
        let local_sid = Sid::new();
        let stream = ClusterAckStream::new(
            local(vec![AckItem::Ack(local_sid, Ok(vec![]))]),
            pending,
            Duration::from_secs(5),
            2,
        );

        let (s1, s2, s3) = (Sid::new(), Sid::new(), Sid::new());
        table.dispatch(res(req, ResponseKind::BroadcastAckCount(2)));
        table.dispatch(res(req, ResponseKind::BroadcastAck(s1, Ok(vec![]))));
        table.dispatch(res(req, ResponseKind::BroadcastAckCount(1)));
        table.dispatch(res(req, ResponseKind::BroadcastAck(s2, Ok(vec![]))));
        table.dispatch(res(
            req,
            ResponseKind::BroadcastAck(s3, Err(AckError::Timeout)),
        ));

        let items: Vec<_> = stream.collect().await;
        assert_eq!(
            items,
            vec![
                AckItem::Ack(local_sid, Ok(vec![])),
                AckItem::Ack(s1, Ok(vec![])),
                AckItem::Ack(s2, Ok(vec![])),
                AckItem::Ack(s3, Err(AckError::Timeout)),
            ]
        );
        assert_eq!(table.len(), 0);
    }

    #[tokio::test]
    async fn shortfall_after_deadline() {
        let table = Arc::new(PendingRequests::default());
        let req = Sid::new();
        let pending = table.register(req, 16);
        let mut stream =
            ClusterAckStream::new(local(vec![]), pending, Duration::from_millis(30), 2);

        let sid = Sid::new();
        table.dispatch(res(req, ResponseKind::BroadcastAckCount(2)));
        table.dispatch(res(req, ResponseKind::BroadcastAck(sid, Ok(vec![]))));

        assert_eq!(stream.next().await, Some(AckItem::Ack(sid, Ok(vec![]))));
        assert_eq!(
            stream.next().await,
            Some(AckItem::Shortfall {
                servers: 1,
                acks: 1
            })
        );
        assert_eq!(stream.next().await, None);
        assert!(stream.is_terminated());
        assert_eq!(table.len(), 0);
    }

    #[tokio::test]
    async fn unexpected_responses_are_skipped() {
        let table = Arc::new(PendingRequests::default());
        let req = Sid::new();
        let pending = table.register(req, 16);
        let stream = ClusterAckStream::new(local(vec![]), pending, Duration::from_secs(5), 1);

        // an ack before any count is not expected yet
        table.dispatch(res(req, ResponseKind::BroadcastAck(Sid::new(), Ok(vec![]))));
        table.dispatch(res(req, ResponseKind::AllRooms(vec![])));
        table.dispatch(res(req, ResponseKind::BroadcastAckCount(0)));

        let items: Vec<_> = stream.collect().await;
        assert!(items.is_empty());
    }

    #[tokio::test]
    async fn local_only() {
        let sid = Sid::new();
        let stream = ClusterAckStream::new_local(local(vec![AckItem::Ack(sid, Ok(vec![]))]));
        assert!(!stream.is_terminated());
        let items: Vec<_> = stream.collect().await;
        assert_eq!(items, vec![AckItem::Ack(sid, Ok(vec![]))]);
    }
}
