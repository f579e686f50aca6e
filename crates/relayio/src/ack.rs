//! Acknowledgements awaited after an emit.
//!
//! [`AckStream`] yields the answer of every socket reached by an emit, or resolves to the
//! first one when awaited as a [`Future`].
use std::{
    marker::PhantomData,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll, ready},
    time::Duration,
};

use futures_core::{FusedFuture, FusedStream, Future, Stream};
use futures_util::{future::BoxFuture, stream::FuturesUnordered};
use relayio_core::{
    Sid,
    adapter::{AckItem, AckResult, LocalAckStream},
    parser::Encoded,
    value::from_args,
};
use serde::de::DeserializeOwned;
use tokio::sync::oneshot;

use crate::{
    adapter::Adapter,
    errors::{AckError, SocketError},
    socket::Socket,
};

/// Resolves with the ack of `id`, a closed socket or a timeout.
async fn wait_ack(id: Sid, rx: oneshot::Receiver<AckResult>, timeout: Duration) -> (Sid, AckResult) {
    let res = match tokio::time::timeout(timeout, rx).await {
        Ok(Ok(res)) => res,
        // the socket dropped its pending acks
        Ok(Err(_)) => Err(AckError::Socket(SocketError::Closed)),
        Err(_) => Err(AckError::Timeout),
    };
    (id, res)
}

/// The acks of sockets of this server, in arrival order.
///
/// Only useful to implement an [`Adapter`](crate::adapter::Adapter).
#[must_use = "streams do nothing unless polled"]
pub struct SocketAcks(FuturesUnordered<BoxFuture<'static, (Sid, AckResult)>>);

impl SocketAcks {
    /// A stream ending right away.
    pub fn empty() -> Self {
        SocketAcks(FuturesUnordered::new())
    }

    /// The ack of one socket, bounded by `timeout`.
    pub fn send(rx: oneshot::Receiver<AckResult>, timeout: Duration, id: Sid) -> Self {
        let acks = Self::empty();
        acks.0.push(Box::pin(wait_ack(id, rx, timeout)));
        acks
    }

    /// Writes `data`, carrying `ack_id`, to every socket and waits for their acks,
    /// `timeout` each. A socket that can't be written to yields its error right away.
    ///
    /// Returns the stream and how many sockets it waits for.
    pub(crate) fn broadcast<'a, A: Adapter>(
        ack_id: i64,
        data: Encoded,
        sockets: impl Iterator<Item = &'a Arc<Socket<A>>>,
        timeout: Duration,
    ) -> (Self, u32) {
        let acks = Self::empty();
        for socket in sockets {
            let id = socket.id;
            match socket.send_with_ack_raw(ack_id, data.clone()) {
                Ok(rx) => acks.0.push(Box::pin(wait_ack(id, rx, timeout))),
                Err(e) => acks.0.push(Box::pin(async move { (id, Err(AckError::Socket(e))) })),
            }
        }
        let count = acks.0.len() as u32;
        #[cfg(feature = "tracing")]
        tracing::debug!(count, ack_id, "waiting for acks");
        (acks, count)
    }
}

impl Stream for SocketAcks {
    type Item = (Sid, AckResult);

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.0).poll_next(cx)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.0.size_hint()
    }
}

impl FusedStream for SocketAcks {
    fn is_terminated(&self) -> bool {
        self.0.is_terminated()
    }
}

/// Acks of several servers may be missing when the timeout hits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckShortfall {
    /// Servers that never told how many sockets they reached.
    pub servers: u16,
    /// Acks announced but never received.
    pub acks: u32,
}

pin_project_lite::pin_project! {
    /// The decoded answers to an emit with acknowledgement.
    ///
    /// * Polled as a [`Stream`], it yields `(socket id, answer)` for every socket reached.
    /// * Awaited as a [`Future`], it resolves to the first answer. Without any socket to
    ///   answer, it resolves to [`AckError::Timeout`].
    ///
    /// A socket that does not answer in time yields [`AckError::Timeout`], an answer that
    /// does not decode as `T` yields [`AckError::Decode`]. Servers of a cluster that never
    /// answered are not items: [`AckStream::shortfall`] tells about them once the stream ended.
    ///
    /// ```rust
    /// # use relayio::{SocketIo, extract::SocketRef};
    /// # use futures_util::StreamExt;
    /// let (_svc, io) = SocketIo::new_svc();
    /// io.ns("/poll", async |socket: SocketRef| {
    ///     let Ok(votes) = socket.within("voters").emit_with_ack::<_, bool>("vote?", "tabs").await else {
    ///         return;
    ///     };
    ///     let yes = votes
    ///         .filter(|(_, vote)| std::future::ready(matches!(vote, Ok(true))))
    ///         .count()
    ///         .await;
    ///     socket.emit("result", &yes).ok();
    /// });
    /// ```
    #[must_use = "futures and streams do nothing unless you `.await` or poll them"]
    pub struct AckStream<T, S = LocalAckStream<SocketAcks>> {
        #[pin]
        inner: S,
        shortfall: Option<AckShortfall>,
        _answer: PhantomData<fn() -> T>,
    }
}

impl<T, S> AckStream<T, S> {
    pub(crate) fn new(inner: S) -> Self {
        AckStream {
            inner,
            shortfall: None,
            _answer: PhantomData,
        }
    }

    /// The servers and acks missing at the end of a multi-server stream,
    /// `None` while the stream is running or when nothing is missing.
    pub fn shortfall(&self) -> Option<AckShortfall> {
        self.shortfall
    }
}

impl<T> AckStream<T> {
    /// Acks of sockets of this server.
    pub(crate) fn local(inner: SocketAcks) -> Self {
        Self::new(LocalAckStream::new(inner))
    }
}

impl<T: DeserializeOwned, S: Stream<Item = AckItem>> Stream for AckStream<T, S> {
    type Item = (Sid, Result<T, AckError>);

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();
        loop {
            match ready!(this.inner.as_mut().poll_next(cx)) {
                Some(AckItem::Ack(sid, res)) => return Poll::Ready(Some((sid, decode(res)))),
                Some(AckItem::Shortfall { servers, acks }) => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(servers, acks, "ack stream ended with missing replies");
                    *this.shortfall = Some(AckShortfall { servers, acks });
                }
                None => return Poll::Ready(None),
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<T: DeserializeOwned, S: FusedStream<Item = AckItem>> FusedStream for AckStream<T, S> {
    fn is_terminated(&self) -> bool {
        self.inner.is_terminated()
    }
}

impl<T: DeserializeOwned, S: Stream<Item = AckItem>> Future for AckStream<T, S> {
    type Output = Result<T, AckError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match ready!(Stream::poll_next(self, cx)) {
            Some((_, res)) => Poll::Ready(res),
            // nobody was there to answer
            None => Poll::Ready(Err(AckError::Timeout)),
        }
    }
}

impl<T: DeserializeOwned, S: FusedStream<Item = AckItem>> FusedFuture for AckStream<T, S> {
    fn is_terminated(&self) -> bool {
        self.inner.is_terminated()
    }
}

fn decode<T: DeserializeOwned>(ack: AckResult) -> Result<T, AckError> {
    ack.and_then(|args| from_args(args).map_err(|e| AckError::Decode(e.to_string())))
}

#[cfg(test)]
mod tests {
    use futures_util::StreamExt;
    use relayio_core::{PayloadValue, packet::Packet, parser::Parse};

    use super::*;
    use crate::{adapter::LocalAdapter, ns::Namespace, parser::Parser};

    const LONG: Duration = Duration::from_secs(5);

    fn pair() -> [Arc<Socket<LocalAdapter>>; 2] {
        let ns = Namespace::new_dummy([]);
        [
            Socket::new_dummy(Sid::new(), ns.clone()),
            Socket::new_dummy(Sid::new(), ns),
        ]
    }

    fn asking(ack_id: i64) -> Encoded {
        let mut packet = Packet::event("/", "question", vec!["?".into()]);
        packet.inner.set_ack_id(ack_id);
        Parser::default().encode(packet)
    }

    fn answer(socket: &Arc<Socket<LocalAdapter>>, data: impl Into<PayloadValue>) {
        let packet = Packet::ack("/", vec![data.into()], 1);
        socket.clone().recv(packet.inner).unwrap();
    }

    fn single(timeout: Duration) -> (oneshot::Sender<AckResult>, AckStream<String>) {
        let (tx, rx) = oneshot::channel();
        (tx, AckStream::local(SocketAcks::send(rx, timeout, Sid::new())))
    }

    #[tokio::test]
    async fn every_socket_answers() {
        let sockets = pair();
        let (acks, count) = SocketAcks::broadcast(1, asking(1), sockets.iter(), LONG);
        assert_eq!(count, 2);
        let mut stream = AckStream::<String>::local(acks);

        answer(&sockets[0], "yes");
        answer(&sockets[1], "no");

        let mut answers = vec![];
        while let Some((_, ack)) = stream.next().await {
            answers.push(ack.unwrap());
        }
        answers.sort();
        assert_eq!(answers, ["no", "yes"]);
        assert_eq!(stream.shortfall(), None);
    }

    #[tokio::test]
    async fn single_ack_as_a_stream() {
        let (tx, rx) = oneshot::channel();
        let sid = Sid::new();
        let mut stream = AckStream::<String>::local(SocketAcks::send(rx, LONG, sid));
        tx.send(Ok(vec!["test".into()])).unwrap();

        assert_eq!(stream.next().await.unwrap(), (sid, Ok("test".to_string())));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn single_ack_as_a_future() {
        let (tx, stream) = single(LONG);
        assert_eq!(stream.size_hint(), (1, Some(1)));
        tx.send(Ok(vec!["test".into()])).unwrap();
        assert_eq!(stream.await.unwrap(), "test");
    }

    #[tokio::test]
    async fn arguments_decode_as_a_tuple() {
        let (tx, rx) = oneshot::channel();
        let stream = AckStream::<(String, i64)>::local(SocketAcks::send(rx, LONG, Sid::new()));
        tx.send(Ok(vec!["test".into(), 3i64.into()])).unwrap();

        assert_eq!(stream.await.unwrap(), ("test".to_string(), 3));
    }

    #[tokio::test]
    async fn undecodable_answers() {
        let sockets = pair();
        let (acks, _) = SocketAcks::broadcast(1, asking(1), sockets.iter(), LONG);
        let mut stream = AckStream::<String>::local(acks);
        answer(&sockets[0], 132i64);
        answer(&sockets[1], true);

        for _ in 0..2 {
            let (_, ack) = stream.next().await.unwrap();
            assert!(matches!(ack, Err(AckError::Decode(_))));
        }
        assert!(stream.next().await.is_none());

        let (tx, stream) = single(LONG);
        tx.send(Ok(vec![true.into()])).unwrap();
        assert!(matches!(stream.await, Err(AckError::Decode(_))));
    }

    #[tokio::test]
    async fn closed_socket_stops_waiting() {
        let [answering, leaving] = pair();
        let leaving_id = leaving.id;
        let sockets = [answering.clone(), leaving.clone()];
        let (acks, _) = SocketAcks::broadcast(1, asking(1), sockets.iter(), LONG);
        let mut stream = AckStream::<String>::local(acks);

        answer(&answering, "here");
        let (id, ack) = stream.next().await.unwrap();
        assert_eq!(id, answering.id);
        assert!(ack.is_ok());

        leaving.disconnect().unwrap();
        assert_eq!(
            stream.next().await.unwrap(),
            (leaving_id, Err(AckError::Socket(SocketError::Closed)))
        );
        assert!(stream.next().await.is_none());

        let (tx, stream) = single(LONG);
        drop(tx);
        assert_eq!(stream.await, Err(AckError::Socket(SocketError::Closed)));
    }

    #[tokio::test]
    async fn silent_socket_times_out() {
        let sockets = pair();
        let short = Duration::from_millis(10);
        let (acks, _) = SocketAcks::broadcast(1, asking(1), sockets.iter(), short);
        let mut stream = AckStream::<String>::local(acks);
        answer(&sockets[0], "here");

        assert!(stream.next().await.unwrap().1.is_ok());
        assert_eq!(
            stream.next().await.unwrap(),
            (sockets[1].id, Err(AckError::Timeout))
        );
        assert!(stream.next().await.is_none());

        let (_tx, stream) = single(short);
        assert_eq!(stream.await, Err(AckError::Timeout));
    }

    #[tokio::test]
    async fn nobody_to_answer() {
        let stream = AckStream::<String>::local(SocketAcks::empty());
        assert_eq!(stream.await, Err(AckError::Timeout));
    }

    #[tokio::test]
    async fn shortfall_is_recorded_not_yielded() {
        let sid = Sid::new();
        let items = futures_util::stream::iter([
            AckItem::Ack(sid, Ok(vec!["a".into()])),
            AckItem::Shortfall {
                servers: 1,
                acks: 2,
            },
        ])
        .fuse();
        let mut stream = AckStream::<String, _>::new(items);

        assert_eq!(stream.next().await.unwrap(), (sid, Ok("a".to_string())));
        assert!(stream.next().await.is_none());
        assert_eq!(
            stream.shortfall(),
            Some(AckShortfall {
                servers: 1,
                acks: 2
            })
        );
    }
}
