use std::{future::Future, pin::Pin, task};

use futures_core::{FusedStream, Stream};
use pin_project_lite::pin_project;
use tokio::sync::mpsc;

/// A driver sharing every server of the cluster on one process bus.
pub mod memory;

pin_project! {
    /// A stream of the messages published on a channel.
    ///
    /// Dropping the stream unsubscribes from the channel.
    #[derive(Debug)]
    pub struct MessageStream {
        #[pin]
        rx: mpsc::Receiver<Vec<u8>>,
        done: bool,
    }
}

impl MessageStream {
    /// Creates a stream reading from the receiving half of a channel.
    pub fn new(rx: mpsc::Receiver<Vec<u8>>) -> Self {
        Self { rx, done: false }
    }
}

impl Stream for MessageStream {
    type Item = Vec<u8>;

    fn poll_next(
        self: Pin<&mut Self>,
        cx: &mut task::Context<'_>,
    ) -> task::Poll<Option<Self::Item>> {
        let mut this = self.project();
        if *this.done {
            return task::Poll::Ready(None);
        }
        let res = this.rx.poll_recv(cx);
        if let task::Poll::Ready(None) = res {
            *this.done = true;
        }
        res
    }
}

impl FusedStream for MessageStream {
    fn is_terminated(&self) -> bool {
        self.done
    }
}

/// The pub/sub capability the cluster adapter needs from its backend.
///
/// A channel is a named group: every message sent to it reaches each of its current
/// subscribers. Any backend able to publish to a group, count the group members and
/// subscribe to a group can host the cluster.
///
/// The driver is cloned for every namespace, clones must share the same connection.
pub trait Driver: Clone + Send + Sync + 'static {
    /// The error returned by the backend.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Publishes a message to every subscriber of the channel.
    fn group_send(
        &self,
        chan: &str,
        data: Vec<u8>,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Returns the number of subscribers of the channel.
    fn group_member_count(
        &self,
        chan: &str,
    ) -> impl Future<Output = Result<usize, Self::Error>> + Send;

    /// Subscribes to the channel.
    fn subscribe(
        &self,
        chan: String,
    ) -> impl Future<Output = Result<MessageStream, Self::Error>> + Send;
}
