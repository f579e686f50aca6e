//! Every server built with a clone of the same [`InMemoryDriver`] is part of the same cluster.
//! It is meant for tests and for several servers hosted by one process.
use std::{
    collections::HashMap,
    convert::Infallible,
    sync::{Arc, PoisonError, RwLock},
};

use tokio::sync::mpsc::{self, error::TrySendError};

use super::{Driver, MessageStream};

const DEFAULT_BUFFER: usize = 255;

type Subscribers = HashMap<String, Vec<mpsc::Sender<Vec<u8>>>>;

/// An in process pub/sub bus.
///
/// A message sent to a subscriber whose buffer is full is dropped.
#[derive(Debug, Clone)]
pub struct InMemoryDriver {
    subscribers: Arc<RwLock<Subscribers>>,
    buffer: usize,
}

impl Default for InMemoryDriver {
    fn default() -> Self {
        Self::with_buffer(DEFAULT_BUFFER)
    }
}

impl InMemoryDriver {
    /// Creates a new bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new bus where each subscriber buffers at most `buffer` messages.
    pub fn with_buffer(buffer: usize) -> Self {
        Self {
            subscribers: Arc::new(RwLock::new(HashMap::new())),
            buffer: buffer.max(1),
        }
    }

    /// Returns the number of channels with at least one live subscriber.
    pub fn channel_count(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|subs| subs.iter().any(|tx| !tx.is_closed()))
            .count()
    }

    fn prune(&self, chan: &str) {
        let mut subscribers = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(subs) = subscribers.get_mut(chan) {
            subs.retain(|tx| !tx.is_closed());
            if subs.is_empty() {
                subscribers.remove(chan);
            }
        }
    }
}

impl Driver for InMemoryDriver {
    type Error = Infallible;

    async fn group_send(&self, chan: &str, data: Vec<u8>) -> Result<(), Self::Error> {
        let mut closed = false;
        {
            let subscribers = self
                .subscribers
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            for tx in subscribers.get(chan).into_iter().flatten() {
                match tx.try_send(data.clone()) {
                    Ok(()) => (),
                    Err(TrySendError::Full(_)) => {
                        #[cfg(feature = "tracing")]
                        tracing::warn!(chan, "subscriber buffer full, message dropped");
                    }
                    Err(TrySendError::Closed(_)) => closed = true,
                }
            }
        }
        if closed {
            self.prune(chan);
        }
        Ok(())
    }

    async fn group_member_count(&self, chan: &str) -> Result<usize, Self::Error> {
        let count = self
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(chan)
            .map(|subs| subs.iter().filter(|tx| !tx.is_closed()).count())
            .unwrap_or_default();
        Ok(count)
    }

    async fn subscribe(&self, chan: String) -> Result<MessageStream, Self::Error> {
        let (tx, rx) = mpsc::channel(self.buffer);
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(chan)
            .or_default()
            .push(tx);
        Ok(MessageStream::new(rx))
    }
}

#[cfg(test)]
mod tests {
    use futures_util::StreamExt;

    use super::*;

    #[tokio::test]
    async fn send_reaches_every_subscriber() {
        let driver = InMemoryDriver::new();
        let mut s1 = driver.subscribe("chan".into()).await.unwrap();
        let mut s2 = driver.clone().subscribe("chan".into()).await.unwrap();
        let mut other = driver.subscribe("other".into()).await.unwrap();

        driver.group_send("chan", vec![1, 2]).await.unwrap();
        assert_eq!(s1.next().await.unwrap(), vec![1, 2]);
        assert_eq!(s2.next().await.unwrap(), vec![1, 2]);
        assert!(
            tokio::time::timeout(std::time::Duration::from_millis(10), other.next())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn dropped_stream_leaves_the_group() {
        let driver = InMemoryDriver::new();
        let s1 = driver.subscribe("chan".into()).await.unwrap();
        let _s2 = driver.subscribe("chan".into()).await.unwrap();
        assert_eq!(driver.group_member_count("chan").await.unwrap(), 2);

        drop(s1);
        assert_eq!(driver.group_member_count("chan").await.unwrap(), 1);
        driver.group_send("chan", vec![]).await.unwrap();
        assert_eq!(driver.channel_count(), 1);
        assert_eq!(driver.group_member_count("none").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn full_subscriber_drops_messages() {
        let driver = InMemoryDriver::with_buffer(1);
        let mut stream = driver.subscribe("chan".into()).await.unwrap();
        driver.group_send("chan", vec![1]).await.unwrap();
        driver.group_send("chan", vec![2]).await.unwrap();
        assert_eq!(stream.next().await.unwrap(), vec![1]);
        assert!(
            tokio::time::timeout(std::time::Duration::from_millis(10), stream.next())
                .await
                .is_err()
        );
    }
}
