use tokio::sync::mpsc::{Receiver, error::TryRecvError};

/// An mpsc receiver able to look at its next item without taking it.
///
/// The polling transport looks ahead to know if the next packet still fits in the payload.
#[derive(Debug)]
pub struct LookaheadRx<T> {
    rx: Receiver<T>,
    held: Option<T>,
}

impl<T> LookaheadRx<T> {
    pub fn new(rx: Receiver<T>) -> Self {
        LookaheadRx { rx, held: None }
    }

    /// The next item, if one is ready. It stays queued.
    pub fn peek(&mut self) -> Option<&T> {
        if self.held.is_none() {
            self.held = self.rx.try_recv().ok();
        }
        self.held.as_ref()
    }

    pub async fn recv(&mut self) -> Option<T> {
        if let Some(item) = self.held.take() {
            return Some(item);
        }
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Result<T, TryRecvError> {
        self.held.take().map_or_else(|| self.rx.try_recv(), Ok)
    }

    /// Refuses new items. Queued ones, including a held one, can still be received.
    pub fn close(&mut self) {
        self.rx.close();
    }
}

#[cfg(test)]
mod tests {
    use relayio_engine_core::Packet;
    use tokio::sync::mpsc;

    use super::LookaheadRx;

    #[tokio::test]
    async fn peeked_item_is_received_first() {
        let (tx, rx) = mpsc::channel(4);
        let mut rx = LookaheadRx::new(rx);
        assert_eq!(rx.peek(), None);

        tx.try_send(Packet::Ping).unwrap();
        tx.try_send(Packet::Pong).unwrap();
        assert_eq!(rx.peek(), Some(&Packet::Ping));
        assert_eq!(rx.peek(), Some(&Packet::Ping));

        assert_eq!(rx.try_recv(), Ok(Packet::Ping));
        assert_eq!(rx.recv().await, Some(Packet::Pong));
        assert!(matches!(rx.try_recv(), Err(mpsc::error::TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn held_item_survives_close() {
        let (tx, rx) = mpsc::channel(4);
        let mut rx = LookaheadRx::new(rx);
        tx.try_send(Packet::Noop).unwrap();
        rx.peek();
        rx.close();

        assert!(tx.try_send(Packet::Close).is_err());
        assert_eq!(rx.recv().await, Some(Packet::Noop));
        assert_eq!(rx.recv().await, None);
    }
}
