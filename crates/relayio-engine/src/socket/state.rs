use std::{
    marker::PhantomData,
    sync::atomic::{AtomicU8, Ordering},
};

use relayio_engine_core::TransportType;

/// The lifecycle of a [`Socket`](super::Socket).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ReadyState {
    /// Created, the open packet is not handed to a transport yet
    Opening,
    /// Usable
    Open,
    /// [`Socket::close`](super::Socket::close) was called, the queue is being flushed
    Closing,
    /// Removed from the engine
    Closed,
}

/// Where a polling session stands regarding a websocket upgrade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpgradeState {
    /// Still on polling
    NotUpgraded,
    /// A websocket is taking over the session
    Upgrading,
    /// The session moved to a websocket. It can't move back.
    Upgraded,
}

/// A small enum stored as a byte.
pub(crate) trait Repr: Copy + PartialEq {
    fn to_u8(self) -> u8;
    fn from_u8(v: u8) -> Self;
}

impl Repr for ReadyState {
    fn to_u8(self) -> u8 {
        self as u8
    }
    fn from_u8(v: u8) -> Self {
        [Self::Opening, Self::Open, Self::Closing]
            .get(v as usize)
            .copied()
            .unwrap_or(Self::Closed)
    }
}

impl Repr for UpgradeState {
    fn to_u8(self) -> u8 {
        self as u8
    }
    fn from_u8(v: u8) -> Self {
        [Self::NotUpgraded, Self::Upgrading]
            .get(v as usize)
            .copied()
            .unwrap_or(Self::Upgraded)
    }
}

impl Repr for TransportType {
    fn to_u8(self) -> u8 {
        self as u8
    }
    fn from_u8(v: u8) -> Self {
        TransportType::from(v)
    }
}

/// A [`Repr`] value shared between tasks without a lock.
pub(crate) struct Shared<S>(AtomicU8, PhantomData<S>);

impl<S: Repr> Shared<S> {
    pub fn new(state: S) -> Self {
        Shared(AtomicU8::new(state.to_u8()), PhantomData)
    }

    pub fn get(&self) -> S {
        S::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn set(&self, state: S) {
        self.0.store(state.to_u8(), Ordering::Release)
    }

    /// Moves from `from` to `to`. False when the state was not `from`.
    pub fn swap_from(&self, from: S, to: S) -> bool {
        self.0
            .compare_exchange(from.to_u8(), to.to_u8(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Moves to `to` if `allowed` accepts the current state.
    pub fn swap_if(&self, to: S, allowed: impl Fn(S) -> bool) -> bool {
        self.0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| {
                allowed(S::from_u8(v)).then_some(to.to_u8())
            })
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions() {
        let state = Shared::new(UpgradeState::NotUpgraded);
        assert!(state.swap_from(UpgradeState::NotUpgraded, UpgradeState::Upgrading));
        assert!(!state.swap_from(UpgradeState::NotUpgraded, UpgradeState::Upgrading));
        state.set(UpgradeState::Upgraded);
        assert_eq!(state.get(), UpgradeState::Upgraded);

        let ready = Shared::new(ReadyState::Open);
        assert!(ready.swap_if(ReadyState::Closing, |s| s < ReadyState::Closing));
        assert!(!ready.swap_if(ReadyState::Closing, |s| s < ReadyState::Closing));
        assert_eq!(ready.get(), ReadyState::Closing);

        let transport = Shared::new(TransportType::Polling);
        transport.set(TransportType::Websocket);
        assert_eq!(transport.get(), TransportType::Websocket);
    }
}
