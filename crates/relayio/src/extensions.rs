//! [`Extensions`] used to store extra data in each socket instance.
//!
//! It is heavily inspired by the [`http::Extensions`] type from the `http` crate
//! and is in fact a thin concurrent wrapper around it.
//!
//! The main difference is that the inner map is behind a [`RwLock`] so that
//! it can be shared and mutated from every handler of the socket. Values are
//! cloned out of the map, so wrap them in an [`Arc`](std::sync::Arc) when they are expensive to clone.
use std::{
    fmt,
    sync::{PoisonError, RwLock},
};

/// A type map of protocol extensions.
///
/// It is bound to a socket and dropped with it.
#[derive(Default)]
pub struct Extensions {
    map: RwLock<http::Extensions>,
}

impl Extensions {
    /// Create an empty [`Extensions`] map.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a type into this [`Extensions`].
    ///
    /// If a extension of this type already existed, it will be returned.
    pub fn insert<T: Clone + Send + Sync + 'static>(&self, val: T) -> Option<T> {
        self.map
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(val)
    }

    /// Get a clone of a type previously inserted on this [`Extensions`].
    pub fn get<T: Clone + Send + Sync + 'static>(&self) -> Option<T> {
        self.map
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get::<T>()
            .cloned()
    }

    /// Remove a type from this [`Extensions`].
    ///
    /// If a extension of this type existed, it will be returned.
    pub fn remove<T: Clone + Send + Sync + 'static>(&self) -> Option<T> {
        self.map
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove::<T>()
    }

    /// Clear the [`Extensions`] of all inserted extensions.
    #[inline]
    pub fn clear(&self) {
        self.map
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Check whether the extension set is empty or not.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.map
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }

    /// Get the number of extensions available.
    #[inline]
    pub fn len(&self) -> usize {
        self.map.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl fmt::Debug for Extensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Extensions").field("len", &self.len()).finish()
    }
}
