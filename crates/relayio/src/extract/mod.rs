//! Extractors are the arguments of [handlers](crate::handler).
//!
//! An extractor implements [`Extract`] for the events it can be read from:
//!
//! | Extractor | connect | message | disconnect |
//! |---|---|---|---|
//! | [`SocketRef`], [`SocketIo`](crate::SocketIo), [`TransportType`](crate::TransportType) | yes | yes | yes |
//! | [`Extension`], [`MaybeExtension`], [`HttpExtension`], [`MaybeHttpExtension`] | yes | yes | yes |
//! | [`Data`], [`TryData`] | the auth payload | the event arguments | |
//! | [`AckSender`] | | yes | |
//! | [`DisconnectReason`](crate::socket::DisconnectReason) | | | yes |
//!
//! Using an extractor with an event it does not support is a compile error.
//!
//! ### Example
//! ```rust
//! # use relayio::{SocketIo, extract::{AckSender, Data, Extension, SocketRef}};
//! # use serde::Deserialize;
//! #[derive(Deserialize)]
//! struct Login { token: String }
//!
//! #[derive(Clone)]
//! struct UserId(String);
//!
//! let (_svc, io) = SocketIo::new_svc();
//! io.ns("/", async |s: SocketRef, Data(login): Data<Login>| {
//!     s.extensions.insert(UserId(login.token));
//!     s.on("whoami", async |ack: AckSender, Extension(UserId(id)): Extension<UserId>| {
//!         ack.send(&id).ok();
//!     });
//! });
//! ```
use std::{fmt, sync::Arc};

use crate::{adapter::Adapter, handler::Event, socket::Socket};

mod data;
mod extensions;
mod socket;

pub use data::*;
pub use extensions::*;
pub use socket::*;

/// Builds a handler argument from the socket and the input of the event `E`.
///
/// A rejection prevents the handler from being called.
#[diagnostic::on_unimplemented(
    note = "this type cannot be extracted for this kind of event",
    label = "invalid extractor"
)]
pub trait Extract<A: Adapter, E: Event>: Sized {
    /// Why the extraction failed.
    type Rejection: fmt::Display + Send + 'static;

    /// Extracts the argument.
    fn extract(socket: &Arc<Socket<A>>, input: &E::Input) -> Result<Self, Self::Rejection>;
}

/// `Deref` and `DerefMut` to the wrapped value of a single field extractor.
macro_rules! deref_inner {
    ($($wrapper:ident => $target:ty),* $(,)?) => {$(
        impl<T> std::ops::Deref for $wrapper<T> {
            type Target = $target;
            fn deref(&self) -> &$target {
                &self.0
            }
        }
        impl<T> std::ops::DerefMut for $wrapper<T> {
            fn deref_mut(&mut self) -> &mut $target {
                &mut self.0
            }
        }
    )*};
}
pub(crate) use deref_inner;
