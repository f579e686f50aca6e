//! Handlers are async functions or closures whose arguments are all [extractors](crate::extract).
//!
//! One function shape serves every kind of event. The kind is told apart by a marker type:
//! * [`OnConnect`]: the socket joins a namespace, see [`SocketIo::ns`](crate::SocketIo::ns).
//!   Connect handlers can be guarded by [`ConnectMiddleware`]s with [`ConnectHandler::with`].
//! * [`OnMessage`]: an event registered with [`Socket::on`](crate::socket::Socket::on).
//! * [`OnDisconnect`]: the socket leaves the namespace, see
//!   [`Socket::on_disconnecting`](crate::socket::Socket::on_disconnecting) and
//!   [`Socket::on_disconnect`](crate::socket::Socket::on_disconnect).
//!
//! Arguments are extracted from left to right before the function is called. If one of them
//! is rejected the function does not run and the [`Rejection`] is logged
//! (for a middleware it becomes the `connect_error` message).
//!
//! ## Example
//! ```rust
//! # use relayio::{SocketIo, extract::{AckSender, Data, SocketRef}, handler::ConnectHandler, socket::DisconnectReason};
//! async fn auth(Data(token): Data<String>) -> Result<(), &'static str> {
//!     if token == "secret" { Ok(()) } else { Err("unauthorized") }
//! }
//!
//! let (_svc, io) = SocketIo::new_svc();
//! let on_connect = async |s: SocketRef| {
//!     s.on("echo", async |ack: AckSender, Data(msg): Data<String>| {
//!         ack.send(&msg).ok();
//!     });
//!     s.on_disconnect(async |s: SocketRef, reason: DisconnectReason| {
//!         println!("{} left: {reason}", s.id);
//!     });
//! };
//! io.ns("/", on_connect.with(auth));
//! ```
use std::{fmt, future::Future, marker::PhantomData, sync::Arc};

use futures_util::future::BoxFuture;
use relayio_core::PayloadValue;

use crate::{
    adapter::Adapter,
    extract::Extract,
    socket::{DisconnectReason, Socket},
};

mod connect;

pub(crate) use connect::{BoxedConnectHandler, boxed as boxed_connect};
pub use connect::{ConnectHandler, ConnectMiddleware, Guarded};

/// The kind of event a handler answers, with the data extractors read from.
pub trait Event: Send + Sync + 'static {
    /// What the socket received along with the event.
    type Input: Send + Sync;
}

/// A socket connects to a namespace. The input is the auth payload of the `CONNECT` packet.
#[derive(Debug)]
pub struct OnConnect;

/// A socket receives an event.
#[derive(Debug)]
pub struct OnMessage;

/// A socket leaves its namespace. The input is why it left.
#[derive(Debug)]
pub struct OnDisconnect;

impl Event for OnConnect {
    type Input = Option<PayloadValue>;
}
impl Event for OnMessage {
    type Input = EventArgs;
}
impl Event for OnDisconnect {
    type Input = DisconnectReason;
}

/// The arguments of a received event and its ack id.
#[derive(Debug, Clone)]
pub struct EventArgs {
    pub(crate) args: Vec<PayloadValue>,
    pub(crate) ack_id: Option<i64>,
}

impl EventArgs {
    /// The event arguments, the event name excluded.
    pub fn args(&self) -> &[PayloadValue] {
        &self.args
    }

    /// The id to answer with, if the client expects an acknowledgement.
    pub fn ack_id(&self) -> Option<i64> {
        self.ack_id
    }
}

/// An extractor refused the event.
pub struct Rejection(Box<dyn fmt::Display + Send>);

impl Rejection {
    /// Wraps any displayable error.
    pub fn new(err: impl fmt::Display + Send + 'static) -> Self {
        Self(Box::new(err))
    }
}
impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
impl fmt::Debug for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Rejection({})", self.0)
    }
}

/// An async function whose arguments can all be extracted for the event `E`.
///
/// It is implemented for every clonable `FnOnce` of up to 8 [`Extract`] arguments
/// returning a `Send` future. `T` is the tuple of the argument types.
#[diagnostic::on_unimplemented(
    note = "handlers are clonable async functions whose arguments all implement `Extract` for this event",
    label = "not a valid handler"
)]
pub trait Handler<A: Adapter, E: Event, T>: Clone + Send + Sync + 'static {
    /// The value the function resolves to.
    type Output: Send + 'static;
    /// The future of one call.
    type Future: Future<Output = Self::Output> + Send + 'static;

    /// Extracts the arguments and calls the function.
    fn bind(&self, socket: &Arc<Socket<A>>, input: &E::Input) -> Result<Self::Future, Rejection>;
}

macro_rules! impl_handler {
    ($($arg:ident),*) => {
        #[diagnostic::do_not_recommend]
        impl<A, E, F, Fut, $($arg,)*> Handler<A, E, ($($arg,)*)> for F
        where
            A: Adapter,
            E: Event,
            F: FnOnce($($arg,)*) -> Fut + Clone + Send + Sync + 'static,
            Fut: Future + Send + 'static,
            Fut::Output: Send + 'static,
            $($arg: Extract<A, E>,)*
        {
            type Output = Fut::Output;
            type Future = Fut;

            #[allow(unused_variables)]
            fn bind(&self, socket: &Arc<Socket<A>>, input: &E::Input) -> Result<Fut, Rejection> {
                let f = self.clone();
                Ok(f($(<$arg as Extract<A, E>>::extract(socket, input).map_err(Rejection::new)?,)*))
            }
        }
    };
}

impl_handler!();
impl_handler!(T1);
impl_handler!(T1, T2);
impl_handler!(T1, T2, T3);
impl_handler!(T1, T2, T3, T4);
impl_handler!(T1, T2, T3, T4, T5);
impl_handler!(T1, T2, T3, T4, T5, T6);
impl_handler!(T1, T2, T3, T4, T5, T6, T7);
impl_handler!(T1, T2, T3, T4, T5, T6, T7, T8);

/// A [`Handler`] for the events registered with [`Socket::on`](crate::socket::Socket::on).
pub trait MessageHandler<A: Adapter, T>: Handler<A, OnMessage, T, Output = ()> {}
impl<A: Adapter, T, H: Handler<A, OnMessage, T, Output = ()>> MessageHandler<A, T> for H {}

/// A [`Handler`] called when the socket leaves its namespace.
pub trait DisconnectHandler<A: Adapter, T>: Handler<A, OnDisconnect, T, Output = ()> {}
impl<A: Adapter, T, H: Handler<A, OnDisconnect, T, Output = ()>> DisconnectHandler<A, T> for H {}

/// A handler with its argument types erased, so that it can be stored.
pub(crate) trait DynHandler<A: Adapter, E: Event>: Send + Sync + 'static {
    fn bind(
        &self,
        socket: &Arc<Socket<A>>,
        input: &E::Input,
    ) -> Result<BoxFuture<'static, ()>, Rejection>;
}

pub(crate) type BoxedHandler<A, E> = Arc<dyn DynHandler<A, E>>;

struct Erased<H, T>(H, PhantomData<fn() -> T>);

impl<A, E, H, T> DynHandler<A, E> for Erased<H, T>
where
    A: Adapter,
    E: Event,
    H: Handler<A, E, T, Output = ()>,
    T: 'static,
{
    fn bind(
        &self,
        socket: &Arc<Socket<A>>,
        input: &E::Input,
    ) -> Result<BoxFuture<'static, ()>, Rejection> {
        let fut = self.0.bind(socket, input)?;
        Ok(Box::pin(fut))
    }
}

pub(crate) fn boxed<A, E, H, T>(handler: H) -> BoxedHandler<A, E>
where
    A: Adapter,
    E: Event,
    H: Handler<A, E, T, Output = ()>,
    T: 'static,
{
    Arc::new(Erased(handler, PhantomData))
}

/// Spawns the handler, or logs why its arguments could not be extracted.
pub(crate) fn spawn<A: Adapter, E: Event>(
    handler: &dyn DynHandler<A, E>,
    socket: &Arc<Socket<A>>,
    input: &E::Input,
) {
    match handler.bind(socket, input) {
        Ok(fut) => {
            tokio::spawn(fut);
        }
        Err(_e) => {
            #[cfg(feature = "tracing")]
            tracing::warn!(sid = ?socket.id, "handler not called: {_e}");
        }
    }
}
