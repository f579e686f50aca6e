//! Connect handlers and their middlewares.
//!
//! Middlewares run before the socket is added to the namespace, in the order they were added
//! with [`ConnectHandler::with`]. The first one that fails stops the chain and its error is sent
//! to the client in a `connect_error` packet. Packets emitted from a middleware are buffered and
//! flushed right after the `CONNECT` packet, or dropped if the connection is refused.
use std::{fmt, future, marker::PhantomData, sync::Arc};

use futures_util::future::BoxFuture;
use relayio_core::PayloadValue;

use super::{Handler, OnConnect, Rejection};
use crate::{adapter::Adapter, socket::Socket};

type Auth = Option<PayloadValue>;

/// A [`Handler`] of [`OnConnect`] returning `Result<(), E>`. An `Err` refuses the connection.
#[diagnostic::on_unimplemented(
    note = "connect middlewares are clonable async functions returning `Result<(), E>` with `E: Display`",
    label = "not a valid connect middleware"
)]
pub trait ConnectMiddleware<A: Adapter, T>: Send + Sync + 'static {
    /// Extracts the arguments and runs the middleware.
    fn check(&self, socket: &Arc<Socket<A>>, auth: &Auth) -> BoxFuture<'static, Result<(), Rejection>>;
}

impl<A, T, H, E> ConnectMiddleware<A, T> for H
where
    A: Adapter,
    H: Handler<A, OnConnect, T, Output = Result<(), E>>,
    E: fmt::Display + Send + 'static,
{
    fn check(&self, socket: &Arc<Socket<A>>, auth: &Auth) -> BoxFuture<'static, Result<(), Rejection>> {
        match self.bind(socket, auth) {
            Ok(fut) => Box::pin(async move { fut.await.map_err(Rejection::new) }),
            Err(rejection) => Box::pin(future::ready(Err(rejection))),
        }
    }
}

/// The handler called once a socket is connected to a namespace, with its middlewares.
#[diagnostic::on_unimplemented(
    note = "connect handlers are clonable async functions returning `()` whose arguments all implement `Extract`",
    label = "not a valid connect handler"
)]
pub trait ConnectHandler<A: Adapter, T>: Send + Sync + 'static {
    /// Runs the middlewares, stopping at the first failure.
    fn guard<'a>(
        &'a self,
        socket: Arc<Socket<A>>,
        auth: &'a Auth,
    ) -> BoxFuture<'a, Result<(), Rejection>>;

    /// Extracts the arguments and calls the handler.
    fn connected(&self, socket: &Arc<Socket<A>>, auth: &Auth) -> Result<BoxFuture<'static, ()>, Rejection>;

    /// Adds a middleware that runs after the ones already added.
    fn with<M, T1>(self, middleware: M) -> Guarded<Self, M, T1>
    where
        Self: Sized,
        M: ConnectMiddleware<A, T1>,
    {
        Guarded {
            inner: self,
            middleware,
            args: PhantomData,
        }
    }
}

impl<A, T, H> ConnectHandler<A, T> for H
where
    A: Adapter,
    H: Handler<A, OnConnect, T, Output = ()>,
{
    fn guard<'a>(&'a self, _: Arc<Socket<A>>, _: &'a Auth) -> BoxFuture<'a, Result<(), Rejection>> {
        Box::pin(future::ready(Ok(())))
    }

    fn connected(&self, socket: &Arc<Socket<A>>, auth: &Auth) -> Result<BoxFuture<'static, ()>, Rejection> {
        let fut = self.bind(socket, auth)?;
        Ok(Box::pin(fut))
    }
}

/// A [`ConnectHandler`] with one more middleware, built by [`ConnectHandler::with`].
pub struct Guarded<H, M, T1> {
    inner: H,
    middleware: M,
    args: PhantomData<fn() -> T1>,
}

impl<A, T, H, M, T1> ConnectHandler<A, T> for Guarded<H, M, T1>
where
    A: Adapter,
    H: ConnectHandler<A, T>,
    M: ConnectMiddleware<A, T1>,
    T1: 'static,
{
    fn guard<'a>(
        &'a self,
        socket: Arc<Socket<A>>,
        auth: &'a Auth,
    ) -> BoxFuture<'a, Result<(), Rejection>> {
        Box::pin(async move {
            self.inner.guard(socket.clone(), auth).await?;
            // extracted only now, the previous middlewares may have set extensions
            self.middleware.check(&socket, auth).await
        })
    }

    fn connected(&self, socket: &Arc<Socket<A>>, auth: &Auth) -> Result<BoxFuture<'static, ()>, Rejection> {
        self.inner.connected(socket, auth)
    }
}

/// A connect handler with its argument types erased.
pub(crate) trait DynConnectHandler<A: Adapter>: Send + Sync + 'static {
    fn guard<'a>(
        &'a self,
        socket: Arc<Socket<A>>,
        auth: &'a Auth,
    ) -> BoxFuture<'a, Result<(), Rejection>>;

    fn connected(&self, socket: &Arc<Socket<A>>, auth: &Auth) -> Result<BoxFuture<'static, ()>, Rejection>;
}

pub(crate) type BoxedConnectHandler<A> = Arc<dyn DynConnectHandler<A>>;

struct Erased<C, T>(C, PhantomData<fn() -> T>);

impl<A: Adapter, C: ConnectHandler<A, T>, T: 'static> DynConnectHandler<A> for Erased<C, T> {
    fn guard<'a>(
        &'a self,
        socket: Arc<Socket<A>>,
        auth: &'a Auth,
    ) -> BoxFuture<'a, Result<(), Rejection>> {
        self.0.guard(socket, auth)
    }

    fn connected(&self, socket: &Arc<Socket<A>>, auth: &Auth) -> Result<BoxFuture<'static, ()>, Rejection> {
        self.0.connected(socket, auth)
    }
}

pub(crate) fn boxed<A, C, T>(handler: C) -> BoxedConnectHandler<A>
where
    A: Adapter,
    C: ConnectHandler<A, T>,
    T: 'static,
{
    Arc::new(Erased(handler, PhantomData))
}
