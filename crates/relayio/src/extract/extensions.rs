use std::{any::type_name, convert::Infallible, fmt, marker::PhantomData, sync::Arc};

use super::{Extract, deref_inner};
use crate::{adapter::Adapter, handler::Event, socket::Socket};

/// No extension of type `T` was found.
pub struct ExtensionNotFound<T>(PhantomData<fn() -> T>);

impl<T> fmt::Display for ExtensionNotFound<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "no extension of type {} was inserted", type_name::<T>())
    }
}
impl<T> fmt::Debug for ExtensionNotFound<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ExtensionNotFound").field(&type_name::<T>()).finish()
    }
}
impl<T> std::error::Error for ExtensionNotFound<T> {}

/// A clone of the socket [extension](crate::extensions::Extensions) of type `T`.
/// The handler is not called when there is none, see [`MaybeExtension`] otherwise.
pub struct Extension<T>(pub T);

/// A clone of the socket [extension](crate::extensions::Extensions) of type `T`, if any.
pub struct MaybeExtension<T>(pub Option<T>);

/// A clone of the extension of type `T` of the handshake http request.
/// The handler is not called when there is none.
pub struct HttpExtension<T>(pub T);

/// A clone of the extension of type `T` of the handshake http request, if any.
pub struct MaybeHttpExtension<T>(pub Option<T>);

fn socket_extension<T: Clone + Send + Sync + 'static>(socket: &Socket<impl Adapter>) -> Option<T> {
    socket.extensions.get::<T>()
}

fn http_extension<T: Clone + Send + Sync + 'static>(socket: &Socket<impl Adapter>) -> Option<T> {
    socket.req_parts().extensions.get::<T>().cloned()
}

impl<A: Adapter, E: Event, T: Clone + Send + Sync + 'static> Extract<A, E> for Extension<T> {
    type Rejection = ExtensionNotFound<T>;
    fn extract(socket: &Arc<Socket<A>>, _: &E::Input) -> Result<Self, Self::Rejection> {
        socket_extension(socket)
            .map(Extension)
            .ok_or(ExtensionNotFound(PhantomData))
    }
}

impl<A: Adapter, E: Event, T: Clone + Send + Sync + 'static> Extract<A, E> for MaybeExtension<T> {
    type Rejection = Infallible;
    fn extract(socket: &Arc<Socket<A>>, _: &E::Input) -> Result<Self, Infallible> {
        Ok(MaybeExtension(socket_extension(socket)))
    }
}

impl<A: Adapter, E: Event, T: Clone + Send + Sync + 'static> Extract<A, E> for HttpExtension<T> {
    type Rejection = ExtensionNotFound<T>;
    fn extract(socket: &Arc<Socket<A>>, _: &E::Input) -> Result<Self, Self::Rejection> {
        http_extension(socket)
            .map(HttpExtension)
            .ok_or(ExtensionNotFound(PhantomData))
    }
}

impl<A: Adapter, E: Event, T: Clone + Send + Sync + 'static> Extract<A, E> for MaybeHttpExtension<T> {
    type Rejection = Infallible;
    fn extract(socket: &Arc<Socket<A>>, _: &E::Input) -> Result<Self, Infallible> {
        Ok(MaybeHttpExtension(http_extension(socket)))
    }
}

deref_inner!(
    Extension => T,
    MaybeExtension => Option<T>,
    HttpExtension => T,
    MaybeHttpExtension => Option<T>,
);
