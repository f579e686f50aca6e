use std::{convert::Infallible, sync::Arc};

use relayio_core::value::{ValueError, from_args, from_value};
use serde::de::DeserializeOwned;

use super::{Extract, deref_inner};
use crate::{
    adapter::Adapter,
    handler::{Event, OnConnect, OnMessage},
    socket::Socket,
};

/// An event that carries a payload: the auth of a connection or the arguments of a message.
pub trait Payload: Event {
    /// Deserializes the payload.
    fn decode<T: DeserializeOwned>(input: &Self::Input) -> Result<T, ValueError>;
}

impl Payload for OnConnect {
    /// A missing auth payload reads as `null`.
    fn decode<T: DeserializeOwned>(auth: &Self::Input) -> Result<T, ValueError> {
        from_value(auth.clone().unwrap_or_default())
    }
}

impl Payload for OnMessage {
    /// A tuple reads every argument in order, any other type reads the first one.
    fn decode<T: DeserializeOwned>(event: &Self::Input) -> Result<T, ValueError> {
        from_args(event.args.clone())
    }
}

/// The deserialized payload of the event. The handler is not called if it does not deserialize.
///
/// Binary leaves deserialize to [`bytes::Bytes`] or `Vec<u8>`.
/// [`PayloadValue`](crate::PayloadValue) reads the payload as is.
pub struct Data<T>(pub T);

impl<A: Adapter, E: Payload, T: DeserializeOwned> Extract<A, E> for Data<T> {
    type Rejection = ValueError;
    fn extract(_: &Arc<Socket<A>>, input: &E::Input) -> Result<Self, ValueError> {
        E::decode(input).map(Data)
    }
}

/// Like [`Data`] but the handler is always called, with the deserialization result.
pub struct TryData<T>(pub Result<T, ValueError>);

impl<A: Adapter, E: Payload, T: DeserializeOwned> Extract<A, E> for TryData<T> {
    type Rejection = Infallible;
    fn extract(_: &Arc<Socket<A>>, input: &E::Input) -> Result<Self, Infallible> {
        Ok(TryData(E::decode(input)))
    }
}

deref_inner!(Data => T, TryData => Result<T, ValueError>);
