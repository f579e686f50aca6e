use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use http::Response;
use pin_project_lite::pin_project;

use crate::body::ResponseBody;

pub(crate) type BoxFuture<B> = Pin<Box<dyn Future<Output = Response<ResponseBody<B>>> + Send>>;

pin_project! {
    /// Resolves the response of an [`EngineIoService`](super::EngineIoService) call.
    #[project = RouteProj]
    pub enum ResponseFuture<F, B> {
        /// Answered by the engine.
        Engine { fut: BoxFuture<B> },
        /// Forwarded to the wrapped service.
        Forward {
            #[pin]
            fut: F,
        },
    }
}

impl<F, B, E> Future for ResponseFuture<F, B>
where
    F: Future<Output = Result<Response<B>, E>>,
{
    type Output = Result<Response<ResponseBody<B>>, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.project() {
            RouteProj::Engine { fut } => fut.as_mut().poll(cx).map(Ok),
            RouteProj::Forward { fut } => fut.poll(cx).map_ok(|res| res.map(ResponseBody::new)),
        }
    }
}
