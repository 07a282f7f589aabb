use std::error::Error;
use std::fmt;
use std::future::Future;

use async_trait::async_trait;

use crate::request::Request;
use crate::response::Response;

pub type HandlerError = Box<dyn Error + Send + Sync>;

/// The application callback invoked once per admitted request.
///
/// An `Err` is logged and answered with a bare `500 Internal Server Error`.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, request: Request) -> Result<Response, HandlerError>;
}

/// Adapts an async closure into a [`Handler`].
pub struct HandlerFn<F> {
    f: F,
}

impl<F> fmt::Debug for HandlerFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerFn").finish_non_exhaustive()
    }
}

pub fn handler_fn<F>(f: F) -> HandlerFn<F> {
    HandlerFn { f }
}

#[async_trait]
impl<F, Fut, E> Handler for HandlerFn<F>
where
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Response, E>> + Send,
    E: Into<HandlerError>,
{
    async fn handle(&self, request: Request) -> Result<Response, HandlerError> {
        (self.f)(request).await.map_err(Into::into)
    }
}
