//! Request handlers.
//!
//! A [`Handler`] maps a [`Request`] to an optional [`Response`]. The
//! [`Dispatcher`] runs the registered interceptors in order, the first one
//! answering `Some` wins, and falls back to the primary handler. A primary
//! handler answering `None` yields `404 Not Found`.
//!
//! Failures never leave the dispatcher: an `Err` or a panic inside a handler
//! is logged and answered with `500 Internal Server Error`.

use std::any::Any;
use std::error::Error;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use tracing::error;

use crate::protocol::{Request, Response, StatusCode};

pub type BoxError = Box<dyn Error + Send + Sync>;

/// `Ok(None)` passes the request on to the next handler.
pub type HandlerResult = Result<Option<Response>, BoxError>;

#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, request: &Request) -> HandlerResult;
}

#[async_trait]
impl<H: Handler + ?Sized> Handler for Arc<H> {
    async fn handle(&self, request: &Request) -> HandlerResult {
        (**self).handle(request).await
    }
}

/// A handler that always answers, built by [`make_handler`].
#[derive(Debug)]
pub struct HandlerFn<F> {
    f: F,
}

#[async_trait]
impl<F, Fut, Err> Handler for HandlerFn<F>
where
    F: Fn(&Request) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Response, Err>> + Send + 'static,
    Err: Into<BoxError> + 'static,
{
    async fn handle(&self, request: &Request) -> HandlerResult {
        (self.f)(request).await.map(Some).map_err(Into::into)
    }
}

/// Wraps a closure returning a future of `Result<Response, E>` as a primary handler.
///
/// The future cannot borrow the request; copy out what it needs first:
///
/// ```
/// use nano_http::handler::make_handler;
/// use nano_http::protocol::{Request, Response, StatusCode};
///
/// let handler = make_handler(|request: &Request| {
///     let path = request.path().to_owned();
///     async move { Ok::<_, std::io::Error>(Response::text(StatusCode::Ok, path)) }
/// });
/// ```
pub fn make_handler<F, Fut, Err>(f: F) -> HandlerFn<F>
where
    F: Fn(&Request) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Response, Err>> + Send + 'static,
    Err: Into<BoxError> + 'static,
{
    HandlerFn { f }
}

/// A handler that may pass, built by [`make_interceptor`].
#[derive(Debug)]
pub struct InterceptorFn<F> {
    f: F,
}

#[async_trait]
impl<F, Fut, Err> Handler for InterceptorFn<F>
where
    F: Fn(&Request) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Option<Response>, Err>> + Send + 'static,
    Err: Into<BoxError> + 'static,
{
    async fn handle(&self, request: &Request) -> HandlerResult {
        (self.f)(request).await.map_err(Into::into)
    }
}

/// Wraps a closure returning a future of `Result<Option<Response>, E>` as an interceptor.
pub fn make_interceptor<F, Fut, Err>(f: F) -> InterceptorFn<F>
where
    F: Fn(&Request) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Option<Response>, Err>> + Send + 'static,
    Err: Into<BoxError> + 'static,
{
    InterceptorFn { f }
}

/// The default primary handler.
#[derive(Debug, Clone, Copy, Default)]
pub struct NotFound;

#[async_trait]
impl Handler for NotFound {
    async fn handle(&self, _request: &Request) -> HandlerResult {
        Ok(Some(Response::not_found()))
    }
}

/// Interceptors plus the primary handler of a server.
#[derive(Clone)]
pub struct Dispatcher {
    interceptors: Vec<Arc<dyn Handler>>,
    handler: Arc<dyn Handler>,
}

impl Dispatcher {
    pub fn new(interceptors: Vec<Arc<dyn Handler>>, handler: Arc<dyn Handler>) -> Self {
        Self { interceptors, handler }
    }

    pub fn interceptors(&self) -> &[Arc<dyn Handler>] {
        &self.interceptors
    }

    /// Produces the response for `request`. Never fails.
    pub async fn dispatch(&self, request: &Request) -> Response {
        for interceptor in &self.interceptors {
            if let Some(response) = call(interceptor.as_ref(), request).await {
                return response;
            }
        }

        call(self.handler.as_ref(), request).await.unwrap_or_else(Response::not_found)
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(Vec::new(), Arc::new(NotFound))
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher").field("interceptors", &self.interceptors.len()).finish_non_exhaustive()
    }
}

async fn call(handler: &dyn Handler, request: &Request) -> Option<Response> {
    match AssertUnwindSafe(handler.handle(request)).catch_unwind().await {
        Ok(Ok(response)) => response,
        Ok(Err(e)) => {
            error!(method = %request.method(), path = %request.path(), cause = %e, "handler failed");
            Some(internal_error())
        }
        Err(panic) => {
            let cause = panic_message(&*panic);
            error!(method = %request.method(), path = %request.path(), cause, "handler panicked");
            Some(internal_error())
        }
    }
}

fn internal_error() -> Response {
    let status = StatusCode::InternalServerError;
    let text = status.description();
    Response::text(status, text)
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}
