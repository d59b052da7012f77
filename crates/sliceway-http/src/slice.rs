//! The slice / response / connection contract.

use std::sync::Arc;

use futures::future::BoxFuture;
use http::StatusCode;

use crate::{Body, Headers, RequestLine};

/// Resolves once a response has been fully flushed, or with the reason it
/// could not be.
pub type Completion = BoxFuture<'static, anyhow::Result<()>>;

/// Accepts a response and writes it somewhere.
///
/// A `100 Continue` status may be accepted before the terminal response;
/// any other status is terminal and may be accepted once per exchange.
pub trait Connection: Send + Sync {
    fn accept(&self, status: StatusCode, headers: Headers, body: Body) -> Completion;
}

/// A response that knows how to send itself to a [`Connection`].
pub trait Response: Send {
    fn send(self: Box<Self>, connection: Arc<dyn Connection>) -> Completion;
}

impl<F> Response for F
where
    F: FnOnce(Arc<dyn Connection>) -> Completion + Send,
{
    fn send(self: Box<Self>, connection: Arc<dyn Connection>) -> Completion {
        (*self)(connection)
    }
}

/// An HTTP request handler.
pub trait Slice: Send + Sync + 'static {
    fn response(
        &self,
        line: RequestLine,
        headers: Headers,
        body: Body,
    ) -> anyhow::Result<Box<dyn Response>>;
}

impl<F> Slice for F
where
    F: Fn(RequestLine, Headers, Body) -> anyhow::Result<Box<dyn Response>> + Send + Sync + 'static,
{
    fn response(
        &self,
        line: RequestLine,
        headers: Headers,
        body: Body,
    ) -> anyhow::Result<Box<dyn Response>> {
        self(line, headers, body)
    }
}

/// Pin a closure's signature so it can be used as a [`Slice`].
pub fn slice_fn<F>(f: F) -> F
where
    F: Fn(RequestLine, Headers, Body) -> anyhow::Result<Box<dyn Response>> + Send + Sync + 'static,
{
    f
}

/// Box a closure as a [`Response`].
pub fn response_fn<F>(f: F) -> Box<dyn Response>
where
    F: FnOnce(Arc<dyn Connection>) -> Completion + Send + 'static,
{
    Box::new(f)
}
