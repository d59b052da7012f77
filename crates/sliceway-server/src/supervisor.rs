//! Per-connection request loop.
//!
//! `ConnectionSupervisor` reads requests off one socket, hands each to the
//! slice with a fresh [`ResponseBridge`], and makes sure every exchange ends
//! in exactly one terminal response: the slice's own, or a fallback `500`
//! when the slice fails before its response is committed. A failure after
//! commit abandons the connection instead.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use futures::FutureExt;
use sliceway_http::{Body, Connection, Slice, StatusCode};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

use crate::bridge::ResponseBridge;
use crate::config::ServerConfig;
use crate::error::TransportError;
use crate::exchange::{CommitFlag, Exchange, Outcome};
use crate::fallback;
use crate::interim::InterimContinueBridge;
use crate::transport::head::RequestHead;
use crate::transport::inbound::{BodyReader, Inbound};
use crate::transport::output;

/// Serves a [`Slice`] on accepted connections.
#[derive(Clone)]
pub struct ConnectionSupervisor {
    slice: Arc<dyn Slice>,
    config: Arc<ServerConfig>,
}

impl ConnectionSupervisor {
    pub fn new(slice: Arc<dyn Slice>, config: Arc<ServerConfig>) -> Self {
        Self { slice, config }
    }

    /// Serve requests on `io` until the peer closes, a response leaves the
    /// connection unusable, or keep-alive is off.
    pub async fn handle<S>(&self, io: S)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, mut writer) = tokio::io::split(io);
        let mut inbound = Inbound::new(reader);

        loop {
            let head = match inbound.read_head(self.config.max_head_bytes).await {
                Ok(Some(head)) => head,
                Ok(None) => break,
                Err(TransportError::Io(err)) => {
                    debug!(error = %err, "connection read failed");
                    break;
                }
                Err(err) => {
                    reject(&mut writer, &err).await;
                    break;
                }
            };
            let kind = match head.body_kind() {
                Ok(kind) => kind,
                Err(err) => {
                    reject(&mut writer, &err).await;
                    break;
                }
            };

            let keep_alive = self.config.keep_alive && head.keep_alive();
            let committed = CommitFlag::default();
            // HTTP/1.0 peers cannot decode chunked responses.
            let chunking = head.version >= 1;
            let (out, writer_task) = output::spawn(writer, committed.clone(), keep_alive, chunking);
            let exchange = Arc::new(Exchange::new(out.clone(), committed));
            let _tasks = ExchangeTasks {
                exchange: exchange.clone(),
                writer: writer_task.abort_handle(),
            };
            let body_reader = Arc::new(Mutex::new(BodyReader::new(
                inbound,
                kind,
                self.config.max_head_bytes,
            )));
            let body = BodyReader::into_body(body_reader.clone());

            let intact = self.exchange(&exchange, head, body).await;

            out.finish();
            let finished = match writer_task.await {
                Ok(finished) => finished,
                Err(err) => {
                    warn!(error = %err, "response writer task failed");
                    return;
                }
            };
            writer = finished.io;

            let reclaimed = body_reader
                .try_lock()
                .ok()
                .and_then(|mut body_reader| body_reader.reclaim());
            match reclaimed {
                Some(next) if intact && finished.reusable => inbound = next,
                _ => break,
            }
        }

        if let Err(err) = writer.shutdown().await {
            debug!(error = %err, "connection shutdown failed");
        }
    }

    /// Run one request through the slice. Returns `false` if the
    /// connection was abandoned mid-response.
    async fn exchange(&self, exchange: &Arc<Exchange>, head: RequestHead, body: Body) -> bool {
        let line = head.line();
        debug!(method = line.method(), uri = line.uri(), "dispatching request");

        let bridge = ResponseBridge::new(exchange.clone(), self.config.batch_bytes);
        let connection: Arc<dyn Connection> =
            Arc::new(InterimContinueBridge::new(exchange.output().clone(), bridge));

        let dispatched = panic::catch_unwind(AssertUnwindSafe(|| {
            self.slice
                .response(line, head.headers, body)
                .map(|response| response.send(connection))
        }));
        let completion = match diagnose(dispatched) {
            Ok(completion) => completion,
            Err(diagnostic) => return fail(exchange, diagnostic).await,
        };

        let completed = AssertUnwindSafe(completion).catch_unwind().await;
        if let Err(diagnostic) = diagnose(completed) {
            return fail(exchange, diagnostic).await;
        }

        match exchange.settled().await {
            Some(Outcome::Completed) => true,
            Some(Outcome::Failed(diagnostic)) => fail(exchange, diagnostic).await,
            None => fail(exchange, "slice completed without sending a response".to_string()).await,
        }
    }
}

/// Ties an exchange's pump and writer tasks to the supervisor that drives
/// them. Dropping it, including when the connection task is aborted, stops
/// both so nothing keeps writing to the socket.
struct ExchangeTasks {
    exchange: Arc<Exchange>,
    writer: AbortHandle,
}

impl Drop for ExchangeTasks {
    fn drop(&mut self) {
        self.exchange.abort_pump();
        self.writer.abort();
    }
}

/// Turn an error or a caught panic into the text of a fallback response.
fn diagnose<T>(caught: std::thread::Result<anyhow::Result<T>>) -> Result<T, String> {
    match caught {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(fallback::describe_error(&err)),
        Err(panic) => Err(fallback::describe_panic(&*panic)),
    }
}

/// Send the fallback `500`, or abandon the exchange if the slice's own
/// response is already on the wire. Returns whether the connection is
/// still intact.
async fn fail(exchange: &Exchange, diagnostic: String) -> bool {
    // Late `accept` calls from the slice must not race the fallback.
    exchange.claim();
    exchange.abort_pump();

    if exchange.is_committed() {
        warn!(error = %first_line(&diagnostic), "response failed after commit, abandoning connection");
        return false;
    }

    let (headers, body) = fallback::internal_error(&diagnostic);
    match exchange
        .output()
        .respond(StatusCode::INTERNAL_SERVER_ERROR, headers, body)
        .await
    {
        Ok(()) => {
            warn!(error = %first_line(&diagnostic), "slice failed, sent 500");
            true
        }
        Err(TransportError::Committed) => {
            warn!(error = %first_line(&diagnostic), "response committed before fallback, abandoning connection");
            false
        }
        Err(err) => {
            debug!(error = %err, "could not send fallback response");
            false
        }
    }
}

fn first_line(diagnostic: &str) -> &str {
    diagnostic.lines().next().unwrap_or_default()
}

/// Answer a request that could not be parsed, then give up on the connection.
async fn reject<W>(writer: &mut W, err: &TransportError)
where
    W: AsyncWrite + Unpin,
{
    let status = match err {
        TransportError::HeadTooLarge(_) => StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE,
        _ => StatusCode::BAD_REQUEST,
    };
    debug!(error = %err, status = status.as_u16(), "rejecting request");

    let response = format!(
        "HTTP/1.1 {} {}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
        status.as_str(),
        status.canonical_reason().unwrap_or(""),
    );
    if let Err(err) = writer.write_all(response.as_bytes()).await {
        debug!(error = %err, "could not send rejection");
    }
}
