//! Drives one `(status, headers, body)` response onto a connection.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use sliceway_http::{Body, Completion, Connection, Headers, StatusCode};
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::{BridgeError, TransportResult};
use crate::exchange::{Exchange, Outcome};
use crate::fallback;
use crate::framing::{Framing, choose_framing};
use crate::sink::ByteChunkSink;
use crate::transport::Output;

/// The [`Connection`] a slice's response is sent to.
///
/// Each exchange has a single terminal slot: the first terminal `accept`
/// takes it and every later one resolves with
/// [`BridgeError::AlreadyResponded`]. The head is staged synchronously, in
/// call order, and the body is pumped by a separate task so the response
/// makes progress whether or not the returned [`Completion`] is polled.
pub struct ResponseBridge {
    exchange: Arc<Exchange>,
    batch_bytes: usize,
}

impl ResponseBridge {
    pub(crate) fn new(exchange: Arc<Exchange>, batch_bytes: usize) -> Self {
        Self {
            exchange,
            batch_bytes,
        }
    }

    fn start(
        &self,
        status: StatusCode,
        headers: Headers,
        body: Body,
    ) -> Result<oneshot::Receiver<anyhow::Result<()>>, BridgeError> {
        if status.is_informational() {
            return Err(BridgeError::NonTerminalStatus(status));
        }
        if !self.exchange.claim() {
            return Err(BridgeError::AlreadyResponded);
        }

        let framing = choose_framing(&headers);
        let output = self.exchange.output().clone();
        if let Err(err) = stage(&output, status, headers, framing) {
            let err = anyhow::Error::from(BridgeError::from(err));
            self.exchange
                .settle(Outcome::Failed(fallback::describe_error(&err)));
            return Ok(resolved(Err(err)));
        }
        debug!(status = status.as_u16(), ?framing, "response accepted");

        let sink = ByteChunkSink::new(output, framing, self.batch_bytes);
        let exchange = self.exchange.clone();
        let (done, completion) = oneshot::channel();

        let pump = tokio::spawn(async move {
            let result = AssertUnwindSafe(stream_body(sink, body))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| {
                    Err(BridgeError::Aborted(fallback::describe_panic(&*panic)).into())
                });

            match &result {
                Ok(()) => exchange.settle(Outcome::Completed),
                Err(err) => {
                    debug!(error = %err, "response body did not complete");
                    exchange.settle(Outcome::Failed(fallback::describe_error(err)));
                }
            }
            let _ = done.send(result);
        });
        self.exchange.track_pump(pump.abort_handle());

        Ok(completion)
    }
}

impl Connection for ResponseBridge {
    fn accept(&self, status: StatusCode, headers: Headers, body: Body) -> Completion {
        match self.start(status, headers, body) {
            Ok(completion) => Box::pin(async move {
                completion.await.unwrap_or_else(|_| {
                    Err(BridgeError::Aborted("response task cancelled".to_string()).into())
                })
            }),
            Err(err) => Box::pin(futures::future::ready(Err(anyhow::Error::from(err)))),
        }
    }
}

/// Queue the status line, headers and framing mode onto the output.
fn stage(output: &Output, status: StatusCode, headers: Headers, framing: Framing) -> TransportResult<()> {
    output.set_status(status)?;
    for header in headers {
        output.put_header(header.name, header.value)?;
    }
    output.set_chunked(framing == Framing::ChunkEncoded)
}

async fn stream_body(sink: ByteChunkSink, body: Body) -> anyhow::Result<()> {
    sink.drain(body).await?;
    sink.output().end().await.map_err(BridgeError::from)?;
    Ok(())
}

fn resolved(result: anyhow::Result<()>) -> oneshot::Receiver<anyhow::Result<()>> {
    let (tx, rx) = oneshot::channel();
    let _ = tx.send(result);
    rx
}
