//! Drains a response [`Body`] onto a connection [`Output`].

use bytes::{Bytes, BytesMut};
use futures::{FutureExt, StreamExt};
use sliceway_http::Body;

use crate::error::{BridgeError, BridgeResult};
use crate::framing::Framing;
use crate::transport::Output;

/// Forwards body chunks as writes, one write in flight at a time.
///
/// A chunk is only pulled from the body after the previous write has been
/// flushed, so a slow peer slows the producer down. Length-delimited bodies
/// are forwarded chunk for chunk. Chunk-encoded bodies may have chunks that
/// are already available merged into one write, up to `batch_bytes`.
pub(crate) struct ByteChunkSink {
    output: Output,
    framing: Framing,
    batch_bytes: usize,
}

impl ByteChunkSink {
    pub fn new(output: Output, framing: Framing, batch_bytes: usize) -> Self {
        Self {
            output,
            framing,
            batch_bytes,
        }
    }

    pub fn output(&self) -> &Output {
        &self.output
    }

    /// Write every chunk of `body`. Stops at the first body or write error.
    pub async fn drain(&self, mut body: Body) -> BridgeResult<()> {
        match self.framing {
            Framing::LengthDelimited => {
                while let Some(chunk) = body.next().await {
                    let chunk = chunk.map_err(BridgeError::body)?;
                    self.output.write(chunk).await?;
                }
            }
            Framing::ChunkEncoded => {
                while let Some(first) = body.next().await {
                    let first = first.map_err(BridgeError::body)?;
                    let (chunk, rest) = self.coalesce(first, &mut body);
                    self.output.write(chunk).await?;
                    match rest {
                        Rest::Pending => {}
                        Rest::Finished => break,
                        Rest::Failed(err) => return Err(BridgeError::body(err)),
                    }
                }
            }
        }
        Ok(())
    }

    /// Append chunks that are ready right now to `first`.
    ///
    /// Returns the merged chunk and what stopped the merge. A body error
    /// is reported after the chunks that preceded it are written.
    fn coalesce(&self, first: Bytes, body: &mut Body) -> (Bytes, Rest) {
        let mut batch: Option<BytesMut> = None;
        let mut len = first.len();
        let mut rest = Rest::Pending;

        while len < self.batch_bytes {
            match body.next().now_or_never() {
                Some(Some(Ok(chunk))) => {
                    let buf = batch.get_or_insert_with(|| BytesMut::from(&first[..]));
                    buf.extend_from_slice(&chunk);
                    len = buf.len();
                }
                Some(Some(Err(err))) => {
                    rest = Rest::Failed(err);
                    break;
                }
                Some(None) => {
                    rest = Rest::Finished;
                    break;
                }
                None => break,
            }
        }

        (batch.map(BytesMut::freeze).unwrap_or(first), rest)
    }
}

/// Why a batch stopped growing.
enum Rest {
    /// Nothing else was ready.
    Pending,
    Finished,
    Failed(anyhow::Error),
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use futures::stream;

    use super::*;
    use crate::exchange::CommitFlag;
    use crate::transport::output;

    async fn drain_to_wire(framing: Framing, batch_bytes: usize, body: Body) -> (BridgeResult<()>, String) {
        let (out, writer) = output::spawn(Vec::new(), CommitFlag::default(), true, true);
        out.set_chunked(framing == Framing::ChunkEncoded).unwrap();
        if framing == Framing::LengthDelimited {
            out.put_header("content-length", "0").unwrap();
        }
        let sink = ByteChunkSink::new(out.clone(), framing, batch_bytes);
        let result = sink.drain(body).await;
        out.finish();
        let wire = String::from_utf8(writer.await.unwrap().io).unwrap();
        let body = wire.split_once("\r\n\r\n").map(|(_, b)| b.to_string()).unwrap_or_default();
        (result, body)
    }

    fn slow(chunks: &'static [&'static str]) -> Body {
        Body::from_stream(stream::iter(chunks.iter().copied()).then(|chunk| async move {
            tokio::task::yield_now().await;
            Ok(Bytes::from_static(chunk.as_bytes()))
        }))
    }

    #[tokio::test]
    async fn length_delimited_forwards_bytes_unframed() {
        let body = Body::from_chunks(vec![Bytes::from("Hello"), Bytes::from(" World!")]);
        let (result, wire) = drain_to_wire(Framing::LengthDelimited, 8192, body).await;
        result.unwrap();
        assert_eq!(wire, "Hello World!");
    }

    #[tokio::test]
    async fn ready_chunks_are_coalesced() {
        let body = Body::from_chunks(vec![
            Bytes::from("Hello"),
            Bytes::from(" "),
            Bytes::from("World"),
        ]);
        let (result, wire) = drain_to_wire(Framing::ChunkEncoded, 8192, body).await;
        result.unwrap();
        assert_eq!(wire, "b\r\nHello World\r\n");
    }

    #[tokio::test]
    async fn coalescing_respects_batch_limit() {
        let body = Body::from_chunks(vec![
            Bytes::from("aaaa"),
            Bytes::from("bbbb"),
            Bytes::from("cccc"),
        ]);
        let (result, wire) = drain_to_wire(Framing::ChunkEncoded, 8, body).await;
        result.unwrap();
        assert_eq!(wire, "8\r\naaaabbbb\r\n4\r\ncccc\r\n");
    }

    #[tokio::test]
    async fn pending_chunks_are_written_separately_in_order() {
        let (result, wire) = drain_to_wire(Framing::ChunkEncoded, 8192, slow(&["one", "two", "three"])).await;
        result.unwrap();
        assert_eq!(wire, "3\r\none\r\n3\r\ntwo\r\n5\r\nthree\r\n");
    }

    #[tokio::test]
    async fn body_error_stops_writes() {
        let body = Body::from_stream(stream::iter(vec![
            Ok(Bytes::from("sent")),
            Err(anyhow::anyhow!("producer died")),
            Ok(Bytes::from("never")),
        ]));
        let (result, wire) = drain_to_wire(Framing::LengthDelimited, 8192, body).await;

        let err = result.unwrap_err();
        assert!(matches!(err, BridgeError::Body(_)));
        assert_eq!(
            std::error::Error::source(&err).unwrap().to_string(),
            "producer died"
        );
        assert_eq!(wire, "sent");
    }

    #[tokio::test]
    async fn error_inside_a_batch_writes_the_batch_first() {
        let body = Body::from_stream(stream::iter(vec![
            Ok(Bytes::from("buffered")),
            Err(anyhow::anyhow!("producer died")),
            Ok(Bytes::from("never")),
        ]));
        let (result, wire) = drain_to_wire(Framing::ChunkEncoded, 8192, body).await;
        assert!(matches!(result, Err(BridgeError::Body(_))));
        assert_eq!(wire, "8\r\nbuffered\r\n");
    }

    #[tokio::test]
    async fn length_delimited_waits_for_each_write() {
        let (mut client, server) = tokio::io::duplex(8);
        let (out, _writer) = output::spawn(server, CommitFlag::default(), true, true);
        out.put_header("content-length", (100 * 64).to_string()).unwrap();

        let pulled = Arc::new(AtomicUsize::new(0));
        let counter = pulled.clone();
        let body = Body::from_stream(stream::iter(0..100).map(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Bytes::from(vec![b'x'; 64]))
        }));

        let sink = ByteChunkSink::new(out, Framing::LengthDelimited, 8192);
        let drain = tokio::spawn(async move { sink.drain(body).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(pulled.load(Ordering::SeqCst) <= 2, "producer ran ahead of the socket");

        tokio::spawn(async move {
            let _ = tokio::io::copy(&mut client, &mut tokio::io::sink()).await;
        });
        drain.await.unwrap().unwrap();
        assert_eq!(pulled.load(Ordering::SeqCst), 100);
    }

    #[tokio::test]
    async fn write_failure_surfaces_as_transport_error() {
        let (client, server) = tokio::io::duplex(8);
        drop(client);
        let (out, _writer) = output::spawn(server, CommitFlag::default(), true, true);
        out.set_chunked(true).unwrap();

        let sink = ByteChunkSink::new(out, Framing::ChunkEncoded, 8192);
        let err = sink.drain(Body::from("data")).await.unwrap_err();
        assert!(matches!(err, BridgeError::Transport(_)));
    }
}
