//! Inbound side of a connection: request heads and streaming request bodies.

use std::sync::Arc;

use bytes::{Buf, Bytes, BytesMut};
use sliceway_http::Body;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::Mutex;

use super::head::{self, BodyKind, RequestHead};
use super::READ_CHUNK;
use crate::error::{TransportError, TransportResult};

/// The read half of a connection plus whatever bytes were read past the
/// last consumed message.
pub(crate) struct Inbound<R> {
    reader: R,
    buf: BytesMut,
}

impl<R> Inbound<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: BytesMut::with_capacity(READ_CHUNK),
        }
    }

    pub async fn read_head(&mut self, max_head_bytes: usize) -> TransportResult<Option<RequestHead>> {
        head::read_head(&mut self.reader, &mut self.buf, max_head_bytes).await
    }

    /// Buffer more bytes; errors if the peer has closed.
    async fn fill(&mut self) -> TransportResult<()> {
        self.buf.reserve(READ_CHUNK);
        if self.reader.read_buf(&mut self.buf).await? == 0 {
            return Err(TransportError::Malformed(
                "connection closed before request body completed".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Decoder {
    Length(u64),
    ChunkSize,
    ChunkData(u64),
    ChunkDataEnd,
    Trailers,
    Done,
    Failed,
}

impl From<BodyKind> for Decoder {
    fn from(kind: BodyKind) -> Self {
        match kind {
            BodyKind::Empty => Decoder::Done,
            BodyKind::Length(len) => Decoder::Length(len),
            BodyKind::Chunked => Decoder::ChunkSize,
        }
    }
}

/// Decodes one request body off an [`Inbound`].
///
/// The reader is shared between the [`Body`] handed to the slice and the
/// supervisor, which takes the [`Inbound`] back once the body has been read
/// to its end so the next request on the connection can be parsed.
pub(crate) struct BodyReader<R> {
    inbound: Option<Inbound<R>>,
    decoder: Decoder,
    /// Longest chunk-size or trailer line buffered while looking for its CRLF.
    max_line: usize,
}

impl<R> BodyReader<R>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    pub fn new(inbound: Inbound<R>, kind: BodyKind, max_line: usize) -> Self {
        Self {
            inbound: Some(inbound),
            decoder: kind.into(),
            max_line,
        }
    }

    /// Expose a shared reader as a streaming [`Body`].
    pub fn into_body(shared: Arc<Mutex<Self>>) -> Body {
        Body::from_stream(futures::stream::unfold(shared, |shared| async move {
            let next = shared.lock().await.next_chunk().await;
            match next {
                Ok(Some(chunk)) => Some((Ok(chunk), shared)),
                Ok(None) => None,
                Err(err) => Some((Err(err.into()), shared)),
            }
        }))
    }

    /// Hand the connection back if the body was consumed completely.
    pub fn reclaim(&mut self) -> Option<Inbound<R>> {
        if self.decoder == Decoder::Done {
            self.inbound.take()
        } else {
            None
        }
    }

    async fn next_chunk(&mut self) -> TransportResult<Option<Bytes>> {
        let result = self.decode().await;
        if result.is_err() {
            self.decoder = Decoder::Failed;
        }
        result
    }

    async fn decode(&mut self) -> TransportResult<Option<Bytes>> {
        let Some(inbound) = self.inbound.as_mut() else {
            return Err(TransportError::Closed);
        };

        loop {
            match self.decoder {
                Decoder::Done | Decoder::Failed => return Ok(None),
                Decoder::Length(0) => {
                    self.decoder = Decoder::Done;
                    return Ok(None);
                }
                Decoder::Length(remaining) => {
                    let chunk = take_up_to(inbound, remaining).await?;
                    self.decoder = Decoder::Length(remaining - chunk.len() as u64);
                    return Ok(Some(chunk));
                }
                Decoder::ChunkSize => match httparse::parse_chunk_size(&inbound.buf) {
                    Ok(httparse::Status::Complete((consumed, size))) => {
                        inbound.buf.advance(consumed);
                        self.decoder = if size == 0 {
                            Decoder::Trailers
                        } else {
                            Decoder::ChunkData(size)
                        };
                    }
                    Ok(httparse::Status::Partial) => {
                        if inbound.buf.len() >= self.max_line {
                            return Err(TransportError::Malformed(format!(
                                "chunk size line exceeds {} bytes",
                                self.max_line
                            )));
                        }
                        inbound.fill().await?
                    }
                    Err(_) => {
                        return Err(TransportError::Malformed("invalid chunk size".to_string()));
                    }
                },
                Decoder::ChunkData(remaining) => {
                    let chunk = take_up_to(inbound, remaining).await?;
                    let left = remaining - chunk.len() as u64;
                    self.decoder = if left == 0 {
                        Decoder::ChunkDataEnd
                    } else {
                        Decoder::ChunkData(left)
                    };
                    return Ok(Some(chunk));
                }
                Decoder::ChunkDataEnd => {
                    if inbound.buf.len() < 2 {
                        inbound.fill().await?;
                        continue;
                    }
                    if &inbound.buf[..2] != b"\r\n" {
                        return Err(TransportError::Malformed(
                            "missing CRLF after chunk data".to_string(),
                        ));
                    }
                    inbound.buf.advance(2);
                    self.decoder = Decoder::ChunkSize;
                }
                Decoder::Trailers => {
                    // Trailer fields are read and dropped; an empty line ends the body.
                    let Some(end) = inbound.buf.windows(2).position(|w| w == b"\r\n") else {
                        if inbound.buf.len() >= self.max_line {
                            return Err(TransportError::HeadTooLarge(self.max_line));
                        }
                        inbound.fill().await?;
                        continue;
                    };
                    inbound.buf.advance(end + 2);
                    if end == 0 {
                        self.decoder = Decoder::Done;
                        return Ok(None);
                    }
                }
            }
        }
    }
}

async fn take_up_to<R>(inbound: &mut Inbound<R>, limit: u64) -> TransportResult<Bytes>
where
    R: AsyncRead + Unpin,
{
    if inbound.buf.is_empty() {
        inbound.fill().await?;
    }
    let len = std::cmp::min(limit, inbound.buf.len() as u64) as usize;
    Ok(inbound.buf.split_to(len).freeze())
}
