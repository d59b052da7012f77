//! Streaming body primitives.
//!
//! A [`Body`] is a pull-based, single-use stream of byte chunks that ends
//! either normally (`None`) or with an error item. The consumer drives
//! production by polling, so a slow consumer paces the producer.

use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use futures::stream::{self, Stream, StreamExt};

type ByteStream = Pin<Box<dyn Stream<Item = anyhow::Result<Bytes>> + Send>>;

/// A request or response body.
pub struct Body {
    stream: ByteStream,
}

impl Body {
    /// A body that ends immediately.
    pub fn empty() -> Self {
        Self::from_stream(stream::empty())
    }

    /// Wrap an arbitrary chunk stream.
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = anyhow::Result<Bytes>> + Send + 'static,
    {
        Self {
            stream: Box::pin(stream),
        }
    }

    /// A body that yields each chunk in order, then ends.
    pub fn from_chunks<I>(chunks: I) -> Self
    where
        I: IntoIterator<Item = Bytes>,
        I::IntoIter: Send + 'static,
    {
        Self::from_stream(stream::iter(chunks.into_iter().map(Ok)))
    }

    /// A body whose first poll fails with `err`.
    pub fn failed(err: impl Into<anyhow::Error>) -> Self {
        Self::from_stream(stream::once(futures::future::ready(Err(err.into()))))
    }

    /// Drain the body into one buffer, stopping at the first error.
    pub async fn collect(mut self) -> anyhow::Result<Bytes> {
        let mut collected = BytesMut::new();
        while let Some(chunk) = self.stream.next().await {
            collected.extend_from_slice(&chunk?);
        }
        Ok(collected.freeze())
    }
}

impl Stream for Body {
    type Item = anyhow::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.stream.as_mut().poll_next(cx)
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Body").finish_non_exhaustive()
    }
}

impl Default for Body {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<Bytes> for Body {
    fn from(buf: Bytes) -> Self {
        if buf.is_empty() {
            Self::empty()
        } else {
            Self::from_stream(stream::once(futures::future::ready(Ok(buf))))
        }
    }
}

impl From<Vec<u8>> for Body {
    fn from(buf: Vec<u8>) -> Self {
        Bytes::from(buf).into()
    }
}

impl From<String> for Body {
    fn from(buf: String) -> Self {
        Bytes::from(buf).into()
    }
}

impl From<&'static str> for Body {
    fn from(buf: &'static str) -> Self {
        Bytes::from_static(buf.as_bytes()).into()
    }
}
