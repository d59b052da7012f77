//! Outbound side of a connection.
//!
//! One [`ResponseWriter`] task owns the write half for the duration of an
//! exchange. Every [`Output`] handle feeds the same command queue, so writes
//! reach the socket in exactly the order they were issued, no matter which
//! task issued them. Commands that produce bytes are acknowledged once the
//! bytes are flushed, which is what paces body producers.
//!
//! The response head is staged (`set_status`, `put_header`, `set_chunked`)
//! and only hits the wire with the first `write` or `end`. That moment is
//! the commit point: the exchange's [`CommitFlag`] is raised and no other
//! response can be sent afterwards.

use bytes::{BufMut, Bytes, BytesMut};
use sliceway_http::{Headers, StatusCode};
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{TransportError, TransportResult};
use crate::exchange::CommitFlag;

type Ack = oneshot::Sender<TransportResult<()>>;

enum Command {
    SetStatus(StatusCode),
    PutHeader(String, String),
    SetChunked(bool),
    Continue,
    Write(Bytes, Ack),
    End(Ack),
    Respond {
        status: StatusCode,
        headers: Headers,
        body: Bytes,
        ack: Ack,
    },
    Finish,
}

/// A handle for writing one response onto a connection.
#[derive(Clone)]
pub(crate) struct Output {
    tx: mpsc::UnboundedSender<Command>,
}

impl Output {
    pub fn set_status(&self, status: StatusCode) -> TransportResult<()> {
        self.send(Command::SetStatus(status))
    }

    pub fn put_header(&self, name: impl Into<String>, value: impl Into<String>) -> TransportResult<()> {
        self.send(Command::PutHeader(name.into(), value.into()))
    }

    pub fn set_chunked(&self, chunked: bool) -> TransportResult<()> {
        self.send(Command::SetChunked(chunked))
    }

    /// Queue an interim `100 Continue` line.
    pub fn write_continue(&self) -> TransportResult<()> {
        self.send(Command::Continue)
    }

    /// Write one body chunk, flushing the staged head first if needed.
    pub async fn write(&self, chunk: Bytes) -> TransportResult<()> {
        self.request(|ack| Command::Write(chunk, ack)).await
    }

    /// Terminate the body (end-of-chunks marker when chunked).
    pub async fn end(&self) -> TransportResult<()> {
        self.request(Command::End).await
    }

    /// Replace whatever was staged with a complete, length-delimited
    /// response. Fails with [`TransportError::Committed`] once a head has
    /// been written.
    pub async fn respond(&self, status: StatusCode, headers: Headers, body: Bytes) -> TransportResult<()> {
        self.request(|ack| Command::Respond {
            status,
            headers,
            body,
            ack,
        })
        .await
    }

    /// Stop the writer after the commands already queued.
    pub fn finish(&self) {
        let _ = self.send(Command::Finish);
    }

    fn send(&self, command: Command) -> TransportResult<()> {
        self.tx.send(command).map_err(|_| TransportError::Closed)
    }

    async fn request(&self, make: impl FnOnce(Ack) -> Command) -> TransportResult<()> {
        let (ack, done) = oneshot::channel();
        self.send(make(ack))?;
        done.await.unwrap_or(Err(TransportError::Closed))
    }
}

/// What the writer hands back when an exchange is over.
pub(crate) struct Finished<W> {
    pub io: W,
    /// The response ended cleanly and its framing allows another request.
    pub reusable: bool,
}

/// Start a writer task for one exchange.
///
/// Without `chunking` (an HTTP/1.0 peer) a chunk-encoded response is sent
/// unframed instead and delimited by closing the connection.
pub(crate) fn spawn<W>(
    io: W,
    committed: CommitFlag,
    keep_alive: bool,
    chunking: bool,
) -> (Output, JoinHandle<Finished<W>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let writer = ResponseWriter {
        io: BufWriter::new(io),
        committed,
        keep_alive,
        chunking,
        status: StatusCode::OK,
        headers: Headers::new(),
        chunked: false,
        bodyless: false,
        close_delimited: false,
        state: State::Staging,
    };
    (Output { tx }, tokio::spawn(writer.run(rx)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Head not yet written; status and headers may still change.
    Staging,
    Streaming,
    Ended,
    /// A write failed; the socket is unusable.
    Broken,
}

struct ResponseWriter<W> {
    io: BufWriter<W>,
    committed: CommitFlag,
    keep_alive: bool,
    chunking: bool,
    status: StatusCode,
    headers: Headers,
    chunked: bool,
    bodyless: bool,
    close_delimited: bool,
    state: State,
}

impl<W> ResponseWriter<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) -> Finished<W> {
        while let Some(command) = rx.recv().await {
            match command {
                Command::SetStatus(status) => {
                    if self.staging("set_status") {
                        self.status = status;
                    }
                }
                Command::PutHeader(name, value) => {
                    if self.staging("put_header") {
                        self.headers.insert(name, value);
                    }
                }
                Command::SetChunked(chunked) => {
                    if self.staging("set_chunked") {
                        self.chunked = chunked;
                    }
                }
                Command::Continue => self.write_continue().await,
                Command::Write(chunk, ack) => {
                    let _ = ack.send(self.write(chunk).await);
                }
                Command::End(ack) => {
                    let _ = ack.send(self.end().await);
                }
                Command::Respond {
                    status,
                    headers,
                    body,
                    ack,
                } => {
                    let _ = ack.send(self.respond(status, headers, body).await);
                }
                Command::Finish => break,
            }
        }

        let reusable = self.keep_alive && self.state == State::Ended && !self.close_delimited;
        Finished {
            io: self.io.into_inner(),
            reusable,
        }
    }

    fn staging(&self, what: &str) -> bool {
        if self.state != State::Staging {
            warn!(command = what, "response head already written, ignoring");
            return false;
        }
        true
    }

    fn usable(&self) -> TransportResult<()> {
        match self.state {
            State::Ended => Err(TransportError::Ended),
            State::Broken => Err(TransportError::Closed),
            State::Staging | State::Streaming => Ok(()),
        }
    }

    fn settle(&mut self, result: std::io::Result<()>) -> TransportResult<()> {
        result.map_err(|err| {
            debug!(error = %err, "response write failed");
            self.state = State::Broken;
            TransportError::Io(err)
        })
    }

    async fn write_continue(&mut self) {
        if self.state != State::Staging {
            warn!("100 Continue after the response head, ignoring");
            return;
        }
        let result = async {
            self.io.write_all(b"HTTP/1.1 100 Continue\r\n\r\n").await?;
            self.io.flush().await
        }
        .await;
        let _ = self.settle(result);
    }

    async fn write(&mut self, chunk: Bytes) -> TransportResult<()> {
        self.usable()?;
        let result = self.write_chunk(chunk).await;
        self.settle(result)
    }

    async fn write_chunk(&mut self, chunk: Bytes) -> std::io::Result<()> {
        if self.state == State::Staging {
            self.write_head().await?;
        }
        if !self.bodyless && !chunk.is_empty() {
            if self.chunked {
                self.io
                    .write_all(format!("{:x}\r\n", chunk.len()).as_bytes())
                    .await?;
                self.io.write_all(&chunk).await?;
                self.io.write_all(b"\r\n").await?;
            } else {
                self.io.write_all(&chunk).await?;
            }
        }
        self.io.flush().await
    }

    async fn end(&mut self) -> TransportResult<()> {
        self.usable()?;
        let result = async {
            if self.state == State::Staging {
                if !self.chunked && !self.headers.contains("content-length") && !is_bodyless(self.status) {
                    self.headers.insert("content-length", "0");
                }
                self.write_head().await?;
            }
            if self.chunked && !self.bodyless {
                self.io.write_all(b"0\r\n\r\n").await?;
            }
            self.io.flush().await
        }
        .await;
        self.settle(result)?;
        self.state = State::Ended;
        Ok(())
    }

    async fn respond(&mut self, status: StatusCode, mut headers: Headers, body: Bytes) -> TransportResult<()> {
        self.usable()?;
        if self.state != State::Staging || self.committed.is_committed() {
            return Err(TransportError::Committed);
        }

        headers.remove("content-length");
        headers.remove("transfer-encoding");
        headers.insert("content-length", body.len().to_string());
        self.status = status;
        self.headers = headers;
        self.chunked = false;

        let result = async {
            self.write_head().await?;
            if !self.bodyless {
                self.io.write_all(&body).await?;
            }
            self.io.flush().await
        }
        .await;
        self.settle(result)?;
        self.state = State::Ended;
        Ok(())
    }

    async fn write_head(&mut self) -> std::io::Result<()> {
        self.bodyless = is_bodyless(self.status);
        if self.bodyless {
            self.chunked = false;
        }
        let drop_transfer_encoding = self.chunked;
        if !self.chunking {
            self.chunked = false;
        }
        self.close_delimited =
            !self.bodyless && !self.chunked && !self.headers.contains("content-length");

        let mut head = BytesMut::with_capacity(256);
        head.put_slice(b"HTTP/1.1 ");
        head.put_slice(self.status.as_str().as_bytes());
        head.put_u8(b' ');
        head.put_slice(self.status.canonical_reason().unwrap_or("").as_bytes());
        head.put_slice(b"\r\n");
        for header in self.headers.iter() {
            if drop_transfer_encoding && header.name.eq_ignore_ascii_case("transfer-encoding") {
                continue;
            }
            head.put_slice(header.name.as_bytes());
            head.put_slice(b": ");
            head.put_slice(header.value.as_bytes());
            head.put_slice(b"\r\n");
        }
        if self.chunked {
            head.put_slice(b"transfer-encoding: chunked\r\n");
        }
        if !self.keep_alive || self.close_delimited {
            head.put_slice(b"connection: close\r\n");
        }
        head.put_slice(b"\r\n");

        self.committed.commit();
        self.state = State::Streaming;
        self.io.write_all(&head).await
    }
}

/// Statuses that never carry a body.
fn is_bodyless(status: StatusCode) -> bool {
    status.is_informational() || status == StatusCode::NO_CONTENT || status == StatusCode::NOT_MODIFIED
}
