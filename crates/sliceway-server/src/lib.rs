//! sliceway-server: serves a [`Slice`](sliceway_http::Slice) over HTTP/1.1.
//!
//! # Request path
//!
//! [`SliceServer`] accepts TCP connections and gives each one to a
//! [`ConnectionSupervisor`]. For every request on the connection the
//! supervisor builds a streaming request body, calls the slice, and sends
//! its response to an [`InterimContinueBridge`] wrapping a
//! [`ResponseBridge`]:
//!
//! ```text
//! TcpListener ─▶ ConnectionSupervisor ─▶ Slice::response ─▶ Response::send
//!                                                             │
//!                        InterimContinueBridge ◀──────────────┘
//!                          │ 100 ─▶ "HTTP/1.1 100 Continue"
//!                          ▼ other
//!                        ResponseBridge ─▶ ByteChunkSink ─▶ socket
//! ```
//!
//! # Commit
//!
//! A response is *committed* once the first byte of its head is written.
//! Heads are written lazily, with the first body chunk or the end of the
//! body, so a slice that fails before producing any byte still gets a
//! fallback `500`. After commit a failure closes the connection instead;
//! a second status line is never written.

pub mod config;
pub mod error;
pub mod framing;

mod bridge;
mod echo;
mod exchange;
mod fallback;
mod interim;
mod listener;
mod sink;
mod supervisor;
mod transport;

pub use bridge::ResponseBridge;
pub use config::ServerConfig;
pub use echo::echo_slice;
pub use error::{BridgeError, BridgeResult, ServerError, ServerResult, TransportError, TransportResult};
pub use framing::{Framing, choose_framing};
pub use interim::InterimContinueBridge;
pub use listener::SliceServer;
pub use supervisor::ConnectionSupervisor;
