//! sliceway-http: the handler abstraction served by Sliceway.
//!
//! A [`Slice`] turns a request (line, headers, streaming body) into a
//! [`Response`]. The response does not carry a status or body itself; it
//! is *sent* to a [`Connection`], which accepts exactly one terminal
//! `(status, headers, body)` triple and reports back through a
//! [`Completion`] once the bytes are flushed (or failed).
//!
//! ```text
//! server ──▶ Slice::response(line, headers, body)
//!                 │
//!                 ▼
//!            Response::send(connection)
//!                 │
//!                 ▼
//!            Connection::accept(status, headers, body) ──▶ Completion
//! ```
//!
//! The types here are transport-agnostic. `sliceway-server` provides the
//! HTTP/1.1 implementation of [`Connection`].

mod body;
mod header;
mod line;
mod slice;

pub use body::Body;
pub use header::{Header, Headers};
pub use line::RequestLine;
pub use slice::{Completion, Connection, Response, Slice, response_fn, slice_fn};

pub use http::StatusCode;
