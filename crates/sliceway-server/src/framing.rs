//! Response body framing.

use sliceway_http::Headers;

/// How a response body is delimited on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// The handler declared `Content-Length`; bytes are written as-is.
    LengthDelimited,
    /// No declared length; the body is sent with chunked transfer-coding.
    ChunkEncoded,
}

/// Pick the framing for a response from its headers alone.
///
/// The `Content-Length` value is not parsed or checked.
pub fn choose_framing(headers: &Headers) -> Framing {
    if headers.contains("content-length") {
        Framing::LengthDelimited
    } else {
        Framing::ChunkEncoded
    }
}
