//! The HTTP/1.1 transport the bridge runs on.
//!
//! - **`head`**: request line and header parsing (httparse)
//! - **`inbound`**: request body decoding, streamed to the slice
//! - **`output`**: the ordered response writer for one exchange

pub(crate) mod head;
pub(crate) mod inbound;
pub(crate) mod output;

pub(crate) use output::Output;

pub(crate) const READ_CHUNK: usize = 8 * 1024;
