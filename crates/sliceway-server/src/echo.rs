//! A slice that echoes the request body back.

use sliceway_http::{Body, Headers, Slice, StatusCode, response_fn, slice_fn};
use tracing::debug;

/// Replies `200` with the request body as the response body.
///
/// A request with `Content-Length` is answered length-delimited with the
/// same length, anything else chunked. `Expect: 100-continue` is honoured
/// with an interim `100 Continue` before the body is read.
pub fn echo_slice() -> impl Slice {
    slice_fn(|line, headers: Headers, body: Body| {
        debug!(request = %line, "echo");

        let expects_continue = headers
            .get("expect")
            .is_some_and(|value| value.eq_ignore_ascii_case("100-continue"));
        let mut reply = Headers::new();
        for name in ["Content-Length", "Content-Type"] {
            if let Some(value) = headers.get(name) {
                reply.insert(name, value);
            }
        }

        Ok(response_fn(move |conn| {
            Box::pin(async move {
                if expects_continue {
                    conn.accept(StatusCode::CONTINUE, Headers::new(), Body::empty())
                        .await?;
                }
                conn.accept(StatusCode::OK, reply, body).await
            })
        }))
    })
}
