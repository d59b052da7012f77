//! The `500 Internal Server Error` sent when a slice fails before commit.

use std::any::Any;
use std::fmt::{self, Write};
use std::panic::{self, AssertUnwindSafe};

use bytes::Bytes;
use sliceway_http::Headers;

/// Render an error with its cause chain (and backtrace, when captured).
///
/// Returns an empty string if the error cannot be rendered.
pub(crate) fn describe_error(err: &anyhow::Error) -> String {
    render(|out| write!(out, "{err:?}"))
}

/// Render a panic payload caught with `catch_unwind`.
pub(crate) fn describe_panic(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        render(|out| write!(out, "panicked: {message}"))
    } else {
        "panicked with a non-string payload".to_string()
    }
}

/// Headers and body of the fallback response for `diagnostic`.
pub(crate) fn internal_error(diagnostic: &str) -> (Headers, Bytes) {
    let headers = Headers::new().with("content-type", "text/plain; charset=utf-8");
    (headers, Bytes::copy_from_slice(diagnostic.as_bytes()))
}

/// Run a formatter, swallowing both `fmt::Error` and panics from
/// user `Debug`/`Display` impls.
fn render(f: impl FnOnce(&mut String) -> fmt::Result) -> String {
    let rendered = panic::catch_unwind(AssertUnwindSafe(|| {
        let mut out = String::new();
        f(&mut out).map(|_| out)
    }));
    match rendered {
        Ok(Ok(out)) => out,
        Ok(Err(_)) | Err(_) => String::new(),
    }
}
