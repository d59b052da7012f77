//! `100 Continue` support in front of a [`ResponseBridge`](crate::ResponseBridge).

use sliceway_http::{Body, Completion, Connection, Headers, StatusCode};
use tracing::{debug, warn};

use crate::transport::Output;

/// Answers `100 Continue` itself and hands everything else to `origin`.
///
/// The interim line is queued before `accept` returns, so it always reaches
/// the wire ahead of any terminal response accepted afterwards.
pub struct InterimContinueBridge<C> {
    output: Output,
    origin: C,
}

impl<C> InterimContinueBridge<C>
where
    C: Connection,
{
    pub(crate) fn new(output: Output, origin: C) -> Self {
        Self { output, origin }
    }
}

impl<C> Connection for InterimContinueBridge<C>
where
    C: Connection,
{
    fn accept(&self, status: StatusCode, headers: Headers, body: Body) -> Completion {
        if status != StatusCode::CONTINUE {
            return self.origin.accept(status, headers, body);
        }

        // An interim response has no body; the handler's is dropped unread.
        drop(body);
        match self.output.write_continue() {
            Ok(()) => debug!("100 Continue queued"),
            Err(err) => warn!(error = %err, "could not queue 100 Continue"),
        }
        Box::pin(futures::future::ready(Ok(())))
    }
}
