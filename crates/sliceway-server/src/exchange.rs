//! Per-request state shared between the supervisor and its bridges.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tokio::task::AbortHandle;

use crate::transport::Output;

/// Raised once the first byte of a terminal response head is written.
///
/// After that no alternative (fallback) response may be sent on the
/// exchange.
#[derive(Debug, Clone, Default)]
pub struct CommitFlag(Arc<AtomicBool>);

impl CommitFlag {
    pub fn is_committed(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Returns `true` for the call that actually committed.
    pub(crate) fn commit(&self) -> bool {
        !self.0.swap(true, Ordering::AcqRel)
    }
}

/// How the terminal response of an exchange ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Outcome {
    Completed,
    /// Carries a rendered description of the failure.
    Failed(String),
}

/// One request/response cycle on a connection.
pub(crate) struct Exchange {
    output: Output,
    committed: CommitFlag,
    claimed: AtomicBool,
    outcome: watch::Sender<Option<Outcome>>,
    pump: Mutex<Option<AbortHandle>>,
}

impl Exchange {
    pub fn new(output: Output, committed: CommitFlag) -> Self {
        let (outcome, _) = watch::channel(None);
        Self {
            output,
            committed,
            claimed: AtomicBool::new(false),
            outcome,
            pump: Mutex::new(None),
        }
    }

    pub fn output(&self) -> &Output {
        &self.output
    }

    pub fn is_committed(&self) -> bool {
        self.committed.is_committed()
    }

    /// Take the single terminal-response slot. Only the first caller wins.
    pub fn claim(&self) -> bool {
        !self.claimed.swap(true, Ordering::AcqRel)
    }

    pub fn is_claimed(&self) -> bool {
        self.claimed.load(Ordering::Acquire)
    }

    /// Record the terminal outcome; later calls are ignored.
    pub fn settle(&self, outcome: Outcome) {
        self.outcome.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(outcome);
            true
        });
    }

    /// Wait for the terminal response to settle.
    ///
    /// Returns `None` if no terminal response was ever accepted.
    pub async fn settled(&self) -> Option<Outcome> {
        if !self.is_claimed() {
            return None;
        }
        let mut rx = self.outcome.subscribe();
        let outcome = rx.wait_for(Option::is_some).await.ok()?;
        outcome.clone()
    }

    pub fn track_pump(&self, handle: AbortHandle) {
        if let Ok(mut pump) = self.pump.lock() {
            *pump = Some(handle);
        }
    }

    /// Stop the body pump, if one is still running.
    pub fn abort_pump(&self) {
        if let Some(handle) = self.pump.lock().ok().and_then(|mut pump| pump.take()) {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::output;

    fn exchange() -> Exchange {
        let committed = CommitFlag::default();
        let (out, _writer) = output::spawn(Vec::new(), committed.clone(), true, true);
        Exchange::new(out, committed)
    }

    #[test]
    fn commit_flag_commits_once() {
        let flag = CommitFlag::default();
        assert!(!flag.is_committed());
        assert!(flag.commit());
        assert!(!flag.commit());
        assert!(flag.is_committed());
    }

    #[tokio::test]
    async fn only_first_claim_wins() {
        let exchange = exchange();
        assert!(exchange.claim());
        assert!(!exchange.claim());
        assert!(exchange.is_claimed());
    }

    #[tokio::test]
    async fn unclaimed_exchange_settles_to_none() {
        let exchange = exchange();
        assert_eq!(exchange.settled().await, None);
    }

    #[tokio::test]
    async fn first_outcome_wins() {
        let exchange = Arc::new(exchange());
        exchange.claim();

        let waiter = {
            let exchange = exchange.clone();
            tokio::spawn(async move { exchange.settled().await })
        };
        exchange.settle(Outcome::Failed("boom".to_string()));
        exchange.settle(Outcome::Completed);

        assert_eq!(waiter.await.unwrap(), Some(Outcome::Failed("boom".to_string())));
        assert_eq!(exchange.settled().await, Some(Outcome::Failed("boom".to_string())));
    }
}
