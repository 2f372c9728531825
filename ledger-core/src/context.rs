//! Per-call deadline and cancellation
//!
//! Every blocking operation in the crate (address lock, rate limiter) takes a [`CallContext`]
//! and gives up, side-effect free, once it is done.

use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Deadline plus explicit cancellation for one inbound call
#[derive(Debug, Clone)]
pub struct CallContext {
    deadline: Option<Instant>,
    token: CancellationToken,
}

impl CallContext {
    /// No deadline; only explicit cancellation ends it
    pub fn background() -> Self {
        Self {
            deadline: None,
            token: CancellationToken::new(),
        }
    }

    /// Deadline `timeout` from now
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    /// Absolute deadline
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
            token: CancellationToken::new(),
        }
    }

    /// Context cancelled together with `self`, with an optionally tighter deadline
    pub fn child(&self, timeout: Option<Duration>) -> Self {
        let deadline = match (self.deadline, timeout) {
            (Some(d), Some(t)) => Some(d.min(Instant::now() + t)),
            (None, Some(t)) => Some(Instant::now() + t),
            (d, None) => d,
        };
        Self {
            deadline,
            token: self.token.child_token(),
        }
    }

    /// Deadline, if any
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Cancel this context and its children
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Cancelled or past the deadline
    pub fn is_done(&self) -> bool {
        self.token.is_cancelled() || self.deadline.map_or(false, |d| Instant::now() >= d)
    }

    /// Resolves once the context is cancelled or the deadline passes
    pub async fn done(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.token.cancelled() => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => self.token.cancelled().await,
        }
    }
}
