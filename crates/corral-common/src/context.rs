//! Per-request deadline and cancellation.
//!
//! Every backend operation receives an [`OpContext`]. Long-running steps
//! (archive extraction, plugin invocation, graceful stop) poll it and bail
//! out with [`CorralError::Cancelled`]. Once a process has been forked,
//! cancellation cannot undo it; the caller compensates with a remove.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::error::{CorralError, Result};

/// Deadline and cancellation flag shared by one request.
#[derive(Debug, Clone, Default)]
pub struct OpContext {
    deadline: Option<Instant>,
    cancelled: Arc<AtomicBool>,
}

impl OpContext {
    /// A context that never expires.
    #[must_use]
    pub fn background() -> Self {
        Self::default()
    }

    /// A context that expires `timeout` from now.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + timeout),
            cancelled: Arc::default(),
        }
    }

    /// The instant after which the operation must give up, if any.
    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline. `None` means unbounded.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Requests cancellation. Every clone of this context observes it.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Returns `true` once cancelled or past the deadline.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
            || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Fails if the context is done.
    ///
    /// # Errors
    ///
    /// Returns `CorralError::Cancelled` naming `operation`.
    pub fn check(&self, operation: &'static str) -> Result<()> {
        if self.is_done() {
            tracing::debug!(operation, "operation cancelled");
            return Err(CorralError::Cancelled { operation });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn background_context_never_expires() {
        let ctx = OpContext::background();
        assert!(ctx.remaining().is_none());
        ctx.check("noop").unwrap();
    }

    #[test]
    fn cancel_is_visible_through_clones() {
        let ctx = OpContext::background();
        let clone = ctx.clone();
        ctx.cancel();
        assert!(clone.is_done());
        assert!(matches!(
            clone.check("start"),
            Err(CorralError::Cancelled { operation: "start" })
        ));
    }

    #[test]
    fn zero_timeout_is_immediately_done() {
        let ctx = OpContext::with_timeout(Duration::ZERO);
        assert!(ctx.is_done());
        assert_eq!(ctx.remaining(), Some(Duration::ZERO));
    }

    #[test]
    fn generous_timeout_is_not_done() {
        let ctx = OpContext::with_timeout(Duration::from_secs(60));
        assert!(!ctx.is_done());
        assert!(ctx.remaining().is_some_and(|r| r > Duration::from_secs(50)));
    }
}
