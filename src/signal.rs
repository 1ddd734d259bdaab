//! Cooperative cancellation primitive passed through all async calls.

use crate::types::{AgentError, Result};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};

/// A shared cancellation token.
///
/// Operations poll [`aborted`](AbortSignal::aborted) at safe points and at
/// every I/O boundary, or race against [`cancelled`](AbortSignal::cancelled)
/// with `tokio::select!`. `abort()` is idempotent; once aborted the signal
/// stays aborted until the owning scope calls [`reset`](AbortSignal::reset).
///
/// Cloning produces a handle to the same signal.
#[derive(Debug, Clone)]
pub struct AbortSignal {
    inner: Arc<RwLock<CancellationToken>>,
}

impl Default for AbortSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl AbortSignal {
    /// Create a fresh, unaborted signal.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(CancellationToken::new())),
        }
    }

    /// Whether the signal has been aborted.
    pub fn aborted(&self) -> bool {
        self.inner.read().is_cancelled()
    }

    /// Abort all work observing this signal. Idempotent.
    pub fn abort(&self) {
        self.inner.read().cancel();
    }

    /// Clear the aborted state so the signal can be reused.
    ///
    /// Work still waiting on the previous token observes the abort; work
    /// started afterwards observes the fresh token.
    pub fn reset(&self) {
        *self.inner.write() = CancellationToken::new();
    }

    /// Future that resolves when the signal is aborted.
    pub fn cancelled(&self) -> WaitForCancellationFutureOwned {
        self.inner.read().clone().cancelled_owned()
    }

    /// The current underlying token, for integration with `tokio::select!`.
    pub fn token(&self) -> CancellationToken {
        self.inner.read().clone()
    }

    /// Error out early when the signal is already aborted.
    pub fn check(&self) -> Result<()> {
        if self.aborted() {
            Err(AgentError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_abort_is_idempotent() {
        let signal = AbortSignal::new();
        assert!(!signal.aborted());

        signal.abort();
        assert!(signal.aborted());

        signal.abort();
        assert!(signal.aborted());
    }

    #[test]
    fn test_clones_share_state() {
        let signal = AbortSignal::new();
        let other = signal.clone();

        other.abort();
        assert!(signal.aborted());
    }

    #[test]
    fn test_reset_clears_abort() {
        let signal = AbortSignal::new();
        signal.abort();
        assert!(signal.aborted());

        signal.reset();
        assert!(!signal.aborted());
        assert!(signal.check().is_ok());
    }

    #[test]
    fn test_check_returns_cancelled() {
        let signal = AbortSignal::new();
        signal.abort();
        assert!(matches!(
            signal.check(),
            Err(crate::types::AgentError::Cancelled)
        ));
    }

    #[tokio::test]
    async fn test_cancelled_future_resolves() {
        let signal = AbortSignal::new();
        let waiter = signal.cancelled();

        let handle = tokio::spawn(async move {
            waiter.await;
            true
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        signal.abort();

        let resolved = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("waiter should resolve after abort")
            .unwrap();
        assert!(resolved);
    }
}
