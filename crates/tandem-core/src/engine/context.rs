//! Per-run context: deadline and cooperative cancellation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::Notify;

use crate::error::RunError;

/// Handle for cancelling an in-flight run.
///
/// `CancelHandle` can be cloned and shared across threads; cancelling any
/// clone is visible to all of them. Scripting runs observe it through the
/// interpreter's progress hook, relational runs through [`cancelled`].
///
/// # Example
///
/// ```
/// use tandem_core::engine::CancelHandle;
///
/// let handle = CancelHandle::new();
/// let clone = handle.clone();
///
/// assert!(!handle.is_cancelled());
/// clone.cancel();
/// assert!(handle.is_cancelled());
/// ```
///
/// [`cancelled`]: CancelHandle::cancelled
#[derive(Clone, Default)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    /// Request cancellation and wake any task waiting in [`cancelled`](Self::cancelled).
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
        self.notify.notify_waiters();
    }

    /// Clear the flag. Called before each run.
    pub fn reset(&self) {
        self.flag.store(false, Ordering::Relaxed);
    }

    /// Resolves once cancellation is requested.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

impl std::fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelHandle")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// What an adapter needs to know about the run it is executing.
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    deadline: Option<Instant>,
    budget: Option<Duration>,
    cancel: CancelHandle,
}

impl RunContext {
    pub fn new(timeout: Option<Duration>, cancel: CancelHandle) -> Self {
        Self {
            deadline: timeout.map(|t| Instant::now() + t),
            budget: timeout,
            cancel,
        }
    }

    /// Absolute deadline, if the run has one.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn cancel_handle(&self) -> &CancelHandle {
        &self.cancel
    }

    /// Time left before the deadline, `None` when unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// The error to report when the deadline has been hit.
    pub fn timeout_error(&self) -> RunError {
        RunError::TimedOut(self.budget.unwrap_or_default())
    }

    /// Why the run must stop now, if it must.
    pub fn interruption(&self) -> Option<RunError> {
        if self.cancel.is_cancelled() {
            return Some(RunError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(self.timeout_error()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_handle_clone_shares_state() {
        let handle = CancelHandle::new();
        let clone = handle.clone();
        assert!(!clone.is_cancelled());

        handle.cancel();
        assert!(clone.is_cancelled());

        clone.reset();
        assert!(!handle.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancelled_resolves_after_cancel() {
        let handle = CancelHandle::new();
        let waiter = handle.clone();
        let task = tokio::spawn(async move { waiter.cancelled().await });

        tokio::task::yield_now().await;
        handle.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("cancelled() should resolve")
            .unwrap();
    }

    #[test]
    fn test_interruption() {
        let ctx = RunContext::new(None, CancelHandle::new());
        assert_eq!(ctx.interruption(), None);
        assert_eq!(ctx.remaining(), None);

        let ctx = RunContext::new(Some(Duration::ZERO), CancelHandle::new());
        assert_eq!(ctx.interruption(), Some(RunError::TimedOut(Duration::ZERO)));

        let cancel = CancelHandle::new();
        cancel.cancel();
        let ctx = RunContext::new(Some(Duration::from_secs(60)), cancel);
        assert_eq!(ctx.interruption(), Some(RunError::Cancelled));
    }
}
