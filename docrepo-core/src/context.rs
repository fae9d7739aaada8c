//! Cancellable, deadline-bearing operation context.
//!
//! Every repository and join operation takes a [`Context`]. Store calls run
//! through [`Context::run`], which races the call against cancellation and the
//! deadline; whichever fires first aborts the call with
//! [`DocumentStoreError::Cancelled`] or [`DocumentStoreError::DeadlineExceeded`]
//! and the partially-completed store future is dropped.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use docrepo::context::Context;
//!
//! let ctx = Context::with_timeout(Duration::from_secs(2));
//! let users = repo.find_all(&ctx).await?;
//!
//! // Cancel from elsewhere: clones share the cancellation state.
//! let handle = ctx.clone();
//! handle.cancel();
//! ```

use std::{
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use tokio::{sync::Notify, time::Instant};

use crate::error::{DocumentStoreError, DocumentStoreResult};

#[derive(Debug, Default)]
struct CancelState {
    cancelled: AtomicBool,
    notify: Notify,
}

/// Operation context carrying a cancellation signal and an optional deadline.
///
/// Cloning a context shares its cancellation state: cancelling any clone
/// cancels all of them.
#[derive(Debug, Clone, Default)]
pub struct Context {
    state: Arc<CancelState>,
    deadline: Option<Instant>,
}

impl Context {
    /// A context that never expires and is only cancelled explicitly.
    pub fn background() -> Self {
        Self::default()
    }

    /// A context that expires `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    /// A context that expires at `deadline`.
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            state: Arc::default(),
            deadline: Some(deadline),
        }
    }

    /// A child sharing this context's cancellation with a tighter deadline.
    ///
    /// The child's deadline is the earlier of the parent's and `timeout` from now.
    pub fn child_with_timeout(&self, timeout: Duration) -> Self {
        let deadline = Instant::now() + timeout;

        Self {
            state: self.state.clone(),
            deadline: Some(match self.deadline {
                Some(parent) if parent < deadline => parent,
                _ => deadline,
            }),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Signals cancellation to every clone of this context.
    pub fn cancel(&self) {
        self.state.cancelled.store(true, Ordering::SeqCst);
        self.state.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::SeqCst)
    }

    /// Returns the error the context is currently failing with, if any.
    pub fn err(&self) -> Option<DocumentStoreError> {
        if self.is_cancelled() {
            return Some(DocumentStoreError::Cancelled);
        }

        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(DocumentStoreError::DeadlineExceeded),
            _ => None,
        }
    }

    async fn cancelled(&self) {
        loop {
            let notified = self.state.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    async fn expired(&self) {
        match self.deadline {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    }

    /// Runs a store call under this context.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::Cancelled`] or
    /// [`DocumentStoreError::DeadlineExceeded`] if the context fires before `call`
    /// completes, otherwise whatever `call` returns.
    pub async fn run<F, T>(&self, call: F) -> DocumentStoreResult<T>
    where
        F: Future<Output = DocumentStoreResult<T>>,
    {
        if let Some(err) = self.err() {
            return Err(err);
        }

        tokio::select! {
            biased;
            _ = self.cancelled() => Err(DocumentStoreError::Cancelled),
            _ = self.expired() => Err(DocumentStoreError::DeadlineExceeded),
            result = call => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn background_context_passes_results_through() {
        let ctx = Context::background();

        assert_eq!(ctx.run(async { Ok(7) }).await.unwrap(), 7);
        assert!(ctx.err().is_none());
    }

    #[tokio::test]
    async fn cancelled_context_fails_before_calling() {
        let ctx = Context::background();
        ctx.clone().cancel();

        let result = ctx.run(async { Ok(()) }).await;
        assert!(matches!(result, Err(DocumentStoreError::Cancelled)));
    }

    #[tokio::test]
    async fn cancellation_aborts_an_inflight_call() {
        let ctx = Context::background();
        let canceller = ctx.clone();

        let result = ctx
            .run(async move {
                canceller.cancel();
                std::future::pending::<()>().await;
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(DocumentStoreError::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_aborts_a_slow_call() {
        let ctx = Context::with_timeout(Duration::from_millis(50));

        let result = ctx
            .run(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(DocumentStoreError::DeadlineExceeded)));
    }

    #[tokio::test(start_paused = true)]
    async fn child_keeps_the_earlier_deadline() {
        let parent = Context::with_timeout(Duration::from_millis(10));
        let child = parent.child_with_timeout(Duration::from_secs(10));

        assert_eq!(child.deadline(), parent.deadline());

        child.cancel();
        assert!(parent.is_cancelled());
    }
}
