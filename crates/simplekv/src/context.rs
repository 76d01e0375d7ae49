//! Caller-controlled cancellation and scoped backend sessions.
//!
//! A [`Context`] carries a cancellation token and an optional deadline. Every
//! store call receives one through a [`Scope`], which also holds whatever
//! session the backend pinned for the caller. Dropping the scope releases the
//! session, so release happens on every exit path.
//!
//! ```
//! use std::time::Duration;
//!
//! use simplekv::{Context, MemoryStore, Store};
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let store = MemoryStore::new();
//! let scope = store.scope(Context::with_timeout(Duration::from_secs(5))).await?;
//! store.set(&scope, "greeting", b"hello".to_vec(), Default::default()).await?;
//! scope.close();
//! # Ok::<(), simplekv::StoreError>(())
//! # }).unwrap();
//! ```

use std::{fmt, future::Future, time::Duration};

use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Why a [`Context`] finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ContextError {
    /// The context was cancelled explicitly.
    #[error("context canceled")]
    Canceled,
    /// The context deadline passed.
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

/// Cancellation signal and optional deadline for a sequence of store calls.
///
/// Cloning a context shares its cancellation: cancelling any clone cancels
/// them all. Use [`Context::child`] for a context that can be cancelled on
/// its own without affecting the parent.
#[derive(Clone, Default)]
pub struct Context {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl Context {
    /// A context that is never cancelled and has no deadline.
    #[must_use]
    pub fn background() -> Self {
        Self::default()
    }

    /// A context whose deadline is `timeout` from now.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    /// A context that finishes at `deadline`.
    #[must_use]
    pub fn with_deadline(deadline: Instant) -> Self {
        Self { cancel: CancellationToken::new(), deadline: Some(deadline) }
    }

    /// A context driven by an existing cancellation token.
    #[must_use]
    pub fn with_cancel_token(cancel: CancellationToken) -> Self {
        Self { cancel, deadline: None }
    }

    /// Derives a context that is cancelled with this one, and can also be
    /// cancelled on its own. The deadline is inherited.
    #[must_use]
    pub fn child(&self) -> Self {
        Self { cancel: self.cancel.child_token(), deadline: self.deadline }
    }

    /// Derives a child context with a deadline no later than `timeout` from now.
    #[must_use]
    pub fn child_with_timeout(&self, timeout: Duration) -> Self {
        let deadline = Instant::now() + timeout;
        let deadline = self.deadline.map_or(deadline, |parent| parent.min(deadline));
        Self { cancel: self.cancel.child_token(), deadline: Some(deadline) }
    }

    /// Cancels this context and every context derived from it.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Returns the deadline, if any.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns the cancellation token backing this context.
    #[must_use]
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Returns why the context finished, or `None` while it is still live.
    #[must_use]
    pub fn err(&self) -> Option<ContextError> {
        if self.cancel.is_cancelled() {
            return Some(ContextError::Canceled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(ContextError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Waits until the context finishes.
    pub async fn done(&self) -> ContextError {
        match self.deadline {
            Some(deadline) => tokio::select! {
                () = self.cancel.cancelled() => ContextError::Canceled,
                () = tokio::time::sleep_until(deadline) => ContextError::DeadlineExceeded,
            },
            None => {
                self.cancel.cancelled().await;
                ContextError::Canceled
            },
        }
    }

    /// Runs `fut` to completion unless the context finishes first.
    ///
    /// # Errors
    ///
    /// Returns the [`ContextError`] if the context finished before `fut`.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, ContextError> {
        if let Some(err) = self.err() {
            return Err(err);
        }
        tokio::select! {
            biased;
            err = self.done() => Err(err),
            out = fut => Ok(out),
        }
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("cancelled", &self.cancel.is_cancelled())
            .field("deadline", &self.deadline)
            .finish()
    }
}

/// A context paired with the backend session pinned for it.
///
/// Obtained from [`Store::scope`](crate::Store::scope) and passed by reference
/// to every store call. Backends that need no session use `()`.
pub struct Scope<S> {
    ctx: Context,
    session: S,
}

impl<S> Scope<S> {
    /// Pairs a context with a session. Called by backends from
    /// [`Store::scope`](crate::Store::scope).
    pub fn new(ctx: Context, session: S) -> Self {
        Self { ctx, session }
    }

    /// The caller's context.
    #[must_use]
    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// The backend session.
    #[must_use]
    pub fn session(&self) -> &S {
        &self.session
    }

    /// Releases the session.
    ///
    /// Equivalent to dropping the scope; provided so call sites read as an
    /// explicit release.
    pub fn close(self) {
        tracing::trace!("scope closed");
        drop(self);
    }
}

impl<S> fmt::Debug for Scope<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope").field("ctx", &self.ctx).finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn background_context_is_live() {
        let ctx = Context::background();
        assert_eq!(ctx.err(), None);
        assert_eq!(ctx.run(async { 7 }).await, Ok(7));
    }

    #[tokio::test]
    async fn cancel_propagates_to_clones_and_children() {
        let ctx = Context::background();
        let clone = ctx.clone();
        let child = ctx.child();
        ctx.cancel();
        assert_eq!(clone.err(), Some(ContextError::Canceled));
        assert_eq!(child.err(), Some(ContextError::Canceled));
        assert_eq!(child.done().await, ContextError::Canceled);
    }

    #[tokio::test]
    async fn cancelling_child_leaves_parent_live() {
        let ctx = Context::background();
        let child = ctx.child();
        child.cancel();
        assert_eq!(ctx.err(), None);
        assert_eq!(child.err(), Some(ContextError::Canceled));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_interrupts_run() {
        let ctx = Context::with_timeout(Duration::from_millis(50));
        let result = ctx.run(tokio::time::sleep(Duration::from_secs(10))).await;
        assert_eq!(result, Err(ContextError::DeadlineExceeded));
        assert_eq!(ctx.err(), Some(ContextError::DeadlineExceeded));
    }

    #[tokio::test(start_paused = true)]
    async fn child_deadline_never_outlives_parent() {
        let parent = Context::with_timeout(Duration::from_millis(10));
        let child = parent.child_with_timeout(Duration::from_secs(60));
        assert_eq!(child.deadline(), parent.deadline());
    }

    #[test]
    fn scope_exposes_context_and_session() {
        let scope = Scope::new(Context::background(), 42_u32);
        assert_eq!(*scope.session(), 42);
        assert!(scope.context().err().is_none());
        scope.close();
    }
}
