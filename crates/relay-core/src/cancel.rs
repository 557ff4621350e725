//! Cancellation token shared by every stage of a session.
//!
//! The token is the `isCancelled()` / `onCancelled()` primitive of the call
//! context. Unlike a bare `Arc<AtomicBool>`, it can also be awaited, which is
//! what lets a stage blocked on `receive`, `put` or `take` observe a stop
//! request instead of waiting forever.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, Weak};
use tokio::sync::Notify;

type Callback = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
struct Callbacks {
    next_id: u64,
    pending: Vec<(u64, Callback)>,
}

/// A child's entry in its parent's callback list.
struct ParentLink {
    parent: Weak<Inner>,
    id: u64,
}

#[derive(Default)]
struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
    callbacks: Mutex<Callbacks>,
    parent: OnceLock<ParentLink>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Callbacks> {
        self.callbacks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue `callback`, or hand it back if the token is already cancelled.
    fn register(&self, callback: Callback) -> Result<u64, Callback> {
        let mut callbacks = self.lock();
        if self.cancelled.load(Ordering::SeqCst) {
            return Err(callback);
        }
        let id = callbacks.next_id;
        callbacks.next_id += 1;
        callbacks.pending.push((id, callback));
        Ok(id)
    }

    fn unregister(&self, id: u64) {
        self.lock().pending.retain(|(pending, _)| *pending != id);
    }

    /// Remove this token's entry from its parent, if it has one.
    fn detach(&self) {
        if let Some(link) = self.parent.get() {
            if let Some(parent) = link.parent.upgrade() {
                parent.unregister(link.id);
            }
        }
    }

    fn cancel(&self) -> bool {
        // Hold the callback lock across the flag flip so `register` either
        // sees the flag or has its callback drained here.
        let callbacks = {
            let mut guard = self.lock();
            if self.cancelled.swap(true, Ordering::SeqCst) {
                return false;
            }
            std::mem::take(&mut guard.pending)
        };
        self.notify.notify_waiters();
        for (_, callback) in callbacks {
            callback();
        }
        self.detach();
        true
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.detach();
    }
}

/// A cancellation token for cooperative cancellation of session stages.
///
/// This token can be cloned and shared across tasks. When `cancel()` is called
/// on any clone, all clones observe the cancellation.
///
/// # Example
///
/// ```
/// use relay_core::cancel::CancellationToken;
///
/// let token = CancellationToken::new();
/// let token_clone = token.clone();
///
/// token_clone.cancel();
/// assert!(token.is_cancelled());
/// ```
#[derive(Clone, Default)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

impl CancellationToken {
    /// Create a new cancellation token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    ///
    /// Idempotent. Returns `true` only for the call that actually flipped the
    /// token; later calls are no-ops returning `false`.
    pub fn cancel(&self) -> bool {
        self.inner.cancel()
    }

    /// Check if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Wait until the token is cancelled.
    ///
    /// Resolves immediately if cancellation already happened.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    /// Register a callback to run once when the token is cancelled.
    ///
    /// Runs the callback immediately on the calling thread if the token is
    /// already cancelled.
    pub fn on_cancelled<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if let Err(callback) = self.inner.register(Box::new(callback)) {
            callback();
        }
    }

    /// Create a child token.
    ///
    /// The child is cancelled whenever this token is, but cancelling the
    /// child leaves this token untouched. Sessions use this to derive their
    /// own token from the caller's context.
    pub fn child_token(&self) -> Self {
        let child = CancellationToken::new();
        let weak: Weak<Inner> = Arc::downgrade(&child.inner);
        let registered = self.inner.register(Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.cancel();
            }
        }));
        match registered {
            Ok(id) => {
                // The link is dropped again once the child is cancelled or
                // goes away, so a long-lived parent does not accumulate it.
                let _ = child.inner.parent.set(ParentLink {
                    parent: Arc::downgrade(&self.inner),
                    id,
                });
            }
            Err(_) => {
                child.inner.cancel();
            }
        }
        child
    }

    /// Callbacks still waiting for this token to be cancelled.
    #[cfg(test)]
    pub(crate) fn pending_callbacks(&self) -> usize {
        self.inner.lock().pending.len()
    }

    /// Check cancellation and return an error if cancelled.
    pub fn check(&self) -> Result<(), CancelledError> {
        if self.is_cancelled() {
            Err(CancelledError)
        } else {
            Ok(())
        }
    }
}

/// Error returned when an operation is cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CancelledError;

impl std::fmt::Display for CancelledError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Operation was cancelled")
    }
}

impl std::error::Error for CancelledError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn test_new_token_not_cancelled() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let token = CancellationToken::new();
        assert!(token.cancel());
        assert!(!token.cancel());
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_clone_shares_state() {
        let token1 = CancellationToken::new();
        let token2 = token1.clone();

        token1.cancel();

        assert!(token1.is_cancelled());
        assert!(token2.is_cancelled());
    }

    #[test]
    fn test_child_follows_parent_only() {
        let parent = CancellationToken::new();
        let child = parent.child_token();

        child.cancel();
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());

        let other_child = parent.child_token();
        parent.cancel();
        assert!(other_child.is_cancelled());
    }

    #[test]
    fn test_child_of_cancelled_parent_starts_cancelled() {
        let parent = CancellationToken::new();
        parent.cancel();
        assert!(parent.child_token().is_cancelled());
    }

    #[test]
    fn test_on_cancelled_runs_once() {
        let token = CancellationToken::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = hits.clone();
        token.on_cancelled(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        token.cancel();
        token.cancel();
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        // Registered after the fact: runs immediately.
        let counter = hits.clone();
        token.on_cancelled(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_finished_children_release_parent_callbacks() {
        let parent = CancellationToken::new();
        for _ in 0..1000 {
            let child = parent.child_token();
            child.cancel();
        }
        assert_eq!(parent.pending_callbacks(), 0);

        let kept = parent.child_token();
        for _ in 0..100 {
            drop(parent.child_token());
        }
        assert_eq!(parent.pending_callbacks(), 1);

        parent.cancel();
        assert!(kept.is_cancelled());
        assert_eq!(parent.pending_callbacks(), 0);
    }

    #[test]
    fn test_grandchild_follows_root() {
        let root = CancellationToken::new();
        let child = root.child_token();
        let grandchild = child.child_token();

        root.cancel();
        assert!(child.is_cancelled());
        assert!(grandchild.is_cancelled());
    }

    #[test]
    fn test_check() {
        let token = CancellationToken::new();
        assert!(token.check().is_ok());
        token.cancel();
        assert_eq!(token.check(), Err(CancelledError));
    }

    #[tokio::test]
    async fn test_cancelled_wakes_waiter() {
        let token = CancellationToken::new();
        let waiter = {
            let token = token.clone();
            tokio::spawn(async move { token.cancelled().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_resolves_when_already_cancelled() {
        let token = CancellationToken::new();
        token.cancel();
        tokio::time::timeout(Duration::from_millis(100), token.cancelled())
            .await
            .expect("already-cancelled token resolves immediately");
    }

    #[test]
    fn test_cancelled_error_display() {
        assert_eq!(CancelledError.to_string(), "Operation was cancelled");
    }
}
