//! Cooperative cancellation shared between the session, the parser reader
//! and the event queue.
//!
//! A token is a flag plus a channel that is never sent on. Cancelling drops
//! the only sender, which makes every clone of the receiver ready, so a
//! blocked `select!` wakes up without polling.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;

/// Cancellation signal. Clones observe the same state.
#[derive(Clone)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

struct Inner {
    cancelled: AtomicBool,
    trigger: Mutex<Option<Sender<()>>>,
    wake: Receiver<()>,
    children: Mutex<Vec<CancellationToken>>,
    callbacks: Mutex<Vec<Box<dyn FnOnce() + Send>>>,
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

impl CancellationToken {
    pub fn new() -> Self {
        let (trigger, wake) = crossbeam_channel::bounded(0);
        Self {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                trigger: Mutex::new(Some(trigger)),
                wake,
                children: Mutex::new(Vec::new()),
                callbacks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Create a token that is cancelled together with `self`, but can also
    /// be cancelled on its own without affecting the parent.
    pub fn child_token(&self) -> CancellationToken {
        let child = CancellationToken::new();
        let mut children = self.inner.children.lock();
        if self.is_cancelled() {
            child.cancel();
        } else {
            // Children cancelled on their own no longer need the parent.
            children.retain(|c| !c.is_cancelled());
            children.push(child.clone());
        }
        child
    }

    /// Run `f` once when the token is cancelled, or right away if it
    /// already is. Used to wake threads blocked outside of a channel.
    pub fn on_cancel<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let _children = self.inner.children.lock();
            if !self.is_cancelled() {
                self.inner.callbacks.lock().push(Box::new(f));
                return;
            }
        }
        f();
    }

    /// Cancel this token and every child. Idempotent.
    pub fn cancel(&self) {
        // Hold the children lock so a concurrent child_token() or
        // on_cancel() either lands in its list or sees the flag.
        let (children, callbacks) = {
            let mut children = self.inner.children.lock();
            if self.inner.cancelled.swap(true, Ordering::SeqCst) {
                return;
            }
            (
                std::mem::take(&mut *children),
                std::mem::take(&mut *self.inner.callbacks.lock()),
            )
        };
        self.inner.trigger.lock().take();
        for child in children {
            child.cancel();
        }
        for callback in callbacks {
            callback();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Receiver that becomes ready (disconnected) once the token is
    /// cancelled. Intended for `crossbeam_channel::select!`.
    pub fn cancelled(&self) -> &Receiver<()> {
        &self.inner.wake
    }

    /// Block the calling thread until the token is cancelled.
    pub fn wait(&self) {
        if self.is_cancelled() {
            return;
        }
        let _ = self.inner.wake.recv();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_cancel_is_idempotent() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        token.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_cancel_wakes_waiter() {
        let token = CancellationToken::new();
        let waiter = {
            let token = token.clone();
            thread::spawn(move || token.wait())
        };
        thread::sleep(Duration::from_millis(20));
        token.cancel();
        waiter.join().unwrap();
    }

    #[test]
    fn test_cancelled_receiver_is_selectable() {
        let token = CancellationToken::new();
        let (_tx, rx) = crossbeam_channel::bounded::<u8>(1);
        token.cancel();
        let woke = crossbeam_channel::select! {
            recv(rx) -> _ => false,
            recv(token.cancelled()) -> _ => true,
        };
        assert!(woke);
    }

    #[test]
    fn test_parent_cancels_child() {
        let parent = CancellationToken::new();
        let child = parent.child_token();
        parent.cancel();
        assert!(child.is_cancelled());
    }

    #[test]
    fn test_child_does_not_cancel_parent() {
        let parent = CancellationToken::new();
        let child = parent.child_token();
        child.cancel();
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());
    }

    #[test]
    fn test_cancelled_children_are_pruned() {
        let parent = CancellationToken::new();
        for _ in 0..100 {
            parent.child_token().cancel();
        }
        let live = parent.child_token();
        assert_eq!(parent.inner.children.lock().len(), 1);

        parent.cancel();
        assert!(live.is_cancelled());
    }

    #[test]
    fn test_on_cancel_runs_once() {
        use std::sync::atomic::AtomicUsize;

        let token = CancellationToken::new();
        let calls = Arc::new(AtomicUsize::new(0));
        {
            let calls = calls.clone();
            token.on_cancel(move || {
                calls.fetch_add(1, Ordering::SeqCst);
            });
        }
        token.cancel();
        token.cancel();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Registered after the fact: runs immediately.
        let calls2 = calls.clone();
        token.on_cancel(move || {
            calls2.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_child_of_cancelled_parent_starts_cancelled() {
        let parent = CancellationToken::new();
        parent.cancel();
        assert!(parent.child_token().is_cancelled());
    }
}
