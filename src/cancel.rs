//! Cooperative cancellation tokens.
//!
//! A [`CancellationToken`] is a shared flag that a running task polls (or
//! blocks on) to find out whether it should stop. Tokens form a tree:
//! cancelling a token cancels every token derived from it, while cancelling
//! a child never touches its parent. Nothing here interrupts a thread; a task
//! that never looks at its token runs to completion.

use crate::timer::DeadlineTimer;
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

type Listener = Box<dyn FnOnce() + Send + 'static>;

/// Error a task returns when it stops because its token was cancelled.
///
/// The worker recognises this error and resolves the future as cancelled
/// rather than failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, thiserror::Error)]
#[error("operation cancelled")]
pub struct Cancelled;

/// Shared, cloneable cancellation flag with parent links.
#[derive(Clone)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

struct Inner {
    cancelled: AtomicBool,
    state: Mutex<ListenerSet>,
    cond: Condvar,
    // (trigger, listener id) pairs registered on tokens that cancel this one
    links: Mutex<Vec<(Weak<Inner>, u64)>>,
    // key of this token's entry on the deadline timer, while armed
    deadline: Mutex<Option<u64>>,
}

#[derive(Default)]
struct ListenerSet {
    next_id: u64,
    listeners: HashMap<u64, Listener>,
}

impl CancellationToken {
    /// Create a root token that is only cancelled explicitly.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                state: Mutex::new(ListenerSet::default()),
                cond: Condvar::new(),
                links: Mutex::new(Vec::new()),
                deadline: Mutex::new(None),
            }),
        }
    }

    /// Derive a token that is cancelled whenever `self` is.
    pub fn child_token(&self) -> Self {
        let child = Self::new();
        child.link_to(self);
        child
    }

    /// Root token that cancels itself once `timeout` has elapsed.
    pub fn with_timeout(timeout: Duration) -> Self {
        let token = Self::new();
        token.arm_deadline(timeout);
        token
    }

    /// Child token that is also cancelled once `timeout` has elapsed.
    pub fn child_with_timeout(&self, timeout: Duration) -> Self {
        let token = self.child_token();
        token.arm_deadline(timeout);
        token
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// `Err(Cancelled)` once the token has been cancelled, so tasks can use `?`.
    pub fn check(&self) -> std::result::Result<(), Cancelled> {
        if self.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }

    /// Cancel this token and every token derived from it. Idempotent.
    pub fn cancel(&self) {
        let listeners = {
            let mut state = self.inner.state.lock();
            if self.inner.cancelled.swap(true, Ordering::AcqRel) {
                return;
            }
            self.inner.cond.notify_all();
            std::mem::take(&mut state.listeners)
        };

        // no one needs to reach us through our triggers anymore
        self.detach();

        for (_, listener) in listeners {
            listener();
        }
    }

    /// Block until the token is cancelled.
    pub fn wait(&self) {
        let mut state = self.inner.state.lock();
        while !self.is_cancelled() {
            self.inner.cond.wait(&mut state);
        }
    }

    /// Block for at most `timeout`. Returns true if the token was cancelled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.inner.state.lock();
        while !self.is_cancelled() {
            if self.inner.cond.wait_until(&mut state, deadline).timed_out() {
                return self.is_cancelled();
            }
        }
        true
    }

    /// Run `listener` when the token is cancelled, or right away if it already is.
    pub(crate) fn on_cancel<F>(&self, listener: F) -> Option<u64>
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut state = self.inner.state.lock();
            if !self.is_cancelled() {
                let id = state.next_id;
                state.next_id += 1;
                state.listeners.insert(id, Box::new(listener));
                return Some(id);
            }
        }
        listener();
        None
    }

    fn remove_listener(&self, id: u64) {
        self.inner.state.lock().listeners.remove(&id);
    }

    /// Make `trigger`'s cancellation cancel this token as well.
    pub(crate) fn link_to(&self, trigger: &CancellationToken) {
        let weak = Arc::downgrade(&self.inner);
        let registered = trigger.on_cancel(move || {
            if let Some(inner) = weak.upgrade() {
                CancellationToken { inner }.cancel();
            }
        });

        if let Some(id) = registered {
            self.inner
                .links
                .lock()
                .push((Arc::downgrade(&trigger.inner), id));
        }
    }

    /// Drop this token's listeners on its triggers and disarm its deadline.
    ///
    /// Called once the work the token guards has finished, so long-lived
    /// parents do not accumulate listeners for dead children and finished
    /// work leaves nothing on the deadline timer.
    pub(crate) fn detach(&self) {
        let links = std::mem::take(&mut *self.inner.links.lock());
        for (trigger, id) in links {
            if let Some(inner) = trigger.upgrade() {
                CancellationToken { inner }.remove_listener(id);
            }
        }

        let deadline = self.inner.deadline.lock().take();
        if let Some(key) = deadline {
            DeadlineTimer::global().disarm(key);
        }
    }

    fn arm_deadline(&self, timeout: Duration) {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            // too far out to ever fire
            return;
        };

        let token = self.clone();
        let armed = DeadlineTimer::global().schedule(deadline, move || {
            if !token.is_cancelled() {
                tracing::debug!(timeout_ms = timeout.as_millis() as u64, "deadline expired");
                token.cancel();
            }
        });

        match armed {
            Ok(key) => *self.inner.deadline.lock() = Some(key),
            Err(e) => {
                // without the timer thread the deadline can never fire; fail closed
                tracing::error!(error = %e, "failed to start deadline thread");
                self.cancel();
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn listener_count(&self) -> usize {
        self.inner.state.lock().listeners.len()
    }

    #[cfg(test)]
    fn deadline_key(&self) -> Option<u64> {
        *self.inner.deadline.lock()
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        for (trigger, id) in self.links.get_mut().drain(..) {
            if let Some(inner) = trigger.upgrade() {
                inner.state.lock().listeners.remove(&id);
            }
        }
    }
}
