//! Single-assignment result cells.
//!
//! A [`Future`] starts out pending and moves exactly once into one of three
//! terminal states. The terminal outcome is stored in a `OnceLock`, so the
//! first of `complete`, `fail` or `cancel` to arrive wins and every later
//! attempt is silently dropped.

use crate::cancel::CancellationToken;
use crate::error::{Error, Result};
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

static FUTURE_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Process-unique future identifier. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FutureId(u64);

impl FutureId {
    fn next() -> Self {
        FutureId(FUTURE_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl From<u64> for FutureId {
    fn from(raw: u64) -> Self {
        FutureId(raw)
    }
}

impl fmt::Display for FutureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Observable state of a future.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FutureState {
    Pending = 0,
    Completed = 1,
    Failed = 2,
    Cancelled = 3,
}

impl FutureState {
    pub fn is_terminal(self) -> bool {
        self != FutureState::Pending
    }
}

enum Outcome<T> {
    Completed(T),
    Failed(Error),
    Cancelled,
}

/// Handle to the result of a submitted task.
///
/// Cloning is cheap and every clone observes the same cell.
pub struct Future<T> {
    inner: Arc<Inner<T>>,
}

type CancelHook = Box<dyn Fn() + Send + Sync + 'static>;

struct Inner<T> {
    id: FutureId,
    outcome: OnceLock<Outcome<T>>,
    done: Mutex<bool>,
    done_cond: Condvar,
    token: CancellationToken,
    created_at: Instant,
    // runs once, on the transition that makes the future Cancelled
    on_cancelled: Option<CancelHook>,
}

impl<T> Clone for Future<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Send + Sync + 'static> Future<T> {
    /// Create a pending future guarded by `token`.
    ///
    /// Cancelling the token (directly or through one of its parents) moves
    /// the future to `Cancelled`.
    pub(crate) fn new(token: CancellationToken) -> Self {
        Self::build(token, None)
    }

    /// Like [`new`](Self::new), calling `hook` when the future ends up cancelled.
    pub(crate) fn with_cancel_hook<F>(token: CancellationToken, hook: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self::build(token, Some(Box::new(hook)))
    }

    fn build(token: CancellationToken, on_cancelled: Option<CancelHook>) -> Self {
        let future = Self {
            inner: Arc::new(Inner {
                id: FutureId::next(),
                outcome: OnceLock::new(),
                done: Mutex::new(false),
                done_cond: Condvar::new(),
                token,
                created_at: Instant::now(),
                on_cancelled,
            }),
        };

        let weak = Arc::downgrade(&future.inner);
        future.inner.token.on_cancel(move || {
            if let Some(inner) = weak.upgrade() {
                Future { inner }.resolve(Outcome::Cancelled);
            }
        });

        future
    }
}

impl<T> Future<T> {
    pub fn id(&self) -> FutureId {
        self.inner.id
    }

    pub fn state(&self) -> FutureState {
        match self.inner.outcome.get() {
            None => FutureState::Pending,
            Some(Outcome::Completed(_)) => FutureState::Completed,
            Some(Outcome::Failed(_)) => FutureState::Failed,
            Some(Outcome::Cancelled) => FutureState::Cancelled,
        }
    }

    /// Non-blocking: true once the future has left `Pending`.
    pub fn is_ready(&self) -> bool {
        self.inner.outcome.get().is_some()
    }

    /// The token handed to this future's task.
    pub fn token(&self) -> &CancellationToken {
        &self.inner.token
    }

    /// Time since the future was created.
    pub fn age(&self) -> Duration {
        self.inner.created_at.elapsed()
    }

    /// Cancel the future. No-op once terminal.
    ///
    /// The task only sees the token flip; it keeps running until it checks.
    /// Anything it produces afterwards is discarded.
    pub fn cancel(&self) {
        self.try_cancel();
    }

    /// Cancel, reporting whether the future was pending and is now `Cancelled`.
    pub(crate) fn try_cancel(&self) -> bool {
        if self.is_ready() {
            return false;
        }
        self.inner.token.cancel();
        self.resolve(Outcome::Cancelled);
        self.state() == FutureState::Cancelled
    }

    pub(crate) fn complete(&self, value: T) -> bool {
        self.resolve(Outcome::Completed(value))
    }

    pub(crate) fn fail(&self, error: Error) -> bool {
        self.resolve(Outcome::Failed(error))
    }

    fn resolve(&self, outcome: Outcome<T>) -> bool {
        let cancelled = matches!(outcome, Outcome::Cancelled);
        if self.inner.outcome.set(outcome).is_err() {
            return false;
        }

        if cancelled {
            if let Some(hook) = &self.inner.on_cancelled {
                hook();
            }
        }

        {
            let mut done = self.inner.done.lock();
            debug_assert!(!*done, "done signal fired twice");
            *done = true;
            self.inner.done_cond.notify_all();
        }

        self.inner.token.detach();
        true
    }
}

impl<T: Clone> Future<T> {
    /// Block until terminal, then return the value or the error.
    pub fn wait(&self) -> Result<T> {
        let mut done = self.inner.done.lock();
        while !*done {
            self.inner.done_cond.wait(&mut done);
        }
        drop(done);
        self.read()
    }

    /// Like [`wait`](Self::wait) but gives up after `timeout`, returning `None`.
    ///
    /// Timing out leaves the future untouched.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<T>> {
        let deadline = Instant::now() + timeout;
        let mut done = self.inner.done.lock();
        while !*done {
            if self.inner.done_cond.wait_until(&mut done, deadline).timed_out() {
                if !*done {
                    return None;
                }
                break;
            }
        }
        drop(done);
        Some(self.read())
    }

    /// Non-blocking variant of [`wait`](Self::wait); `Error::NotReady` while pending.
    pub fn get(&self) -> Result<T> {
        self.read()
    }

    fn read(&self) -> Result<T> {
        match self.inner.outcome.get() {
            Some(Outcome::Completed(value)) => Ok(value.clone()),
            Some(Outcome::Failed(err)) => Err(err.clone()),
            Some(Outcome::Cancelled) => Err(Error::Cancelled),
            None => Err(Error::NotReady),
        }
    }
}

impl<T> fmt::Debug for Future<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Future")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .finish()
    }
}
