//! Queued work items.

use crate::cancel::CancellationToken;
use crate::error::TaskError;
use crate::future::Future;
use std::fmt;
use std::time::Instant;

pub(crate) type BoxedTask<T> =
    Box<dyn FnOnce(&CancellationToken) -> Result<T, TaskError> + Send + 'static>;

/// A task paired with the future it resolves. Consumed by the worker that runs it.
pub(crate) struct Job<T> {
    pub(crate) future: Future<T>,
    pub(crate) task: BoxedTask<T>,
    pub(crate) enqueued_at: Instant,
}

impl<T> Job<T> {
    pub(crate) fn new<F>(future: Future<T>, task: F) -> Self
    where
        F: FnOnce(&CancellationToken) -> Result<T, TaskError> + Send + 'static,
    {
        Job {
            future,
            task: Box::new(task),
            enqueued_at: Instant::now(),
        }
    }
}

impl<T> fmt::Debug for Job<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("future", &self.future.id())
            .field("enqueued_at", &self.enqueued_at)
            .finish()
    }
}
