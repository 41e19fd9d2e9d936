use super::job::Job;
use super::panic_handler::PanicHandler;
use super::worker::{Worker, WorkerId, WorkerState};
use crate::cancel::CancellationToken;
use crate::config::Config;
use crate::error::{Error, Result, TaskError};
use crate::future::{Future, FutureId};
use crate::telemetry::{Metrics, MetricsSnapshot};
use crossbeam_channel::{bounded, select, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

/// Bounded worker pool that hands out [`Future`]s for submitted tasks.
///
/// Submission blocks while the job queue is full. A blocked submitter is
/// released as soon as the executor starts shutting down, and its future
/// fails with [`Error::ShuttingDown`].
pub struct Executor<T> {
    registry: RwLock<HashMap<FutureId, Future<T>>>,
    queue: RwLock<Option<Sender<Job<T>>>>,
    // disconnects when `lifecycle` is cancelled
    shutdown_signal: Receiver<()>,
    lifecycle: CancellationToken,
    // held for the whole join so concurrent shutdowns all wait for it
    workers: Mutex<Vec<WorkerHandle>>,
    worker_threads: Vec<ThreadId>,
    worker_states: Vec<Arc<WorkerState>>,
    num_workers: usize,
    queue_capacity: usize,
    metrics: Arc<Metrics>,
    config: Config,
}

struct WorkerHandle {
    id: WorkerId,
    thread: Option<JoinHandle<()>>,
}

impl<T: Clone + Send + Sync + 'static> Executor<T> {
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let num_workers = config.worker_threads();
        let queue_capacity = config.queue_capacity();

        let (job_tx, job_rx) = bounded::<Job<T>>(queue_capacity);
        let (signal_tx, signal_rx) = bounded::<()>(0);

        let lifecycle = CancellationToken::new();
        lifecycle.on_cancel(move || drop(signal_tx));

        let panic_handler = Arc::new(PanicHandler::new(config.panic_strategy));
        let metrics = Arc::new(Metrics::new());

        let mut handles = Vec::with_capacity(num_workers);
        let mut worker_threads = Vec::with_capacity(num_workers);
        let mut worker_states = Vec::with_capacity(num_workers);

        for id in 0..num_workers {
            let worker = Worker::new(
                id,
                job_rx.clone(),
                signal_rx.clone(),
                panic_handler.clone(),
                metrics.clone(),
            );
            let state = worker.state.clone();
            let name = format!("{}-{}", config.thread_name_prefix, id);

            let mut builder = thread::Builder::new().name(name);

            if let Some(stack_size) = config.stack_size {
                builder = builder.stack_size(stack_size);
            }

            match builder.spawn(move || worker.run()) {
                Ok(thread) => {
                    worker_threads.push(thread.thread().id());
                    worker_states.push(state);
                    handles.push(WorkerHandle {
                        id,
                        thread: Some(thread),
                    });
                }
                Err(e) => {
                    // unwind the workers we already started
                    lifecycle.cancel();
                    for handle in &mut handles {
                        if let Some(thread) = handle.thread.take() {
                            let _ = thread.join();
                        }
                    }
                    return Err(Error::executor(format!("spawn failed: {}", e)));
                }
            }
        }

        tracing::debug!(workers = num_workers, queue_capacity, "executor started");

        Ok(Self {
            registry: RwLock::new(HashMap::new()),
            queue: RwLock::new(Some(job_tx)),
            shutdown_signal: signal_rx,
            lifecycle,
            workers: Mutex::new(handles),
            worker_threads,
            worker_states,
            num_workers,
            queue_capacity,
            metrics,
            config,
        })
    }

    /// Executor with `n` workers and otherwise default settings.
    pub fn with_workers(n: usize) -> Result<Self> {
        Self::new(Config::builder().num_workers(n).build()?)
    }

    /// Submit a task. Always returns a future; never fails.
    pub fn submit<F>(&self, task: F) -> Future<T>
    where
        F: FnOnce(&CancellationToken) -> std::result::Result<T, TaskError> + Send + 'static,
    {
        self.submit_inner(CancellationToken::new(), task)
    }

    /// Submit a task whose token is derived from `parent`.
    pub fn submit_with_token<F>(&self, parent: &CancellationToken, task: F) -> Future<T>
    where
        F: FnOnce(&CancellationToken) -> std::result::Result<T, TaskError> + Send + 'static,
    {
        self.submit_inner(parent.child_token(), task)
    }

    /// Submit a task whose token cancels itself after `timeout`.
    ///
    /// The deadline is disarmed as soon as the future resolves.
    pub fn submit_with_timeout<F>(&self, timeout: Duration, task: F) -> Future<T>
    where
        F: FnOnce(&CancellationToken) -> std::result::Result<T, TaskError> + Send + 'static,
    {
        self.submit_inner(CancellationToken::with_timeout(timeout), task)
    }

    fn submit_inner<F>(&self, token: CancellationToken, task: F) -> Future<T>
    where
        F: FnOnce(&CancellationToken) -> std::result::Result<T, TaskError> + Send + 'static,
    {
        let metrics = self.metrics.clone();
        let future = Future::with_cancel_hook(token, move || metrics.record_cancelled());
        self.registry.write().insert(future.id(), future.clone());
        self.metrics.record_submitted();

        if self.lifecycle.is_cancelled() {
            self.reject(&future);
            return future;
        }

        let sender = match self.queue.read().as_ref() {
            Some(tx) => tx.clone(),
            None => {
                self.reject(&future);
                return future;
            }
        };

        let job = Job::new(future.clone(), task);
        select! {
            send(sender, job) -> res => {
                if res.is_err() {
                    self.reject(&future);
                    return future;
                }
            }
            recv(self.shutdown_signal) -> _ => {
                self.reject(&future);
                return future;
            }
        }

        // fires at once if shutdown already began
        if !future.is_ready() {
            future.token().link_to(&self.lifecycle);

            // resolved before the link went in; its own detach has already run
            if future.is_ready() {
                future.token().detach();
            }
        }
        future
    }

    fn reject(&self, future: &Future<T>) {
        if future.fail(Error::ShuttingDown) {
            self.metrics.record_rejected();
            tracing::debug!(
                future_id = future.id().as_u64(),
                "submission rejected: executor is shutting down"
            );
        }
    }

    pub fn get_future(&self, id: FutureId) -> Option<Future<T>> {
        self.registry.read().get(&id).cloned()
    }

    /// Drop the registry entry. Holders of the future are unaffected.
    pub fn remove_future(&self, id: FutureId) -> Option<Future<T>> {
        self.registry.write().remove(&id)
    }

    /// Wait on every future that is pending right now.
    ///
    /// Futures submitted after the snapshot is taken are not waited on.
    pub fn wait_all(&self) {
        let pending: Vec<Future<T>> = self
            .registry
            .read()
            .values()
            .filter(|f| !f.is_ready())
            .cloned()
            .collect();

        for future in pending {
            let _ = future.wait();
        }
    }

    /// Number of registered futures that are still pending.
    pub fn pending_count(&self) -> usize {
        self.registry
            .read()
            .values()
            .filter(|f| !f.is_ready())
            .count()
    }

    /// Number of registered futures, terminal or not.
    pub fn len(&self) -> usize {
        self.registry.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.read().is_empty()
    }
}

impl<T> Executor<T> {
    /// Stop accepting work, signal every task and join the workers.
    ///
    /// Blocks until every worker has exited, including when another thread
    /// is already shutting down. Tasks that ignore their token delay this
    /// call until they return. Called from one of this executor's own tasks,
    /// it signals shutdown and returns without joining, since the calling
    /// worker cannot exit until its task does.
    pub fn shutdown(&self) {
        if !self.lifecycle.is_cancelled() {
            tracing::debug!(workers = self.num_workers, "executor shutting down");
        }

        self.lifecycle.cancel();
        self.queue.write().take();

        if self.worker_threads.contains(&thread::current().id()) {
            tracing::warn!("shutdown called from a worker thread; not joining");
            return;
        }

        let mut workers = self.workers.lock();
        if workers.is_empty() {
            return;
        }

        for mut handle in workers.drain(..) {
            let Some(thread) = handle.thread.take() else {
                continue;
            };
            if thread.join().is_err() {
                tracing::warn!(worker = handle.id, "worker thread panicked");
            }
        }

        tracing::debug!("executor shut down");
    }

    pub fn is_shutdown(&self) -> bool {
        self.lifecycle.is_cancelled()
    }

    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Jobs each worker has run so far, indexed by worker id.
    pub fn worker_job_counts(&self) -> Vec<u64> {
        self.worker_states
            .iter()
            .map(|state| state.jobs_run.load(std::sync::atomic::Ordering::Relaxed))
            .collect()
    }
}

impl<T> Drop for Executor<T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl<T> fmt::Debug for Executor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executor")
            .field("num_workers", &self.num_workers)
            .field("queue_capacity", &self.queue_capacity)
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::future::FutureState;
    use std::time::Instant;

    #[test]
    fn test_submit_and_wait() {
        let executor = Executor::with_workers(2).unwrap();

        let future = executor.submit(|_| {
            thread::sleep(Duration::from_millis(50));
            Ok(42)
        });

        assert!(!future.is_ready());
        assert_eq!(future.wait().unwrap(), 42);
    }

    #[test]
    fn test_task_error_fails_future() {
        let executor: Executor<i32> = Executor::with_workers(1).unwrap();

        let future = executor.submit(|_| Err("bad input".into()));

        let err = future.wait().unwrap_err();
        assert!(err.is_task_failure());
        assert_eq!(err.to_string(), "task failed: bad input");
        assert_eq!(future.state(), FutureState::Failed);
    }

    #[test]
    fn test_panic_does_not_kill_worker() {
        let executor = Executor::new(
            Config::builder()
                .num_workers(1)
                .panic_strategy(crate::executor::PanicStrategy::Isolate)
                .build()
                .unwrap(),
        )
        .unwrap();

        let bad = executor.submit(|_| -> std::result::Result<i32, TaskError> { panic!("kaboom") });
        let err = bad.wait().unwrap_err();
        assert!(err.is_task_failure());
        assert_eq!(
            err.task_error::<crate::executor::TaskPanic>().unwrap().message,
            "kaboom"
        );

        // same single worker keeps going
        let good = executor.submit(|_| Ok(1));
        assert_eq!(good.wait().unwrap(), 1);
        assert_eq!(executor.metrics().tasks_panicked, 1);
    }

    #[test]
    fn test_task_returning_cancelled_resolves_as_cancelled() {
        let executor: Executor<()> = Executor::with_workers(1).unwrap();

        let future = executor.submit(|_| Err(crate::cancel::Cancelled.into()));

        assert!(future.wait().unwrap_err().is_cancelled());
        assert_eq!(future.state(), FutureState::Cancelled);
    }

    #[test]
    fn test_cancel_running_task() {
        let executor = Executor::with_workers(1).unwrap();
        let (started_tx, started_rx) = bounded(1);

        let future = executor.submit(move |token| {
            let _ = started_tx.send(());
            token.wait();
            token.check()?;
            Ok("finished")
        });

        started_rx.recv().unwrap();
        future.cancel();

        assert!(future.wait().unwrap_err().is_cancelled());
    }

    #[test]
    fn test_cancel_queued_job_is_skipped() {
        let executor = Executor::with_workers(1).unwrap();
        let (release_tx, release_rx) = bounded::<()>(0);

        let blocker = executor.submit(move |_| {
            let _ = release_rx.recv();
            Ok(0)
        });
        let queued = executor.submit(|_| Ok(1));

        queued.cancel();
        release_tx.send(()).unwrap();

        assert_eq!(blocker.wait().unwrap(), 0);
        assert!(queued.wait().unwrap_err().is_cancelled());

        executor.shutdown();
        assert_eq!(executor.metrics().tasks_completed, 1);
    }

    #[test]
    fn test_submit_with_timeout() {
        let executor = Executor::with_workers(1).unwrap();

        let start = Instant::now();
        let future = executor.submit_with_timeout(Duration::from_millis(30), |token| {
            if token.wait_timeout(Duration::from_secs(5)) {
                return Err(crate::cancel::Cancelled.into());
            }
            Ok("too slow")
        });

        assert!(future.wait().unwrap_err().is_cancelled());
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_registry_lookup_and_remove() {
        let executor = Executor::with_workers(2).unwrap();

        let future = executor.submit(|_| Ok("result"));
        let found = executor.get_future(future.id()).unwrap();
        assert_eq!(found.id(), future.id());

        future.wait().unwrap();
        assert!(executor.remove_future(future.id()).is_some());
        assert!(executor.get_future(future.id()).is_none());
        assert!(executor.remove_future(future.id()).is_none());

        // held reference still works
        assert_eq!(future.get().unwrap(), "result");
        assert!(executor.get_future(FutureId::from(u64::MAX)).is_none());
    }

    #[test]
    fn test_submit_after_shutdown_fails_fast() {
        let executor: Executor<i32> = Executor::with_workers(2).unwrap();
        executor.shutdown();
        assert!(executor.is_shutdown());

        let future = executor.submit(|_| Ok(1));
        assert_eq!(future.state(), FutureState::Failed);
        assert!(future.get().unwrap_err().is_shutting_down());
        assert_eq!(executor.metrics().tasks_rejected, 1);
    }

    #[test]
    fn test_shutdown_twice() {
        let executor: Executor<()> = Executor::with_workers(2).unwrap();
        executor.shutdown();
        executor.shutdown();
    }

    #[test]
    fn test_shutdown_cancels_in_flight_task() {
        let executor = Executor::with_workers(1).unwrap();
        let (started_tx, started_rx) = bounded(1);

        let future = executor.submit(move |token| {
            let _ = started_tx.send(());
            token.wait();
            Ok(())
        });

        started_rx.recv().unwrap();
        executor.shutdown();

        assert_eq!(future.state(), FutureState::Cancelled);
    }

    #[test]
    fn test_blocked_submitter_released_by_shutdown() {
        let executor = Arc::new(
            Executor::new(
                Config::builder()
                    .num_workers(1)
                    .queue_capacity_factor(1)
                    .build()
                    .unwrap(),
            )
            .unwrap(),
        );
        let (started_tx, started_rx) = bounded(1);

        // occupy the worker, then fill the single queue slot
        let running = executor.submit(move |token| {
            let _ = started_tx.send(());
            token.wait();
            Ok(0)
        });
        started_rx.recv().unwrap();
        let queued = executor.submit(|_| Ok(1));

        let submitter = {
            let executor = executor.clone();
            thread::spawn(move || executor.submit(|_| Ok(2)))
        };

        thread::sleep(Duration::from_millis(50));
        executor.shutdown();

        let blocked = submitter.join().unwrap();
        assert!(blocked.is_ready());
        assert!(running.wait().is_err());
        assert!(queued.wait().is_err());
    }

    #[test]
    fn test_cancelling_running_task_counts_as_cancelled() {
        let executor = Executor::with_workers(1).unwrap();
        let (started_tx, started_rx) = bounded(1);

        let future = executor.submit(move |token| {
            let _ = started_tx.send(());
            token.wait();
            token.check()?;
            Ok(())
        });

        started_rx.recv().unwrap();
        future.cancel();
        assert!(future.wait().unwrap_err().is_cancelled());

        executor.shutdown();
        let metrics = executor.metrics();
        assert_eq!(metrics.tasks_cancelled, 1);
        assert_eq!(metrics.results_discarded, 1);
    }

    #[test]
    fn test_cancelled_counts_each_path_once() {
        let executor: Executor<i32> = Executor::with_workers(1).unwrap();
        let (release_tx, release_rx) = bounded::<()>(0);

        let blocker = executor.submit(move |_| {
            let _ = release_rx.recv();
            Ok(0)
        });
        // skipped in the queue
        let queued = executor.submit(|_| Ok(1));
        queued.cancel();
        release_tx.send(()).unwrap();
        blocker.wait().unwrap();

        // task gives up on its own
        let gave_up = executor.submit(|_| Err(crate::cancel::Cancelled.into()));
        assert!(gave_up.wait().unwrap_err().is_cancelled());

        // parent already cancelled at submit time
        let parent = CancellationToken::new();
        parent.cancel();
        let orphan = executor.submit_with_token(&parent, |_| Ok(3));
        assert_eq!(orphan.state(), FutureState::Cancelled);

        executor.wait_all();
        executor.shutdown();
        let metrics = executor.metrics();
        assert_eq!(metrics.tasks_cancelled, 3);
        assert_eq!(metrics.tasks_completed, 1);
        assert_eq!(metrics.results_discarded, 0);
    }

    #[test]
    fn test_forwarded_cancellation_resolves_as_cancelled() {
        let executor: Executor<i32> = Executor::with_workers(2).unwrap();

        let upstream = executor.submit(|token| {
            token.wait();
            Ok(1)
        });
        upstream.cancel();

        let up = upstream.clone();
        let downstream = executor.submit(move |_| Ok(up.wait()? + 1));

        assert!(downstream.wait().unwrap_err().is_cancelled());
        assert_eq!(downstream.state(), FutureState::Cancelled);
    }

    #[test]
    fn test_finished_futures_leave_no_lifecycle_listeners() {
        let executor: Executor<usize> = Executor::with_workers(4).unwrap();

        let futures: Vec<_> = (0..500).map(|i| executor.submit(move |_| Ok(i))).collect();
        for future in &futures {
            future.wait().unwrap();
        }

        // only the shutdown-signal listener remains
        assert_eq!(executor.lifecycle.listener_count(), 1);
        assert_eq!(executor.len(), 500);
    }

    #[test]
    fn test_concurrent_shutdown_waits_for_workers() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let executor: Arc<Executor<()>> = Arc::new(Executor::with_workers(1).unwrap());
        let finished = Arc::new(AtomicBool::new(false));
        let (started_tx, started_rx) = bounded(1);

        let f = finished.clone();
        executor.submit(move |token| {
            let _ = started_tx.send(());
            token.wait();
            // keep the worker busy past the cancel
            thread::sleep(Duration::from_millis(100));
            f.store(true, Ordering::SeqCst);
            Ok(())
        });
        started_rx.recv().unwrap();

        let first = {
            let executor = executor.clone();
            thread::spawn(move || executor.shutdown())
        };
        while !executor.is_shutdown() {
            thread::yield_now();
        }

        executor.shutdown();
        assert!(finished.load(Ordering::SeqCst));
        first.join().unwrap();
    }

    #[test]
    fn test_shutdown_from_own_task_does_not_deadlock() {
        let executor: Arc<Executor<()>> = Arc::new(Executor::with_workers(2).unwrap());

        let inner = executor.clone();
        let future = executor.submit(move |_| {
            inner.shutdown();
            Ok(())
        });

        // the task's own shutdown may cancel its future first
        match future.wait() {
            Ok(()) => {}
            Err(e) => assert!(e.is_cancelled()),
        }
        executor.shutdown();
        assert!(executor.is_shutdown());
        assert!(executor.workers.lock().is_empty());
    }
}
