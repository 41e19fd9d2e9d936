// worker thread stuff
use super::job::Job;
use super::panic_handler::PanicHandler;
use crate::cancel::Cancelled;
use crate::error::{Error, TaskError};
use crate::telemetry::Metrics;
use crossbeam_channel::{select, Receiver};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

pub type WorkerId = usize;

// stats for each worker
#[derive(Debug, Default)]
pub struct WorkerState {
    pub jobs_run: AtomicU64,
    pub jobs_skipped: AtomicU64,
}

pub(crate) struct Worker<T> {
    pub id: WorkerId,
    pub state: Arc<WorkerState>,
    jobs: Receiver<Job<T>>,
    shutdown: Receiver<()>,
    panic_handler: Arc<PanicHandler>,
    metrics: Arc<Metrics>,
}

impl<T> Worker<T> {
    pub fn new(
        id: WorkerId,
        jobs: Receiver<Job<T>>,
        shutdown: Receiver<()>,
        panic_handler: Arc<PanicHandler>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            id,
            state: Arc::new(WorkerState::default()),
            jobs,
            shutdown,
            panic_handler,
            metrics,
        }
    }

    // main loop: next job, or exit once the shutdown channel disconnects
    pub fn run(self) {
        tracing::debug!(worker = self.id, "worker started");

        loop {
            select! {
                recv(self.shutdown) -> _ => break,
                recv(self.jobs) -> msg => match msg {
                    Ok(job) => self.execute_job(job),
                    Err(_) => break,
                },
            }
        }

        tracing::debug!(
            worker = self.id,
            jobs_run = self.state.jobs_run.load(Ordering::Relaxed),
            "worker exiting"
        );
    }

    fn execute_job(&self, job: Job<T>) {
        let Job {
            future,
            task,
            enqueued_at,
        } = job;

        // cancelled while it sat in the queue; counted by the future's cancel hook
        if future.is_ready() {
            self.state.jobs_skipped.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let _span = tracing::debug_span!("job", future_id = future.id().as_u64(), worker = self.id)
            .entered();
        tracing::trace!(
            queued_us = enqueued_at.elapsed().as_micros() as u64,
            "job started"
        );

        let token = future.token().clone();
        let start = Instant::now();
        let result = self.panic_handler.execute(|| task(&token));
        self.metrics
            .record_run_time(start.elapsed().as_nanos() as u64);
        self.state.jobs_run.fetch_add(1, Ordering::Relaxed);

        let resolved = match result {
            Ok(Ok(value)) => {
                let won = future.complete(value);
                if won {
                    self.metrics.record_completed();
                }
                won
            }
            Ok(Err(err)) if is_cancellation(&err) => future.try_cancel(),
            Ok(Err(err)) => {
                tracing::debug!(error = %err, "task failed");
                let won = future.fail(Error::task(err));
                if won {
                    self.metrics.record_failed();
                }
                won
            }
            Err(panic) => {
                let won = future.fail(Error::Task(Arc::new(panic)));
                if won {
                    self.metrics.record_panic();
                }
                won
            }
        };

        if !resolved {
            // cancelled mid-run; the late result is dropped
            self.metrics.record_discarded();
            tracing::trace!("result discarded, future already resolved");
        }
    }
}

// `Cancelled` from a token check, or a forwarded `Error::Cancelled` from a wait
fn is_cancellation(err: &TaskError) -> bool {
    err.is::<Cancelled>() || err.downcast_ref::<Error>().map_or(false, Error::is_cancelled)
}
