//! Bounded worker pool for blocking ASR and translation calls.
//!
//! A fixed set of threads drains a job queue; each submitted job completes
//! over its own single-slot channel, so callers can wait with a deadline
//! (sync) or await completion (async, via `spawn_blocking`). Shutdown
//! closes the queue without joining the workers — in-flight jobs finish,
//! their results go to whoever still holds the handle, or nowhere.
//!
//! The pool defaults to a single worker. Code that already runs *on* the
//! worker must never submit and wait for another job — with one worker
//! that wait can never be served.

use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use tracing::debug;

/// Why a job's result never arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobError {
    /// The deadline elapsed. The job keeps running; its result is
    /// discarded unless the handle is retried.
    Timeout,
    /// The worker died or the pool was shut down before the job ran.
    Lost,
    /// The pool was already shut down at submission time.
    Closed,
}

impl std::fmt::Display for JobError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobError::Timeout => write!(f, "job timed out"),
            JobError::Lost => write!(f, "job result lost"),
            JobError::Closed => write!(f, "worker pool closed"),
        }
    }
}

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Completion handle for one submitted job.
pub struct JobHandle<T> {
    rx: Receiver<T>,
}

impl<T: Send + 'static> JobHandle<T> {
    /// Block until the job completes or `timeout` elapses.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<T, JobError> {
        match self.rx.recv_timeout(timeout) {
            Ok(value) => Ok(value),
            Err(RecvTimeoutError::Timeout) => Err(JobError::Timeout),
            Err(RecvTimeoutError::Disconnected) => Err(JobError::Lost),
        }
    }

    /// Block until the job completes.
    pub fn wait(self) -> Result<T, JobError> {
        self.rx.recv().map_err(|_| JobError::Lost)
    }

    /// Await completion without blocking the async executor.
    ///
    /// The receive itself runs on the tokio blocking pool, not on this
    /// pool's workers, so awaiting cannot deadlock a single-worker pool.
    pub async fn wait_async(self) -> Result<T, JobError> {
        tokio::task::spawn_blocking(move || self.rx.recv().map_err(|_| JobError::Lost))
            .await
            .map_err(|_| JobError::Lost)?
    }
}

/// Fixed-size pool of blocking workers.
pub struct WorkerPool {
    job_tx: Option<Sender<Job>>,
    worker_count: usize,
}

impl WorkerPool {
    /// Spawn `workers` threads (at least one).
    pub fn new(workers: usize) -> Self {
        let workers = workers.max(1);
        let (job_tx, job_rx) = unbounded::<Job>();

        for index in 0..workers {
            let job_rx: Receiver<Job> = job_rx.clone();
            // Detached: shutdown does not wait for in-flight jobs.
            let _ = std::thread::Builder::new()
                .name(format!("livecap-worker-{index}"))
                .spawn(move || {
                    while let Ok(job) = job_rx.recv() {
                        job();
                    }
                    debug!(index, "worker exiting");
                });
        }

        Self {
            job_tx: Some(job_tx),
            worker_count: workers,
        }
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Queue `f` for execution, returning a completion handle.
    pub fn submit<T, F>(&self, f: F) -> Result<JobHandle<T>, JobError>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let job_tx = self.job_tx.as_ref().ok_or(JobError::Closed)?;
        let (result_tx, result_rx) = bounded::<T>(1);

        let job: Job = Box::new(move || {
            // Receiver may be gone (timeout, shutdown); the result is
            // simply discarded then.
            let _ = result_tx.send(f());
        });

        job_tx.send(job).map_err(|_| JobError::Closed)?;
        Ok(JobHandle { rx: result_rx })
    }

    /// Close the queue. Workers finish their current job and exit; this
    /// call does not wait for them.
    pub fn shutdown(&mut self) {
        self.job_tx = None;
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
