//! Bounded job queue with a fixed worker pool and a completion barrier.
//!
//! ```text
//! producer ──add()──▶ [ bounded FIFO ] ──▶ worker 1 ─┐
//!    │ blocks when full                 ──▶ worker 2 ─┼─▶ runner.run(job)
//!    │                                  ──▶ worker N ─┘        │
//!    └──wait()◀──────── outstanding == 0 ◀──── decrement ◀─────┘
//! ```
//!
//! `add` bumps the outstanding counter *before* the job is enqueued, so a
//! concurrent `wait` can never observe zero while a job is in hand-off.
//! Every worker decrements the counter when it is done with a job, whether
//! the job succeeded, failed, or was skipped.
//!
//! ## Failure policy
//!
//! The first failing job cancels the queue: jobs not yet started are skipped,
//! jobs already running finish, and `wait` returns one [`JobError`] naming
//! the failing job and the number of skipped jobs. Nothing is retried. A
//! runner that panics counts as a failure like any other.

use crate::job::Job;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use thiserror::Error;

/// Runs one job to completion. Implemented by the render pipeline.
pub trait JobRunner: Send + Sync + 'static {
    type Error: std::error::Error + Send + 'static;

    fn run(&self, job: &Job) -> Result<(), Self::Error>;
}

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("failed to spawn render worker: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("job queue is closed; cannot add {job}")]
    Closed { job: String },
}

/// Why a job did not complete.
#[derive(Error, Debug)]
pub enum JobFailure<E> {
    #[error(transparent)]
    Failed(E),
    #[error("worker panicked: {0}")]
    Panicked(String),
}

/// The first job failure of a run.
#[derive(Error, Debug)]
#[error("{job}: {source} ({skipped} queued jobs skipped)")]
pub struct JobError<E: std::error::Error + 'static> {
    pub job: String,
    #[source]
    pub source: JobFailure<E>,
    pub skipped: usize,
}

/// Counts reported by [`JobQueue::wait`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub completed: usize,
    pub skipped: usize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Shared<E> {
    outstanding: Mutex<usize>,
    idle: Condvar,
    cancelled: AtomicBool,
    first_error: Mutex<Option<(String, JobFailure<E>)>>,
    completed: AtomicUsize,
    skipped: AtomicUsize,
}

impl<E: std::error::Error + 'static> Shared<E> {
    fn fail(&self, job: String, failure: JobFailure<E>) {
        let mut first = lock(&self.first_error);
        if first.is_none() {
            *first = Some((job, failure));
        }
        self.cancelled.store(true, Ordering::Release);
    }
}

impl<E> Shared<E> {
    fn finish_one(&self) {
        let mut outstanding = lock(&self.outstanding);
        *outstanding = outstanding.saturating_sub(1);
        if *outstanding == 0 {
            self.idle.notify_all();
        }
    }
}

/// Decrements the outstanding counter when a worker is done with a job.
struct Finished<'a, E>(&'a Shared<E>);

impl<E> Drop for Finished<'_, E> {
    fn drop(&mut self) {
        self.0.finish_one();
    }
}

pub struct JobQueue<R: JobRunner> {
    sender: Option<SyncSender<Job>>,
    workers: Vec<JoinHandle<()>>,
    shared: Arc<Shared<R::Error>>,
}

impl<R: JobRunner> JobQueue<R> {
    /// Spawn `workers` threads draining a queue of at most `capacity` jobs.
    pub fn start(runner: Arc<R>, workers: usize, capacity: usize) -> Result<Self, QueueError> {
        let (sender, receiver) = mpsc::sync_channel(capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));
        let shared = Arc::new(Shared {
            outstanding: Mutex::new(0),
            idle: Condvar::new(),
            cancelled: AtomicBool::new(false),
            first_error: Mutex::new(None),
            completed: AtomicUsize::new(0),
            skipped: AtomicUsize::new(0),
        });

        let mut queue = Self {
            sender: Some(sender),
            workers: Vec::new(),
            shared,
        };
        for id in 0..workers.max(1) {
            let runner = Arc::clone(&runner);
            let receiver = Arc::clone(&receiver);
            let shared = Arc::clone(&queue.shared);
            let handle = thread::Builder::new()
                .name(format!("render-{id}"))
                .spawn(move || work(&*runner, &receiver, &shared))
                .map_err(QueueError::Spawn)?;
            queue.workers.push(handle);
        }
        tracing::debug!(workers = queue.workers.len(), capacity = capacity.max(1), "job queue started");
        Ok(queue)
    }

    /// Enqueue `job`, blocking while the queue is full.
    ///
    /// Once the queue is cancelled, jobs are counted as skipped instead.
    pub fn add(&self, job: Job) -> Result<(), QueueError> {
        let Some(sender) = &self.sender else {
            return Err(QueueError::Closed { job: job.label() });
        };
        if self.is_cancelled() {
            self.shared.skipped.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }

        *lock(&self.shared.outstanding) += 1;
        if let Err(mpsc::SendError(job)) = sender.send(job) {
            self.shared.finish_one();
            return Err(QueueError::Closed { job: job.label() });
        }
        Ok(())
    }

    /// Block until every added job has been handled.
    ///
    /// Returns the first failure, if any; it is reported once.
    pub fn wait(&self) -> Result<QueueStats, JobError<R::Error>> {
        let mut outstanding = lock(&self.shared.outstanding);
        while *outstanding > 0 {
            outstanding = self
                .shared
                .idle
                .wait(outstanding)
                .unwrap_or_else(PoisonError::into_inner);
        }
        drop(outstanding);

        let stats = QueueStats {
            completed: self.shared.completed.load(Ordering::Relaxed),
            skipped: self.shared.skipped.load(Ordering::Relaxed),
        };
        match lock(&self.shared.first_error).take() {
            Some((job, source)) => Err(JobError {
                job,
                source,
                skipped: stats.skipped,
            }),
            None => Ok(stats),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.cancelled.load(Ordering::Acquire)
    }
}

impl<R: JobRunner> Drop for JobQueue<R> {
    fn drop(&mut self) {
        // Closing the channel ends every worker's recv loop.
        self.sender.take();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                tracing::error!("render worker panicked");
            }
        }
    }
}

fn work<R: JobRunner>(runner: &R, receiver: &Mutex<Receiver<Job>>, shared: &Shared<R::Error>) {
    loop {
        let next = lock(receiver).recv();
        let Ok(job) = next else {
            break;
        };
        let _finished = Finished(shared);

        if shared.cancelled.load(Ordering::Acquire) {
            shared.skipped.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(job = %job.label(), "skipped after failure");
            continue;
        }

        match panic::catch_unwind(AssertUnwindSafe(|| runner.run(&job))) {
            Ok(Ok(())) => {
                shared.completed.fetch_add(1, Ordering::Relaxed);
            }
            Ok(Err(err)) => {
                tracing::error!(job = %job.label(), error = %err, "job failed");
                shared.fail(job.label(), JobFailure::Failed(err));
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::error!(job = %job.label(), panic = %message, "job panicked");
                shared.fail(job.label(), JobFailure::Panicked(message));
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        text.to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use crate::test_helpers::job;
    use std::path::Path;
    use std::time::Duration;

    #[derive(Error, Debug)]
    #[error("refused {0}")]
    struct Refused(String);

    /// Records every job it runs; fails the ones listed in `fail` and panics
    /// on the ones listed in `panic`.
    #[derive(Default)]
    struct MockRunner {
        ran: Mutex<Vec<String>>,
        fail: Vec<String>,
        panic: Vec<String>,
        delay: Duration,
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    impl JobRunner for MockRunner {
        type Error = Refused;

        fn run(&self, job: &Job) -> Result<(), Refused> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            thread::sleep(self.delay);
            self.running.fetch_sub(1, Ordering::SeqCst);

            lock(&self.ran).push(job.artifact.clone());
            if self.panic.contains(&job.artifact) {
                panic!("runner blew up on {}", job.artifact);
            }
            if self.fail.contains(&job.artifact) {
                Err(Refused(job.artifact.clone()))
            } else {
                Ok(())
            }
        }
    }

    fn jobs(names: &[&str]) -> Vec<Job> {
        let catalog = Arc::new(Catalog::new("en_US"));
        names
            .iter()
            .map(|name| job(Path::new("templates/html"), name, Arc::clone(&catalog), &[], false))
            .collect()
    }

    #[test]
    fn wait_returns_after_every_job_ran() {
        let runner = Arc::new(MockRunner {
            delay: Duration::from_millis(5),
            ..MockRunner::default()
        });
        let queue = JobQueue::start(Arc::clone(&runner), 3, 2).unwrap();
        let names: Vec<String> = (0..12).map(|i| format!("page{i}.html")).collect();
        for job in jobs(&names.iter().map(String::as_str).collect::<Vec<_>>()) {
            queue.add(job).unwrap();
        }

        let stats = queue.wait().unwrap();
        assert_eq!(stats, QueueStats { completed: 12, skipped: 0 });
        let mut ran = lock(&runner.ran).clone();
        ran.sort();
        let mut expected = names.clone();
        expected.sort();
        assert_eq!(ran, expected);
    }

    #[test]
    fn wait_with_no_jobs_returns_immediately() {
        let queue = JobQueue::start(Arc::new(MockRunner::default()), 2, 1).unwrap();
        assert_eq!(queue.wait().unwrap(), QueueStats::default());
    }

    #[test]
    fn never_runs_more_jobs_than_workers() {
        let runner = Arc::new(MockRunner {
            delay: Duration::from_millis(10),
            ..MockRunner::default()
        });
        let queue = JobQueue::start(Arc::clone(&runner), 2, 1).unwrap();
        for job in jobs(&["a", "b", "c", "d", "e", "f"]) {
            queue.add(job).unwrap();
        }
        queue.wait().unwrap();
        assert!(runner.peak.load(Ordering::SeqCst) <= 2);
    }

    #[test]
    fn first_failure_cancels_jobs_not_yet_started() {
        let runner = Arc::new(MockRunner {
            fail: vec!["bad.html".to_string()],
            delay: Duration::from_millis(5),
            ..MockRunner::default()
        });
        let queue = JobQueue::start(Arc::clone(&runner), 1, 8).unwrap();
        for job in jobs(&["ok1.html", "bad.html", "ok2.html", "ok3.html"]) {
            queue.add(job).unwrap();
        }

        let err = queue.wait().unwrap_err();
        assert!(err.job.contains("bad.html"));
        assert!(matches!(&err.source, JobFailure::Failed(Refused(name)) if name == "bad.html"));
        assert_eq!(err.skipped, 2);
        assert!(queue.is_cancelled());
        assert_eq!(*lock(&runner.ran), vec!["ok1.html", "bad.html"]);
        assert!(err.to_string().contains("2 queued jobs skipped"));
    }

    #[test]
    fn only_first_failure_is_reported() {
        let runner = Arc::new(MockRunner {
            fail: vec!["a".to_string(), "b".to_string()],
            delay: Duration::from_millis(20),
            ..MockRunner::default()
        });
        let queue = JobQueue::start(runner, 2, 2).unwrap();
        for job in jobs(&["a", "b"]) {
            queue.add(job).unwrap();
        }
        let err = queue.wait().unwrap_err();
        assert!(matches!(&err.source, JobFailure::Failed(Refused(name)) if name == "a" || name == "b"));
        assert!(queue.wait().is_ok());
    }

    #[test]
    fn panicking_runner_fails_the_run() {
        let runner = Arc::new(MockRunner {
            panic: vec!["boom.html".to_string()],
            ..MockRunner::default()
        });
        let queue = JobQueue::start(Arc::clone(&runner), 1, 8).unwrap();
        for job in jobs(&["ok.html", "boom.html", "later.html"]) {
            queue.add(job).unwrap();
        }

        let err = queue.wait().unwrap_err();
        assert!(err.job.contains("boom.html"));
        match &err.source {
            JobFailure::Panicked(message) => assert!(message.contains("runner blew up on boom.html")),
            other => panic!("expected Panicked, got {other:?}"),
        }
        assert_eq!(err.skipped, 1);
        assert_eq!(*lock(&runner.ran), vec!["ok.html", "boom.html"]);
    }

    /// Holds every job until the test releases it.
    struct GatedRunner {
        started: mpsc::Sender<String>,
        release: Mutex<mpsc::Receiver<()>>,
    }

    impl JobRunner for GatedRunner {
        type Error = Refused;

        fn run(&self, job: &Job) -> Result<(), Refused> {
            let _ = self.started.send(job.artifact.clone());
            let _ = lock(&self.release).recv();
            Ok(())
        }
    }

    #[test]
    fn add_blocks_while_the_queue_is_full() {
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let runner = Arc::new(GatedRunner {
            started: started_tx,
            release: Mutex::new(release_rx),
        });
        let queue = Arc::new(JobQueue::start(runner, 1, 1).unwrap());
        let mut pending = jobs(&["first", "second", "third"]);

        // The worker holds "first"; "second" fills the single queue slot.
        queue.add(pending.remove(0)).unwrap();
        assert_eq!(started_rx.recv_timeout(Duration::from_secs(5)).unwrap(), "first");
        queue.add(pending.remove(0)).unwrap();

        let (added_tx, added_rx) = mpsc::channel();
        let producer = {
            let queue = Arc::clone(&queue);
            let third = pending.remove(0);
            thread::spawn(move || {
                queue.add(third).unwrap();
                added_tx.send(()).unwrap();
            })
        };
        assert!(added_rx.recv_timeout(Duration::from_millis(200)).is_err());

        release_tx.send(()).unwrap();
        added_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        producer.join().unwrap();

        release_tx.send(()).unwrap();
        release_tx.send(()).unwrap();
        assert_eq!(queue.wait().unwrap().completed, 3);
    }

    #[test]
    fn dropping_the_queue_joins_workers() {
        let runner = Arc::new(MockRunner::default());
        {
            let queue = JobQueue::start(Arc::clone(&runner), 4, 1).unwrap();
            queue.add(jobs(&["x"]).remove(0)).unwrap();
            queue.wait().unwrap();
        }
        assert_eq!(Arc::strong_count(&runner), 1);
    }
}
