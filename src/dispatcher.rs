//! Fixed-size worker pool.
//!
//! All jobs are pushed into one FIFO channel up front and the sending side is
//! dropped. Each of the `parallel` workers then pulls jobs without blocking
//! until the channel is drained, so a worker never waits for more work. A job
//! moves into its worker by value and comes back through the worker's join
//! handle, which makes the worker the only writer of its status.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::future::join_all;
use futures::FutureExt;

use crate::executor::Executor;
use crate::job::{Job, JobStatus, Outcome};
use crate::log::{Logger, Severity};

pub struct Dispatcher {
    executor: Arc<Executor>,
    parallel: usize,
}

impl Dispatcher {
    /// `parallel` is clamped to at least one worker.
    pub fn new(executor: Arc<Executor>, parallel: usize) -> Self {
        Self {
            executor,
            parallel: parallel.max(1),
        }
    }

    /// Runs every job and returns them in input order with their final status.
    pub async fn run(&self, jobs: Vec<Job>) -> Vec<Job> {
        let logger = Arc::clone(self.executor.logger());
        let (queue_tx, queue_rx) = flume::unbounded();
        for job in jobs {
            // Cannot fail: the receiver is alive.
            let _ = queue_tx.send(job);
        }
        drop(queue_tx);

        let workers: Vec<_> = (0..self.parallel)
            .map(|worker| spawn_worker(worker, queue_rx.clone(), Arc::clone(&self.executor)))
            .collect();
        drop(queue_rx);

        let mut finished = Vec::new();
        for result in join_all(workers).await {
            match result {
                Ok(jobs) => finished.extend(jobs),
                Err(e) => logger.log(Severity::Error, format!("-::Worker died: {}", e)),
            }
        }
        finished.sort_by_key(|job| job.index);
        logger.log(Severity::Info, "-::Done processing all servers");
        finished
    }
}

/// Spawns a worker that drains `queue`. Returns the jobs it processed.
pub fn spawn_worker(
    worker: usize,
    queue: flume::Receiver<Job>,
    executor: Arc<Executor>,
) -> tokio::task::JoinHandle<Vec<Job>> {
    tokio::spawn(async move {
        let logger = Arc::clone(executor.logger());
        let mut done = Vec::new();
        while let Ok(mut job) = queue.try_recv() {
            logger.log(
                Severity::Debug,
                format!("{}::Picked up by worker {}", job.server, worker),
            );
            let outcome = AssertUnwindSafe(executor.run_job(&job))
                .catch_unwind()
                .await;
            job.status = match outcome {
                Ok(outcome) => {
                    if let Outcome::Failed(e) = &outcome {
                        log_failure(&logger, &job.server, e, e);
                    }
                    outcome.status()
                }
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    log_failure(&logger, &job.server, &message, &message);
                    JobStatus::Error
                }
            };
            done.push(job);
        }
        logger.log(
            Severity::Debug,
            format!("-::Worker {} found the queue empty", worker),
        );
        done
    })
}

fn log_failure(
    logger: &Logger,
    server: &str,
    message: &dyn std::fmt::Display,
    diagnostic: &dyn std::fmt::Debug,
) {
    logger.log(Severity::Error, format!("{}::run_job::{}", server, message));
    logger.log(Severity::Error, format!("{}::run_job::{:?}", server, diagnostic));
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("panicked: {}", message)
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("panicked: {}", message)
    } else {
        "panicked".to_string()
    }
}

/// Warns about every job that did not end up `Ok`. Returns how many there were.
pub fn report_summary(jobs: &[Job], logger: &Logger) -> usize {
    let mut missing = 0;
    for job in jobs.iter().filter(|job| job.status != JobStatus::Ok) {
        logger.log(Severity::Warn, format!("{}::No job result", job.server));
        missing += 1;
    }
    missing
}
