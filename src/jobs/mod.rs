//! Queue consumer
//!
//! Pulls jobs with bounded concurrency, keeps each job's lease alive while it
//! runs, and acks or fails it when the worker returns.

pub mod judger;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::queue::{Delivery, FailureOutcome, JobQueue, QueueError};
use judger::SubmissionWorker;

/// Pause after a queue error before polling again
const QUEUE_ERROR_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    /// Jobs processed at the same time
    pub concurrency: usize,
    /// Lease length; renewed every half lease while a job runs
    pub lease: Duration,
    /// How long a single dequeue blocks
    pub poll_timeout: Duration,
}

impl ConsumerSettings {
    fn heartbeat_interval(&self) -> Duration {
        (self.lease / 2).max(Duration::from_millis(100))
    }
}

/// Aborts the wrapped task when dropped, including on panic unwinding
struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Consume jobs until `shutdown` resolves, then drain in-flight jobs
pub async fn run_consumer<F>(
    queue: Arc<dyn JobQueue>,
    worker: Arc<SubmissionWorker>,
    settings: ConsumerSettings,
    shutdown: F,
) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send,
{
    let semaphore = Arc::new(Semaphore::new(settings.concurrency.max(1)));
    let mut tasks = JoinSet::new();
    let _reaper = AbortOnDrop(spawn_reaper(
        queue.clone(),
        worker.clone(),
        settings.heartbeat_interval(),
    ));

    info!(
        concurrency = settings.concurrency,
        lease_secs = settings.lease.as_secs(),
        "Consumer started"
    );

    tokio::pin!(shutdown);
    loop {
        while let Some(joined) = tasks.try_join_next() {
            if let Err(e) = joined {
                error!("Job task panicked: {}", e);
            }
        }

        let permit = tokio::select! {
            _ = &mut shutdown => break,
            permit = semaphore.clone().acquire_owned() => permit?,
        };

        let delivery = tokio::select! {
            _ = &mut shutdown => break,
            delivery = queue.dequeue(settings.poll_timeout) => delivery,
        };

        match delivery {
            Ok(Some(delivery)) => {
                debug!(
                    job_id = %delivery.job.job_id,
                    attempt = delivery.attempt,
                    "Job received"
                );
                tasks.spawn(handle_delivery(
                    queue.clone(),
                    worker.clone(),
                    delivery,
                    settings.heartbeat_interval(),
                    permit,
                ));
            }
            Ok(None) => {}
            Err(e) => {
                warn!("Failed to dequeue job: {}", e);
                tokio::time::sleep(QUEUE_ERROR_BACKOFF).await;
            }
        }
    }

    info!("Shutting down, waiting for {} in-flight jobs", tasks.len());
    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            error!("Job task panicked: {}", e);
        }
    }
    info!("Consumer stopped");
    Ok(())
}

async fn handle_delivery(
    queue: Arc<dyn JobQueue>,
    worker: Arc<SubmissionWorker>,
    delivery: Delivery,
    heartbeat_interval: Duration,
    _permit: OwnedSemaphorePermit,
) {
    let job_id = delivery.job.job_id.as_str();
    let submission_id = delivery.job.submission_id.as_str();

    let heartbeat = AbortOnDrop(spawn_lease_heartbeat(
        queue.clone(),
        job_id.to_string(),
        heartbeat_interval,
    ));
    let result = worker.process(submission_id).await;
    drop(heartbeat);

    match result {
        Ok(verdict) => {
            info!(job_id, submission_id, %verdict, "Job completed");
            if let Err(e) = queue.ack(job_id).await {
                error!(job_id, "Failed to ack job: {}", e);
            }
        }
        Err(e) => {
            error!(job_id, submission_id, attempt = delivery.attempt, "Job failed: {}", e);

            // Only the last attempt leaves a verdict behind; a retry judges from scratch
            let last_attempt = match queue.fail(job_id, &e.to_string()).await {
                Ok(FailureOutcome::Retrying { attempt }) => {
                    warn!(job_id, attempt, "Job re-queued for retry");
                    false
                }
                Ok(FailureOutcome::Parked) => {
                    error!(job_id, "Job out of attempts, moved to the failed list");
                    true
                }
                Err(e) => {
                    error!(job_id, "Failed to mark job as failed: {}", e);
                    true
                }
            };

            if last_attempt && !e.verdict_persisted() {
                finalize_abandoned(&worker, submission_id).await;
            }
        }
    }
}

/// Leave an Internal System Error on a submission whose job will not run again
async fn finalize_abandoned(worker: &SubmissionWorker, submission_id: &str) {
    match worker.mark_internal_error(submission_id).await {
        Ok(true) => warn!(submission_id, "Submission marked as internal error"),
        Ok(false) => {}
        Err(e) => error!(submission_id, "Failed to mark internal error: {}", e),
    }
}

/// One reaper pass: settle expired leases and finalize the parked jobs
async fn reap_expired(queue: &dyn JobQueue, worker: &SubmissionWorker) {
    match queue.reclaim_expired().await {
        Ok(reclaimed) if reclaimed.is_empty() => {}
        Ok(reclaimed) => {
            info!(
                requeued = reclaimed.requeued,
                parked = reclaimed.parked.len(),
                "Reclaimed jobs with expired leases"
            );
            for job in &reclaimed.parked {
                finalize_abandoned(worker, &job.submission_id).await;
            }
        }
        Err(e) => warn!("Failed to reclaim expired jobs: {}", e),
    }
}

/// Spawn a background task to keep a job lease alive
fn spawn_lease_heartbeat(
    queue: Arc<dyn JobQueue>,
    job_id: String,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;

            match queue.extend_lease(&job_id).await {
                Ok(()) => {}
                Err(QueueError::LeaseLost(_)) => {
                    warn!(job_id = %job_id, "Lease lost, job may be redelivered");
                    break;
                }
                Err(e) => warn!(job_id = %job_id, "Failed to extend lease: {}", e),
            }
        }
    })
}

/// Spawn a background task that runs a reaper pass every `interval`
fn spawn_reaper(
    queue: Arc<dyn JobQueue>,
    worker: Arc<SubmissionWorker>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            reap_expired(&*queue, &worker).await;
        }
    })
}
