//! Durable at-least-once job queue with visibility leases
//!
//! A delivered job is leased to one worker. The lease is renewed while the job
//! runs; if the worker dies the lease expires and `reclaim_expired` makes the
//! job deliverable again.

#[cfg(test)]
pub mod memory;
pub mod redis_queue;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use redis_queue::RedisJobQueue;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Invalid job record: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unknown job: {0}")]
    UnknownJob(String),

    #[error("Lease lost for job {0}")]
    LeaseLost(String),
}

/// One unit of work: judge a submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionJob {
    pub job_id: String,
    pub submission_id: String,
}

impl SubmissionJob {
    /// Job ids are derived from the submission id, so producer retries collapse
    pub fn for_submission(submission_id: impl Into<String>) -> Self {
        let submission_id = submission_id.into();
        Self {
            job_id: format!("submission-{}", submission_id),
            submission_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Active,
    Completed,
    Failed,
}

/// Persisted bookkeeping for a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub job: SubmissionJob,
    pub state: JobState,
    /// Deliveries so far
    pub attempts: u32,
    pub enqueued_at: DateTime<Utc>,
    /// Last state transition
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub worker_id: Option<String>,
    #[serde(default)]
    pub last_error: Option<String>,
}

impl JobRecord {
    pub fn new(job: SubmissionJob) -> Self {
        let now = Utc::now();
        Self {
            job,
            state: JobState::Queued,
            attempts: 0,
            enqueued_at: now,
            updated_at: now,
            worker_id: None,
            last_error: None,
        }
    }

    fn transition(&mut self, state: JobState) {
        self.state = state;
        self.updated_at = Utc::now();
    }

    pub fn mark_delivered(&mut self, worker_id: &str) {
        self.attempts += 1;
        self.worker_id = Some(worker_id.to_string());
        self.transition(JobState::Active);
    }

    pub fn mark_completed(&mut self) {
        self.transition(JobState::Completed);
    }

    /// Record a failed delivery and decide whether it is retried
    pub fn mark_failed(&mut self, error: &str, max_attempts: u32) -> FailureOutcome {
        self.last_error = Some(error.to_string());
        if self.attempts < max_attempts {
            self.transition(JobState::Queued);
            FailureOutcome::Retrying {
                attempt: self.attempts,
            }
        } else {
            self.transition(JobState::Failed);
            FailureOutcome::Parked
        }
    }

    /// Whether a job without a live lease has been idle for longer than `lease`
    pub fn is_stale(&self, lease: Duration, now: DateTime<Utc>) -> bool {
        match chrono::Duration::from_std(lease)
            .ok()
            .and_then(|lease| self.updated_at.checked_add_signed(lease))
        {
            Some(deadline) => deadline <= now,
            None => false,
        }
    }
}

/// A job handed to this worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub job: SubmissionJob,
    /// 1 for the first delivery
    pub attempt: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Re-queued for another delivery
    Retrying { attempt: u32 },
    /// Out of attempts, left on the failed list
    Parked,
}

/// Outcome of one pass over expired leases
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reclaimed {
    /// Returned to the queue for another delivery
    pub requeued: usize,
    /// Out of attempts; their submissions still need a terminal verdict
    pub parked: Vec<SubmissionJob>,
}

impl Reclaimed {
    pub fn push(&mut self, job: SubmissionJob, outcome: FailureOutcome) {
        match outcome {
            FailureOutcome::Retrying { .. } => self.requeued += 1,
            FailureOutcome::Parked => self.parked.push(job),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.requeued == 0 && self.parked.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct QueueSettings {
    pub worker_id: String,
    pub lease: Duration,
    pub max_attempts: u32,
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Returns false if a job with this id already exists
    async fn enqueue(&self, job: &SubmissionJob) -> Result<bool, QueueError>;

    /// Wait up to `timeout` for the next job
    async fn dequeue(&self, timeout: Duration) -> Result<Option<Delivery>, QueueError>;

    async fn extend_lease(&self, job_id: &str) -> Result<(), QueueError>;

    async fn ack(&self, job_id: &str) -> Result<(), QueueError>;

    async fn fail(&self, job_id: &str, error: &str) -> Result<FailureOutcome, QueueError>;

    /// Settle jobs whose lease expired: re-queue them, or park the ones out of attempts
    async fn reclaim_expired(&self) -> Result<Reclaimed, QueueError>;
}
