//! In-process queue with the same lease semantics as the Redis queue

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;

use super::{
    Delivery, FailureOutcome, JobQueue, JobRecord, JobState, QueueError, QueueSettings,
    Reclaimed, SubmissionJob,
};

#[derive(Default)]
struct State {
    records: HashMap<String, JobRecord>,
    queue: VecDeque<String>,
    processing: Vec<String>,
    failed: Vec<String>,
    leases: HashMap<String, Instant>,
}

impl State {
    fn settle(&mut self, record: JobRecord, outcome: FailureOutcome) {
        let job_id = record.job.job_id.clone();
        self.processing.retain(|id| id != &job_id);
        self.leases.remove(&job_id);
        match outcome {
            FailureOutcome::Retrying { .. } => self.queue.push_back(job_id.clone()),
            FailureOutcome::Parked => self.failed.push(job_id.clone()),
        }
        self.records.insert(job_id, record);
    }
}

pub struct MemoryJobQueue {
    settings: QueueSettings,
    state: Mutex<State>,
}

impl MemoryJobQueue {
    pub fn new(settings: QueueSettings) -> Self {
        Self {
            settings,
            state: Mutex::new(State::default()),
        }
    }

    pub fn record(&self, job_id: &str) -> Option<JobRecord> {
        self.state.lock().unwrap().records.get(job_id).cloned()
    }

    pub fn pending(&self) -> usize {
        self.state.lock().unwrap().queue.len()
    }

    pub fn failed(&self) -> Vec<String> {
        self.state.lock().unwrap().failed.clone()
    }

    /// Drop a lease as if its TTL ran out and the record went idle
    pub fn expire_lease(&self, job_id: &str) {
        let mut state = self.state.lock().unwrap();
        state.leases.remove(job_id);
        if let Some(record) = state.records.get_mut(job_id) {
            record.updated_at = Utc::now() - chrono::Duration::days(1);
        }
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn enqueue(&self, job: &SubmissionJob) -> Result<bool, QueueError> {
        let mut state = self.state.lock().unwrap();
        if state.records.contains_key(&job.job_id) {
            return Ok(false);
        }
        state
            .records
            .insert(job.job_id.clone(), JobRecord::new(job.clone()));
        state.queue.push_back(job.job_id.clone());
        Ok(true)
    }

    async fn dequeue(&self, timeout: Duration) -> Result<Option<Delivery>, QueueError> {
        {
            let mut state = self.state.lock().unwrap();
            if let Some(job_id) = state.queue.pop_front() {
                state.processing.push(job_id.clone());
                state
                    .leases
                    .insert(job_id.clone(), Instant::now() + self.settings.lease);
                let record = state
                    .records
                    .get_mut(&job_id)
                    .ok_or_else(|| QueueError::UnknownJob(job_id.clone()))?;
                record.mark_delivered(&self.settings.worker_id);
                return Ok(Some(Delivery {
                    job: record.job.clone(),
                    attempt: record.attempts,
                }));
            }
        }
        tokio::time::sleep(timeout.min(Duration::from_millis(10))).await;
        Ok(None)
    }

    async fn extend_lease(&self, job_id: &str) -> Result<(), QueueError> {
        let mut state = self.state.lock().unwrap();
        match state.leases.get_mut(job_id) {
            Some(deadline) => {
                *deadline = Instant::now() + self.settings.lease;
                Ok(())
            }
            None => Err(QueueError::LeaseLost(job_id.to_string())),
        }
    }

    async fn ack(&self, job_id: &str) -> Result<(), QueueError> {
        let mut state = self.state.lock().unwrap();
        state.processing.retain(|id| id != job_id);
        state.leases.remove(job_id);
        let record = state
            .records
            .get_mut(job_id)
            .ok_or_else(|| QueueError::UnknownJob(job_id.to_string()))?;
        record.mark_completed();
        Ok(())
    }

    async fn fail(&self, job_id: &str, error: &str) -> Result<FailureOutcome, QueueError> {
        let mut state = self.state.lock().unwrap();
        let mut record = state
            .records
            .get(job_id)
            .cloned()
            .ok_or_else(|| QueueError::UnknownJob(job_id.to_string()))?;
        let outcome = record.mark_failed(error, self.settings.max_attempts);
        state.settle(record, outcome);
        Ok(outcome)
    }

    async fn reclaim_expired(&self) -> Result<Reclaimed, QueueError> {
        let mut state = self.state.lock().unwrap();
        let now = Instant::now();
        let expired: Vec<String> = state
            .processing
            .iter()
            .filter(|id| state.leases.get(*id).map_or(true, |deadline| *deadline <= now))
            .cloned()
            .collect();

        let mut reclaimed = Reclaimed::default();
        for job_id in expired {
            let Some(mut record) = state.records.get(&job_id).cloned() else {
                continue;
            };
            if !record.is_stale(self.settings.lease, Utc::now()) {
                continue;
            }
            let outcome = record.mark_failed("lease expired", self.settings.max_attempts);
            reclaimed.push(record.job.clone(), outcome);
            state.settle(record, outcome);
        }
        Ok(reclaimed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;

    fn queue(max_attempts: u32) -> MemoryJobQueue {
        MemoryJobQueue::new(QueueSettings {
            worker_id: "w1".into(),
            lease: Duration::from_secs(60),
            max_attempts,
        })
    }

    #[tokio::test]
    async fn test_enqueue_is_idempotent() {
        let queue = queue(3);
        let job = SubmissionJob::for_submission("s1");

        assert!(queue.enqueue(&job).await.unwrap());
        assert!(!queue.enqueue(&job).await.unwrap());
        assert_eq!(queue.pending(), 1);
    }

    #[tokio::test]
    async fn test_delivered_to_one_consumer() {
        let queue = queue(3);
        queue
            .enqueue(&SubmissionJob::for_submission("s1"))
            .await
            .unwrap();

        let delivery = queue.dequeue(Duration::from_millis(1)).await.unwrap().unwrap();
        assert_eq!(delivery.attempt, 1);
        assert!(queue.dequeue(Duration::from_millis(1)).await.unwrap().is_none());

        assert_ok!(queue.ack(&delivery.job.job_id).await);
        assert_eq!(
            queue.record(&delivery.job.job_id).unwrap().state,
            JobState::Completed
        );
        assert!(queue.extend_lease(&delivery.job.job_id).await.is_err());
    }

    #[tokio::test]
    async fn test_fail_retries_then_parks() {
        let queue = queue(2);
        let job = SubmissionJob::for_submission("s1");
        queue.enqueue(&job).await.unwrap();

        queue.dequeue(Duration::from_millis(1)).await.unwrap().unwrap();
        assert_eq!(
            queue.fail(&job.job_id, "boom").await.unwrap(),
            FailureOutcome::Retrying { attempt: 1 }
        );

        let again = queue.dequeue(Duration::from_millis(1)).await.unwrap().unwrap();
        assert_eq!(again.attempt, 2);
        assert_eq!(
            queue.fail(&job.job_id, "boom").await.unwrap(),
            FailureOutcome::Parked
        );
        assert_eq!(queue.failed(), vec![job.job_id.clone()]);
        assert_eq!(queue.pending(), 0);
    }

    #[tokio::test]
    async fn test_expired_lease_is_redelivered() {
        let queue = queue(3);
        let job = SubmissionJob::for_submission("s1");
        queue.enqueue(&job).await.unwrap();
        queue.dequeue(Duration::from_millis(1)).await.unwrap().unwrap();

        // Live lease: nothing to reclaim
        assert!(queue.reclaim_expired().await.unwrap().is_empty());

        queue.expire_lease(&job.job_id);
        let reclaimed = queue.reclaim_expired().await.unwrap();
        assert_eq!(reclaimed.requeued, 1);
        assert!(reclaimed.parked.is_empty());

        let redelivered = queue.dequeue(Duration::from_millis(1)).await.unwrap().unwrap();
        assert_eq!(redelivered.job, job);
        assert_eq!(redelivered.attempt, 2);
    }

    #[tokio::test]
    async fn test_expired_lease_out_of_attempts_is_parked() {
        let queue = queue(1);
        let job = SubmissionJob::for_submission("s1");
        queue.enqueue(&job).await.unwrap();
        queue.dequeue(Duration::from_millis(1)).await.unwrap().unwrap();

        queue.expire_lease(&job.job_id);
        let reclaimed = queue.reclaim_expired().await.unwrap();

        assert_eq!(reclaimed.requeued, 0);
        assert_eq!(reclaimed.parked, vec![job.clone()]);
        assert_eq!(queue.failed(), vec![job.job_id.clone()]);
        assert_eq!(queue.record(&job.job_id).unwrap().state, JobState::Failed);
    }
}
