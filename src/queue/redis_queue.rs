//! Redis lease queue
//!
//! Layout:
//! - `judge:job:<id>`       JSON `JobRecord`, created together with the queue push (enqueue is idempotent)
//! - `judge:queue`          pending job ids
//! - `judge:processing`     delivered job ids (BLMOVE from the queue)
//! - `judge:lease:<id>`     lease key; its TTL is the visibility timeout
//! - `judge:failed`         job ids out of attempts

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::{ConnectionManager, MultiplexedConnection};
use redis::AsyncCommands;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{
    Delivery, FailureOutcome, JobQueue, JobRecord, QueueError, QueueSettings, Reclaimed,
    SubmissionJob,
};
use crate::redis_manager::{get_connection_with_retry, keys, RedisManager};

/// Completed job records are kept this long for inspection
const RECORD_RETENTION_SECS: u64 = 7 * 24 * 3600;
/// BLMOVE treats 0 as "block forever"
const MIN_BLOCK_SECS: f64 = 0.1;

/// Create the record and queue the id in one step, or do nothing if the record exists
const ENQUEUE: &str = r#"
if redis.call("SET", KEYS[1], ARGV[1], "NX") then
    redis.call("RPUSH", KEYS[2], ARGV[2])
    return 1
end
return 0
"#;

pub struct RedisJobQueue {
    client: redis::Client,
    conn: ConnectionManager,
    blocking: Mutex<MultiplexedConnection>,
    settings: QueueSettings,
}

impl RedisJobQueue {
    pub async fn new(redis: &RedisManager, settings: QueueSettings) -> Self {
        Self {
            client: redis.client().clone(),
            conn: redis.connection(),
            blocking: Mutex::new(redis.dedicated_connection().await),
            settings,
        }
    }

    fn lease_secs(&self) -> u64 {
        self.settings.lease.as_secs().max(1)
    }

    async fn load_record(&self, job_id: &str) -> Result<Option<JobRecord>, QueueError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(keys::job(job_id)).await?;
        Ok(raw.map(|raw| serde_json::from_str(&raw)).transpose()?)
    }

    async fn require_record(&self, job_id: &str) -> Result<JobRecord, QueueError> {
        self.load_record(job_id)
            .await?
            .ok_or_else(|| QueueError::UnknownJob(job_id.to_string()))
    }

    /// Take a job off the processing list and either re-queue or park it
    async fn settle(&self, record: &JobRecord, outcome: FailureOutcome) -> Result<(), QueueError> {
        let job_id = record.job.job_id.as_str();
        let json = serde_json::to_string(record)?;
        let target = match outcome {
            FailureOutcome::Retrying { .. } => keys::JOB_QUEUE,
            FailureOutcome::Parked => keys::JOB_FAILED,
        };

        let mut conn = self.conn.clone();
        redis::pipe()
            .atomic()
            .cmd("LREM")
            .arg(keys::JOB_PROCESSING)
            .arg(1)
            .arg(job_id)
            .ignore()
            .cmd("DEL")
            .arg(keys::lease(job_id))
            .ignore()
            .cmd("SET")
            .arg(keys::job(job_id))
            .arg(&json)
            .ignore()
            .cmd("RPUSH")
            .arg(target)
            .arg(job_id)
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn enqueue(&self, job: &SubmissionJob) -> Result<bool, QueueError> {
        let json = serde_json::to_string(&JobRecord::new(job.clone()))?;
        let mut conn = self.conn.clone();

        let created: i64 = redis::Script::new(ENQUEUE)
            .key(keys::job(&job.job_id))
            .key(keys::JOB_QUEUE)
            .arg(&json)
            .arg(&job.job_id)
            .invoke_async(&mut conn)
            .await?;
        if created == 0 {
            debug!(job_id = %job.job_id, "Job already exists, not enqueued again");
            return Ok(false);
        }
        Ok(true)
    }

    async fn dequeue(&self, timeout: Duration) -> Result<Option<Delivery>, QueueError> {
        let job_id: Option<String> = {
            let mut blocking = self.blocking.lock().await;
            let result = redis::cmd("BLMOVE")
                .arg(keys::JOB_QUEUE)
                .arg(keys::JOB_PROCESSING)
                .arg("LEFT")
                .arg("RIGHT")
                .arg(timeout.as_secs_f64().max(MIN_BLOCK_SECS))
                .query_async(&mut *blocking)
                .await;
            match result {
                Ok(job_id) => job_id,
                Err(e) => {
                    warn!("Redis BLMOVE failed: {}. Reconnecting...", e);
                    *blocking = get_connection_with_retry(&self.client).await;
                    return Err(e.into());
                }
            }
        };
        let Some(job_id) = job_id else {
            return Ok(None);
        };

        let mut conn = self.conn.clone();
        let Some(mut record) = self.load_record(&job_id).await? else {
            warn!(job_id = %job_id, "Dropping queued job without a record");
            conn.lrem::<_, _, ()>(keys::JOB_PROCESSING, 1, &job_id).await?;
            return Ok(None);
        };

        record.mark_delivered(&self.settings.worker_id);
        let json = serde_json::to_string(&record)?;
        redis::pipe()
            .atomic()
            .cmd("SET")
            .arg(keys::lease(&job_id))
            .arg(&self.settings.worker_id)
            .arg("EX")
            .arg(self.lease_secs())
            .ignore()
            .cmd("SET")
            .arg(keys::job(&job_id))
            .arg(&json)
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;

        Ok(Some(Delivery {
            attempt: record.attempts,
            job: record.job,
        }))
    }

    async fn extend_lease(&self, job_id: &str) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let renewed: i64 = redis::cmd("EXPIRE")
            .arg(keys::lease(job_id))
            .arg(self.lease_secs())
            .query_async(&mut conn)
            .await?;
        if renewed == 0 {
            return Err(QueueError::LeaseLost(job_id.to_string()));
        }
        Ok(())
    }

    async fn ack(&self, job_id: &str) -> Result<(), QueueError> {
        let mut record = self.require_record(job_id).await?;
        record.mark_completed();
        let json = serde_json::to_string(&record)?;

        let mut conn = self.conn.clone();
        redis::pipe()
            .atomic()
            .cmd("LREM")
            .arg(keys::JOB_PROCESSING)
            .arg(1)
            .arg(job_id)
            .ignore()
            .cmd("DEL")
            .arg(keys::lease(job_id))
            .ignore()
            .cmd("SET")
            .arg(keys::job(job_id))
            .arg(&json)
            .arg("EX")
            .arg(RECORD_RETENTION_SECS)
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn fail(&self, job_id: &str, error: &str) -> Result<FailureOutcome, QueueError> {
        let mut record = self.require_record(job_id).await?;
        let outcome = record.mark_failed(error, self.settings.max_attempts);
        self.settle(&record, outcome).await?;
        Ok(outcome)
    }

    async fn reclaim_expired(&self) -> Result<Reclaimed, QueueError> {
        let mut conn = self.conn.clone();
        let processing: Vec<String> = conn.lrange(keys::JOB_PROCESSING, 0, -1).await?;
        let now = Utc::now();
        let mut reclaimed = Reclaimed::default();

        for job_id in processing {
            let leased: bool = conn.exists(keys::lease(&job_id)).await?;
            if leased {
                continue;
            }

            let Some(mut record) = self.load_record(&job_id).await? else {
                conn.lrem::<_, _, ()>(keys::JOB_PROCESSING, 1, &job_id).await?;
                continue;
            };
            if !record.is_stale(self.settings.lease, now) {
                continue;
            }

            // Another worker's reaper may get there first
            let removed: i64 = conn.lrem(keys::JOB_PROCESSING, 1, &job_id).await?;
            if removed == 0 {
                continue;
            }

            let outcome = record.mark_failed("lease expired", self.settings.max_attempts);
            self.settle(&record, outcome).await?;
            warn!(
                job_id = %job_id,
                attempts = record.attempts,
                ?outcome,
                "Reclaimed job with expired lease"
            );
            reclaimed.push(record.job, outcome);
        }

        Ok(reclaimed)
    }
}
