//! Redis Manager - Centralized Redis connection handling
//!
//! This module owns:
//! - The shared auto-reconnecting connection used by the queue, store and scoreboard
//! - Dedicated connections for blocking commands (BLMOVE)
//! - Worker presence registration and its heartbeat
//! - The key layout

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use redis::aio::{ConnectionManager, MultiplexedConnection};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Redis key constants
pub mod keys {
    /// Worker presence key prefix
    pub const WORKER_PREFIX: &str = "judge:worker:";

    /// Pending job ids
    pub const JOB_QUEUE: &str = "judge:queue";

    /// Job ids currently leased to a worker
    pub const JOB_PROCESSING: &str = "judge:processing";

    /// Job ids that exhausted their attempts
    pub const JOB_FAILED: &str = "judge:failed";

    /// Job record prefix
    pub const JOB_PREFIX: &str = "judge:job:";

    /// Job lease prefix (key expiry is the lease)
    pub const LEASE_PREFIX: &str = "judge:lease:";

    /// Submission progress channel (for pub/sub)
    pub const PROGRESS_CHANNEL: &str = "judge:progress";

    pub const SUBMISSION_PREFIX: &str = "submission:";
    pub const PROBLEM_PREFIX: &str = "problem:";
    pub const CONTEST_PREFIX: &str = "contest:";

    pub fn worker(worker_id: &str) -> String {
        format!("{}{}", WORKER_PREFIX, worker_id)
    }

    pub fn job(job_id: &str) -> String {
        format!("{}{}", JOB_PREFIX, job_id)
    }

    pub fn lease(job_id: &str) -> String {
        format!("{}{}", LEASE_PREFIX, job_id)
    }

    pub fn submission(submission_id: &str) -> String {
        format!("{}{}", SUBMISSION_PREFIX, submission_id)
    }

    pub fn problem(problem_id: &str) -> String {
        format!("{}{}", PROBLEM_PREFIX, problem_id)
    }

    pub fn contest(contest_id: &str) -> String {
        format!("{}{}", CONTEST_PREFIX, contest_id)
    }

    pub fn standing(contest_id: &str, user_id: &str) -> String {
        format!("{}{}:standing:{}", CONTEST_PREFIX, contest_id, user_id)
    }

    pub fn standing_lock(contest_id: &str, user_id: &str) -> String {
        format!("{}{}:lock:{}", CONTEST_PREFIX, contest_id, user_id)
    }

    /// Marks a submission as already counted in its contest
    pub fn scored(contest_id: &str, submission_id: &str) -> String {
        format!("{}{}:scored:{}", CONTEST_PREFIX, contest_id, submission_id)
    }
}

const WORKER_PRESENCE_TTL_SECS: u64 = 60;

/// Shared Redis connections for one worker process
pub struct RedisManager {
    worker_id: String,
    client: redis::Client,
    conn: ConnectionManager,
    presence_handle: JoinHandle<()>,
}

impl RedisManager {
    /// Connect to Redis and register this worker.
    ///
    /// This will:
    /// 1. Connect to Redis (retrying until it answers)
    /// 2. Register `judge:worker:<id>` with a TTL
    /// 3. Start a background task to keep the registration alive
    pub async fn connect(redis_url: &str, worker_id: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url).context("Failed to create Redis client")?;

        let conn = get_manager_with_retry(&client).await;
        info!("Connected to Redis at {}", redis_url);

        let mut registration = get_connection_with_retry(&client).await;
        redis::cmd("SET")
            .arg(keys::worker(worker_id))
            .arg(Utc::now().to_rfc3339())
            .arg("EX")
            .arg(WORKER_PRESENCE_TTL_SECS)
            .query_async::<()>(&mut registration)
            .await
            .context("Failed to register worker")?;
        info!(
            "Registered worker_id={} (presence {}s)",
            worker_id, WORKER_PRESENCE_TTL_SECS
        );

        let presence_handle = spawn_presence_heartbeat(client.clone(), worker_id.to_string());

        Ok(Self {
            worker_id: worker_id.to_string(),
            client,
            conn,
            presence_handle,
        })
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn client(&self) -> &redis::Client {
        &self.client
    }

    /// Shared auto-reconnecting connection
    pub fn connection(&self) -> ConnectionManager {
        self.conn.clone()
    }

    /// A fresh connection for commands that block the connection (BLMOVE)
    pub async fn dedicated_connection(&self) -> MultiplexedConnection {
        get_connection_with_retry(&self.client).await
    }
}

impl Drop for RedisManager {
    fn drop(&mut self) {
        self.presence_handle.abort();
    }
}

/// Get a Redis connection with retry logic
pub async fn get_connection_with_retry(client: &redis::Client) -> MultiplexedConnection {
    loop {
        match client.get_multiplexed_async_connection().await {
            Ok(conn) => return conn,
            Err(e) => {
                warn!(
                    "Failed to connect to Redis: {}. Retrying in 3 seconds...",
                    e
                );
                tokio::time::sleep(Duration::from_secs(3)).await;
            }
        }
    }
}

async fn get_manager_with_retry(client: &redis::Client) -> ConnectionManager {
    loop {
        match ConnectionManager::new(client.clone()).await {
            Ok(conn) => return conn,
            Err(e) => {
                warn!(
                    "Failed to connect to Redis: {}. Retrying in 3 seconds...",
                    e
                );
                tokio::time::sleep(Duration::from_secs(3)).await;
            }
        }
    }
}

/// Spawn a background task to keep the worker registration alive
fn spawn_presence_heartbeat(client: redis::Client, worker_id: String) -> JoinHandle<()> {
    tokio::spawn(async move {
        let interval = Duration::from_secs(WORKER_PRESENCE_TTL_SECS / 2);
        let key = keys::worker(&worker_id);

        loop {
            tokio::time::sleep(interval).await;

            let mut conn = get_connection_with_retry(&client).await;
            if let Err(e) = redis::cmd("SET")
                .arg(&key)
                .arg(Utc::now().to_rfc3339())
                .arg("EX")
                .arg(WORKER_PRESENCE_TTL_SECS)
                .query_async::<()>(&mut conn)
                .await
            {
                warn!("Failed to refresh worker presence {}: {}", worker_id, e);
            }
        }
    })
}
