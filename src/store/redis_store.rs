use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use tracing::debug;

use super::{StoreError, SubmissionStore};
use crate::core::models::{Problem, Submission};
use crate::redis_manager::{keys, RedisManager};

/// Submission documents in Redis, with every save published on `judge:progress`
#[derive(Clone)]
pub struct RedisSubmissionStore {
    conn: ConnectionManager,
}

impl RedisSubmissionStore {
    pub fn new(redis: &RedisManager) -> Self {
        Self {
            conn: redis.connection(),
        }
    }

    async fn load<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(key).await?;
        Ok(raw.map(|raw| serde_json::from_str(&raw)).transpose()?)
    }
}

#[async_trait]
impl SubmissionStore for RedisSubmissionStore {
    async fn load_submission(&self, id: &str) -> Result<Option<Submission>, StoreError> {
        self.load(&keys::submission(id)).await
    }

    async fn load_problem(&self, id: &str) -> Result<Option<Problem>, StoreError> {
        self.load(&keys::problem(id)).await
    }

    async fn save_submission(&self, submission: &Submission) -> Result<(), StoreError> {
        let json = serde_json::to_string(submission)?;
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(keys::submission(&submission.id), &json)
            .await?;

        let progress = serde_json::json!({
            "submission_id": submission.id,
            "status": submission.status,
            "label": submission.status.to_string(),
        });

        // Publish errors are ignored: there may be no subscribers and polling reads the document
        if let Err(e) = conn
            .publish::<_, _, ()>(keys::PROGRESS_CHANNEL, progress.to_string())
            .await
        {
            debug!(submission_id = %submission.id, "Failed to publish progress: {}", e);
        }
        Ok(())
    }
}
