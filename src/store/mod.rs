//! Persisted submission and problem documents
//!
//! The worker is the only writer of submission results. Every save is a full
//! overwrite of the document, so a redelivered job can judge from scratch
//! without merging into what an earlier attempt left behind.

#[cfg(test)]
pub mod memory;
pub mod redis_store;

use async_trait::async_trait;
use thiserror::Error;

use crate::core::models::{Problem, Submission};

pub use redis_store::RedisSubmissionStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Invalid document: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[async_trait]
pub trait SubmissionStore: Send + Sync {
    async fn load_submission(&self, id: &str) -> Result<Option<Submission>, StoreError>;

    async fn load_problem(&self, id: &str) -> Result<Option<Problem>, StoreError>;

    /// Atomically replace the stored submission document
    async fn save_submission(&self, submission: &Submission) -> Result<(), StoreError>;
}
