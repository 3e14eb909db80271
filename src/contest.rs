//! Contest standings
//!
//! ICPC-style bookkeeping per (contest, user): the first Accepted submission on a
//! problem scores one point, with a penalty of the minutes elapsed since the
//! contest started plus a fixed charge for every rejected attempt before it.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::core::models::{Submission, SubmissionKind};
use crate::core::verdict::Verdict;
use crate::redis_manager::{keys, RedisManager};

/// Penalty charged for each rejected attempt before the first Accepted
pub const PENALTY_PER_REJECTION_MINUTES: i64 = 20;

const LOCK_TTL_MS: u64 = 5_000;
const LOCK_RETRIES: u32 = 50;
const LOCK_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Deletes the lock only if it still holds our token
const RELEASE_LOCK: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
end
return 0
"#;

#[derive(Debug, Error)]
pub enum ContestError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Invalid contest document: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Standing is locked: {0}")]
    Busy(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProblemScore {
    /// Rejected attempts before the first Accepted
    pub attempts: u32,
    pub accepted_at: Option<DateTime<Utc>>,
    pub points: u32,
    pub penalty_minutes: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContestStanding {
    pub contest_id: String,
    pub user_id: String,
    #[serde(default)]
    pub problems: BTreeMap<String, ProblemScore>,
    #[serde(default)]
    pub total_points: u32,
    /// Lower is better
    #[serde(default)]
    pub total_penalty: i64,
    /// Tie-breaker
    #[serde(default)]
    pub last_accepted_at: Option<DateTime<Utc>>,
}

impl ContestStanding {
    pub fn new(contest_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            contest_id: contest_id.into(),
            user_id: user_id.into(),
            problems: BTreeMap::new(),
            total_points: 0,
            total_penalty: 0,
            last_accepted_at: None,
        }
    }

    /// Apply one judged submission. Returns whether the standing changed.
    pub fn apply(
        &mut self,
        problem_id: &str,
        verdict: Verdict,
        submitted_at: DateTime<Utc>,
        contest_start: Option<DateTime<Utc>>,
    ) -> bool {
        if !counts_toward_standing(verdict) {
            return false;
        }

        let score = self.problems.entry(problem_id.to_string()).or_default();
        if score.accepted_at.is_some() {
            return false;
        }

        if verdict != Verdict::Accepted {
            score.attempts += 1;
            return true;
        }

        let elapsed = contest_start
            .map(|start| (submitted_at - start).num_minutes().max(0))
            .unwrap_or(0);
        let penalty = elapsed + PENALTY_PER_REJECTION_MINUTES * i64::from(score.attempts);

        score.points = 1;
        score.accepted_at = Some(submitted_at);
        score.penalty_minutes = penalty;

        self.total_points += 1;
        self.total_penalty += penalty;
        self.last_accepted_at = Some(submitted_at);
        true
    }
}

/// Compilation errors and infrastructure failures are not charged
fn counts_toward_standing(verdict: Verdict) -> bool {
    verdict == Verdict::Accepted || (verdict.is_user_fault() && verdict != Verdict::CompilationError)
}

/// Contest metadata owned by the contest service; only the start time is read
#[derive(Debug, Default, Deserialize)]
struct ContestInfo {
    #[serde(default)]
    start_time: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait ContestScoreboard: Send + Sync {
    /// Apply a judged `submit` to its contest standing.
    ///
    /// Recording the same submission twice is a no-op. Returns whether the
    /// standing changed.
    async fn record(&self, submission: &Submission) -> Result<bool, ContestError>;
}

pub struct RedisScoreboard {
    conn: ConnectionManager,
}

impl RedisScoreboard {
    pub fn new(redis: &RedisManager) -> Self {
        Self {
            conn: redis.connection(),
        }
    }

    async fn acquire(&self, lock_key: &str, token: &str) -> Result<(), ContestError> {
        let mut conn = self.conn.clone();
        for _ in 0..LOCK_RETRIES {
            let claimed: Option<String> = redis::cmd("SET")
                .arg(lock_key)
                .arg(token)
                .arg("NX")
                .arg("PX")
                .arg(LOCK_TTL_MS)
                .query_async(&mut conn)
                .await?;
            if claimed.is_some() {
                return Ok(());
            }
            tokio::time::sleep(LOCK_RETRY_DELAY).await;
        }
        Err(ContestError::Busy(lock_key.to_string()))
    }

    async fn release(&self, lock_key: &str, token: &str) {
        let mut conn = self.conn.clone();
        let released: Result<i64, _> = redis::Script::new(RELEASE_LOCK)
            .key(lock_key)
            .arg(token)
            .invoke_async(&mut conn)
            .await;
        if let Err(e) = released {
            warn!("Failed to release standing lock {}: {}", lock_key, e);
        }
    }

    async fn apply_locked(
        &self,
        contest_id: &str,
        verdict: Verdict,
        submission: &Submission,
    ) -> Result<bool, ContestError> {
        let mut conn = self.conn.clone();
        let scored_key = keys::scored(contest_id, &submission.id);
        if conn.exists::<_, bool>(&scored_key).await? {
            return Ok(false);
        }

        let info: Option<String> = conn.get(keys::contest(contest_id)).await?;
        let info: ContestInfo = match info {
            Some(raw) => serde_json::from_str(&raw)?,
            None => {
                warn!(contest_id, "Contest document missing, penalty counted from 0");
                ContestInfo::default()
            }
        };

        let standing_key = keys::standing(contest_id, &submission.user_id);
        let raw: Option<String> = conn.get(&standing_key).await?;
        let mut standing = match raw {
            Some(raw) => serde_json::from_str(&raw)?,
            None => ContestStanding::new(contest_id, &submission.user_id),
        };

        let changed = standing.apply(
            &submission.problem_id,
            verdict,
            submission.created_at,
            info.start_time,
        );

        let json = serde_json::to_string(&standing)?;
        redis::pipe()
            .atomic()
            .cmd("SET")
            .arg(&standing_key)
            .arg(&json)
            .ignore()
            .cmd("SET")
            .arg(&scored_key)
            .arg(verdict.to_string())
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;

        Ok(changed)
    }
}

#[async_trait]
impl ContestScoreboard for RedisScoreboard {
    async fn record(&self, submission: &Submission) -> Result<bool, ContestError> {
        let (Some(contest_id), Some(verdict)) =
            (submission.contest_id.as_deref(), submission.verdict())
        else {
            return Ok(false);
        };
        if submission.kind != SubmissionKind::Submit {
            return Ok(false);
        }

        let lock_key = keys::standing_lock(contest_id, &submission.user_id);
        let token = Uuid::new_v4().to_string();
        self.acquire(&lock_key, &token).await?;
        let result = self.apply_locked(contest_id, verdict, submission).await;
        self.release(&lock_key, &token).await;

        match &result {
            Ok(true) => info!(
                submission_id = %submission.id,
                contest_id,
                %verdict,
                "Contest standing updated"
            ),
            Ok(false) => debug!(submission_id = %submission.id, contest_id, "Contest standing unchanged"),
            Err(_) => {}
        }
        result
    }
}
