//! Worker configuration
//!
//! Loaded once at startup from the environment. Invalid values are a startup
//! error rather than a silent fallback to the default.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Result};
use uuid::Uuid;

use crate::engine::sandbox::SandboxSettings;
use crate::jobs::ConsumerSettings;
use crate::queue::QueueSettings;

/// How long one dequeue call blocks before the consumer loop re-checks shutdown
const POLL_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub redis_url: String,
    pub worker_id: String,
    pub concurrency: usize,
    pub job_lease: Duration,
    pub max_attempts: u32,
    /// None uses the platform default Docker socket
    pub docker_socket: Option<String>,
    pub sandbox: SandboxSettings,
    /// Optional TOML file overriding image references
    pub languages_config: Option<PathBuf>,
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = SandboxSettings::default();

        let concurrency: usize = parse_var(&lookup, "WORKER_CONCURRENCY", 1)?;
        if concurrency == 0 {
            bail!("WORKER_CONCURRENCY must be at least 1");
        }
        let max_attempts: u32 = parse_var(&lookup, "JOB_MAX_ATTEMPTS", 3)?;
        if max_attempts == 0 {
            bail!("JOB_MAX_ATTEMPTS must be at least 1");
        }

        let sandbox = SandboxSettings {
            pids_limit: parse_var(&lookup, "SANDBOX_PIDS_LIMIT", defaults.pids_limit)?,
            user: match lookup("SANDBOX_USER") {
                Some(user) if user.trim().is_empty() => None,
                Some(user) => Some(user),
                None => defaults.user,
            },
            grace: Duration::from_secs(parse_var(
                &lookup,
                "SANDBOX_GRACE_SECS",
                defaults.grace.as_secs(),
            )?),
            auto_remove: parse_var(&lookup, "SANDBOX_AUTO_REMOVE", defaults.auto_remove)?,
            tmpfs_size: lookup("SANDBOX_TMPFS_SIZE").unwrap_or(defaults.tmpfs_size),
        };

        Ok(Self {
            redis_url: lookup("REDIS_URL").unwrap_or_else(|| "redis://localhost:6379".into()),
            worker_id: lookup("WORKER_ID")
                .unwrap_or_else(|| format!("worker-{}", &Uuid::new_v4().simple().to_string()[..8])),
            concurrency,
            job_lease: Duration::from_secs(parse_var(&lookup, "JOB_LEASE_SECS", 120)?),
            max_attempts,
            docker_socket: lookup("DOCKER_SOCKET"),
            sandbox,
            languages_config: lookup("LANGUAGES_CONFIG").map(PathBuf::from),
        })
    }

    pub fn queue_settings(&self) -> QueueSettings {
        QueueSettings {
            worker_id: self.worker_id.clone(),
            lease: self.job_lease,
            max_attempts: self.max_attempts,
        }
    }

    pub fn consumer_settings(&self) -> ConsumerSettings {
        ConsumerSettings {
            concurrency: self.concurrency,
            lease: self.job_lease,
            poll_timeout: POLL_TIMEOUT,
        }
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => match raw.trim().parse() {
            Ok(value) => Ok(value),
            Err(e) => bail!("Invalid {}={:?}: {}", key, raw, e),
        },
        None => Ok(default),
    }
}
