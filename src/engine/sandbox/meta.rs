//! Sandbox output header parser
//!
//! Every execution image prints a fixed header before the program output:
//!
//! ```text
//! EXECUTED_SUCCESSFULLY   <- status token
//! 0.132                   <- elapsed time, seconds
//! 10240                   <- peak resident memory, KB
//! ...program output...
//! ```

use thiserror::Error;

/// Status reported by the image's own watchdog
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxStatus {
    CompilationError,
    ExecutedSuccessfully,
    TimeLimitExceeded,
    MemoryLimitExceeded,
    RuntimeError,
}

impl SandboxStatus {
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "COMPILATION_ERROR" => Some(SandboxStatus::CompilationError),
            "EXECUTED_SUCCESSFULLY" => Some(SandboxStatus::ExecutedSuccessfully),
            "TIME_LIMIT_EXCEEDED" => Some(SandboxStatus::TimeLimitExceeded),
            "MEMORY_LIMIT_EXCEEDED" => Some(SandboxStatus::MemoryLimitExceeded),
            "RUNTIME_ERROR" => Some(SandboxStatus::RuntimeError),
            _ => None,
        }
    }

    pub fn token(&self) -> &'static str {
        match self {
            SandboxStatus::CompilationError => "COMPILATION_ERROR",
            SandboxStatus::ExecutedSuccessfully => "EXECUTED_SUCCESSFULLY",
            SandboxStatus::TimeLimitExceeded => "TIME_LIMIT_EXCEEDED",
            SandboxStatus::MemoryLimitExceeded => "MEMORY_LIMIT_EXCEEDED",
            SandboxStatus::RuntimeError => "RUNTIME_ERROR",
        }
    }
}

/// Parsed sandbox output
#[derive(Debug, Clone, PartialEq)]
pub struct SandboxMeta {
    pub status: SandboxStatus,
    /// Seconds
    pub time_secs: f64,
    /// KB
    pub memory_kb: u64,
    /// Everything after the header
    pub output: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MetaError {
    #[error("sandbox produced no output")]
    Empty,
    #[error("unknown sandbox status token: {0:?}")]
    UnknownToken(String),
    #[error("malformed {field} line: {value:?}")]
    Malformed { field: &'static str, value: String },
}

/// Parse the raw combined output of an execution container
pub fn parse_meta(raw: &str) -> Result<SandboxMeta, MetaError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(MetaError::Empty);
    }

    let mut lines = trimmed.lines();

    let token = lines.next().unwrap_or_default().trim();
    let status =
        SandboxStatus::from_token(token).ok_or_else(|| MetaError::UnknownToken(token.to_string()))?;

    let time_line = lines.next().unwrap_or_default().trim();
    let time_secs = time_line
        .parse::<f64>()
        .ok()
        .filter(|t| t.is_finite() && *t >= 0.0)
        .ok_or_else(|| MetaError::Malformed {
            field: "time",
            value: time_line.to_string(),
        })?;

    let memory_line = lines.next().unwrap_or_default().trim();
    let memory_kb = memory_line
        .parse::<u64>()
        .map_err(|_| MetaError::Malformed {
            field: "memory",
            value: memory_line.to_string(),
        })?;

    let output = lines.collect::<Vec<_>>().join("\n");

    Ok(SandboxMeta {
        status,
        time_secs,
        memory_kb,
        output,
    })
}
