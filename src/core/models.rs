//! Submission and problem records shared by the worker, store and API boundary
//!
//! Units are fixed across the pipeline: time limits in whole seconds, measured
//! times in seconds, memory in kilobytes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::verdict::{Phase, Verdict};

/// Default CPU time limit when a problem does not set one (seconds)
pub const DEFAULT_CPU_TIME_LIMIT_SECS: u32 = 2;
/// Default memory limit when a problem does not set one (KB)
pub const DEFAULT_MEMORY_LIMIT_KB: u64 = 128_000;

/// What the user asked for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionKind {
    /// Ephemeral run against sample cases, optionally with custom input
    Run,
    /// Full scored run against every case
    Submit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    pub input: String,
    pub expected_output: String,
    #[serde(default)]
    pub is_sample: bool,
}

/// Problem definition (read-only to the pipeline)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Problem {
    pub id: String,
    #[serde(default)]
    pub test_cases: Vec<TestCase>,
    /// CPU time limit in seconds
    #[serde(default = "default_cpu_time_limit")]
    pub cpu_time_limit: u32,
    /// Memory limit in KB
    #[serde(default = "default_memory_limit")]
    pub memory_limit: u64,
    /// Default language offered by the editor
    #[serde(default)]
    pub language: Option<String>,
}

fn default_cpu_time_limit() -> u32 {
    DEFAULT_CPU_TIME_LIMIT_SECS
}

fn default_memory_limit() -> u64 {
    DEFAULT_MEMORY_LIMIT_KB
}

/// Outcome of one executed test case. Appended in order, never modified afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCaseResult {
    pub input: String,
    /// None for custom input
    pub expected_output: Option<String>,
    pub actual_output: String,
    pub status: Verdict,
    /// Seconds
    pub time: f64,
    /// KB
    pub memory: u64,
    /// Approximate problem size, only used for complexity estimation
    pub input_size: u64,
    pub is_sample: bool,
    pub is_custom: bool,
}

/// A submission record. Created by the API layer, mutated only by the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub id: String,
    pub problem_id: String,
    pub user_id: String,
    pub code: String,
    pub language: String,
    pub kind: SubmissionKind,
    #[serde(default)]
    pub custom_input: Option<String>,
    #[serde(default)]
    pub contest_id: Option<String>,
    pub created_at: DateTime<Utc>,

    #[serde(default)]
    pub status: Phase,
    #[serde(default)]
    pub test_case_results: Vec<TestCaseResult>,
    /// Max time across recorded cases, seconds
    #[serde(default)]
    pub execution_time: f64,
    /// Max memory across recorded cases, KB
    #[serde(default)]
    pub memory_used: u64,
    #[serde(default)]
    pub compile_output: Option<String>,
    #[serde(default)]
    pub stderr: Option<String>,
    #[serde(default)]
    pub estimated_time_complexity: Option<String>,
    #[serde(default)]
    pub estimated_space_complexity: Option<String>,
}

impl Submission {
    pub fn new(
        problem_id: impl Into<String>,
        user_id: impl Into<String>,
        code: impl Into<String>,
        language: impl Into<String>,
        kind: SubmissionKind,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            problem_id: problem_id.into(),
            user_id: user_id.into(),
            code: code.into(),
            language: language.into(),
            kind,
            custom_input: None,
            contest_id: None,
            created_at: Utc::now(),
            status: Phase::Queued,
            test_case_results: Vec::new(),
            execution_time: 0.0,
            memory_used: 0,
            compile_output: None,
            stderr: None,
            estimated_time_complexity: None,
            estimated_space_complexity: None,
        }
    }

    pub fn with_custom_input(mut self, input: impl Into<String>) -> Self {
        self.custom_input = Some(input.into());
        self
    }

    pub fn with_contest(mut self, contest_id: impl Into<String>) -> Self {
        self.contest_id = Some(contest_id.into());
        self
    }

    /// Terminal verdict, if judging has finished
    pub fn verdict(&self) -> Option<Verdict> {
        self.status.verdict()
    }

    /// Clear everything a previous (possibly interrupted) judging pass wrote
    pub fn reset_for_judging(&mut self) {
        self.status = Phase::Compiling;
        self.test_case_results.clear();
        self.execution_time = 0.0;
        self.memory_used = 0;
        self.compile_output = None;
        self.stderr = None;
        self.estimated_time_complexity = None;
        self.estimated_space_complexity = None;
    }
}
