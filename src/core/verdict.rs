use serde::{Deserialize, Serialize};
use std::fmt;

/// Verdict of a single test case or of a whole submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Accepted,
    WrongAnswer,
    TimeLimitExceeded,
    MemoryLimitExceeded,
    CompilationError,
    RuntimeError,
    InternalSystemError,
    /// Ad hoc run against user input; nothing to compare against
    CustomOutput,
    /// Never executed because an earlier case ended a `submit` run
    Skipped,
    /// Overall verdict of a `run` whose sample cases all passed
    PartialSampleRun,
}

impl Verdict {
    /// Faults caused by the submitted code itself. Their output is shown to the owner.
    pub fn is_user_fault(&self) -> bool {
        matches!(
            self,
            Verdict::WrongAnswer
                | Verdict::TimeLimitExceeded
                | Verdict::MemoryLimitExceeded
                | Verdict::CompilationError
                | Verdict::RuntimeError
        )
    }

    /// Whether a per-case status lets the test-case loop carry on as a pass.
    pub fn is_passing(&self) -> bool {
        matches!(self, Verdict::Accepted | Verdict::CustomOutput)
    }

    /// Whether the poll response carries the stderr summary for this verdict.
    pub fn exposes_stderr(&self) -> bool {
        !matches!(
            self,
            Verdict::Accepted | Verdict::PartialSampleRun | Verdict::WrongAnswer
        )
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Verdict::Accepted => "Accepted",
            Verdict::WrongAnswer => "Wrong Answer",
            Verdict::TimeLimitExceeded => "Time Limit Exceeded",
            Verdict::MemoryLimitExceeded => "Memory Limit Exceeded",
            Verdict::CompilationError => "Compilation Error",
            Verdict::RuntimeError => "Runtime Error",
            Verdict::InternalSystemError => "Internal System Error",
            Verdict::CustomOutput => "Custom Output",
            Verdict::Skipped => "Skipped",
            Verdict::PartialSampleRun => "Partial - Sample Run",
        };
        write!(f, "{}", s)
    }
}

/// Lifecycle of a submission as seen by polling clients.
///
/// Progress is carried here rather than in the verdict so that a client never
/// has to parse "Running case i/N" to tell progress from a final result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Queued,
    Compiling,
    Running { index: usize, total: usize },
    Terminal { verdict: Verdict },
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Terminal { .. })
    }

    pub fn verdict(&self) -> Option<Verdict> {
        match self {
            Phase::Terminal { verdict } => Some(*verdict),
            _ => None,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Queued => write!(f, "Queued"),
            Phase::Compiling => write!(f, "Compiling"),
            Phase::Running { index, total } => write!(f, "Running case {}/{}", index, total),
            Phase::Terminal { verdict } => write!(f, "{}", verdict),
        }
    }
}
