//! Per-case verdict classification
//!
//! Pure functions: no I/O, no clock.

use crate::core::models::SubmissionKind;
use crate::core::verdict::Verdict;
use crate::engine::executer::{ExecResult, ExecStatus};

/// Compare program output with the expected answer.
///
/// Line endings are normalized and surrounding whitespace of the whole output
/// is ignored; everything else must match exactly.
pub fn compare_output(actual: &str, expected: &str) -> bool {
    let normalize = |s: &str| s.replace("\r\n", "\n").replace('\r', "\n");
    normalize(actual).trim() == normalize(expected).trim()
}

/// Classify one executor result.
///
/// `expected` is `None` for custom input, which always yields `CustomOutput`.
pub fn classify(result: &ExecResult, expected: Option<&str>, is_custom: bool) -> Verdict {
    match result.status {
        ExecStatus::CompilationError => Verdict::CompilationError,
        ExecStatus::TimeLimitExceeded | ExecStatus::ExternalTimeout => Verdict::TimeLimitExceeded,
        ExecStatus::MemoryLimitExceeded => Verdict::MemoryLimitExceeded,
        ExecStatus::RuntimeError => Verdict::RuntimeError,
        ExecStatus::Internal(_) => Verdict::InternalSystemError,
        ExecStatus::ExecutedSuccessfully => {
            if is_custom {
                return Verdict::CustomOutput;
            }
            match expected {
                Some(expected) if compare_output(&result.output, expected) => Verdict::Accepted,
                Some(_) => Verdict::WrongAnswer,
                None => Verdict::CustomOutput,
            }
        }
    }
}

/// Overall verdict: the first non-passing case in order, otherwise the success
/// verdict for the submission kind.
pub fn overall_verdict<I>(kind: SubmissionKind, statuses: I) -> Verdict
where
    I: IntoIterator<Item = Verdict>,
{
    statuses
        .into_iter()
        .find(|status| !status.is_passing())
        .unwrap_or(match kind {
            SubmissionKind::Submit => Verdict::Accepted,
            SubmissionKind::Run => Verdict::PartialSampleRun,
        })
}
