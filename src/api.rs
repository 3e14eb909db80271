//! API boundary
//!
//! Producer side: turn a run/submit request into a stored submission and one
//! queued job. Read side: project a stored submission into what a polling
//! client may see. The projection never writes.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info};

use crate::core::languages::LanguageTable;
use crate::core::models::{Submission, SubmissionKind, TestCaseResult};
use crate::core::verdict::{Phase, Verdict};
use crate::jobs::judger::INTERNAL_ERROR_MESSAGE;
use crate::queue::{JobQueue, QueueError, SubmissionJob};
use crate::store::{StoreError, SubmissionStore};

#[derive(Debug, Clone, Deserialize)]
pub struct SubmitRequest {
    pub problem_id: String,
    pub code: String,
    pub language: String,
    pub kind: SubmissionKind,
    #[serde(default)]
    pub custom_input: Option<String>,
    #[serde(default)]
    pub contest_id: Option<String>,
}

#[derive(Debug, Error)]
pub enum IntakeError {
    #[error("Code must not be empty")]
    EmptyCode,

    #[error("Unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("Custom input is only accepted for runs")]
    CustomInputNotAllowed,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Create a queued submission and enqueue its job.
///
/// If the job cannot be queued the stored submission is finalized as an
/// internal error, so it is never left in `Queued` with no job behind it.
pub async fn accept_submission(
    store: &dyn SubmissionStore,
    queue: &dyn JobQueue,
    languages: &LanguageTable,
    user_id: &str,
    request: SubmitRequest,
) -> Result<Submission, IntakeError> {
    if request.code.trim().is_empty() {
        return Err(IntakeError::EmptyCode);
    }
    if !languages.is_supported(&request.language) {
        return Err(IntakeError::UnsupportedLanguage(request.language));
    }
    if request.kind == SubmissionKind::Submit && request.custom_input.is_some() {
        return Err(IntakeError::CustomInputNotAllowed);
    }

    let mut submission = Submission::new(
        request.problem_id,
        user_id,
        request.code,
        request.language,
        request.kind,
    );
    submission.custom_input = request.custom_input;
    submission.contest_id = request.contest_id;

    store.save_submission(&submission).await?;
    let job = SubmissionJob::for_submission(&submission.id);
    if let Err(e) = queue.enqueue(&job).await {
        error!(submission_id = %submission.id, "Failed to enqueue job: {}", e);
        submission.stderr = Some(INTERNAL_ERROR_MESSAGE.to_string());
        submission.status = Phase::Terminal {
            verdict: Verdict::InternalSystemError,
        };
        if let Err(save_error) = store.save_submission(&submission).await {
            error!(
                submission_id = %submission.id,
                "Failed to finalize unqueued submission: {}",
                save_error
            );
        }
        return Err(e.into());
    }

    info!(
        submission_id = %submission.id,
        job_id = %job.job_id,
        kind = ?submission.kind,
        "Submission queued"
    );
    Ok(submission)
}

/// Per-case view for polling clients
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaseView {
    pub input: String,
    /// Absent for hidden cases and custom input
    pub expected_output: Option<String>,
    pub actual_output: String,
    pub status: Verdict,
    pub time: f64,
    pub memory: u64,
    pub is_sample: bool,
    pub is_custom: bool,
}

impl From<&TestCaseResult> for CaseView {
    fn from(result: &TestCaseResult) -> Self {
        let hidden = !result.is_sample && !result.is_custom;
        Self {
            input: result.input.clone(),
            expected_output: if hidden {
                None
            } else {
                result.expected_output.clone()
            },
            actual_output: result.actual_output.clone(),
            status: result.status,
            time: result.time,
            memory: result.memory,
            is_sample: result.is_sample,
            is_custom: result.is_custom,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PollResponse {
    pub submission_id: String,
    pub status: Phase,
    /// Human readable status, e.g. "Running case 2/5"
    pub status_label: String,
    /// Only set once judging has finished
    pub verdict: Option<Verdict>,
    pub is_terminal: bool,
    pub test_case_results: Vec<CaseView>,
    pub compile_output: Option<String>,
    pub stderr: Option<String>,
    /// Seconds
    pub execution_time: f64,
    /// KB
    pub memory_used: u64,
    /// Heuristic labels, not proofs
    pub estimated_time_complexity: Option<String>,
    pub estimated_space_complexity: Option<String>,
    /// Only visible to the owner
    pub code: Option<String>,
}

impl PollResponse {
    pub fn project(submission: &Submission, viewer_id: Option<&str>) -> Self {
        let verdict = submission.verdict();
        let is_owner = viewer_id == Some(submission.user_id.as_str());

        Self {
            submission_id: submission.id.clone(),
            status: submission.status,
            status_label: submission.status.to_string(),
            verdict,
            is_terminal: submission.status.is_terminal(),
            test_case_results: submission
                .test_case_results
                .iter()
                .map(CaseView::from)
                .collect(),
            compile_output: submission.compile_output.clone(),
            stderr: submission
                .stderr
                .clone()
                .filter(|_| verdict.is_some_and(|v| v.exposes_stderr())),
            execution_time: submission.execution_time,
            memory_used: submission.memory_used,
            estimated_time_complexity: submission.estimated_time_complexity.clone(),
            estimated_space_complexity: submission.estimated_space_complexity.clone(),
            code: is_owner.then(|| submission.code.clone()),
        }
    }
}
