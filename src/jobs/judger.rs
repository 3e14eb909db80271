//! Judger module for processing submission jobs
//!
//! Drives one submission through the test-case loop: executor, evaluator,
//! incremental progress, final verdict, complexity estimate and contest
//! bookkeeping.

use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info, warn};

use crate::components::complexity::{
    estimate, is_valid_point, ComplexityBands, SpaceBands, TimeBands, MIN_POINTS,
};
use crate::components::evaluator::{classify, overall_verdict};
use crate::contest::{ContestError, ContestScoreboard};
use crate::core::input_size::{InputSizeEstimator, PayloadSizeHeuristic};
use crate::core::models::{Problem, Submission, SubmissionKind, TestCaseResult};
use crate::core::verdict::{Phase, Verdict};
use crate::engine::executer::{ExecutionLimits, SandboxExecutor};
use crate::store::{StoreError, SubmissionStore};

/// Program output kept per test case
pub const MAX_OUTPUT_CHARS: usize = 4096;
/// Shown to users in place of infrastructure diagnostics
pub const INTERNAL_ERROR_MESSAGE: &str =
    "An internal error occurred while judging this submission. Please try again later.";

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Submission not found: {0}")]
    SubmissionNotFound(String),

    #[error("Failed to load submission {id}: {source}")]
    Load { id: String, source: StoreError },

    #[error("Failed to persist submission {id}: {source}")]
    Persist { id: String, source: StoreError },

    #[error("Contest update failed for submission {id}: {source}")]
    Contest { id: String, source: ContestError },
}

impl WorkerError {
    /// Whether the terminal verdict was already written when this error occurred
    pub fn verdict_persisted(&self) -> bool {
        matches!(self, WorkerError::Contest { .. })
    }
}

/// A test case selected for this submission
#[derive(Debug, Clone, PartialEq)]
struct SelectedCase {
    input: String,
    expected_output: Option<String>,
    is_sample: bool,
    is_custom: bool,
}

/// `run`: samples plus the custom input if given. `submit`: every case in stored order.
fn select_cases(submission: &Submission, problem: &Problem) -> Vec<SelectedCase> {
    let stored = problem
        .test_cases
        .iter()
        .filter(|case| submission.kind == SubmissionKind::Submit || case.is_sample)
        .map(|case| SelectedCase {
            input: case.input.clone(),
            expected_output: Some(case.expected_output.clone()),
            is_sample: case.is_sample,
            is_custom: false,
        });

    let custom = match (submission.kind, &submission.custom_input) {
        (SubmissionKind::Run, Some(input)) => Some(SelectedCase {
            input: input.clone(),
            expected_output: None,
            is_sample: false,
            is_custom: true,
        }),
        _ => None,
    };

    stored.chain(custom).collect()
}

fn truncate_output(output: &str) -> String {
    output.chars().take(MAX_OUTPUT_CHARS).collect()
}

pub struct SubmissionWorker {
    executor: Arc<dyn SandboxExecutor>,
    store: Arc<dyn SubmissionStore>,
    scoreboard: Arc<dyn ContestScoreboard>,
    input_size: Arc<dyn InputSizeEstimator>,
    time_bands: Arc<dyn ComplexityBands>,
    space_bands: Arc<dyn ComplexityBands>,
}

impl SubmissionWorker {
    pub fn new(
        executor: Arc<dyn SandboxExecutor>,
        store: Arc<dyn SubmissionStore>,
        scoreboard: Arc<dyn ContestScoreboard>,
    ) -> Self {
        Self {
            executor,
            store,
            scoreboard,
            input_size: Arc::new(PayloadSizeHeuristic),
            time_bands: Arc::new(TimeBands),
            space_bands: Arc::new(SpaceBands),
        }
    }

    pub fn with_input_size_estimator(mut self, estimator: Arc<dyn InputSizeEstimator>) -> Self {
        self.input_size = estimator;
        self
    }

    pub fn with_complexity_bands(
        mut self,
        time: Arc<dyn ComplexityBands>,
        space: Arc<dyn ComplexityBands>,
    ) -> Self {
        self.time_bands = time;
        self.space_bands = space;
        self
    }

    async fn persist(&self, submission: &Submission) -> Result<(), WorkerError> {
        self.store
            .save_submission(submission)
            .await
            .map_err(|source| WorkerError::Persist {
                id: submission.id.clone(),
                source,
            })
    }

    /// Judge a submission from scratch and persist the terminal result.
    ///
    /// Safe to call again for the same submission. A terminal submission is
    /// never judged again; only the contest step is repeated, and it records
    /// each submission at most once.
    pub async fn process(&self, submission_id: &str) -> Result<Verdict, WorkerError> {
        let load_error = |source: StoreError| WorkerError::Load {
            id: submission_id.to_string(),
            source,
        };

        let mut submission = self
            .store
            .load_submission(submission_id)
            .await
            .map_err(load_error)?
            .ok_or_else(|| WorkerError::SubmissionNotFound(submission_id.to_string()))?;

        if let Some(verdict) = submission.verdict() {
            info!(submission_id, %verdict, "Submission already judged");
            self.record_contest(&submission).await?;
            return Ok(verdict);
        }

        submission.reset_for_judging();

        let Some(problem) = self
            .store
            .load_problem(&submission.problem_id)
            .await
            .map_err(load_error)?
        else {
            error!(
                submission_id,
                problem_id = %submission.problem_id,
                "Problem not found"
            );
            return self.finish_with_internal_error(submission).await;
        };

        self.persist(&submission).await?;

        let cases = select_cases(&submission, &problem);
        if cases.is_empty() {
            error!(
                submission_id,
                problem_id = %problem.id,
                kind = ?submission.kind,
                "No test cases to run"
            );
            return self.finish_with_internal_error(submission).await;
        }

        let results = self.run_cases(&mut submission, &problem, &cases).await?;
        submission.test_case_results = results;

        let verdict = overall_verdict(
            submission.kind,
            submission.test_case_results.iter().map(|r| r.status),
        );
        self.summarize_errors(&mut submission);

        if submission.kind == SubmissionKind::Submit && verdict == Verdict::Accepted {
            self.estimate_complexity(&mut submission);
        }

        self.finalize(submission, verdict).await
    }

    async fn run_cases(
        &self,
        submission: &mut Submission,
        problem: &Problem,
        cases: &[SelectedCase],
    ) -> Result<Vec<TestCaseResult>, WorkerError> {
        let limits = ExecutionLimits::for_problem(problem);
        let total = cases.len();
        let mut results = Vec::with_capacity(total);

        for (index, case) in cases.iter().enumerate() {
            submission.status = Phase::Running {
                index: index + 1,
                total,
            };
            submission.test_case_results = results.clone();
            self.persist(submission).await?;

            let result = self
                .executor
                .run(&submission.language, &submission.code, &case.input, &limits)
                .await;
            let status = classify(&result, case.expected_output.as_deref(), case.is_custom);

            let actual_output = if result.status.is_internal() {
                error!(
                    submission_id = %submission.id,
                    case = index + 1,
                    token = result.status.token(),
                    detail = %result.output,
                    "Sandbox failure"
                );
                INTERNAL_ERROR_MESSAGE.to_string()
            } else {
                truncate_output(&result.output)
            };

            submission.execution_time = submission.execution_time.max(result.time);
            submission.memory_used = submission.memory_used.max(result.memory);

            results.push(TestCaseResult {
                input: case.input.clone(),
                expected_output: case.expected_output.clone(),
                actual_output,
                status,
                time: result.time,
                memory: result.memory,
                input_size: self.input_size.estimate(&case.input),
                is_sample: case.is_sample,
                is_custom: case.is_custom,
            });

            // Every later case would fail to compile the same way
            let stop = status == Verdict::CompilationError
                || (submission.kind == SubmissionKind::Submit && !status.is_passing());
            if stop {
                break;
            }
        }

        Ok(results)
    }

    /// Fill compile output and the stderr summary from the first failing case
    fn summarize_errors(&self, submission: &mut Submission) {
        let Some(failed) = submission
            .test_case_results
            .iter()
            .find(|r| !r.status.is_passing())
        else {
            return;
        };

        let output = failed.actual_output.trim();
        match failed.status {
            Verdict::CompilationError => {
                submission.compile_output = Some(output.to_string());
                submission.stderr = Some(output.to_string());
            }
            Verdict::WrongAnswer => {}
            status if status.is_user_fault() => {
                submission.stderr = Some(if output.is_empty() {
                    status.to_string()
                } else {
                    output.to_string()
                });
            }
            _ => submission.stderr = Some(INTERNAL_ERROR_MESSAGE.to_string()),
        }
    }

    fn estimate_complexity(&self, submission: &mut Submission) {
        let accepted: Vec<&TestCaseResult> = submission
            .test_case_results
            .iter()
            .filter(|r| r.status == Verdict::Accepted)
            .filter(|r| is_valid_point(r.input_size, r.time) && is_valid_point(r.input_size, r.memory as f64))
            .collect();

        if accepted.len() < MIN_POINTS {
            return;
        }

        let time_points: Vec<(u64, f64)> = accepted.iter().map(|r| (r.input_size, r.time)).collect();
        let space_points: Vec<(u64, f64)> = accepted
            .iter()
            .map(|r| (r.input_size, r.memory as f64))
            .collect();

        submission.estimated_time_complexity =
            Some(estimate(&time_points, self.time_bands.as_ref()).to_string());
        submission.estimated_space_complexity =
            Some(estimate(&space_points, self.space_bands.as_ref()).to_string());
    }

    async fn finish_with_internal_error(
        &self,
        mut submission: Submission,
    ) -> Result<Verdict, WorkerError> {
        submission.stderr = Some(INTERNAL_ERROR_MESSAGE.to_string());
        self.finalize(submission, Verdict::InternalSystemError).await
    }

    async fn finalize(
        &self,
        mut submission: Submission,
        verdict: Verdict,
    ) -> Result<Verdict, WorkerError> {
        submission.status = Phase::Terminal { verdict };
        self.persist(&submission).await?;

        info!(
            submission_id = %submission.id,
            %verdict,
            cases = submission.test_case_results.len(),
            max_time_secs = submission.execution_time,
            max_memory_kb = submission.memory_used,
            "Judging finished"
        );

        self.record_contest(&submission).await?;
        Ok(verdict)
    }

    async fn record_contest(&self, submission: &Submission) -> Result<(), WorkerError> {
        if submission.kind != SubmissionKind::Submit || submission.contest_id.is_none() {
            return Ok(());
        }
        self.scoreboard
            .record(submission)
            .await
            .map_err(|source| WorkerError::Contest {
                id: submission.id.clone(),
                source,
            })?;
        Ok(())
    }

    /// Best-effort compensation when a job fails before a terminal verdict was
    /// written. Returns whether the submission was updated.
    pub async fn mark_internal_error(&self, submission_id: &str) -> Result<bool, WorkerError> {
        let Some(mut submission) = self
            .store
            .load_submission(submission_id)
            .await
            .map_err(|source| WorkerError::Load {
                id: submission_id.to_string(),
                source,
            })?
        else {
            return Ok(false);
        };

        if submission.status.is_terminal() {
            warn!(submission_id, status = %submission.status, "Submission already finalized");
            return Ok(false);
        }

        submission.reset_for_judging();
        submission.stderr = Some(INTERNAL_ERROR_MESSAGE.to_string());
        submission.status = Phase::Terminal {
            verdict: Verdict::InternalSystemError,
        };
        self.persist(&submission).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::TestCase;
    use crate::engine::executer::{ExecResult, ExecStatus, InternalFailure};
    use crate::store::memory::MemoryStore;
    use async_trait::async_trait;
    use std::sync::Mutex;

    type Script = Box<dyn Fn(&str) -> ExecResult + Send + Sync>;

    struct FakeExecutor {
        script: Script,
        inputs: Mutex<Vec<String>>,
    }

    impl FakeExecutor {
        fn new(script: impl Fn(&str) -> ExecResult + Send + Sync + 'static) -> Arc<Self> {
            Arc::new(Self {
                script: Box::new(script),
                inputs: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.inputs.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl SandboxExecutor for FakeExecutor {
        async fn run(
            &self,
            _language: &str,
            _code: &str,
            stdin: &str,
            _limits: &ExecutionLimits,
        ) -> ExecResult {
            self.inputs.lock().unwrap().push(stdin.to_string());
            (self.script)(stdin)
        }
    }

    #[derive(Default)]
    struct FakeScoreboard {
        recorded: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ContestScoreboard for FakeScoreboard {
        async fn record(&self, submission: &Submission) -> Result<bool, ContestError> {
            self.recorded.lock().unwrap().push(submission.id.clone());
            Ok(true)
        }
    }

    fn ok(output: &str, time: f64, memory: u64) -> ExecResult {
        ExecResult {
            status: ExecStatus::ExecutedSuccessfully,
            time,
            memory,
            output: output.to_string(),
        }
    }

    /// Doubles the single number it is given
    fn doubler(input: &str) -> ExecResult {
        let n: i64 = input.trim().parse().unwrap_or(0);
        ok(&format!("{}\n", n * 2), 0.01 * n as f64, 1000 + n as u64)
    }

    fn case(input: &str, expected: &str, is_sample: bool) -> TestCase {
        TestCase {
            input: input.into(),
            expected_output: expected.into(),
            is_sample,
        }
    }

    fn problem(cases: Vec<TestCase>) -> Problem {
        Problem {
            id: "p1".into(),
            test_cases: cases,
            cpu_time_limit: 2,
            memory_limit: 128_000,
            language: None,
        }
    }

    fn five_cases() -> Problem {
        problem(vec![
            case("1", "2", true),
            case("2", "4", true),
            case("3", "6", false),
            case("4", "8", false),
            case("5", "10", false),
        ])
    }

    struct Harness {
        store: Arc<MemoryStore>,
        scoreboard: Arc<FakeScoreboard>,
        executor: Arc<FakeExecutor>,
        worker: SubmissionWorker,
    }

    fn harness(executor: Arc<FakeExecutor>, problem: Option<Problem>) -> Harness {
        let store = Arc::new(MemoryStore::default());
        if let Some(problem) = problem {
            store.insert_problem(problem);
        }
        let scoreboard = Arc::new(FakeScoreboard::default());
        let worker = SubmissionWorker::new(executor.clone(), store.clone(), scoreboard.clone());
        Harness {
            store,
            scoreboard,
            executor,
            worker,
        }
    }

    fn submit(store: &MemoryStore) -> Submission {
        let submission = Submission::new("p1", "u1", "code", "python", SubmissionKind::Submit);
        store.insert_submission(submission.clone());
        submission
    }

    #[tokio::test]
    async fn test_accepted_submit_reports_maxima() {
        let h = harness(FakeExecutor::new(doubler), Some(five_cases()));
        let submission = submit(&h.store);

        let verdict = h.worker.process(&submission.id).await.unwrap();
        let stored = h.store.submission(&submission.id).unwrap();

        assert_eq!(verdict, Verdict::Accepted);
        assert_eq!(stored.verdict(), Some(Verdict::Accepted));
        assert_eq!(stored.test_case_results.len(), 5);

        let max_time = stored
            .test_case_results
            .iter()
            .map(|r| r.time)
            .fold(0.0, f64::max);
        let max_memory = stored.test_case_results.iter().map(|r| r.memory).max();
        assert_eq!(stored.execution_time, max_time);
        assert_eq!(Some(stored.memory_used), max_memory);
        assert!(stored.stderr.is_none());
    }

    #[tokio::test]
    async fn test_submit_short_circuits_on_first_hidden_failure() {
        let executor = FakeExecutor::new(|input| {
            if input == "3" {
                ExecResult {
                    status: ExecStatus::TimeLimitExceeded,
                    time: 2.0,
                    memory: 4096,
                    output: String::new(),
                }
            } else {
                doubler(input)
            }
        });
        let h = harness(executor, Some(five_cases()));
        let submission = submit(&h.store);

        let verdict = h.worker.process(&submission.id).await.unwrap();
        let stored = h.store.submission(&submission.id).unwrap();

        assert_eq!(verdict, Verdict::TimeLimitExceeded);
        assert_eq!(stored.test_case_results.len(), 3);
        assert_eq!(stored.test_case_results[0].status, Verdict::Accepted);
        assert_eq!(stored.test_case_results[1].status, Verdict::Accepted);
        assert_eq!(stored.test_case_results[2].status, Verdict::TimeLimitExceeded);
        assert_eq!(h.executor.calls(), 3);
        assert_eq!(stored.stderr.as_deref(), Some("Time Limit Exceeded"));
        assert!(stored.estimated_time_complexity.is_none());
    }

    #[tokio::test]
    async fn test_reprocessing_is_idempotent() {
        let h = harness(FakeExecutor::new(doubler), Some(five_cases()));
        let submission = submit(&h.store);

        h.worker.process(&submission.id).await.unwrap();
        let first = h.store.submission(&submission.id).unwrap();
        h.worker.process(&submission.id).await.unwrap();
        let second = h.store.submission(&submission.id).unwrap();

        assert_eq!(first, second);
        assert_eq!(second.test_case_results.len(), 5);
        assert_eq!(h.executor.calls(), 5);
    }

    #[tokio::test]
    async fn test_custom_only_run() {
        let executor = FakeExecutor::new(|input| ok(&format!("echo {}", input), 0.01, 512));
        let h = harness(executor, Some(problem(vec![case("1", "1", false)])));
        let submission = Submission::new("p1", "u1", "code", "cpp", SubmissionKind::Run)
            .with_custom_input("hello");
        h.store.insert_submission(submission.clone());

        let verdict = h.worker.process(&submission.id).await.unwrap();
        let stored = h.store.submission(&submission.id).unwrap();

        assert_eq!(verdict, Verdict::PartialSampleRun);
        assert_eq!(stored.test_case_results.len(), 1);
        let result = &stored.test_case_results[0];
        assert!(result.is_custom);
        assert_eq!(result.status, Verdict::CustomOutput);
        assert!(result.expected_output.is_none());
        assert_eq!(result.actual_output, "echo hello");
    }

    #[tokio::test]
    async fn test_run_executes_samples_only_and_continues_past_failures() {
        let executor = FakeExecutor::new(|input| {
            if input == "1" {
                ok("wrong", 0.01, 100)
            } else {
                doubler(input)
            }
        });
        let h = harness(executor, Some(five_cases()));
        let submission = Submission::new("p1", "u1", "code", "cpp", SubmissionKind::Run);
        h.store.insert_submission(submission.clone());

        let verdict = h.worker.process(&submission.id).await.unwrap();
        let stored = h.store.submission(&submission.id).unwrap();

        assert_eq!(verdict, Verdict::WrongAnswer);
        assert_eq!(stored.test_case_results.len(), 2);
        assert!(stored.test_case_results.iter().all(|r| r.is_sample));
        assert!(stored.stderr.is_none());
    }

    #[tokio::test]
    async fn test_missing_problem_is_internal_error_without_execution() {
        let h = harness(FakeExecutor::new(doubler), None);
        let submission = submit(&h.store);

        let verdict = h.worker.process(&submission.id).await.unwrap();
        let stored = h.store.submission(&submission.id).unwrap();

        assert_eq!(verdict, Verdict::InternalSystemError);
        assert_eq!(stored.verdict(), Some(Verdict::InternalSystemError));
        assert_eq!(stored.stderr.as_deref(), Some(INTERNAL_ERROR_MESSAGE));
        assert_eq!(h.executor.calls(), 0);
    }

    #[tokio::test]
    async fn test_missing_submission_propagates() {
        let h = harness(FakeExecutor::new(doubler), Some(five_cases()));
        let err = h.worker.process("nope").await.unwrap_err();
        assert!(matches!(err, WorkerError::SubmissionNotFound(_)));
        assert!(!err.verdict_persisted());
    }

    #[tokio::test]
    async fn test_progress_phases() {
        let h = harness(
            FakeExecutor::new(doubler),
            Some(problem(vec![case("1", "2", true), case("2", "4", false)])),
        );
        let submission = submit(&h.store);
        h.worker.process(&submission.id).await.unwrap();

        assert_eq!(
            h.store.phases(&submission.id),
            vec![
                Phase::Compiling,
                Phase::Running { index: 1, total: 2 },
                Phase::Running { index: 2, total: 2 },
                Phase::Terminal {
                    verdict: Verdict::Accepted
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_infrastructure_detail_is_not_exposed() {
        let executor = FakeExecutor::new(|_| {
            ExecResult::internal(InternalFailure::SpawnFailed, "docker: connection refused")
        });
        let h = harness(executor, Some(five_cases()));
        let submission = submit(&h.store);

        let verdict = h.worker.process(&submission.id).await.unwrap();
        let stored = h.store.submission(&submission.id).unwrap();

        assert_eq!(verdict, Verdict::InternalSystemError);
        assert_eq!(stored.test_case_results.len(), 1);
        assert_eq!(stored.test_case_results[0].actual_output, INTERNAL_ERROR_MESSAGE);
        assert_eq!(stored.stderr.as_deref(), Some(INTERNAL_ERROR_MESSAGE));
    }

    #[tokio::test]
    async fn test_compile_error_surfaces_compiler_output() {
        let executor = FakeExecutor::new(|_| ExecResult {
            status: ExecStatus::CompilationError,
            time: 0.0,
            memory: 0,
            output: "Main.cpp:1: error: expected ';'\n".into(),
        });
        let h = harness(executor, Some(five_cases()));
        let submission = Submission::new("p1", "u1", "code", "cpp", SubmissionKind::Run);
        h.store.insert_submission(submission.clone());

        let verdict = h.worker.process(&submission.id).await.unwrap();
        let stored = h.store.submission(&submission.id).unwrap();

        assert_eq!(verdict, Verdict::CompilationError);
        assert_eq!(h.executor.calls(), 1);
        assert_eq!(
            stored.compile_output.as_deref(),
            Some("Main.cpp:1: error: expected ';'")
        );
    }

    #[tokio::test]
    async fn test_complexity_attached_for_accepted_submit() {
        // Token count grows 10x per case, time grows linearly in ln(n)
        let inputs: Vec<String> = [10usize, 100, 1000, 10000]
            .iter()
            .map(|&n| vec!["1"; n].join(" "))
            .collect();
        let cases = inputs.iter().map(|input| case(input, "ok", false)).collect();

        let executor = FakeExecutor::new(|input| {
            let n = input.split_whitespace().count() as f64;
            ok("ok", n.ln(), 2048)
        });
        let h = harness(executor, Some(problem(cases)));
        let submission = submit(&h.store);

        h.worker.process(&submission.id).await.unwrap();
        let stored = h.store.submission(&submission.id).unwrap();

        assert_eq!(stored.estimated_time_complexity.as_deref(), Some("O(n)"));
        assert_eq!(stored.estimated_space_complexity.as_deref(), Some("O(1)"));
    }

    struct ValueAsSize;

    impl InputSizeEstimator for ValueAsSize {
        fn estimate(&self, input: &str) -> u64 {
            input.trim().parse().unwrap_or(0)
        }
    }

    struct AlwaysLinearithmic;

    impl ComplexityBands for AlwaysLinearithmic {
        fn label(&self, _: f64) -> crate::components::ComplexityLabel {
            crate::components::ComplexityLabel::Linearithmic
        }
    }

    #[tokio::test]
    async fn test_custom_estimators() {
        let h = harness(FakeExecutor::new(doubler), Some(five_cases()));
        let worker = SubmissionWorker::new(h.executor.clone(), h.store.clone(), h.scoreboard.clone())
            .with_input_size_estimator(Arc::new(ValueAsSize))
            .with_complexity_bands(Arc::new(AlwaysLinearithmic), Arc::new(SpaceBands));
        let submission = submit(&h.store);

        worker.process(&submission.id).await.unwrap();
        let stored = h.store.submission(&submission.id).unwrap();

        let sizes: Vec<u64> = stored.test_case_results.iter().map(|r| r.input_size).collect();
        assert_eq!(sizes, vec![1, 2, 3, 4, 5]);
        assert_eq!(stored.estimated_time_complexity.as_deref(), Some("O(n log n)"));
    }

    #[tokio::test]
    async fn test_complexity_needs_three_points() {
        let h = harness(
            FakeExecutor::new(doubler),
            Some(problem(vec![case("1", "2", true), case("2", "4", false)])),
        );
        let submission = submit(&h.store);
        h.worker.process(&submission.id).await.unwrap();

        let stored = h.store.submission(&submission.id).unwrap();
        assert!(stored.estimated_time_complexity.is_none());
        assert!(stored.estimated_space_complexity.is_none());
    }

    #[tokio::test]
    async fn test_contest_recorded_for_submit_only() {
        let h = harness(FakeExecutor::new(doubler), Some(five_cases()));

        let contest_submit = Submission::new("p1", "u1", "code", "cpp", SubmissionKind::Submit)
            .with_contest("c1");
        let contest_run =
            Submission::new("p1", "u1", "code", "cpp", SubmissionKind::Run).with_contest("c1");
        h.store.insert_submission(contest_submit.clone());
        h.store.insert_submission(contest_run.clone());

        h.worker.process(&contest_submit.id).await.unwrap();
        h.worker.process(&contest_run.id).await.unwrap();

        assert_eq!(
            *h.scoreboard.recorded.lock().unwrap(),
            vec![contest_submit.id.clone()]
        );
    }

    #[tokio::test]
    async fn test_mark_internal_error_compensates_stuck_submission() {
        let h = harness(FakeExecutor::new(doubler), Some(five_cases()));
        let mut submission = submit(&h.store);
        submission.status = Phase::Running { index: 2, total: 5 };
        h.store.insert_submission(submission.clone());

        assert!(h.worker.mark_internal_error(&submission.id).await.unwrap());
        let stored = h.store.submission(&submission.id).unwrap();
        assert_eq!(stored.verdict(), Some(Verdict::InternalSystemError));

        // Redelivery of a finalized submission does not reopen it
        let verdict = h.worker.process(&submission.id).await.unwrap();
        assert_eq!(verdict, Verdict::InternalSystemError);
        assert_eq!(h.executor.calls(), 0);
    }

    #[tokio::test]
    async fn test_real_verdict_is_never_overwritten() {
        let h = harness(FakeExecutor::new(doubler), Some(five_cases()));
        let submission = submit(&h.store);
        h.worker.process(&submission.id).await.unwrap();

        assert!(!h.worker.mark_internal_error(&submission.id).await.unwrap());
        assert_eq!(
            h.store.submission(&submission.id).unwrap().verdict(),
            Some(Verdict::Accepted)
        );
    }

    #[tokio::test]
    async fn test_redelivered_contest_submit_only_repeats_contest_step() {
        let h = harness(FakeExecutor::new(doubler), Some(five_cases()));
        let submission =
            Submission::new("p1", "u1", "code", "cpp", SubmissionKind::Submit).with_contest("c1");
        h.store.insert_submission(submission.clone());

        h.worker.process(&submission.id).await.unwrap();
        let verdict = h.worker.process(&submission.id).await.unwrap();

        assert_eq!(verdict, Verdict::Accepted);
        assert_eq!(h.executor.calls(), 5);
        assert_eq!(h.scoreboard.recorded.lock().unwrap().len(), 2);
        assert!(h
            .store
            .phases(&submission.id)
            .iter()
            .rev()
            .skip(1)
            .all(|phase| !phase.is_terminal()));
    }

    #[test]
    fn test_select_cases() {
        let problem = five_cases();
        let run = Submission::new("p1", "u1", "", "cpp", SubmissionKind::Run).with_custom_input("7");
        let selected = select_cases(&run, &problem);
        assert_eq!(selected.len(), 3);
        assert!(selected[2].is_custom);

        // Custom input is ignored for submit
        let mut submit = run.clone();
        submit.kind = SubmissionKind::Submit;
        let selected = select_cases(&submit, &problem);
        assert_eq!(selected.len(), 5);
        assert!(selected.iter().all(|c| !c.is_custom));
    }
}
