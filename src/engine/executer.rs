use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::fs;
use tokio::time::timeout;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::core::languages::LanguageTable;
use crate::core::models::Problem;
use crate::engine::sandbox::{
    build_container_spec, parse_meta, ContainerRuntime, ContainerSpec, MetaError, SandboxMeta,
    SandboxSettings, SandboxStatus,
};

/// File the execution images read stdin from
pub const INPUT_FILE: &str = "input.txt";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionLimits {
    /// CPU time limit in whole seconds
    pub cpu_time_limit_secs: u32,
    /// Memory limit in KB
    pub memory_limit_kb: u64,
}

impl ExecutionLimits {
    pub fn for_problem(problem: &Problem) -> Self {
        Self {
            cpu_time_limit_secs: problem.cpu_time_limit,
            memory_limit_kb: problem.memory_limit,
        }
    }
}

/// Failures of the executor itself, never of the submitted program
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InternalFailure {
    UnsupportedLanguage,
    Workspace,
    SpawnFailed,
    MalformedOutput,
    UnknownToken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecStatus {
    CompilationError,
    ExecutedSuccessfully,
    TimeLimitExceeded,
    MemoryLimitExceeded,
    RuntimeError,
    /// The outer watchdog killed the container
    ExternalTimeout,
    Internal(InternalFailure),
}

impl ExecStatus {
    pub fn token(&self) -> &'static str {
        match self {
            ExecStatus::CompilationError => SandboxStatus::CompilationError.token(),
            ExecStatus::ExecutedSuccessfully => SandboxStatus::ExecutedSuccessfully.token(),
            ExecStatus::TimeLimitExceeded => SandboxStatus::TimeLimitExceeded.token(),
            ExecStatus::MemoryLimitExceeded => SandboxStatus::MemoryLimitExceeded.token(),
            ExecStatus::RuntimeError => SandboxStatus::RuntimeError.token(),
            ExecStatus::ExternalTimeout => "TIME_LIMIT_EXCEEDED_EXTERNAL",
            ExecStatus::Internal(InternalFailure::UnsupportedLanguage) => "INTERNAL_UNSUPPORTED_LANGUAGE",
            ExecStatus::Internal(InternalFailure::Workspace) => "INTERNAL_WORKSPACE_ERROR",
            ExecStatus::Internal(InternalFailure::SpawnFailed) => "INTERNAL_SPAWN_FAILED",
            ExecStatus::Internal(InternalFailure::MalformedOutput) => "INTERNAL_MALFORMED_OUTPUT",
            ExecStatus::Internal(InternalFailure::UnknownToken) => "INTERNAL_UNKNOWN_TOKEN",
        }
    }

    pub fn is_internal(&self) -> bool {
        matches!(self, ExecStatus::Internal(_))
    }
}

impl From<SandboxStatus> for ExecStatus {
    fn from(status: SandboxStatus) -> Self {
        match status {
            SandboxStatus::CompilationError => ExecStatus::CompilationError,
            SandboxStatus::ExecutedSuccessfully => ExecStatus::ExecutedSuccessfully,
            SandboxStatus::TimeLimitExceeded => ExecStatus::TimeLimitExceeded,
            SandboxStatus::MemoryLimitExceeded => ExecStatus::MemoryLimitExceeded,
            SandboxStatus::RuntimeError => ExecStatus::RuntimeError,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecResult {
    pub status: ExecStatus,
    /// Seconds
    pub time: f64,
    /// Peak memory in KB
    pub memory: u64,
    /// Program output, or diagnostic text for internal failures
    pub output: String,
}

impl ExecResult {
    pub fn internal(failure: InternalFailure, detail: impl Into<String>) -> Self {
        Self {
            status: ExecStatus::Internal(failure),
            time: 0.0,
            memory: 0,
            output: detail.into(),
        }
    }

    fn external_timeout(limits: &ExecutionLimits) -> Self {
        Self {
            status: ExecStatus::ExternalTimeout,
            time: f64::from(limits.cpu_time_limit_secs),
            memory: 0,
            output: String::new(),
        }
    }
}

impl From<SandboxMeta> for ExecResult {
    fn from(meta: SandboxMeta) -> Self {
        Self {
            status: meta.status.into(),
            time: meta.time_secs,
            memory: meta.memory_kb,
            output: meta.output,
        }
    }
}

/// Runs one (code, input, limits) triple in isolation
#[async_trait]
pub trait SandboxExecutor: Send + Sync {
    /// Never fails: every problem is reported through the result status
    async fn run(
        &self,
        language: &str,
        code: &str,
        stdin: &str,
        limits: &ExecutionLimits,
    ) -> ExecResult;
}

/// Executes submissions in throwaway containers
pub struct DockerExecutor<R: ContainerRuntime + 'static> {
    runtime: Arc<R>,
    languages: Arc<LanguageTable>,
    settings: SandboxSettings,
}

impl<R: ContainerRuntime + 'static> DockerExecutor<R> {
    pub fn new(runtime: Arc<R>, languages: Arc<LanguageTable>, settings: SandboxSettings) -> Self {
        Self {
            runtime,
            languages,
            settings,
        }
    }

    async fn execute(&self, spec: &ContainerSpec, limits: &ExecutionLimits) -> ExecResult {
        let id = match self.runtime.create(spec).await {
            Ok(id) => id,
            Err(e) => {
                error!(container = %spec.name, "Failed to create container: {}", e);
                return ExecResult::internal(
                    InternalFailure::SpawnFailed,
                    format!("Failed to create container: {}", e),
                );
            }
        };

        let guard = ContainerGuard::new(self.runtime.clone(), id.clone());
        let result = self.supervise(&id, limits).await;
        guard.release().await;
        result
    }

    async fn supervise(&self, id: &str, limits: &ExecutionLimits) -> ExecResult {
        if let Err(e) = self.runtime.start(id).await {
            error!(container = id, "Failed to start container: {}", e);
            return ExecResult::internal(
                InternalFailure::SpawnFailed,
                format!("Failed to start container: {}", e),
            );
        }

        let wall = self.settings.wall_timeout(limits);
        let raw = match timeout(wall, self.runtime.collect_output(id)).await {
            Ok(Ok(raw)) => raw,
            Ok(Err(e)) => {
                error!(container = id, "Failed to read container output: {}", e);
                return ExecResult::internal(
                    InternalFailure::SpawnFailed,
                    format!("Failed to read container output: {}", e),
                );
            }
            Err(_) => {
                warn!(container = id, wall_secs = wall.as_secs_f64(), "External watchdog fired");
                return ExecResult::external_timeout(limits);
            }
        };

        // Output is complete once the log stream ends; the exit code is informational
        match timeout(self.settings.grace, self.runtime.wait(id)).await {
            Ok(Ok(code)) => debug!(container = id, exit_code = code, "Container exited"),
            Ok(Err(e)) => warn!(container = id, "Failed to wait for container: {}", e),
            Err(_) => warn!(container = id, "Container did not report exit status"),
        }

        match parse_meta(&raw) {
            Ok(meta) => meta.into(),
            Err(e) => {
                error!(container = id, "Malformed sandbox output: {}", e);
                let failure = match e {
                    MetaError::UnknownToken(_) => InternalFailure::UnknownToken,
                    MetaError::Empty | MetaError::Malformed { .. } => {
                        InternalFailure::MalformedOutput
                    }
                };
                ExecResult::internal(failure, e.to_string())
            }
        }
    }
}

#[async_trait]
impl<R: ContainerRuntime + 'static> SandboxExecutor for DockerExecutor<R> {
    async fn run(
        &self,
        language: &str,
        code: &str,
        stdin: &str,
        limits: &ExecutionLimits,
    ) -> ExecResult {
        let Some((lang, config)) = self.languages.resolve(language) else {
            warn!(language, "Unsupported language");
            return ExecResult::internal(
                InternalFailure::UnsupportedLanguage,
                format!("Unsupported language: {}", language),
            );
        };

        let workspace = match prepare_workspace(&config.source_file, code, stdin).await {
            Ok(dir) => dir,
            Err(e) => {
                error!("Failed to prepare workspace: {}", e);
                return ExecResult::internal(
                    InternalFailure::Workspace,
                    format!("Failed to prepare workspace: {}", e),
                );
            }
        };

        let name = format!("judge-{}-{}", lang.key(), Uuid::new_v4().simple());
        let spec = build_container_spec(name, &config.image, workspace.path(), limits, &self.settings);
        let result = self.execute(&spec, limits).await;

        if let Err(e) = workspace.close() {
            warn!("Failed to remove workspace: {}", e);
        }
        result
    }
}

/// Write the source and input files into a fresh directory readable by the sandbox user
async fn prepare_workspace(source_file: &str, code: &str, stdin: &str) -> std::io::Result<TempDir> {
    let dir = tempfile::Builder::new().prefix("sub-exec-").tempdir()?;

    let source = dir.path().join(source_file);
    let input = dir.path().join(INPUT_FILE);
    fs::write(&source, code).await?;
    fs::write(&input, stdin).await?;

    make_readable(dir.path(), 0o755).await?;
    make_readable(&source, 0o644).await?;
    make_readable(&input, 0o644).await?;

    Ok(dir)
}

#[cfg(unix)]
async fn make_readable(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).await
}

#[cfg(not(unix))]
async fn make_readable(_path: &Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}

/// Removes the container when dropped without an explicit release
struct ContainerGuard<R: ContainerRuntime + 'static> {
    runtime: Arc<R>,
    id: Option<String>,
}

impl<R: ContainerRuntime + 'static> ContainerGuard<R> {
    fn new(runtime: Arc<R>, id: String) -> Self {
        Self {
            runtime,
            id: Some(id),
        }
    }

    async fn release(mut self) {
        if let Some(id) = self.id.take() {
            if let Err(e) = self.runtime.remove(&id).await {
                warn!(container = %id, "Failed to remove container: {}", e);
            }
        }
    }
}

impl<R: ContainerRuntime + 'static> Drop for ContainerGuard<R> {
    fn drop(&mut self) {
        let Some(id) = self.id.take() else {
            return;
        };
        // Task was cancelled mid-run
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let runtime = self.runtime.clone();
            handle.spawn(async move {
                if let Err(e) = runtime.remove(&id).await {
                    warn!(container = %id, "Failed to remove container: {}", e);
                }
            });
        }
    }
}
