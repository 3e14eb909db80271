//! Sandbox configuration
//!
//! Resource constraints for execution containers. Limits arrive in seconds and
//! kilobytes; this is the only place they are converted to bytes.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::engine::executer::ExecutionLimits;

/// Mount point of the submission directory inside the container
pub const SANDBOX_MOUNT: &str = "/sandbox";
/// Smallest memory ceiling handed to the container runtime (MB)
pub const MIN_MEMORY_MB: u64 = 32;
/// CFS period; a quota of one period pins the container to a single CPU
pub const CPU_PERIOD_US: i64 = 100_000;

/// Process-wide sandbox settings
#[derive(Debug, Clone)]
pub struct SandboxSettings {
    /// Maximum number of processes inside the container
    pub pids_limit: i64,
    /// User the container runs as (None keeps the image default)
    pub user: Option<String>,
    /// Margin added to the CPU time limit before the outer watchdog kills the container
    pub grace: Duration,
    /// Also ask the runtime to remove the container on exit
    pub auto_remove: bool,
    /// Size of the writable /tmp inside the container
    pub tmpfs_size: String,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            pids_limit: 128,
            user: Some("1001".to_string()),
            grace: Duration::from_secs(5),
            auto_remove: false,
            tmpfs_size: "64m".to_string(),
        }
    }
}

impl SandboxSettings {
    /// Wall-clock budget for one container: CPU limit plus grace
    pub fn wall_timeout(&self, limits: &ExecutionLimits) -> Duration {
        Duration::from_secs(u64::from(limits.cpu_time_limit_secs)) + self.grace
    }
}

/// Everything needed to create one execution container
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    /// Arguments for the image entrypoint: `<time_limit_secs> <memory_limit_kb>`
    pub cmd: Vec<String>,
    pub user: Option<String>,
    pub binds: Vec<String>,
    pub tmpfs: HashMap<String, String>,
    pub memory_bytes: i64,
    /// Equal to `memory_bytes`, so no swap is available beyond the ceiling
    pub memory_swap_bytes: i64,
    pub pids_limit: i64,
    pub network_disabled: bool,
    pub cap_drop: Vec<String>,
    pub security_opt: Vec<String>,
    pub cpu_quota: i64,
    pub cpu_period: i64,
    pub auto_remove: bool,
}

/// Memory ceiling in bytes for a limit in KB, never below `MIN_MEMORY_MB`
pub fn memory_ceiling_bytes(memory_limit_kb: u64) -> i64 {
    let mb = (memory_limit_kb / 1024).max(MIN_MEMORY_MB);
    i64::try_from(mb.saturating_mul(1024 * 1024)).unwrap_or(i64::MAX)
}

/// Build the container description for one test-case execution
pub fn build_container_spec(
    name: impl Into<String>,
    image: &str,
    work_dir: &Path,
    limits: &ExecutionLimits,
    settings: &SandboxSettings,
) -> ContainerSpec {
    let memory_bytes = memory_ceiling_bytes(limits.memory_limit_kb);

    let mut tmpfs = HashMap::new();
    tmpfs.insert(
        "/tmp".to_string(),
        format!("rw,exec,nosuid,size={}", settings.tmpfs_size),
    );

    ContainerSpec {
        name: name.into(),
        image: image.to_string(),
        cmd: vec![
            limits.cpu_time_limit_secs.to_string(),
            limits.memory_limit_kb.to_string(),
        ],
        user: settings.user.clone(),
        binds: vec![format!("{}:{}:ro", work_dir.display(), SANDBOX_MOUNT)],
        tmpfs,
        memory_bytes,
        memory_swap_bytes: memory_bytes,
        pids_limit: settings.pids_limit,
        network_disabled: true,
        cap_drop: vec!["ALL".to_string()],
        security_opt: vec!["no-new-privileges".to_string()],
        cpu_quota: CPU_PERIOD_US,
        cpu_period: CPU_PERIOD_US,
        auto_remove: settings.auto_remove,
    }
}
