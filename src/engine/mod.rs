pub mod executer;
pub mod sandbox;

pub use executer::{
    DockerExecutor, ExecResult, ExecStatus, ExecutionLimits, InternalFailure, SandboxExecutor,
};
