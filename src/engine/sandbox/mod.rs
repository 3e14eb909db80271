//! Container sandbox: resource constraints, runtime access and output parsing

pub mod config;
pub mod docker;
pub mod meta;

pub use config::{build_container_spec, ContainerSpec, SandboxSettings};
pub use docker::{ContainerRuntime, DockerRuntime, RuntimeError};
pub use meta::{parse_meta, MetaError, SandboxMeta, SandboxStatus};
