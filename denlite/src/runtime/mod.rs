//! Container runtime abstraction.
//!
//! The orchestration engine never talks to a container engine directly;
//! it goes through [`ContainerRuntime`], a narrow capability trait. The
//! default implementation shells out to the `docker` binary
//! ([`docker::DockerCli`]); tests substitute scripted mocks.

pub mod docker;

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::DenliteResult;

/// Stable identifier for a container. Containers are created with
/// deterministic names, so the name doubles as the id.
pub type ContainerId = String;

/// Health-probe status reported by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Starting,
    Healthy,
    Unhealthy,
}

impl std::str::FromStr for HealthStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "starting" => Ok(HealthStatus::Starting),
            "healthy" => Ok(HealthStatus::Healthy),
            "unhealthy" => Ok(HealthStatus::Unhealthy),
            _ => Err(()),
        }
    }
}

/// Point-in-time container state, as reported by the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerState {
    pub running: bool,
    /// Exit code of the last run, once the container has stopped.
    pub exit_code: Option<i64>,
    /// `None` when the container has no health probe configured.
    pub health: Option<HealthStatus>,
}

/// A bind mount from the host into a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    pub source: PathBuf,
    pub target: String,
    pub read_only: bool,
}

/// Everything needed to create one container.
#[derive(Debug, Clone, Default)]
pub struct ContainerSpec {
    /// Deterministic container name; doubles as the [`ContainerId`].
    pub name: String,
    pub image: String,
    /// Override for the image's default command.
    pub command: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub mounts: Vec<Mount>,
}

/// A command execution inside a running container.
#[derive(Debug, Clone, Default)]
pub struct ExecSpec {
    pub command: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub workdir: Option<String>,
}

/// Outcome of an exec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecStatus {
    pub exit_code: i64,
}

impl ExecStatus {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Narrow client capability over a container engine.
///
/// Implementations must be safe to share across tasks; the engine holds
/// them as `Arc<dyn ContainerRuntime>`.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Pull an image from its registry.
    async fn pull_image(&self, reference: &str) -> DenliteResult<()>;

    /// Build an image from a local context directory and tag it.
    async fn build_image(&self, context_dir: &std::path::Path, tag: &str) -> DenliteResult<()>;

    /// Create a container. Returns its id without starting it.
    async fn create(&self, spec: &ContainerSpec) -> DenliteResult<ContainerId>;

    async fn start(&self, id: &ContainerId) -> DenliteResult<()>;

    async fn stop(&self, id: &ContainerId) -> DenliteResult<()>;

    async fn remove(&self, id: &ContainerId) -> DenliteResult<()>;

    /// Run a command inside a running container and wait for it.
    async fn exec(&self, id: &ContainerId, spec: &ExecSpec) -> DenliteResult<ExecStatus>;

    /// Report the container's current state.
    async fn inspect(&self, id: &ContainerId) -> DenliteResult<ContainerState>;

    /// Block until the container next exits; returns its exit code.
    async fn wait_next_exit(&self, id: &ContainerId) -> DenliteResult<i64>;

    /// Attach the caller's terminal to the container until detach. The
    /// raw-mode and resize plumbing behind this is the runtime's concern.
    async fn attach(&self, id: &ContainerId) -> DenliteResult<()>;
}
