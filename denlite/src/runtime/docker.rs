//! Docker-CLI-backed container runtime.
//!
//! Shells out to the `docker` binary with `tokio::process`. Inspect goes
//! through `--format '{{json .State}}'` and is deserialized with serde;
//! everything else is plain argv plumbing.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;

use crate::errors::{DenliteError, DenliteResult};
use crate::runtime::{
    ContainerId, ContainerRuntime, ContainerSpec, ContainerState, ExecSpec, ExecStatus,
    HealthStatus,
};

/// Container runtime backed by the `docker` command-line client.
#[derive(Debug, Clone)]
pub struct DockerCli {
    program: String,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self {
            program: "docker".to_string(),
        }
    }
}

impl DockerCli {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a different client binary (e.g. `podman`).
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Run the client with `args`, capturing output. Non-zero exit maps to
    /// a `Runtime` error carrying stderr.
    async fn run(&self, args: &[String]) -> DenliteResult<String> {
        tracing::debug!(program = %self.program, ?args, "running container client");
        let output = tokio::process::Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| {
                DenliteError::Runtime(format!("failed to spawn {}: {}", self.program, e))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DenliteError::Runtime(format!(
                "{} {} failed: {}",
                self.program,
                args.first().map(String::as_str).unwrap_or(""),
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

// Shape of `docker inspect --format '{{json .State}}'`.
#[derive(Debug, Deserialize)]
struct InspectState {
    #[serde(rename = "Running")]
    running: bool,
    #[serde(rename = "ExitCode")]
    exit_code: Option<i64>,
    #[serde(rename = "Health")]
    health: Option<InspectHealth>,
}

#[derive(Debug, Deserialize)]
struct InspectHealth {
    #[serde(rename = "Status")]
    status: String,
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn pull_image(&self, reference: &str) -> DenliteResult<()> {
        self.run(&["pull".to_string(), reference.to_string()])
            .await
            .map(|_| ())
    }

    async fn build_image(&self, context_dir: &Path, tag: &str) -> DenliteResult<()> {
        self.run(&[
            "build".to_string(),
            "--tag".to_string(),
            tag.to_string(),
            context_dir.display().to_string(),
        ])
        .await
        .map(|_| ())
    }

    async fn create(&self, spec: &ContainerSpec) -> DenliteResult<ContainerId> {
        let mut args = vec![
            "create".to_string(),
            "--name".to_string(),
            spec.name.clone(),
        ];
        for (key, value) in &spec.env {
            args.push("--env".to_string());
            args.push(format!("{key}={value}"));
        }
        for mount in &spec.mounts {
            args.push("--volume".to_string());
            let mut volume = format!("{}:{}", mount.source.display(), mount.target);
            if mount.read_only {
                volume.push_str(":ro");
            }
            args.push(volume);
        }
        args.push(spec.image.clone());
        args.extend(spec.command.iter().cloned());

        self.run(&args).await?;
        // The deterministic name is the id used everywhere downstream.
        Ok(spec.name.clone())
    }

    async fn start(&self, id: &ContainerId) -> DenliteResult<()> {
        self.run(&["start".to_string(), id.clone()]).await.map(|_| ())
    }

    async fn stop(&self, id: &ContainerId) -> DenliteResult<()> {
        self.run(&["stop".to_string(), id.clone()]).await.map(|_| ())
    }

    async fn remove(&self, id: &ContainerId) -> DenliteResult<()> {
        self.run(&["rm".to_string(), id.clone()]).await.map(|_| ())
    }

    async fn exec(&self, id: &ContainerId, spec: &ExecSpec) -> DenliteResult<ExecStatus> {
        let mut args = vec!["exec".to_string()];
        for (key, value) in &spec.env {
            args.push("--env".to_string());
            args.push(format!("{key}={value}"));
        }
        if let Some(workdir) = &spec.workdir {
            args.push("--workdir".to_string());
            args.push(workdir.clone());
        }
        args.push(id.clone());
        args.extend(spec.command.iter().cloned());

        tracing::debug!(container = %id, command = ?spec.command, "exec in container");
        let status = tokio::process::Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .status()
            .await
            .map_err(|e| {
                DenliteError::Runtime(format!("failed to spawn {}: {}", self.program, e))
            })?;

        Ok(ExecStatus {
            exit_code: i64::from(status.code().unwrap_or(-1)),
        })
    }

    async fn inspect(&self, id: &ContainerId) -> DenliteResult<ContainerState> {
        let json = self
            .run(&[
                "inspect".to_string(),
                "--format".to_string(),
                "{{json .State}}".to_string(),
                id.clone(),
            ])
            .await?;

        let state: InspectState = serde_json::from_str(json.trim()).map_err(|e| {
            DenliteError::Runtime(format!("unparseable inspect output for {id}: {e}"))
        })?;

        Ok(ContainerState {
            running: state.running,
            exit_code: if state.running { None } else { state.exit_code },
            health: state
                .health
                .and_then(|h| h.status.parse::<HealthStatus>().ok()),
        })
    }

    async fn wait_next_exit(&self, id: &ContainerId) -> DenliteResult<i64> {
        let output = self.run(&["wait".to_string(), id.clone()]).await?;
        output.trim().parse::<i64>().map_err(|e| {
            DenliteError::Runtime(format!("unparseable wait output for {id}: {e}"))
        })
    }

    async fn attach(&self, id: &ContainerId) -> DenliteResult<()> {
        // Inherit the caller's terminal; returns on detach or exit.
        let status = tokio::process::Command::new(&self.program)
            .args(["attach", id])
            .status()
            .await
            .map_err(|e| {
                DenliteError::Runtime(format!("failed to spawn {}: {}", self.program, e))
            })?;

        if status.success() {
            Ok(())
        } else {
            Err(DenliteError::Runtime(format!(
                "attach to {id} exited with {status}"
            )))
        }
    }
}
