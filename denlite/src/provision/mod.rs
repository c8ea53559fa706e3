//! Provisioning sessions.
//!
//! [`Provisioner`] is the entry point for bringing a den up and tearing
//! it down. `up()` runs one full session: the lifecycle handler task is
//! started first, phases are driven through the coordinator around
//! container provisioning (single image or compose), the terminal-attach
//! task is spawned at the configured wait-for phase, and the event queue
//! is closed exactly once on every exit path. The first failure wins;
//! partially provisioned containers are left in place for the caller.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::task::JoinHandle;

use crate::config::{DenConfig, LifecycleHooks, ProvisionSource};
use crate::compose::ComposeProject;
use crate::errors::{DenliteError, DenliteResult};
use crate::features;
use crate::features::cache::FeatureCache;
use crate::features::ResolvedFeature;
use crate::graph::executor::{drain, DrainDirection};
use crate::graph::DependencyGraph;
use crate::layout::DenliteLayout;
use crate::lifecycle::coordinator::{self, PhaseDriver};
use crate::lifecycle::{HookCommand, LifecyclePhase};
use crate::runtime::{ContainerId, ContainerRuntime, ContainerSpec, ExecSpec, Mount};

/// Drives provisioning of one den.
pub struct Provisioner {
    config: DenConfig,
    runtime: Arc<dyn ContainerRuntime>,
    cache: FeatureCache,
}

impl Provisioner {
    /// Create a provisioner rooted at `layout`. Prepares the on-disk
    /// layout up front; no partial initialization states.
    pub fn new(
        config: DenConfig,
        runtime: Arc<dyn ContainerRuntime>,
        layout: &DenliteLayout,
    ) -> DenliteResult<Self> {
        layout.prepare()?;
        let cache = FeatureCache::new(layout.features_dir(), layout.tmp_dir());
        Ok(Self {
            config,
            runtime,
            cache,
        })
    }

    /// Bring the den up.
    pub async fn up(&self) -> DenliteResult<()> {
        // Resolve and compile features first: a cache fault aborts the
        // session before any container exists.
        let resolved = features::resolve_all(&self.cache, &self.config.features).await?;
        let feature_mounts: Vec<Mount> = resolved.iter().map(ResolvedFeature::mount).collect();
        let feature_graph = features::compile(resolved)?;

        let (driver, handler) = coordinator::channel();
        let handler_task = tokio::spawn(handler.run(phase_worker(
            self.runtime.clone(),
            self.config.primary_container_name(),
            self.config.hooks.clone(),
            self.config.workspace_folder.clone(),
            self.config.container_workspace.clone(),
            feature_graph,
        )));

        let mut attach_tasks = Vec::new();
        let session = self
            .run_session(&driver, &mut attach_tasks, feature_mounts)
            .await;

        // Join background tasks before closing: an attach task may still
        // be driving its post-attach phase.
        let mut first_error = session.err();
        for task in attach_tasks {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::error!(error = %e, "attach task failed");
                    first_error.get_or_insert(e);
                }
                Err(e) => {
                    first_error
                        .get_or_insert(DenliteError::Internal(format!("attach task panicked: {e}")));
                }
            }
        }

        driver.close().await;
        handler_task
            .await
            .map_err(|e| DenliteError::Internal(format!("lifecycle handler panicked: {e}")))?;

        match first_error {
            None => Ok(()),
            Some(error) => Err(error),
        }
    }

    /// Tear the den down: stop and remove its containers, dependents
    /// before dependencies.
    pub async fn down(&self) -> DenliteResult<()> {
        match &self.config.source {
            ProvisionSource::Image(_) => {
                let container = self.config.primary_container_name();
                tracing::info!(%container, "tearing down den");
                self.runtime.stop(&container).await?;
                self.runtime.remove(&container).await
            }
            ProvisionSource::Compose(spec) => {
                let project = ComposeProject::new(self.config.name.clone(), spec, Vec::new())?;
                project.down(self.runtime.clone()).await
            }
        }
    }

    async fn run_session(
        &self,
        driver: &PhaseDriver,
        attach_tasks: &mut Vec<JoinHandle<DenliteResult<()>>>,
        feature_mounts: Vec<Mount>,
    ) -> DenliteResult<()> {
        driver.drive(LifecyclePhase::Initialize).await?;
        self.maybe_spawn_attach(LifecyclePhase::Initialize, driver, attach_tasks);

        self.provision_containers(feature_mounts).await?;

        for phase in [
            LifecyclePhase::FeatureInstall,
            LifecyclePhase::OnCreate,
            LifecyclePhase::UpdateContent,
            LifecyclePhase::PostCreate,
            LifecyclePhase::PostStart,
        ] {
            driver.drive(phase).await?;
            self.maybe_spawn_attach(phase, driver, attach_tasks);
        }
        Ok(())
    }

    async fn provision_containers(&self, feature_mounts: Vec<Mount>) -> DenliteResult<()> {
        let mut primary_mounts = vec![Mount {
            source: self.config.workspace_folder.clone(),
            target: self.config.container_workspace.clone(),
            read_only: false,
        }];
        primary_mounts.extend(feature_mounts);

        match &self.config.source {
            ProvisionSource::Image(image) => {
                let name = self.config.primary_container_name();
                tracing::info!(%image, container = %name, "provisioning den container");
                self.runtime.pull_image(image).await?;
                let id = self
                    .runtime
                    .create(&ContainerSpec {
                        name,
                        image: image.clone(),
                        // Keep the container alive for execs and attach.
                        command: vec!["sleep".to_string(), "infinity".to_string()],
                        env: Default::default(),
                        mounts: primary_mounts,
                    })
                    .await?;
                self.runtime.start(&id).await
            }
            ProvisionSource::Compose(spec) => {
                let project =
                    ComposeProject::new(self.config.name.clone(), spec, primary_mounts)?;
                project.up(self.runtime.clone()).await
            }
        }
    }

    fn maybe_spawn_attach(
        &self,
        phase: LifecyclePhase,
        driver: &PhaseDriver,
        attach_tasks: &mut Vec<JoinHandle<DenliteResult<()>>>,
    ) {
        if self.config.wait_for != Some(phase) {
            return;
        }
        let runtime = self.runtime.clone();
        let container = self.config.primary_container_name();
        let driver = driver.clone();
        tracing::info!(%phase, %container, "spawning terminal attach task");
        attach_tasks.push(tokio::spawn(async move {
            runtime.attach(&container).await?;
            // Interactive setup done; the attach task re-enters the
            // protocol for its own phase.
            driver.drive(LifecyclePhase::PostAttach).await
        }));
    }
}

/// Build the handler-side work function for one session.
///
/// Feature installation drains the install graph; every other phase runs
/// its configured hook command, or is a no-op without one.
fn phase_worker(
    runtime: Arc<dyn ContainerRuntime>,
    container: ContainerId,
    hooks: LifecycleHooks,
    workspace_folder: PathBuf,
    container_workspace: String,
    feature_graph: DependencyGraph<ResolvedFeature>,
) -> impl FnMut(LifecyclePhase) -> BoxFuture<'static, DenliteResult<()>> {
    let mut feature_graph = Some(feature_graph);

    move |phase| match phase {
        LifecyclePhase::FeatureInstall => {
            let graph = feature_graph.take();
            let runtime = runtime.clone();
            let container = container.clone();
            Box::pin(async move {
                let mut graph = graph.ok_or_else(|| {
                    DenliteError::Internal("feature install driven more than once".to_string())
                })?;
                drain(&mut graph, DrainDirection::Forward, move |_, feature| {
                    features::install_feature(runtime.clone(), container.clone(), feature)
                })
                .await
            })
        }
        phase => {
            let hook = hooks.for_phase(phase).cloned();
            let runtime = runtime.clone();
            let container = container.clone();
            let workspace_folder = workspace_folder.clone();
            let container_workspace = container_workspace.clone();
            Box::pin(async move {
                let Some(hook) = hook else {
                    tracing::debug!(%phase, "no hook bound, acknowledging");
                    return Ok(());
                };
                tracing::info!(%phase, "running hook command");
                if phase.runs_on_host() {
                    run_host_hook(&hook, &workspace_folder).await
                } else {
                    run_container_hook(runtime, &container, &hook, &container_workspace).await
                }
            })
        }
    }
}

/// Run a hook on the host, from the workspace folder.
async fn run_host_hook(hook: &HookCommand, workspace_folder: &Path) -> DenliteResult<()> {
    let argv = hook.argv();
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| DenliteError::Config("empty hook command".to_string()))?;

    let status = tokio::process::Command::new(program)
        .args(args)
        .current_dir(workspace_folder)
        .status()
        .await
        .map_err(|e| DenliteError::Runtime(format!("failed to spawn hook '{program}': {e}")))?;

    if status.success() {
        Ok(())
    } else {
        Err(DenliteError::Runtime(format!(
            "hook '{program}' exited with {status}"
        )))
    }
}

/// Run a hook inside the primary container, from the workspace mount.
async fn run_container_hook(
    runtime: Arc<dyn ContainerRuntime>,
    container: &ContainerId,
    hook: &HookCommand,
    container_workspace: &str,
) -> DenliteResult<()> {
    let status = runtime
        .exec(
            container,
            &ExecSpec {
                command: hook.argv(),
                env: Default::default(),
                workdir: Some(container_workspace.to_string()),
            },
        )
        .await?;

    if status.success() {
        Ok(())
    } else {
        Err(DenliteError::Runtime(format!(
            "hook exited with code {}",
            status.exit_code
        )))
    }
}
