//! Compose deployments: service graph compilation, startup, teardown.
//!
//! Services compile into a dependency graph keyed by service name, with
//! one hard edge per declared dependency. Startup drains the graph
//! forward (each service waits on its dependency conditions, then pulls,
//! creates, and starts its container); teardown drains a clone of the
//! same graph in reverse, stopping and removing dependents before their
//! dependencies. Each traversal works on its own clone so the compiled
//! graph is never consumed.

pub mod waiter;

use std::sync::Arc;

use crate::config::{ComposeSpec, ServiceSpec};
use crate::errors::{DenliteError, DenliteResult};
use crate::graph::executor::{drain, DrainDirection};
use crate::graph::DependencyGraph;
use crate::runtime::{ContainerRuntime, ContainerSpec, Mount};
use crate::compose::waiter::{wait_for_dependencies, DependencyWait};

/// A compiled compose deployment, ready to start or tear down.
pub struct ComposeProject {
    project: String,
    primary: String,
    graph: DependencyGraph<ServiceSpec>,
    /// Extra mounts for the primary service (workspace, features).
    primary_mounts: Vec<Mount>,
}

impl ComposeProject {
    /// Compile a deployment for `project`.
    ///
    /// Fails with `UnknownVertex` when a service depends on an undeclared
    /// service, and with a config error when the primary service is not
    /// part of the set.
    pub fn new(
        project: impl Into<String>,
        spec: &ComposeSpec,
        primary_mounts: Vec<Mount>,
    ) -> DenliteResult<Self> {
        let graph = compile(&spec.services)?;
        if !graph.contains(&spec.primary) {
            return Err(DenliteError::Config(format!(
                "primary service '{}' is not declared",
                spec.primary
            )));
        }
        Ok(Self {
            project: project.into(),
            primary: spec.primary.clone(),
            graph,
            primary_mounts,
        })
    }

    pub fn service_names(&self) -> Vec<String> {
        self.graph.ids()
    }

    /// Start every service in dependency order.
    pub async fn up(&self, runtime: Arc<dyn ContainerRuntime>) -> DenliteResult<()> {
        let mut graph = self.graph.clone();
        let project = self.project.clone();
        let primary = self.primary.clone();
        let primary_mounts = self.primary_mounts.clone();

        drain(&mut graph, DrainDirection::Forward, move |name, service| {
            let runtime = runtime.clone();
            let project = project.clone();
            let mounts = if name == primary {
                primary_mounts.clone()
            } else {
                Vec::new()
            };
            provision_service(runtime, project, service, mounts)
        })
        .await
    }

    /// Stop and remove every service, dependents first.
    pub async fn down(&self, runtime: Arc<dyn ContainerRuntime>) -> DenliteResult<()> {
        let mut graph = self.graph.clone();
        let project = self.project.clone();

        drain(&mut graph, DrainDirection::Reverse, move |name, _service| {
            let runtime = runtime.clone();
            let container = container_name(&project, &name);
            async move {
                tracing::info!(container = %container, "tearing down service");
                runtime.stop(&container).await?;
                runtime.remove(&container).await
            }
        })
        .await
    }
}

/// Deterministic container name for a service.
pub fn container_name(project: &str, service: &str) -> String {
    format!("{project}-{service}")
}

/// Compile services into a startup-order graph. Every declared dependency
/// is a hard edge; depending on an undeclared service is an error.
pub fn compile(services: &[ServiceSpec]) -> DenliteResult<DependencyGraph<ServiceSpec>> {
    let mut graph = DependencyGraph::new();
    for service in services {
        graph.add_vertex(service.name.clone(), service.clone())?;
    }
    for service in services {
        for dependency in &service.depends_on {
            graph.add_edge(&dependency.service, &service.name)?;
        }
    }
    Ok(graph)
}

/// Provision one service: block on its dependency conditions, then pull,
/// create, and start its container.
async fn provision_service(
    runtime: Arc<dyn ContainerRuntime>,
    project: String,
    service: ServiceSpec,
    mounts: Vec<Mount>,
) -> DenliteResult<()> {
    let waits = service
        .depends_on
        .iter()
        .map(|dependency| {
            Ok(DependencyWait {
                service: dependency.service.clone(),
                container: container_name(&project, &dependency.service),
                condition: dependency.condition.parse()?,
            })
        })
        .collect::<DenliteResult<Vec<_>>>()?;
    wait_for_dependencies(runtime.clone(), waits).await?;

    tracing::info!(service = %service.name, image = %service.image, "provisioning service");
    runtime.pull_image(&service.image).await?;
    let id = runtime
        .create(&ContainerSpec {
            name: container_name(&project, &service.name),
            image: service.image.clone(),
            command: service.command.clone(),
            env: service.env.clone(),
            mounts,
        })
        .await?;
    runtime.start(&id).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServiceDependency;
    use crate::runtime::{ContainerId, ContainerState, ExecSpec, ExecStatus, HealthStatus};
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    fn service(name: &str, depends_on: &[(&str, &str)]) -> ServiceSpec {
        ServiceSpec {
            name: name.to_string(),
            image: format!("{name}:latest"),
            command: Vec::new(),
            env: Default::default(),
            depends_on: depends_on
                .iter()
                .map(|(service, condition)| ServiceDependency {
                    service: service.to_string(),
                    condition: condition.to_string(),
                })
                .collect(),
        }
    }

    fn compose_spec(services: Vec<ServiceSpec>, primary: &str) -> ComposeSpec {
        ComposeSpec {
            services,
            primary: primary.to_string(),
        }
    }

    /// Runtime that records the call sequence and reports every container
    /// as running and healthy.
    #[derive(Default)]
    struct RecordingRuntime {
        calls: StdMutex<Vec<String>>,
    }

    impl RecordingRuntime {
        fn record(&self, call: impl Into<String>) {
            self.calls.lock().unwrap().push(call.into());
        }
    }

    #[async_trait]
    impl ContainerRuntime for RecordingRuntime {
        async fn pull_image(&self, reference: &str) -> DenliteResult<()> {
            self.record(format!("pull {reference}"));
            Ok(())
        }
        async fn build_image(&self, _: &std::path::Path, _: &str) -> DenliteResult<()> {
            Ok(())
        }
        async fn create(&self, spec: &ContainerSpec) -> DenliteResult<ContainerId> {
            self.record(format!("create {}", spec.name));
            Ok(spec.name.clone())
        }
        async fn start(&self, id: &ContainerId) -> DenliteResult<()> {
            self.record(format!("start {id}"));
            Ok(())
        }
        async fn stop(&self, id: &ContainerId) -> DenliteResult<()> {
            self.record(format!("stop {id}"));
            Ok(())
        }
        async fn remove(&self, id: &ContainerId) -> DenliteResult<()> {
            self.record(format!("remove {id}"));
            Ok(())
        }
        async fn exec(&self, _: &ContainerId, _: &ExecSpec) -> DenliteResult<ExecStatus> {
            Ok(ExecStatus { exit_code: 0 })
        }
        async fn inspect(&self, _: &ContainerId) -> DenliteResult<ContainerState> {
            Ok(ContainerState {
                running: true,
                exit_code: None,
                health: Some(HealthStatus::Healthy),
            })
        }
        async fn wait_next_exit(&self, _: &ContainerId) -> DenliteResult<i64> {
            Ok(0)
        }
        async fn attach(&self, _: &ContainerId) -> DenliteResult<()> {
            Ok(())
        }
    }

    #[test]
    fn test_compile_rejects_undeclared_dependency() {
        let services = vec![service("app", &[("db", "service_started")])];
        assert!(matches!(
            compile(&services),
            Err(DenliteError::UnknownVertex(_))
        ));
    }

    #[test]
    fn test_compile_levels() {
        let services = vec![
            service("app", &[("db", "service_started"), ("cache", "service_started")]),
            service("db", &[]),
            service("cache", &[]),
        ];
        let graph = compile(&services).unwrap();
        assert_eq!(graph.roots(), vec!["cache".to_string(), "db".to_string()]);
        assert_eq!(graph.leaves(), vec!["app".to_string()]);
    }

    #[test]
    fn test_primary_must_be_declared() {
        let spec = compose_spec(vec![service("db", &[])], "app");
        assert!(matches!(
            ComposeProject::new("stack", &spec, Vec::new()),
            Err(DenliteError::Config(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_up_starts_dependencies_before_dependents() {
        let spec = compose_spec(
            vec![
                service("db", &[]),
                service("app", &[("db", "service_started")]),
            ],
            "app",
        );
        let project = ComposeProject::new("stack", &spec, Vec::new()).unwrap();
        let runtime = Arc::new(RecordingRuntime::default());

        project.up(runtime.clone()).await.unwrap();

        let calls = runtime.calls.lock().unwrap();
        let db_start = calls.iter().position(|c| c == "start stack-db").unwrap();
        let app_create = calls.iter().position(|c| c == "create stack-app").unwrap();
        assert!(db_start < app_create);
    }

    #[tokio::test(start_paused = true)]
    async fn test_up_leaves_compiled_graph_reusable_for_down() {
        let spec = compose_spec(
            vec![
                service("db", &[]),
                service("app", &[("db", "service_started")]),
            ],
            "app",
        );
        let project = ComposeProject::new("stack", &spec, Vec::new()).unwrap();
        let runtime = Arc::new(RecordingRuntime::default());

        project.up(runtime.clone()).await.unwrap();
        project.down(runtime.clone()).await.unwrap();

        let calls = runtime.calls.lock().unwrap();
        // Teardown runs dependents first.
        let app_stop = calls.iter().position(|c| c == "stop stack-app").unwrap();
        let db_stop = calls.iter().position(|c| c == "stop stack-db").unwrap();
        assert!(app_stop < db_stop);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_condition_aborts_provisioning() {
        let spec = compose_spec(
            vec![
                service("db", &[]),
                service("app", &[("db", "service_ready")]),
            ],
            "app",
        );
        let project = ComposeProject::new("stack", &spec, Vec::new()).unwrap();
        let runtime = Arc::new(RecordingRuntime::default());

        let err = project.up(runtime).await.unwrap_err();
        match err {
            DenliteError::UnitFailed { unit, source } => {
                assert_eq!(unit, "app");
                assert!(matches!(*source, DenliteError::UnknownCondition(_)));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
