//! Normalized configuration model.
//!
//! The engine consumes this as an already-validated, already-normalized
//! object: schema validation, variable expansion, and defaulting happen
//! upstream. The serde derives exist so the CLI and test fixtures can
//! read a prepared document from JSON; they are not a validation layer.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::{DenliteError, DenliteResult};
use crate::lifecycle::{HookCommand, LifecyclePhase};

/// Top-level configuration for one den.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DenConfig {
    /// Project name; prefixes every container name.
    pub name: String,

    /// Host folder mounted as the workspace.
    pub workspace_folder: PathBuf,

    /// Where the workspace appears inside the container.
    #[serde(default = "default_container_workspace")]
    pub container_workspace: String,

    #[serde(flatten)]
    pub source: ProvisionSource,

    #[serde(default)]
    pub features: Vec<FeatureSpec>,

    #[serde(default)]
    pub hooks: LifecycleHooks,

    /// The phase that triggers terminal attachment, if any.
    #[serde(default)]
    pub wait_for: Option<LifecyclePhase>,
}

fn default_container_workspace() -> String {
    "/workspace".to_string()
}

/// What produces the container(s): a single image, or a multi-service
/// compose deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProvisionSource {
    #[serde(rename = "image")]
    Image(String),
    #[serde(rename = "compose")]
    Compose(ComposeSpec),
}

/// A multi-service deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComposeSpec {
    pub services: Vec<ServiceSpec>,
    /// The service that hosts the workspace and receives hook execs.
    pub primary: String,
}

/// One container-producing unit within a compose deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSpec {
    pub name: String,
    pub image: String,
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Declared startup dependencies with their readiness conditions.
    #[serde(default)]
    pub depends_on: Vec<ServiceDependency>,
}

/// A dependency declaration on another service.
///
/// The condition is kept as the raw configured string; the dependency
/// waiter rejects unrecognized values with `UnknownCondition`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDependency {
    pub service: String,
    #[serde(default = "default_condition")]
    pub condition: String,
}

fn default_condition() -> String {
    "service_started".to_string()
}

/// One feature unit: a remotely distributed customization, referenced by
/// id, with options and ordering declarations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureSpec {
    /// OCI reference, or an opaque id when `resolved_path` is set.
    pub reference: String,

    #[serde(default)]
    pub options: BTreeMap<String, serde_json::Value>,

    /// Hard dependencies: referenced features must be declared.
    #[serde(default)]
    pub depends_on: Vec<String>,

    /// Soft ordering hints: silently dropped when the target is absent.
    #[serde(default)]
    pub install_after: Vec<String>,

    /// Pre-resolved local path for features that skip the cache.
    #[serde(default)]
    pub resolved_path: Option<PathBuf>,
}

/// The hook command bound to each phase, if any.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleHooks {
    #[serde(default)]
    pub initialize: Option<HookCommand>,
    #[serde(default)]
    pub on_create: Option<HookCommand>,
    #[serde(default)]
    pub update_content: Option<HookCommand>,
    #[serde(default)]
    pub post_create: Option<HookCommand>,
    #[serde(default)]
    pub post_start: Option<HookCommand>,
    #[serde(default)]
    pub post_attach: Option<HookCommand>,
}

impl LifecycleHooks {
    /// Hook bound to `phase`. Feature installation has no hook command;
    /// its work is the feature-install graph.
    pub fn for_phase(&self, phase: LifecyclePhase) -> Option<&HookCommand> {
        let hook = match phase {
            LifecyclePhase::FeatureInstall => None,
            LifecyclePhase::Initialize => self.initialize.as_ref(),
            LifecyclePhase::OnCreate => self.on_create.as_ref(),
            LifecyclePhase::UpdateContent => self.update_content.as_ref(),
            LifecyclePhase::PostCreate => self.post_create.as_ref(),
            LifecyclePhase::PostStart => self.post_start.as_ref(),
            LifecyclePhase::PostAttach => self.post_attach.as_ref(),
        };
        hook.filter(|h| !h.is_empty())
    }
}

impl DenConfig {
    /// Read a prepared configuration document from disk.
    pub fn from_json_file(path: &Path) -> DenliteResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            DenliteError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&contents).map_err(|e| {
            DenliteError::Config(format!("failed to parse {}: {}", path.display(), e))
        })
    }

    /// Deterministic container name for a compose service.
    pub fn service_container_name(&self, service: &str) -> String {
        format!("{}-{}", self.name, service)
    }

    /// Container name for the single-image path, and for hook execs.
    pub fn primary_container_name(&self) -> String {
        match &self.source {
            ProvisionSource::Image(_) => self.name.clone(),
            ProvisionSource::Compose(compose) => self.service_container_name(&compose.primary),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_parses_from_json() {
        let doc = r#"{
            "name": "webapp",
            "workspaceFolder": "/home/dev/webapp",
            "image": "mcr.microsoft.com/devcontainers/base:ubuntu",
            "features": [
                {"reference": "ghcr.io/devcontainers/features/node:1",
                 "options": {"version": "20"}}
            ],
            "hooks": {"postCreate": "npm install"},
            "waitFor": "postStart"
        }"#;

        let config: DenConfig = serde_json::from_str(doc).unwrap();
        assert_eq!(config.name, "webapp");
        assert_eq!(config.container_workspace, "/workspace");
        assert!(matches!(config.source, ProvisionSource::Image(_)));
        assert_eq!(config.features.len(), 1);
        assert_eq!(config.wait_for, Some(LifecyclePhase::PostStart));
        assert_eq!(
            config.hooks.for_phase(LifecyclePhase::PostCreate),
            Some(&HookCommand::Shell("npm install".into()))
        );
        assert_eq!(config.hooks.for_phase(LifecyclePhase::PostStart), None);
    }

    #[test]
    fn test_compose_config_and_container_names() {
        let doc = r#"{
            "name": "stack",
            "workspaceFolder": "/home/dev/stack",
            "compose": {
                "primary": "app",
                "services": [
                    {"name": "db", "image": "postgres:16"},
                    {"name": "app", "image": "stack-app:dev",
                     "dependsOn": [{"service": "db", "condition": "service_healthy"}]}
                ]
            }
        }"#;

        let config: DenConfig = serde_json::from_str(doc).unwrap();
        assert_eq!(config.primary_container_name(), "stack-app");
        assert_eq!(config.service_container_name("db"), "stack-db");
        match &config.source {
            ProvisionSource::Compose(compose) => {
                assert_eq!(compose.services[1].depends_on[0].condition, "service_healthy");
            }
            other => panic!("expected compose source, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_hook_is_ignored() {
        let hooks = LifecycleHooks {
            post_create: Some(HookCommand::Shell(String::new())),
            ..Default::default()
        };
        assert_eq!(hooks.for_phase(LifecyclePhase::PostCreate), None);
    }
}
