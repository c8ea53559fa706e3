//! Feature units: resolution, dependency-graph compilation, installation.
//!
//! A feature is an optional, independently distributed unit of container
//! customization. Remote references resolve through the artifact cache;
//! the declared orderings compile into a [`DependencyGraph`] that the
//! level-parallel executor drains at the feature-install phase, running
//! each feature's install script inside the primary container.

pub mod cache;
pub mod index;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::FeatureSpec;
use crate::errors::{DenliteError, DenliteResult};
use crate::features::cache::FeatureCache;
use crate::graph::DependencyGraph;
use crate::runtime::{ContainerId, ContainerRuntime, ExecSpec, Mount};

/// Where feature directories appear inside the container.
pub const FEATURES_MOUNT_ROOT: &str = "/opt/denlite/features";

/// A feature whose reference has been resolved to a local directory.
#[derive(Debug, Clone)]
pub struct ResolvedFeature {
    /// Canonical id: the reference with any version suffix stripped.
    pub id: String,
    pub reference: String,
    pub options: BTreeMap<String, serde_json::Value>,
    pub depends_on: Vec<String>,
    pub install_after: Vec<String>,
    /// Host directory holding the feature's install script.
    pub local_path: PathBuf,
}

impl ResolvedFeature {
    /// Directory this feature is mounted at inside the container.
    pub fn container_path(&self) -> String {
        format!("{}/{}", FEATURES_MOUNT_ROOT, path_safe(&self.id))
    }

    /// Read-only bind mount exposing the feature to the container.
    pub fn mount(&self) -> Mount {
        Mount {
            source: self.local_path.clone(),
            target: self.container_path(),
            read_only: true,
        }
    }
}

/// Strip the version suffix (tag or digest) from a feature reference.
///
/// A dependency declaration and the feature it names need not be
/// byte-identical (`.../node` vs `.../node:1`), so edges match on this
/// canonical form.
pub fn canonical_id(reference: &str) -> String {
    let reference = match reference.split_once('@') {
        Some((base, _digest)) => base,
        None => reference,
    };
    // Only a ':' in the last path segment is a version; earlier ones are
    // registry ports (localhost:5000/...).
    match reference.rsplit_once('/') {
        Some((prefix, last)) => match last.split_once(':') {
            Some((name, _tag)) => format!("{prefix}/{name}"),
            None => reference.to_string(),
        },
        None => match reference.split_once(':') {
            Some((name, _tag)) => name.to_string(),
            None => reference.to_string(),
        },
    }
}

fn path_safe(id: &str) -> String {
    id.replace(['/', ':'], "-")
}

/// Resolve every declared feature to a local directory.
///
/// Pre-resolved features (local path in the configuration) skip the
/// cache; everything else goes through [`FeatureCache::resolve`].
pub async fn resolve_all(
    cache: &FeatureCache,
    specs: &[FeatureSpec],
) -> DenliteResult<Vec<ResolvedFeature>> {
    let mut resolved = Vec::with_capacity(specs.len());
    for spec in specs {
        let local_path = match &spec.resolved_path {
            Some(path) => path.clone(),
            None => cache.resolve(&spec.reference).await?,
        };
        resolved.push(ResolvedFeature {
            id: canonical_id(&spec.reference),
            reference: spec.reference.clone(),
            options: spec.options.clone(),
            depends_on: spec.depends_on.clone(),
            install_after: spec.install_after.clone(),
            local_path,
        });
    }
    Ok(resolved)
}

/// Compile resolved features into an install-order graph.
///
/// `depends_on` declarations are hard edges: a missing target fails
/// compilation. `install_after` hints are soft: silently dropped when the
/// target is not part of this den.
pub fn compile(features: Vec<ResolvedFeature>) -> DenliteResult<DependencyGraph<ResolvedFeature>> {
    let mut graph = DependencyGraph::new();
    for feature in &features {
        graph.add_vertex(feature.id.clone(), feature.clone())?;
    }
    for feature in &features {
        for dependency in &feature.depends_on {
            graph.add_edge(&canonical_id(dependency), &feature.id)?;
        }
        for hint in &feature.install_after {
            let hint_id = canonical_id(hint);
            if graph.contains(&hint_id) {
                graph.add_edge(&hint_id, &feature.id)?;
            } else {
                tracing::debug!(feature = %feature.id, after = %hint_id, "dropping soft ordering hint for absent feature");
            }
        }
    }
    Ok(graph)
}

/// Run one feature's install script inside the container.
///
/// Options are surfaced to the script as environment variables, the
/// option name uppercased (`version` → `VERSION`).
pub async fn install_feature(
    runtime: Arc<dyn ContainerRuntime>,
    container: ContainerId,
    feature: ResolvedFeature,
) -> DenliteResult<()> {
    let mut env = BTreeMap::new();
    for (key, value) in &feature.options {
        let name: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
            .collect();
        let value = match value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        env.insert(name, value);
    }

    tracing::info!(feature = %feature.id, container = %container, "installing feature");
    let status = runtime
        .exec(
            &container,
            &ExecSpec {
                command: vec!["/bin/sh".to_string(), "-c".to_string(), "./install.sh".to_string()],
                env,
                workdir: Some(feature.container_path()),
            },
        )
        .await?;

    if status.success() {
        Ok(())
    } else {
        Err(DenliteError::Runtime(format!(
            "install script for '{}' exited with code {}",
            feature.id, status.exit_code
        )))
    }
}
