//! denlite - provisioning engine for local, ephemeral dev-container
//! environments.
//!
//! A den is described by a declarative configuration: a base image or a
//! compose service set, optional features with inter-feature ordering,
//! and hook commands bound to lifecycle phases. The engine compiles the
//! feature and service sets into dependency graphs, drains them level by
//! level with one worker task per ready unit, resolves remote features
//! through a content-addressed cache, gates service startup on declared
//! readiness conditions, and interleaves hook execution with provisioning
//! through a synchronous phase/acknowledgment protocol.

pub mod compose;
pub mod config;
pub mod errors;
pub mod features;
pub mod graph;
pub mod layout;
pub mod lifecycle;
pub mod provision;
pub mod runtime;

pub use config::DenConfig;
pub use errors::{DenliteError, DenliteResult};
pub use layout::DenliteLayout;
pub use lifecycle::LifecyclePhase;
pub use provision::Provisioner;
pub use runtime::docker::DockerCli;
pub use runtime::ContainerRuntime;
