//! Error types shared across the provisioning engine.
//!
//! Orchestration faults get their own variants so callers can tell a
//! compilation bug (graph faults) from an expected runtime failure (a unit
//! that returned an error). Collaborator boundaries (runtime client,
//! storage, configuration) use broad string-carrying variants.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type DenliteResult<T> = Result<T, DenliteError>;

/// All errors produced by the provisioning engine.
#[derive(Debug, Error)]
pub enum DenliteError {
    // ------------------------------------------------------------------
    // Graph construction / drain faults. These indicate a compilation bug
    // upstream and are never expected during normal operation.
    // ------------------------------------------------------------------
    /// A vertex with this id is already present in the graph.
    #[error("duplicate vertex: {0}")]
    DuplicateVertex(String),

    /// An operation referenced a vertex that is not in the graph.
    #[error("unknown vertex: {0}")]
    UnknownVertex(String),

    /// A non-empty graph produced an empty ready set: the input contained
    /// a cycle.
    #[error("malformed dependency graph: no executable vertices remain")]
    MalformedGraph,

    /// A unit-execution function failed while draining a graph level.
    #[error("unit '{unit}' failed: {source}")]
    UnitFailed {
        unit: String,
        #[source]
        source: Box<DenliteError>,
    },

    // ------------------------------------------------------------------
    // Artifact cache faults.
    // ------------------------------------------------------------------
    /// The remote reference could not be resolved and no cached copy
    /// exists to fall back to.
    #[error("unresolvable feature reference '{0}'")]
    UnresolvableReference(String),

    /// The resolved artifact's media type is not one this engine can use.
    #[error("unsupported media type for '{0}'")]
    UnsupportedMediaType(String),

    /// None of the artifact's layers carry the expected layer media type.
    #[error("no usable layer in artifact '{0}'")]
    NoUsableLayer(String),

    // ------------------------------------------------------------------
    // Dependency waiter faults.
    // ------------------------------------------------------------------
    /// A declared dependency condition string was not recognized.
    #[error("unknown dependency condition '{0}'")]
    UnknownCondition(String),

    /// A dependency condition failed fatally or exhausted its poll budget.
    #[error("dependency '{0}' failed: {1}")]
    DependencyFailed(String, String),

    // ------------------------------------------------------------------
    // Lifecycle coordinator faults.
    // ------------------------------------------------------------------
    /// The handler acknowledged a phase with failure. The underlying cause
    /// is logged on the handler side; the ack channel carries only a bool.
    #[error("lifecycle handler failed for phase '{0}'")]
    LifecycleHandlerFailed(String),

    // ------------------------------------------------------------------
    // Collaborator boundaries.
    // ------------------------------------------------------------------
    /// Container runtime client failure (create/start/inspect/...).
    #[error("runtime error: {0}")]
    Runtime(String),

    /// Local storage failure (cache directories, index file, extraction).
    #[error("storage error: {0}")]
    Storage(String),

    /// Invalid or inconsistent configuration input.
    #[error("config error: {0}")]
    Config(String),

    /// Invariant violation inside the engine itself.
    #[error("internal error: {0}")]
    Internal(String),
}

impl DenliteError {
    /// Wrap an error as a unit-execution failure for the named unit.
    pub fn unit_failed(unit: impl Into<String>, source: DenliteError) -> Self {
        DenliteError::UnitFailed {
            unit: unit.into(),
            source: Box::new(source),
        }
    }
}
