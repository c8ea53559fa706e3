//! Level-parallel graph drain.
//!
//! Drains a [`DependencyGraph`] level by level: compute the ready set,
//! launch one worker task per ready vertex, join the whole level, then
//! delete it and repeat. Feature installation and compose startup drain
//! forward (roots first); compose teardown drains in reverse (leaves
//! first).
//!
//! Failure semantics are fail-fast with no automatic rollback: the first
//! error aborts the drain, leaving the failed level's vertices and all
//! unreached levels in the graph. Levels that already completed stay
//! deleted.

use std::future::Future;

use crate::errors::{DenliteError, DenliteResult};
use crate::graph::DependencyGraph;

/// Which end of the graph supplies the ready set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainDirection {
    /// Dependencies before dependents (roots first).
    Forward,
    /// Dependents before dependencies (leaves first), for teardown.
    Reverse,
}

/// Drain `graph` level by level, running `unit_fn` once per vertex.
///
/// Vertices within a level run concurrently on their own tasks; their
/// relative order is unspecified. All of level N completes before any
/// vertex of level N+1 launches.
///
/// Returns the first error collected from a failed level, wrapped as
/// `UnitFailed` with the vertex id. A non-empty graph with an empty ready
/// set means the input contained a cycle and yields `MalformedGraph`.
pub async fn drain<T, F, Fut>(
    graph: &mut DependencyGraph<T>,
    direction: DrainDirection,
    unit_fn: F,
) -> DenliteResult<()>
where
    T: Clone + Send + 'static,
    F: Fn(String, T) -> Fut,
    Fut: Future<Output = DenliteResult<()>> + Send + 'static,
{
    loop {
        let ready = match direction {
            DrainDirection::Forward => graph.roots(),
            DrainDirection::Reverse => graph.leaves(),
        };

        if ready.is_empty() {
            if graph.is_empty() {
                return Ok(());
            }
            return Err(DenliteError::MalformedGraph);
        }

        tracing::debug!(level_size = ready.len(), ?direction, "draining level");

        // One worker task per ready vertex, joined as a whole level.
        let mut handles = Vec::with_capacity(ready.len());
        for id in &ready {
            let payload = graph
                .payload(id)
                .cloned()
                .ok_or_else(|| DenliteError::Internal(format!("ready vertex vanished: {id}")))?;
            handles.push((id.clone(), tokio::spawn(unit_fn(id.clone(), payload))));
        }

        let mut first_error = None;
        for (id, handle) in handles {
            let result = handle.await.map_err(|e| {
                DenliteError::Internal(format!("unit task for '{id}' panicked: {e}"))
            })?;
            if let Err(e) = result {
                tracing::error!(unit = %id, error = %e, "unit execution failed");
                if first_error.is_none() {
                    first_error = Some(DenliteError::unit_failed(id, e));
                }
            }
        }

        if let Some(error) = first_error {
            return Err(error);
        }

        for id in &ready {
            graph.delete_vertex(id)?;
        }
    }
}
