//! Dependency graph over named units.
//!
//! Both the feature set and the compose service set compile into one of
//! these: vertices are units, edges are "must complete before" relations
//! pointing from a dependency at its dependents. Roots (no remaining
//! incoming edges) are safe to execute going forward; leaves (no remaining
//! outgoing edges) are safe going backward, which is how teardown runs.
//!
//! The graph is only ever mutated by the single task driving a drain.
//! Traversals that must not race each other (startup vs. teardown) each
//! work on their own `clone()` of the compiled graph.
//!
//! Cycle detection is deliberately lazy: both compile sites produce
//! acyclic graphs by construction, and the executor reports
//! `MalformedGraph` if a non-empty graph ever yields an empty ready set.

pub mod executor;

use std::collections::{BTreeMap, BTreeSet};

use crate::errors::{DenliteError, DenliteResult};

#[derive(Debug, Clone)]
struct Vertex<T> {
    payload: T,
    /// Ids of vertices that must not run until this one completes.
    dependents: BTreeSet<String>,
}

/// A directed acyclic graph of named units with typed payloads.
///
/// Vertices are keyed by a stable string id, unique within the graph.
/// `clone()` produces a structurally independent copy; draining the clone
/// leaves the original untouched.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph<T> {
    vertices: BTreeMap<String, Vertex<T>>,
}

impl<T> DependencyGraph<T> {
    pub fn new() -> Self {
        Self {
            vertices: BTreeMap::new(),
        }
    }

    /// Insert a vertex. Fails with `DuplicateVertex` if the id is taken.
    pub fn add_vertex(&mut self, id: impl Into<String>, payload: T) -> DenliteResult<()> {
        let id = id.into();
        if self.vertices.contains_key(&id) {
            return Err(DenliteError::DuplicateVertex(id));
        }
        self.vertices.insert(
            id,
            Vertex {
                payload,
                dependents: BTreeSet::new(),
            },
        );
        Ok(())
    }

    /// Insert an edge recording that `from` must complete before `to`.
    ///
    /// Fails with `UnknownVertex` if either endpoint is absent. Inserting
    /// the same edge twice is a no-op.
    pub fn add_edge(&mut self, from: &str, to: &str) -> DenliteResult<()> {
        if !self.vertices.contains_key(to) {
            return Err(DenliteError::UnknownVertex(to.to_string()));
        }
        let vertex = self
            .vertices
            .get_mut(from)
            .ok_or_else(|| DenliteError::UnknownVertex(from.to_string()))?;
        vertex.dependents.insert(to.to_string());
        Ok(())
    }

    /// Remove a vertex and all of its incident edges.
    pub fn delete_vertex(&mut self, id: &str) -> DenliteResult<()> {
        if self.vertices.remove(id).is_none() {
            return Err(DenliteError::UnknownVertex(id.to_string()));
        }
        for vertex in self.vertices.values_mut() {
            vertex.dependents.remove(id);
        }
        Ok(())
    }

    /// Ids of vertices with no remaining incoming edges.
    pub fn roots(&self) -> Vec<String> {
        let mut targets: BTreeSet<&String> = BTreeSet::new();
        for vertex in self.vertices.values() {
            targets.extend(&vertex.dependents);
        }
        self.vertices
            .keys()
            .filter(|id| !targets.contains(id))
            .cloned()
            .collect()
    }

    /// Ids of vertices with no remaining outgoing edges.
    pub fn leaves(&self) -> Vec<String> {
        self.vertices
            .iter()
            .filter(|(_, v)| v.dependents.is_empty())
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.vertices.contains_key(id)
    }

    pub fn payload(&self, id: &str) -> Option<&T> {
        self.vertices.get(id).map(|v| &v.payload)
    }

    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// All vertex ids, in key order.
    pub fn ids(&self) -> Vec<String> {
        self.vertices.keys().cloned().collect()
    }
}
