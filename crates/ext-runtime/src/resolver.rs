//! Dependency graph and load-order resolution for installed extensions.
//!
//! The resolver reads each candidate directory's manifest, builds a directed
//! graph from the declared dependencies (excluding the reserved `"core"`
//! key), and orders it depth-first so dependencies load before dependents. A
//! node re-encountered while still temporarily marked is a cycle and fails
//! the sort naming that node. Missing or unreadable manifests degrade to an
//! empty dependency set with a logged warning.
//!
//! # Example
//!
//! ```
//! use ext_runtime::resolver::DependencyGraph;
//!
//! let mut graph = DependencyGraph::new();
//! graph.add_node("parent");
//! graph.add_node("child");
//! graph.add_edge("child", "parent");
//!
//! let order = graph.topological_sort().unwrap();
//! assert_eq!(order, vec!["parent", "child"]);
//! ```

use std::collections::{BTreeMap, BTreeSet};

use ext_fs::StorageLayout;

use crate::error::{Error, Result};
use crate::manifest::ExtensionManifest;

/// DFS coloring: absent from the map means unvisited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    /// On the current DFS path.
    Temporary,
    /// Fully explored.
    Visited,
}

/// Directed dependency graph over extension names.
///
/// Edges point from dependent to dependency: if A requires B, the edge is
/// `A -> B`. Topological sort returns dependency-first order (B before A).
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// Node -> its direct dependencies.
    edges: BTreeMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node with no edges. Re-adding is a no-op.
    pub fn add_node(&mut self, id: impl Into<String>) {
        self.edges.entry(id.into()).or_default();
    }

    /// Declare that `from` depends on `to`.
    ///
    /// The edge is ignored unless both nodes exist: a dependency on
    /// something outside the candidate set is the registry's
    /// `check_dependencies` concern, not the sorter's.
    pub fn add_edge(&mut self, from: &str, to: &str) {
        if !self.edges.contains_key(from) || !self.edges.contains_key(to) {
            return;
        }
        if let Some(deps) = self.edges.get_mut(from) {
            deps.insert(to.to_string());
        }
    }

    /// Number of nodes.
    pub fn node_count(&self) -> usize {
        self.edges.len()
    }

    /// Number of edges.
    pub fn edge_count(&self) -> usize {
        self.edges.values().map(BTreeSet::len).sum()
    }

    /// Direct dependencies of a node.
    pub fn dependencies_of(&self, id: &str) -> Vec<&str> {
        self.edges
            .get(id)
            .map(|deps| deps.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Depth-first topological sort, dependency-first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DependencyCycle`] naming the node that was
    /// re-encountered while still on the DFS path.
    pub fn topological_sort(&self) -> Result<Vec<String>> {
        let mut marks = BTreeMap::new();
        let mut order = Vec::with_capacity(self.edges.len());
        for node in self.edges.keys() {
            self.visit(node, &mut marks, &mut order)
                .map_err(Error::DependencyCycle)?;
        }
        Ok(order)
    }

    /// Sort, but degrade on cycles: acyclic nodes come back in valid
    /// dependency-first order and the unresolved remainder is appended in
    /// name order with a logged warning.
    pub fn sort_with_fallback(&self) -> Vec<String> {
        let mut marks = BTreeMap::new();
        let mut order = Vec::with_capacity(self.edges.len());
        let mut cycle_seen = false;
        for node in self.edges.keys() {
            if let Err(participant) = self.visit(node, &mut marks, &mut order) {
                if !cycle_seen {
                    tracing::warn!(
                        "dependency cycle detected at '{participant}', \
                         falling back to unsorted order for the unresolved remainder"
                    );
                    cycle_seen = true;
                }
            }
        }
        let remainder: Vec<String> = self
            .edges
            .keys()
            .filter(|node| marks.get(*node) != Some(&Mark::Visited))
            .cloned()
            .collect();
        if !remainder.is_empty() {
            tracing::warn!("unresolved load order for: {}", remainder.join(", "));
        }
        order.extend(remainder);
        order
    }

    fn visit(
        &self,
        node: &str,
        marks: &mut BTreeMap<String, Mark>,
        order: &mut Vec<String>,
    ) -> std::result::Result<(), String> {
        match marks.get(node) {
            Some(Mark::Visited) => return Ok(()),
            Some(Mark::Temporary) => return Err(node.to_string()),
            None => {}
        }
        marks.insert(node.to_string(), Mark::Temporary);
        if let Some(deps) = self.edges.get(node) {
            for dep in deps {
                self.visit(dep, marks, order)?;
            }
        }
        marks.insert(node.to_string(), Mark::Visited);
        order.push(node.to_string());
        Ok(())
    }
}

/// One extension directory considered for loading.
#[derive(Debug, Clone)]
pub struct Candidate {
    /// On-disk directory identifier under managed storage.
    pub dir_id: String,
    /// Parsed manifest, or `None` when missing/unreadable.
    pub manifest: Option<ExtensionManifest>,
}

impl Candidate {
    /// The logical extension name: the manifest's name, or the directory
    /// identifier when no manifest could be read.
    pub fn logical_name(&self) -> &str {
        self.manifest
            .as_ref()
            .map(|m| m.name())
            .unwrap_or(&self.dir_id)
    }
}

/// Scan managed storage for load candidates.
///
/// Directories whose manifest is missing or malformed are kept as
/// candidates with an empty dependency set, logged as warnings.
pub fn scan_storage(layout: &StorageLayout) -> Result<Vec<Candidate>> {
    let mut candidates = Vec::new();
    for dir_id in layout.installed_names()? {
        let dir = layout.extension_dir(&dir_id);
        let manifest = match ExtensionManifest::from_dir(&dir) {
            Ok(manifest) => Some(manifest),
            Err(e) => {
                tracing::warn!(
                    "skipping manifest for '{dir_id}', treating as dependency-free: {e}"
                );
                None
            }
        };
        candidates.push(Candidate { dir_id, manifest });
    }
    Ok(candidates)
}

/// Order candidates dependency-first, mapping resolved logical names back
/// to their directory identifiers. Cycles degrade per
/// [`DependencyGraph::sort_with_fallback`].
pub fn plan_load_order(candidates: Vec<Candidate>) -> Vec<Candidate> {
    let mut graph = DependencyGraph::new();
    for candidate in &candidates {
        graph.add_node(candidate.logical_name());
    }
    for candidate in &candidates {
        if let Some(manifest) = &candidate.manifest {
            for dep in manifest.dependency_names() {
                graph.add_edge(candidate.logical_name(), &dep);
            }
        }
    }

    let mut by_name: BTreeMap<String, Candidate> = candidates
        .into_iter()
        .map(|c| (c.logical_name().to_string(), c))
        .collect();

    graph
        .sort_with_fallback()
        .into_iter()
        .filter_map(|name| by_name.remove(&name))
        .collect()
}
