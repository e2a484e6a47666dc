//! Dependency graph over a set of packages
//!
//! Immutable once built: nodes, forward edges (package -> dependencies),
//! and the reverse index (package -> dependents). Construction validates
//! that every edge target exists and that the graph is acyclic.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::package::Package;

/// Errors from graph construction
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("Duplicate package name: {0}")]
    DuplicatePackage(String),

    #[error("Package {package} depends on unknown package {dependency}")]
    UnknownDependency { package: String, dependency: String },

    #[error("Dependency cycle detected: {}", path.join(" -> "))]
    Cycle { path: Vec<String> },
}

/// Immutable package dependency graph with a reverse index
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    packages: BTreeMap<String, Package>,
    edges: BTreeMap<String, Vec<String>>,
    dependents: BTreeMap<String, Vec<String>>,
    /// Package names in manifest insertion order
    order: Vec<String>,
}

impl DependencyGraph {
    /// Build a graph from packages, validating edges and acyclicity
    pub fn build(packages: Vec<Package>) -> Result<Self, GraphError> {
        let mut by_name = BTreeMap::new();
        let mut order = Vec::with_capacity(packages.len());

        for pkg in packages {
            if by_name.contains_key(&pkg.name) {
                return Err(GraphError::DuplicatePackage(pkg.name));
            }
            order.push(pkg.name.clone());
            by_name.insert(pkg.name.clone(), pkg);
        }

        let mut edges: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut dependents: BTreeMap<String, Vec<String>> = BTreeMap::new();

        for name in &order {
            let pkg = &by_name[name];
            let mut seen = HashSet::new();
            let mut deps = Vec::new();

            for dep in &pkg.dependencies {
                if !by_name.contains_key(dep) {
                    return Err(GraphError::UnknownDependency {
                        package: name.clone(),
                        dependency: dep.clone(),
                    });
                }
                if seen.insert(dep.clone()) {
                    deps.push(dep.clone());
                    dependents.entry(dep.clone()).or_default().push(name.clone());
                }
            }

            edges.insert(name.clone(), deps);
        }

        let graph = Self {
            packages: by_name,
            edges,
            dependents,
            order,
        };

        graph.check_acyclic()?;
        Ok(graph)
    }

    /// DFS cycle check over the forward edges
    fn check_acyclic(&self) -> Result<(), GraphError> {
        let mut visited = HashSet::new();
        let mut rec_stack = HashSet::new();
        let mut path = Vec::new();

        for name in &self.order {
            if !visited.contains(name.as_str())
                && self.cycle_dfs(name, &mut visited, &mut rec_stack, &mut path)
            {
                return Err(GraphError::Cycle { path });
            }
        }

        Ok(())
    }

    fn cycle_dfs<'a>(
        &'a self,
        node: &'a str,
        visited: &mut HashSet<&'a str>,
        rec_stack: &mut HashSet<&'a str>,
        path: &mut Vec<String>,
    ) -> bool {
        visited.insert(node);
        rec_stack.insert(node);
        path.push(node.to_string());

        for dep in self.dependencies_of(node) {
            if !visited.contains(dep.as_str()) {
                if self.cycle_dfs(dep, visited, rec_stack, path) {
                    return true;
                }
            } else if rec_stack.contains(dep.as_str()) {
                path.push(dep.clone());
                return true;
            }
        }

        rec_stack.remove(node);
        path.pop();
        false
    }

    /// Number of packages in the graph
    pub fn len(&self) -> usize {
        self.packages.len()
    }

    /// Whether the graph has no packages
    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// Whether a package with this name exists
    pub fn contains(&self, name: &str) -> bool {
        self.packages.contains_key(name)
    }

    /// Look up a package by name
    pub fn get(&self, name: &str) -> Option<&Package> {
        self.packages.get(name)
    }

    /// Package names in manifest insertion order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// Direct dependencies of a package (empty for unknown names)
    pub fn dependencies_of(&self, name: &str) -> &[String] {
        self.edges.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Direct dependents of a package (empty for unknown names)
    pub fn dependents_of(&self, name: &str) -> &[String] {
        self.dependents.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Topological order, dependencies before dependents
    ///
    /// DFS post-order over the manifest insertion order, so the result is
    /// deterministic for a given manifest.
    pub fn build_order(&self) -> Vec<String> {
        let mut visited = HashSet::new();
        let mut result = Vec::with_capacity(self.order.len());

        for name in &self.order {
            self.topo_dfs(name, &mut visited, &mut result);
        }

        result
    }

    fn topo_dfs<'a>(&'a self, node: &'a str, visited: &mut HashSet<&'a str>, result: &mut Vec<String>) {
        if !visited.insert(node) {
            return;
        }

        for dep in self.dependencies_of(node) {
            self.topo_dfs(dep, visited, result);
        }

        result.push(node.to_string());
    }

    /// Portable serialized form for checkpoints
    pub fn snapshot(&self) -> GraphSnapshot {
        GraphSnapshot {
            packages: self.order.iter().map(|n| self.packages[n].clone()).collect(),
            edges: self
                .order
                .iter()
                .map(|n| (n.clone(), self.edges[n].clone()))
                .collect(),
        }
    }
}

/// Checkpoint-friendly graph encoding: packages and edges as lists
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub packages: Vec<Package>,
    pub edges: Vec<(String, Vec<String>)>,
}

impl TryFrom<GraphSnapshot> for DependencyGraph {
    type Error = GraphError;

    fn try_from(snapshot: GraphSnapshot) -> Result<Self, Self::Error> {
        DependencyGraph::build(snapshot.packages)
    }
}
