// src/graph/mod.rs

//! Package dependency graph
//!
//! Nodes are keyed by package name and edges point from a dependent to its
//! dependency. The graph is built by [`GraphBuilder`], checked with
//! [`DependencyGraph::validate`], and turned into install order with
//! [`DependencyGraph::layers`].
//!
//! # Example
//!
//! ```ignore
//! use aurum::graph::{DependencyGraph, DepKind, Origin, PackageNode};
//!
//! let mut graph = DependencyGraph::new();
//! graph.add_node(PackageNode::new("foo", Origin::SourceArchive));
//! graph.add_node(PackageNode::new("bar", Origin::LocalDb));
//! graph.add_edge("foo", "bar", DepKind::Runtime)?;
//!
//! let layers = graph.layers()?;
//! // layers: [{bar}, {foo}]
//! ```

mod builder;
mod layers;
mod upgrade;

pub use builder::GraphBuilder;
pub use layers::{Layer, LayerSequence};
pub use upgrade::UpgradeCandidate;

use crate::collaborators::{RepoPackage, SourcePackage};
use crate::error::{Error, Result};
use crate::version::VersionConstraint;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

/// Where a node's package comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    /// Pre-built binary from a sync repository
    LocalDb,
    /// Built locally from an archive recipe
    SourceArchive,
    /// Already installed in a satisfying version; nothing to do
    AlreadySatisfied,
}

/// Why one package needs another
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DepKind {
    Runtime,
    /// Needed only to build the dependent
    Build,
    /// Needed only to run the dependent's test suite during the build
    Check,
}

impl DepKind {
    /// Whether the dependency is only needed while building
    pub fn is_build_only(self) -> bool {
        matches!(self, DepKind::Build | DepKind::Check)
    }
}

/// Install reason recorded in the package database
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InstallReason {
    Explicit,
    #[default]
    Dependency,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyEdge {
    /// Name of the node this edge points to
    pub name: String,
    pub kind: DepKind,
}

/// One package in the graph
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageNode {
    name: String,
    origin: Origin,
    dependencies: Vec<DependencyEdge>,
    /// Other dependency names this node was resolved from (provides)
    aliases: BTreeSet<String>,
    /// Version that will be installed; empty for satisfied nodes
    pub version: String,
    /// Constraint from the first dependency string that pulled this node in
    pub constraint: VersionConstraint,
    /// Recipe the package is built from (source nodes only)
    pub package_base: Option<String>,
    /// Sync repository (local-database nodes only)
    pub repo: Option<String>,
    pub reason: InstallReason,
    /// Installed version being replaced by a full-upgrade root
    pub upgrade_from: Option<String>,
}

impl PackageNode {
    pub fn new(name: impl Into<String>, origin: Origin) -> Self {
        Self {
            name: name.into(),
            origin,
            dependencies: Vec::new(),
            aliases: BTreeSet::new(),
            version: String::new(),
            constraint: VersionConstraint::Any,
            package_base: None,
            repo: None,
            reason: InstallReason::Dependency,
            upgrade_from: None,
        }
    }

    /// Node for a binary repository package
    pub fn from_repo(pkg: &RepoPackage) -> Self {
        let mut node = Self::new(&pkg.name, Origin::LocalDb);
        node.version = pkg.version.clone();
        node.repo = Some(pkg.repo.clone());
        node
    }

    /// Node for an archive package; its dependency edges are added later
    pub fn from_source(pkg: &SourcePackage) -> Self {
        let mut node = Self::new(&pkg.name, Origin::SourceArchive);
        node.version = pkg.version.clone();
        node.package_base = Some(pkg.package_base.clone());
        node
    }

    pub fn with_reason(mut self, reason: InstallReason) -> Self {
        self.reason = reason;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    /// Outgoing edges in the order they were first declared
    pub fn dependencies(&self) -> &[DependencyEdge] {
        &self.dependencies
    }

    /// Dependency names that resolved to this node under another name
    pub fn aliases(&self) -> &BTreeSet<String> {
        &self.aliases
    }

    /// Whether a dependency on `name` is satisfied by this node
    pub fn answers_to(&self, name: &str) -> bool {
        self.name == name || self.aliases.contains(name)
    }

    /// Whether the node has to be fetched and built
    pub fn is_source(&self) -> bool {
        self.origin == Origin::SourceArchive
    }

    /// Recipe directory name; falls back to the package name
    pub fn base(&self) -> &str {
        self.package_base.as_deref().unwrap_or(&self.name)
    }

    /// Add an edge, merging with an existing edge to the same node
    ///
    /// A runtime requirement outranks a build-only one, so a package that
    /// is both a make and a runtime dependency is never treated as removable.
    fn add_dependency(&mut self, name: &str, kind: DepKind) {
        match self.dependencies.iter_mut().find(|e| e.name == name) {
            Some(edge) => {
                if kind < edge.kind {
                    edge.kind = kind;
                }
            }
            None => self.dependencies.push(DependencyEdge {
                name: name.to_string(),
                kind,
            }),
        }
    }
}

/// Directed acyclic graph of packages to resolve
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyGraph {
    nodes: BTreeMap<String, PackageNode>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a node, returning false if one with that name already exists
    ///
    /// An existing node keeps its origin and edges; it is only promoted to
    /// an explicit install if the new node is one.
    pub fn add_node(&mut self, node: PackageNode) -> bool {
        match self.nodes.get_mut(node.name()) {
            Some(existing) => {
                if node.reason == InstallReason::Explicit {
                    existing.reason = InstallReason::Explicit;
                }
                false
            }
            None => {
                self.nodes.insert(node.name.clone(), node);
                true
            }
        }
    }

    /// Insert a node, or swap it in for an already-satisfied node of that name
    ///
    /// Used when the installed version turns out to be too old. Edges into
    /// the node survive; so do its aliases and an explicit reason. Returns
    /// false if the existing node is going to be installed anyway.
    pub fn replace_satisfied(&mut self, mut node: PackageNode) -> bool {
        match self.nodes.get(node.name()) {
            None => {
                self.nodes.insert(node.name.clone(), node);
                true
            }
            Some(existing) if existing.origin == Origin::AlreadySatisfied => {
                if existing.reason == InstallReason::Explicit {
                    node.reason = InstallReason::Explicit;
                }
                if node.constraint == VersionConstraint::Any {
                    node.constraint = existing.constraint.clone();
                }
                node.aliases.extend(existing.aliases.iter().cloned());
                self.nodes.insert(node.name.clone(), node);
                true
            }
            Some(_) => false,
        }
    }

    /// Record that `from` depends on `to`
    ///
    /// `to` may be added later; dangling edges are rejected by [`validate`](Self::validate).
    pub fn add_edge(&mut self, from: &str, to: &str, kind: DepKind) -> Result<()> {
        let node = self
            .nodes
            .get_mut(from)
            .ok_or_else(|| Error::Internal(format!("edge from unknown node '{}'", from)))?;
        node.add_dependency(to, kind);
        Ok(())
    }

    /// Remember that a dependency on `alias` resolved to node `name`
    pub fn add_alias(&mut self, name: &str, alias: &str) {
        if name != alias
            && let Some(node) = self.nodes.get_mut(name)
        {
            node.aliases.insert(alias.to_string());
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&PackageNode> {
        self.nodes.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut PackageNode> {
        self.nodes.get_mut(name)
    }

    /// Nodes in name order
    pub fn nodes(&self) -> impl Iterator<Item = &PackageNode> {
        self.nodes.values()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Explicitly requested nodes
    pub fn targets(&self) -> impl Iterator<Item = &PackageNode> {
        self.nodes
            .values()
            .filter(|n| n.reason == InstallReason::Explicit)
    }

    /// Direct dependents of `name`
    pub fn dependents(&self, name: &str) -> Vec<&str> {
        self.nodes
            .values()
            .filter(|n| n.dependencies.iter().any(|e| e.name == name))
            .map(|n| n.name.as_str())
            .collect()
    }

    fn reverse_edges(&self) -> HashMap<&str, Vec<&str>> {
        let mut reverse: HashMap<&str, Vec<&str>> = HashMap::new();
        for node in self.nodes.values() {
            for edge in &node.dependencies {
                reverse
                    .entry(edge.name.as_str())
                    .or_default()
                    .push(node.name.as_str());
            }
        }
        reverse
    }

    /// Every node that depends on `name`, directly or indirectly
    pub fn transitive_dependents(&self, name: &str) -> BTreeSet<String> {
        let reverse = self.reverse_edges();
        let mut dependents = BTreeSet::new();
        let mut queue: VecDeque<&str> = VecDeque::new();

        if let Some(direct) = reverse.get(name) {
            queue.extend(direct.iter().copied());
        }

        while let Some(dep) = queue.pop_front() {
            if dependents.insert(dep.to_string())
                && let Some(indirect) = reverse.get(dep)
            {
                queue.extend(indirect.iter().copied().filter(|n| !dependents.contains(*n)));
            }
        }

        dependents
    }

    /// Copy of the graph without `names` and everything that depends on them
    pub fn without<'a, I>(&self, names: I) -> DependencyGraph
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut removed: BTreeSet<String> = BTreeSet::new();
        for name in names {
            if self.contains(name) {
                removed.insert(name.to_string());
                removed.extend(self.transitive_dependents(name));
            }
        }

        DependencyGraph {
            nodes: self
                .nodes
                .iter()
                .filter(|(name, _)| !removed.contains(*name))
                .map(|(name, node)| (name.clone(), node.clone()))
                .collect(),
        }
    }

    /// Copy of the graph restricted to what its roots still need
    ///
    /// Roots are explicit targets and upgrade nodes. Used after removing a
    /// failed subtree so its now-orphaned dependencies are not installed.
    pub fn reachable_from_roots(&self) -> DependencyGraph {
        let mut keep: BTreeSet<&str> = BTreeSet::new();
        let mut queue: VecDeque<&str> = self
            .nodes
            .values()
            .filter(|n| n.reason == InstallReason::Explicit || n.upgrade_from.is_some())
            .map(|n| n.name.as_str())
            .collect();

        while let Some(name) = queue.pop_front() {
            if !keep.insert(name) {
                continue;
            }
            if let Some(node) = self.nodes.get(name) {
                queue.extend(node.dependencies.iter().map(|e| e.name.as_str()));
            }
        }

        DependencyGraph {
            nodes: self
                .nodes
                .iter()
                .filter(|(name, _)| keep.contains(name.as_str()))
                .map(|(name, node)| (name.clone(), node.clone()))
                .collect(),
        }
    }

    /// Check the structural invariants required before layering
    ///
    /// Every edge must point at a node in the graph and the graph must be
    /// acyclic.
    pub fn validate(&self) -> Result<()> {
        for node in self.nodes.values() {
            for edge in &node.dependencies {
                if !self.nodes.contains_key(&edge.name) {
                    return Err(Error::Internal(format!(
                        "'{}' depends on '{}', which is not in the graph",
                        node.name, edge.name
                    )));
                }
            }
        }

        if let Some(cycle) = self.find_cycle() {
            return Err(Error::CycleDetected(cycle));
        }
        Ok(())
    }

    /// First cycle found, as a path that starts and ends on the same node
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        let mut visited = HashSet::new();
        let mut rec_stack = HashSet::new();
        let mut path = Vec::new();

        for start in self.nodes.keys() {
            if !visited.contains(start.as_str())
                && let Some(cycle) =
                    self.find_cycle_dfs(start, &mut visited, &mut rec_stack, &mut path)
            {
                return Some(cycle);
            }
        }
        None
    }

    fn find_cycle_dfs<'a>(
        &'a self,
        node: &'a str,
        visited: &mut HashSet<&'a str>,
        rec_stack: &mut HashSet<&'a str>,
        path: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        visited.insert(node);
        rec_stack.insert(node);
        path.push(node);

        if let Some(deps) = self.nodes.get(node) {
            for edge in &deps.dependencies {
                let dep = edge.name.as_str();
                if rec_stack.contains(dep) {
                    let start = path.iter().position(|n| *n == dep).unwrap_or(0);
                    let mut cycle: Vec<String> =
                        path[start..].iter().map(|n| n.to_string()).collect();
                    cycle.push(dep.to_string());
                    return Some(cycle);
                }
                if !visited.contains(dep)
                    && let Some(cycle) = self.find_cycle_dfs(dep, visited, rec_stack, path)
                {
                    return Some(cycle);
                }
            }
        }

        path.pop();
        rec_stack.remove(node);
        None
    }
}
