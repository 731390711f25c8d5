// src/graph/builder.rs

//! Dependency graph construction
//!
//! Targets are resolved against the local database first and the source
//! archive second. Dependencies of archive packages are then expanded
//! breadth-first, one frontier at a time, so every frontier costs a single
//! batched archive query. Repository packages are leaves: pacman resolves
//! their own dependencies during the install transaction.

use super::{DepKind, DependencyGraph, InstallReason, Origin, PackageNode};
use crate::cancel::CancelToken;
use crate::collaborators::{LocalDb, SourceArchive, SourcePackage};
use crate::error::{Error, Result};
use crate::version::Dependency;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Target prefix that forces archive resolution
const ARCHIVE_PREFIX: &str = "aur";

/// Resolves targets and their dependency closure into a [`DependencyGraph`]
pub struct GraphBuilder {
    pub(super) local_db: Arc<dyn LocalDb>,
    pub(super) archive: Arc<dyn SourceArchive>,
}

/// A dependency string waiting for the batched archive lookup
struct PendingDep {
    parent: String,
    raw: String,
    dep: Dependency,
    kind: DepKind,
}

impl GraphBuilder {
    pub fn new(local_db: Arc<dyn LocalDb>, archive: Arc<dyn SourceArchive>) -> Self {
        Self { local_db, archive }
    }

    /// Build the graph for `targets`, optionally on top of an existing graph
    ///
    /// Nodes already present in `root_hint` are kept as they are. All
    /// targets that cannot be found anywhere are reported together.
    pub fn graph_from_targets(
        &self,
        cancel: &CancelToken,
        root_hint: Option<DependencyGraph>,
        targets: &[String],
    ) -> Result<DependencyGraph> {
        cancel.check()?;
        let mut graph = root_hint.unwrap_or_default();
        let mut missing = Vec::new();
        let mut from_archive: Vec<(String, Dependency)> = Vec::new();

        for target in targets {
            let (prefix, raw) = split_target(target);
            let dep = Dependency::parse(raw);

            match prefix {
                Some(ARCHIVE_PREFIX) => from_archive.push((target.clone(), dep)),
                Some(repo) => match self.resolve_local(raw)? {
                    Some(pkg) if pkg.repo == repo => {
                        graph.add_node(
                            PackageNode::from_repo(&pkg).with_reason(InstallReason::Explicit),
                        );
                        graph.add_alias(&pkg.name, &dep.name);
                    }
                    _ => missing.push(target.clone()),
                },
                None => match self.resolve_local(raw)? {
                    Some(pkg) => {
                        debug!("Target {} resolved to {}/{}", target, pkg.repo, pkg.name);
                        graph.add_node(
                            PackageNode::from_repo(&pkg).with_reason(InstallReason::Explicit),
                        );
                        graph.add_alias(&pkg.name, &dep.name);
                    }
                    None => from_archive.push((target.clone(), dep)),
                },
            }
        }

        let mut frontier = Vec::new();
        if !from_archive.is_empty() {
            let names: Vec<String> = from_archive.iter().map(|(_, d)| d.name.clone()).collect();
            let found = self.resolve_archive(&names)?;

            for (target, dep) in from_archive {
                match found.get(&dep.name) {
                    Some(pkg) => {
                        if !dep.satisfied_by(&pkg.version) {
                            warn!(
                                "{} is at version {} which does not satisfy {}",
                                pkg.name, pkg.version, dep
                            );
                        }
                        let node =
                            PackageNode::from_source(pkg).with_reason(InstallReason::Explicit);
                        if graph.add_node(node) {
                            frontier.push(pkg.clone());
                        }
                    }
                    None => missing.push(target),
                }
            }
        }

        if !missing.is_empty() {
            return Err(Error::TargetNotFound(missing));
        }

        self.expand(cancel, &mut graph, frontier)?;
        graph.validate()?;

        info!(
            "Resolved {} target(s) into {} package(s)",
            targets.len(),
            graph.len()
        );
        Ok(graph)
    }

    /// Add the dependency closure of `frontier` to `graph`
    ///
    /// Every package in `frontier` must already be a node in the graph.
    pub(super) fn expand(
        &self,
        cancel: &CancelToken,
        graph: &mut DependencyGraph,
        mut frontier: Vec<SourcePackage>,
    ) -> Result<()> {
        // Dependency string -> node that satisfies it, so provides lookups
        // happen once per run
        let mut resolved: HashMap<String, String> = HashMap::new();

        while !frontier.is_empty() {
            cancel.check()?;
            let mut pending: Vec<PendingDep> = Vec::new();

            for pkg in frontier.drain(..) {
                for (raw, kind) in declared_dependencies(&pkg) {
                    if let Some(target) = resolved.get(raw) {
                        graph.add_edge(&pkg.name, target, kind)?;
                        continue;
                    }

                    let dep = Dependency::parse(raw);
                    if let Some(existing) = graph.get(&dep.name) {
                        // An installed package can satisfy one requirement
                        // and still be too old for a versioned one
                        let outdated = existing.origin() == Origin::AlreadySatisfied
                            && !self.is_satisfied(raw)?;
                        if !outdated {
                            if existing.origin() != Origin::AlreadySatisfied
                                && !existing.version.is_empty()
                                && !dep.satisfied_by(&existing.version)
                            {
                                warn!(
                                    "{} requires {} but {} {} is selected",
                                    pkg.name, dep, existing.name(), existing.version
                                );
                            }
                            resolved.insert(raw.to_string(), dep.name.clone());
                            graph.add_edge(&pkg.name, &dep.name, kind)?;
                            continue;
                        }
                        debug!(
                            "Installed {} does not satisfy {}, resolving it again",
                            dep.name, dep
                        );
                    } else if self.is_satisfied(raw)? {
                        let mut node = PackageNode::new(&dep.name, Origin::AlreadySatisfied);
                        node.constraint = dep.constraint.clone();
                        graph.add_node(node);
                        resolved.insert(raw.to_string(), dep.name.clone());
                        graph.add_edge(&pkg.name, &dep.name, kind)?;
                        continue;
                    }

                    if let Some(repo_pkg) = self.resolve_local(raw)? {
                        let mut node = PackageNode::from_repo(&repo_pkg);
                        node.constraint = dep.constraint.clone();
                        graph.replace_satisfied(node);
                        graph.add_alias(&repo_pkg.name, &dep.name);
                        resolved.insert(raw.to_string(), repo_pkg.name.clone());
                        graph.add_edge(&pkg.name, &repo_pkg.name, kind)?;
                        continue;
                    }

                    pending.push(PendingDep {
                        parent: pkg.name.clone(),
                        raw: raw.to_string(),
                        dep,
                        kind,
                    });
                }
            }

            if pending.is_empty() {
                break;
            }

            let names: Vec<String> = pending
                .iter()
                .map(|p| p.dep.name.clone())
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();
            let found = self.resolve_archive(&names)?;

            for p in pending {
                let needs_node = graph
                    .get(&p.dep.name)
                    .is_none_or(|n| n.origin() == Origin::AlreadySatisfied);
                if needs_node {
                    let Some(pkg) = found.get(&p.dep.name) else {
                        return Err(Error::UnresolvedDependency {
                            dependency: p.raw,
                            required_by: p.parent,
                        });
                    };
                    if !p.dep.satisfied_by(&pkg.version) {
                        warn!(
                            "{} requires {} but the archive has {}",
                            p.parent, p.dep, pkg.version
                        );
                    }
                    let mut node = PackageNode::from_source(pkg);
                    node.constraint = p.dep.constraint.clone();
                    graph.replace_satisfied(node);
                    frontier.push(pkg.clone());
                }
                resolved.insert(p.raw, p.dep.name.clone());
                graph.add_edge(&p.parent, &p.dep.name, p.kind)?;
            }
        }

        Ok(())
    }

    fn resolve_local(&self, dependency: &str) -> Result<Option<crate::collaborators::RepoPackage>> {
        self.local_db
            .resolve(dependency)
            .map_err(|e| resolution_failed("local database", dependency, e))
    }

    fn is_satisfied(&self, dependency: &str) -> Result<bool> {
        self.local_db
            .is_satisfied(dependency)
            .map_err(|e| resolution_failed("local database", dependency, e))
    }

    /// Batched archive lookup keyed by package name
    pub(super) fn resolve_archive(&self, names: &[String]) -> Result<HashMap<String, SourcePackage>> {
        let found = self
            .archive
            .resolve_many(names)
            .map_err(|e| resolution_failed("source archive", &names.join(" "), e))?;
        Ok(found.into_iter().map(|p| (p.name.clone(), p)).collect())
    }
}

pub(super) fn resolution_failed(collaborator: &'static str, name: &str, err: Error) -> Error {
    match err {
        Error::Cancelled => Error::Cancelled,
        other => Error::ResolutionFailed {
            collaborator,
            name: name.to_string(),
            message: other.to_string(),
        },
    }
}

/// Split `repo/name` into its prefix and the rest
fn split_target(target: &str) -> (Option<&str>, &str) {
    match target.split_once('/') {
        Some((prefix, name)) if !prefix.is_empty() && !name.is_empty() => (Some(prefix), name),
        _ => (None, target),
    }
}

/// Runtime, make and check dependencies in declaration order
fn declared_dependencies(pkg: &SourcePackage) -> Vec<(&str, DepKind)> {
    pkg.depends
        .iter()
        .map(|d| (d.as_str(), DepKind::Runtime))
        .chain(pkg.make_depends.iter().map(|d| (d.as_str(), DepKind::Build)))
        .chain(pkg.check_depends.iter().map(|d| (d.as_str(), DepKind::Check)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_target() {
        assert_eq!(split_target("aur/yay"), (Some("aur"), "yay"));
        assert_eq!(split_target("extra/git"), (Some("extra"), "git"));
        assert_eq!(split_target("git"), (None, "git"));
        assert_eq!(split_target("/git"), (None, "/git"));
    }

    #[test]
    fn test_declared_dependencies_order() {
        let pkg = SourcePackage {
            name: "yay".into(),
            package_base: "yay".into(),
            version: "12.3.5-1".into(),
            depends: vec!["git".into()],
            make_depends: vec!["go".into()],
            check_depends: vec!["python".into()],
            provides: vec![],
        };
        let deps = declared_dependencies(&pkg);
        assert_eq!(
            deps,
            vec![
                ("git", DepKind::Runtime),
                ("go", DepKind::Build),
                ("python", DepKind::Check)
            ]
        );
    }

    #[test]
    fn test_cancelled_passes_through() {
        let err = resolution_failed("source archive", "foo", Error::Cancelled);
        assert!(matches!(err, Error::Cancelled));

        let err = resolution_failed("source archive", "foo", Error::Http("timeout".into()));
        assert!(err.is_construction_error());
    }
}
