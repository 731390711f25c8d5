// src/preparer.rs

//! Build directory preparation
//!
//! Walks the layers in order and, for every archive package, fetches or
//! updates its recipe into `<build_dir>/<pkgbase>`. Split packages share a
//! package base, so each base is fetched once and all of its graph nodes
//! map to the same [`BuildDirRecord`].
//!
//! Recipes whose dependencies are all already installed are built here
//! (or their existing artifacts reused). Everything else is built by the
//! Installer right before its layer, once its dependencies are on the
//! system.
//!
//! Work within a layer runs on a bounded rayon pool. A failure blocks the
//! failing node's dependents in later layers but not unrelated subtrees;
//! the run ends with [`Error::PrepareFailed`] naming what failed.

use crate::cancel::CancelToken;
use crate::collaborators::{BuildTool, FetchOutcome, LocalDb, SourceArchive};
use crate::config::Config;
use crate::error::{Error, NodeFailure, PartialFailure, Result};
use crate::graph::{InstallReason, LayerSequence, Origin};
use crate::hooks::HookAction;
use crate::state::{BuildState, StateLedger};
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Where one package base was fetched, and what it produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildDirRecord {
    pub package_base: String,
    pub dir: PathBuf,
    /// Created by this run rather than updated in place
    pub freshly_cloned: bool,
    /// Graph nodes built from this base
    pub packages: BTreeSet<String>,
    /// Package files, once built; `None` while the build is deferred
    pub artifacts: Option<Vec<PathBuf>>,
}

/// Build directory records keyed by package base
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildDirRecords {
    by_base: BTreeMap<String, BuildDirRecord>,
}

impl BuildDirRecords {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, record: BuildDirRecord) {
        self.by_base.insert(record.package_base.clone(), record);
    }

    pub fn get(&self, package_base: &str) -> Option<&BuildDirRecord> {
        self.by_base.get(package_base)
    }

    pub fn get_mut(&mut self, package_base: &str) -> Option<&mut BuildDirRecord> {
        self.by_base.get_mut(package_base)
    }

    /// Record of the base that builds `package`
    pub fn get_for_package(&self, package: &str) -> Option<&BuildDirRecord> {
        self.by_base.values().find(|r| r.packages.contains(package))
    }

    pub fn iter(&self) -> impl Iterator<Item = &BuildDirRecord> {
        self.by_base.values()
    }

    pub fn len(&self) -> usize {
        self.by_base.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_base.is_empty()
    }

    /// Drop packages for which `keep` is false, and any record left empty
    pub fn retain_packages<F>(&mut self, mut keep: F)
    where
        F: FnMut(&str) -> bool,
    {
        for record in self.by_base.values_mut() {
            record.packages.retain(|p| keep(p));
        }
        self.by_base.retain(|_, r| !r.packages.is_empty());
    }
}

/// One package base to prepare within a layer
struct Job {
    package_base: String,
    packages: Vec<String>,
    build_now: bool,
}

pub struct Preparer {
    local_db: Arc<dyn LocalDb>,
    archive: Arc<dyn SourceArchive>,
    build_tool: Arc<dyn BuildTool>,
    config: Arc<Config>,
    /// Build-only dependencies this run installs fresh
    make_deps: BTreeSet<String>,
}

impl Preparer {
    pub fn new(
        local_db: Arc<dyn LocalDb>,
        archive: Arc<dyn SourceArchive>,
        build_tool: Arc<dyn BuildTool>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            local_db,
            archive,
            build_tool,
            config,
            make_deps: BTreeSet::new(),
        }
    }

    /// Prepare every archive package in `layers`
    pub fn run(
        &mut self,
        cancel: &CancelToken,
        layers: &LayerSequence,
        ledger: &StateLedger,
    ) -> Result<BuildDirRecords> {
        cancel.check()?;
        self.make_deps = self.new_build_only_dependencies(layers)?;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.max_concurrent_preparations.max(1))
            .build()
            .map_err(|e| Error::Internal(format!("failed to build preparation pool: {e}")))?;

        let this = &*self;
        let mut records = BuildDirRecords::new();
        let mut failed: Vec<NodeFailure> = Vec::new();
        let mut skipped: Vec<String> = Vec::new();
        let mut blocked: BTreeSet<String> = BTreeSet::new();
        let mut failed_bases: BTreeSet<String> = BTreeSet::new();

        for (depth, layer) in layers.iter().enumerate() {
            cancel.check()?;
            let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();

            for node in layer.source_nodes() {
                let name = node.name();
                let base = node.base();

                let blocked_by = node
                    .dependencies()
                    .iter()
                    .find(|e| blocked.contains(&e.name))
                    .map(|e| e.name.clone())
                    .or_else(|| failed_bases.contains(base).then(|| base.to_string()));
                if let Some(cause) = blocked_by {
                    debug!("Skipping {}: depends on failed {}", name, cause);
                    ledger.fail(name);
                    blocked.insert(name.to_string());
                    skipped.push(name.to_string());
                    continue;
                }

                // Later split package of a base prepared in an earlier layer
                if let Some(record) = records.get_mut(base) {
                    record.packages.insert(name.to_string());
                    ledger.advance(name, BuildState::Prepared)?;
                    if record.artifacts.is_some() {
                        ledger.advance(name, BuildState::Built)?;
                    }
                    continue;
                }

                groups
                    .entry(base.to_string())
                    .or_default()
                    .push(name.to_string());
            }

            if groups.is_empty() {
                continue;
            }

            let jobs: Vec<Job> = groups
                .into_iter()
                .map(|(package_base, packages)| {
                    let build_now = packages.iter().all(|p| deps_all_satisfied(layers, p));
                    Job {
                        package_base,
                        packages,
                        build_now,
                    }
                })
                .collect();

            info!(
                "Preparing layer {}: {} package base(s)",
                depth,
                jobs.len()
            );

            let results: Vec<Result<BuildDirRecord>> = pool.install(|| {
                jobs.par_iter()
                    .map(|job| this.prepare_base(cancel, job))
                    .collect()
            });

            for (job, result) in jobs.into_iter().zip(results) {
                match result {
                    Ok(record) => {
                        for name in &record.packages {
                            ledger.advance(name, BuildState::Prepared)?;
                            if record.artifacts.is_some() {
                                ledger.advance(name, BuildState::Built)?;
                            }
                        }
                        records.insert(record);
                    }
                    Err(Error::Cancelled) => return Err(Error::Cancelled),
                    Err(e) => {
                        error!("Failed to prepare {}: {}", job.package_base, e);
                        for name in &job.packages {
                            ledger.fail(name);
                            blocked.insert(name.clone());
                        }
                        failed_bases.insert(job.package_base.clone());
                        failed.push(NodeFailure {
                            package_base: job.package_base,
                            packages: job.packages,
                            cause: e,
                        });
                    }
                }
            }
        }

        if failed.is_empty() && skipped.is_empty() {
            info!("Prepared {} build director(ies)", records.len());
            return Ok(records);
        }

        warn!(
            "Preparation failed for {} package base(s), {} dependent(s) skipped",
            failed.len(),
            skipped.len()
        );
        Err(Error::PrepareFailed(Box::new(PartialFailure {
            failed,
            skipped,
            prepared: records,
        })))
    }

    fn prepare_base(&self, cancel: &CancelToken, job: &Job) -> Result<BuildDirRecord> {
        cancel.check()?;
        let base = job.package_base.as_str();
        let dir = self.config.build_dir.join(base);
        let existed = dir.exists();

        let outcome = self
            .archive
            .fetch_or_update(base, &dir)
            .map_err(|e| fetch_failed(base, e))?;
        let freshly_cloned = outcome == FetchOutcome::Cloned && !existed;
        debug!("Fetched {} ({:?}) into {}", base, outcome, dir.display());

        let artifacts = if job.build_now {
            cancel.check()?;
            Some(build_or_reuse(self.build_tool.as_ref(), base, &dir)?)
        } else {
            None
        };

        Ok(BuildDirRecord {
            package_base: base.to_string(),
            dir,
            freshly_cloned,
            packages: job.packages.iter().cloned().collect(),
            artifacts,
        })
    }

    /// Graph nodes pulled in only as make/check dependencies that are not
    /// installed yet
    fn new_build_only_dependencies(&self, layers: &LayerSequence) -> Result<BTreeSet<String>> {
        if !self.config.remove_make_deps {
            return Ok(BTreeSet::new());
        }

        let mut incoming: HashMap<&str, Vec<bool>> = HashMap::new();
        for node in layers.nodes() {
            for edge in node.dependencies() {
                incoming
                    .entry(edge.name.as_str())
                    .or_default()
                    .push(edge.kind.is_build_only());
            }
        }

        let mut make_deps = BTreeSet::new();
        for node in layers.nodes() {
            if node.reason == InstallReason::Explicit
                || node.origin() == Origin::AlreadySatisfied
                || node.upgrade_from.is_some()
            {
                continue;
            }
            let build_only = incoming
                .get(node.name())
                .is_some_and(|kinds| !kinds.is_empty() && kinds.iter().all(|b| *b));
            if build_only && self.local_db.installed(node.name())?.is_none() {
                make_deps.insert(node.name().to_string());
            }
        }
        Ok(make_deps)
    }

    /// Build-only dependencies installed by this run
    pub fn make_dependencies(&self) -> &BTreeSet<String> {
        &self.make_deps
    }

    /// Hook that uninstalls build-only dependencies, when enabled
    pub fn should_clean_make_deps(&self) -> Option<HookAction> {
        if !self.config.remove_make_deps || self.make_deps.is_empty() {
            return None;
        }
        Some(HookAction::UninstallPackages {
            names: self.make_deps.iter().cloned().collect(),
        })
    }

    /// Hook that removes the directories this run cloned, when enabled
    pub fn should_clean_build_dirs(&self, records: &BuildDirRecords) -> Option<HookAction> {
        if !self.config.clean_build_dirs {
            return None;
        }
        let paths: Vec<PathBuf> = records
            .iter()
            .filter(|r| r.freshly_cloned)
            .map(|r| r.dir.clone())
            .collect();
        if paths.is_empty() {
            return None;
        }
        Some(HookAction::RemoveDirs { paths })
    }
}

/// Whether every dependency of `name` is already on the system
fn deps_all_satisfied(layers: &LayerSequence, name: &str) -> bool {
    layers.node(name).is_some_and(|node| {
        node.dependencies().iter().all(|edge| {
            layers
                .node(&edge.name)
                .is_some_and(|dep| dep.origin() == Origin::AlreadySatisfied)
        })
    })
}

/// Reuse the artifacts in `dir` if all of them exist, otherwise build
pub(crate) fn build_or_reuse(
    build_tool: &dyn BuildTool,
    package_base: &str,
    dir: &Path,
) -> Result<Vec<PathBuf>> {
    let listed = build_tool
        .package_list(dir)
        .map_err(|e| build_failed(package_base, e))?;
    if !listed.is_empty() && listed.iter().all(|p| p.exists()) {
        info!("{} is already built, reusing its packages", package_base);
        return Ok(listed);
    }

    info!("Building {}", package_base);
    build_tool.build(dir).map_err(|e| build_failed(package_base, e))
}

fn fetch_failed(package_base: &str, err: Error) -> Error {
    match err {
        Error::FetchFailed { .. } | Error::Cancelled => err,
        other => Error::FetchFailed {
            package: package_base.to_string(),
            message: other.to_string(),
        },
    }
}

fn build_failed(package_base: &str, err: Error) -> Error {
    match err {
        Error::BuildFailed { .. } | Error::Cancelled => err,
        other => Error::BuildFailed {
            package: package_base.to_string(),
            message: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(base: &str, packages: &[&str], fresh: bool) -> BuildDirRecord {
        BuildDirRecord {
            package_base: base.to_string(),
            dir: PathBuf::from("/tmp/build").join(base),
            freshly_cloned: fresh,
            packages: packages.iter().map(|p| p.to_string()).collect(),
            artifacts: None,
        }
    }

    #[test]
    fn test_records_lookup_by_package() {
        let mut records = BuildDirRecords::new();
        records.insert(record("pyfoo", &["python-foo", "python2-foo"], true));
        records.insert(record("bar", &["bar"], false));

        assert_eq!(
            records.get_for_package("python2-foo").unwrap().package_base,
            "pyfoo"
        );
        assert!(records.get_for_package("baz").is_none());
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn test_retain_packages_drops_empty_records() {
        let mut records = BuildDirRecords::new();
        records.insert(record("pyfoo", &["python-foo", "python2-foo"], true));
        records.insert(record("bar", &["bar"], false));

        records.retain_packages(|p| p != "bar" && p != "python2-foo");
        assert_eq!(records.len(), 1);
        let pyfoo = records.get("pyfoo").unwrap();
        assert_eq!(pyfoo.packages.len(), 1);
        assert!(pyfoo.packages.contains("python-foo"));
    }

    #[test]
    fn test_error_wrapping() {
        let err = fetch_failed("foo", Error::CommandFailed {
            command: "git clone".into(),
            message: "exit status: 128".into(),
        });
        assert!(matches!(err, Error::FetchFailed { ref package, .. } if package == "foo"));

        let err = build_failed("foo", Error::Cancelled);
        assert!(matches!(err, Error::Cancelled));
    }
}
