// src/installer.rs

//! Layered installer
//!
//! Installs the layer sequence strictly in order, one package-manager batch
//! per layer. Repository packages and locally built packages of a layer go
//! into the same batch. Recipes whose build was deferred by the Preparer
//! are built right before their layer, when their dependencies are
//! already on the system.
//!
//! # State machine
//!
//! `Pending -> Installing(0) -> ... -> Installing(N-1) -> Completed`, or
//! `Failed(i)` at the first layer that fails. Layers `0..i` stay installed.
//!
//! Registered hooks run exactly once after the layer loop, whatever its
//! outcome. Their failures are logged and kept in [`Installer::hook_failures`];
//! they never replace the install result.

use crate::cancel::CancelToken;
use crate::collaborators::{BuildTool, InstallBatch, LocalDb, PackageManager};
use crate::error::{Error, Result};
use crate::graph::{InstallReason, Layer, LayerSequence, Origin, PackageNode};
use crate::hooks::{HookAction, HookFailure, HookRunner};
use crate::lock::InstallLock;
use crate::metadata::MetadataRecords;
use crate::preparer::{build_or_reuse, BuildDirRecords};
use crate::state::{BuildState, StateLedger};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallState {
    Pending,
    /// Working on the layer with this index
    Installing(usize),
    Completed,
    /// Stopped at the layer with this index
    Failed(usize),
}

pub struct Installer {
    local_db: Arc<dyn LocalDb>,
    package_manager: Arc<dyn PackageManager>,
    build_tool: Arc<dyn BuildTool>,
    hook_runner: HookRunner,
    hooks: Vec<HookAction>,
    hook_failures: Vec<HookFailure>,
    state: InstallState,
}

impl Installer {
    pub fn new(
        local_db: Arc<dyn LocalDb>,
        package_manager: Arc<dyn PackageManager>,
        build_tool: Arc<dyn BuildTool>,
    ) -> Self {
        let hook_runner = HookRunner::new(local_db.clone(), package_manager.clone());
        Self {
            local_db,
            package_manager,
            build_tool,
            hook_runner,
            hooks: Vec::new(),
            hook_failures: Vec::new(),
            state: InstallState::Pending,
        }
    }

    /// Queue a hook; hooks run in registration order
    pub fn add_post_install_hook(&mut self, action: HookAction) {
        debug!("Registered post-install hook: {}", action);
        self.hooks.push(action);
    }

    /// Hooks that have not run yet
    pub fn hooks(&self) -> &[HookAction] {
        &self.hooks
    }

    pub fn state(&self) -> InstallState {
        self.state
    }

    /// Hooks that failed during the last run
    pub fn hook_failures(&self) -> &[HookFailure] {
        &self.hook_failures
    }

    /// Install every layer, then run the registered hooks
    ///
    /// The returned result is the outcome of the layer loop alone.
    pub fn install(
        &mut self,
        cancel: &CancelToken,
        lock: &InstallLock,
        layers: &LayerSequence,
        records: &BuildDirRecords,
        metadata: &MetadataRecords,
        ledger: &StateLedger,
    ) -> Result<()> {
        debug!("Installing under lock {}", lock.path().display());
        let result = self.install_layers(cancel, layers, records, metadata, ledger);
        self.run_post_install_hooks();
        result
    }

    fn install_layers(
        &mut self,
        cancel: &CancelToken,
        layers: &LayerSequence,
        records: &BuildDirRecords,
        metadata: &MetadataRecords,
        ledger: &StateLedger,
    ) -> Result<()> {
        self.state = InstallState::Pending;
        let total = layers.len();
        // Artifacts of builds done here, by package base
        let mut built: HashMap<String, Vec<PathBuf>> = HashMap::new();

        for (index, layer) in layers.iter().enumerate() {
            // Only layer boundaries honor cancellation
            if cancel.is_cancelled() {
                info!("Cancelled before layer {} of {}", index + 1, total);
                self.state = InstallState::Failed(index);
                return Err(Error::Cancelled);
            }

            self.state = InstallState::Installing(index);
            info!("[{}/{}] Installing {} package(s)", index + 1, total, layer.len());

            let outcome = self
                .assemble_batch(layer, records, metadata, ledger, &mut built)
                .and_then(|batch| {
                    if batch.is_empty() {
                        debug!("Layer {} has nothing to install", index);
                        Ok(batch)
                    } else {
                        self.package_manager.install_batch(&batch).map(|()| batch)
                    }
                });

            match outcome {
                Ok(_) => {
                    for node in layer.nodes() {
                        ledger.advance(node.name(), BuildState::Installed)?;
                    }
                }
                Err(e) => {
                    error!("Layer {} failed: {}", index, e);
                    self.state = InstallState::Failed(index);
                    let packages: Vec<String> = layer
                        .nodes()
                        .filter(|n| n.origin() != Origin::AlreadySatisfied)
                        .map(|n| n.name().to_string())
                        .collect();
                    for name in &packages {
                        ledger.fail(name);
                    }
                    return Err(Error::InstallFailed {
                        layer: index,
                        completed_layers: index,
                        packages,
                        message: e.to_string(),
                    });
                }
            }
        }

        self.state = InstallState::Completed;
        info!("Installed {} layer(s)", total);
        Ok(())
    }

    /// Collect one layer's repository names and package files
    fn assemble_batch(
        &self,
        layer: &Layer,
        records: &BuildDirRecords,
        metadata: &MetadataRecords,
        ledger: &StateLedger,
        built: &mut HashMap<String, Vec<PathBuf>>,
    ) -> Result<InstallBatch> {
        let mut batch = InstallBatch::default();

        for node in layer.nodes() {
            match node.origin() {
                Origin::AlreadySatisfied => continue,
                Origin::LocalDb => batch.repo.push(node.name().to_string()),
                Origin::SourceArchive => {
                    let artifacts = self.artifacts_for(node, records, built)?;
                    ledger.advance(node.name(), BuildState::Built)?;

                    let version = metadata
                        .get(node.name())
                        .map(|m| m.version.as_str())
                        .unwrap_or(&node.version);
                    let file = select_artifact(&artifacts, node.name(), version).ok_or_else(
                        || Error::BuildFailed {
                            package: node.name().to_string(),
                            message: format!("no package file for version {}", version),
                        },
                    )?;
                    batch.artifacts.push(file);
                }
            }

            if node.upgrade_from.is_some() {
                // Upgrades keep whatever reason the database already has
                continue;
            }
            match node.reason {
                InstallReason::Explicit => batch.as_explicit.push(node.name().to_string()),
                InstallReason::Dependency => {
                    if self.local_db.installed(node.name())?.is_none() {
                        batch.as_deps.push(node.name().to_string());
                    }
                }
            }
        }

        Ok(batch)
    }

    /// Artifacts for a source node, building its recipe now if the Preparer deferred it
    fn artifacts_for(
        &self,
        node: &PackageNode,
        records: &BuildDirRecords,
        built: &mut HashMap<String, Vec<PathBuf>>,
    ) -> Result<Vec<PathBuf>> {
        let record = records.get_for_package(node.name()).ok_or_else(|| {
            Error::Internal(format!("no build directory for {}", node.name()))
        })?;

        if let Some(artifacts) = &record.artifacts {
            return Ok(artifacts.clone());
        }
        if let Some(artifacts) = built.get(&record.package_base) {
            return Ok(artifacts.clone());
        }

        let artifacts = build_or_reuse(self.build_tool.as_ref(), &record.package_base, &record.dir)?;
        built.insert(record.package_base.clone(), artifacts.clone());
        Ok(artifacts)
    }

    /// Run and drain the registered hooks
    fn run_post_install_hooks(&mut self) {
        let hooks = std::mem::take(&mut self.hooks);
        self.hook_failures.clear();

        for action in hooks {
            if let Err(e) = self.hook_runner.run(&action) {
                error!("Post-install hook '{}' failed: {}", action, e);
                self.hook_failures.push(HookFailure {
                    action,
                    message: e.to_string(),
                });
            }
        }
    }
}

/// Package file for `name` at `version`, ignoring split siblings and debug packages
fn select_artifact(artifacts: &[PathBuf], name: &str, version: &str) -> Option<PathBuf> {
    let prefix = format!("{}-{}-", name, version);
    artifacts
        .iter()
        .find(|p| {
            p.file_name()
                .and_then(|f| f.to_str())
                .is_some_and(|f| f.starts_with(&prefix))
        })
        .cloned()
}
