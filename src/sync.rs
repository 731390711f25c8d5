// src/sync.rs

//! Install orchestration driver
//!
//! Runs the whole pipeline for one request under the exclusive install
//! lock:
//!
//! 1. optional repository database refresh
//! 2. graph construction, plus the upgrade merge for `-u`/`-uu`
//! 3. layering
//! 4. preparation, with the configured partial-failure policy
//! 5. cleanup hook registration
//! 6. metadata extraction
//! 7. the background completion refresh
//! 8. layered install and hooks
//!
//! Nothing touches the host package database before step 8, so every
//! error raised earlier leaves the system unchanged.

use crate::cancel::CancelToken;
use crate::collaborators::{BuildTool, LocalDb, PackageManager, SourceArchive};
use crate::completion;
use crate::config::{Config, PartialFailurePolicy};
use crate::error::{Error, Result};
use crate::graph::{DependencyGraph, GraphBuilder, LayerSequence};
use crate::installer::Installer;
use crate::lock::InstallLock;
use crate::metadata::MetadataExtractor;
use crate::preparer::{BuildDirRecords, Preparer};
use crate::state::StateLedger;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// What the user asked for
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncRequest {
    pub targets: Vec<String>,
    /// Synchronize repository databases first
    pub refresh: bool,
    /// 1 merges upgrades of installed archive packages, 2 also allows downgrades
    pub sysupgrade: u8,
}

/// Collaborators and settings shared by every stage of a run
#[derive(Clone)]
pub struct SyncContext {
    pub config: Arc<Config>,
    pub local_db: Arc<dyn LocalDb>,
    pub archive: Arc<dyn SourceArchive>,
    pub build_tool: Arc<dyn BuildTool>,
    pub package_manager: Arc<dyn PackageManager>,
    pub cancel: CancelToken,
}

/// Install `request.targets` (and upgrades, if requested)
pub fn sync_install(ctx: &SyncContext, request: &SyncRequest) -> Result<()> {
    let lock = InstallLock::acquire(&ctx.config.lock_path)?;
    let cancel = &ctx.cancel;

    if request.refresh {
        info!("Synchronizing package databases");
        ctx.package_manager
            .refresh_databases()
            .and_then(|()| ctx.local_db.refresh_handle())
            .map_err(|e| Error::DatabaseRefresh(e.to_string()))?;
    }

    let builder = GraphBuilder::new(ctx.local_db.clone(), ctx.archive.clone());
    let mut graph = builder.graph_from_targets(cancel, None, &request.targets)?;

    if request.sysupgrade > 0 {
        let (merged, upgrades) =
            builder.merge_upgrades(cancel, graph, request.sysupgrade > 1)?;
        info!("{} AUR package(s) to upgrade", upgrades.len());
        graph = merged;
    }

    let mut layers = graph.layers()?;
    if layers.is_empty() {
        info!("Nothing to do");
        return Ok(());
    }
    info!(
        "Resolved {} package(s) in {} layer(s)",
        layers.node_count(),
        layers.len()
    );

    let ledger = StateLedger::from_layers(&layers);
    let mut preparer = Preparer::new(
        ctx.local_db.clone(),
        ctx.archive.clone(),
        ctx.build_tool.clone(),
        ctx.config.clone(),
    );

    let mut deferred: Option<Error> = None;
    let records = match preparer.run(cancel, &layers, &ledger) {
        Ok(records) => records,
        Err(Error::PrepareFailed(partial))
            if ctx.config.partial_failure_policy == PartialFailurePolicy::ContinueIndependent =>
        {
            let (reduced, records) = reduce_after_failure(&graph, &partial)?;
            warn!(
                "Continuing without {}: {} package(s) left to install",
                partial.excluded_names().join(", "),
                reduced.node_count()
            );
            layers = reduced;
            deferred = Some(Error::PrepareFailed(partial));
            records
        }
        Err(e) => return Err(e),
    };

    if layers.is_empty() {
        info!("Nothing left to install");
        return deferred.map_or(Ok(()), Err);
    }

    let mut installer = Installer::new(
        ctx.local_db.clone(),
        ctx.package_manager.clone(),
        ctx.build_tool.clone(),
    );
    if let Some(hook) = preparer.should_clean_make_deps() {
        installer.add_post_install_hook(hook);
    }
    if let Some(hook) = preparer.should_clean_build_dirs(&records) {
        installer.add_post_install_hook(hook);
    }

    let metadata = MetadataExtractor::new(ctx.build_tool.clone()).run(&records)?;
    for mismatch in metadata.dependency_mismatches(&layers) {
        warn!("{}", mismatch);
    }

    let refresher = completion::spawn_refresh(ctx.local_db.clone(), ctx.archive.clone(), &ctx.config);

    let result = installer.install(cancel, &lock, &layers, &records, &metadata, &ledger);

    match refresher {
        Ok(mut task) => {
            if !task.wait_for(Duration::from_millis(ctx.config.completion_wait_ms)) {
                task.abandon();
            }
        }
        Err(e) => debug!("Completion refresh not started: {}", e),
    }

    result?;
    deferred.map_or(Ok(()), Err)
}

/// Graph layering and records left after dropping a failed subtree
fn reduce_after_failure(
    graph: &DependencyGraph,
    partial: &crate::error::PartialFailure,
) -> Result<(LayerSequence, BuildDirRecords)> {
    let excluded = partial.excluded_names();
    let reduced = graph
        .without(excluded.iter().map(String::as_str))
        .reachable_from_roots();
    debug!(
        "Reduced graph from {} to {} node(s)",
        graph.len(),
        reduced.len()
    );

    let layers = reduced.layers()?;
    let mut records = partial.prepared.clone();
    records.retain_packages(|name| reduced.contains(name));
    Ok((layers, records))
}
