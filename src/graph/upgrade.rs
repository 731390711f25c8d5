// src/graph/upgrade.rs

//! Full-system upgrade merge
//!
//! Installed foreign packages (those no sync repository provides) are
//! checked against the archive. Every one with a newer archive version is
//! spliced into an existing graph as an additional root. A node the graph
//! only holds as already satisfied is replaced by the upgrade; nodes that
//! are already going to be installed are left untouched.

use super::{DependencyGraph, GraphBuilder, PackageNode};
use crate::cancel::CancelToken;
use crate::error::Result;
use crate::version::vercmp;
use std::cmp::Ordering;
use tracing::{debug, info};

/// An installed package with a different archive version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeCandidate {
    pub name: String,
    pub installed_version: String,
    pub available_version: String,
    pub package_base: String,
}

impl UpgradeCandidate {
    pub fn is_downgrade(&self) -> bool {
        vercmp(&self.available_version, &self.installed_version) == Ordering::Less
    }
}

impl GraphBuilder {
    /// Merge upgrades of installed archive packages into `graph`
    ///
    /// With `allow_downgrade`, archive versions older than the installed
    /// one are taken as well. Returns the merged graph and the candidates
    /// that were spliced in; packages the graph already installs are not
    /// reported.
    pub fn merge_upgrades(
        &self,
        cancel: &CancelToken,
        mut graph: DependencyGraph,
        allow_downgrade: bool,
    ) -> Result<(DependencyGraph, Vec<UpgradeCandidate>)> {
        cancel.check()?;

        let foreign = self.local_db.foreign_packages().map_err(|e| {
            super::builder::resolution_failed("local database", "foreign packages", e)
        })?;
        if foreign.is_empty() {
            debug!("No foreign packages installed, nothing to upgrade");
            return Ok((graph, Vec::new()));
        }

        let names: Vec<String> = foreign.iter().map(|p| p.name.clone()).collect();
        let available = self.resolve_archive(&names)?;

        let mut candidates = Vec::new();
        let mut frontier = Vec::new();

        for installed in &foreign {
            let Some(pkg) = available.get(&installed.name) else {
                debug!("{} is not in the archive", installed.name);
                continue;
            };

            let wanted = match vercmp(&pkg.version, &installed.version) {
                Ordering::Greater => true,
                Ordering::Less => allow_downgrade,
                Ordering::Equal => false,
            };
            if !wanted {
                continue;
            }

            let candidate = UpgradeCandidate {
                name: pkg.name.clone(),
                installed_version: installed.version.clone(),
                available_version: pkg.version.clone(),
                package_base: pkg.package_base.clone(),
            };

            let mut node = PackageNode::from_source(pkg);
            node.upgrade_from = Some(installed.version.clone());
            if !graph.replace_satisfied(node) {
                debug!("{} is already selected for install, keeping its node", pkg.name);
                continue;
            }
            frontier.push(pkg.clone());

            info!(
                "{} {} -> {}{}",
                candidate.name,
                candidate.installed_version,
                candidate.available_version,
                if candidate.is_downgrade() { " (downgrade)" } else { "" }
            );
            candidates.push(candidate);
        }

        self.expand(cancel, &mut graph, frontier)?;
        graph.validate()?;

        Ok((graph, candidates))
    }
}
