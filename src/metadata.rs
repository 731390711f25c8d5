// src/metadata.rs

//! Metadata extraction for prepared build directories
//!
//! Reads each recipe's `.SRCINFO` (or asks the build tool to render one),
//! splits it into one record per declared package, and checks that every
//! graph node mapped to the directory is actually declared there. A bad
//! recipe fails only its own packages, but the run as a whole fails if any
//! package could not be extracted.

use crate::collaborators::BuildTool;
use crate::error::{Error, MetadataFailure, Result};
use crate::graph::LayerSequence;
use crate::preparer::{BuildDirRecord, BuildDirRecords};
use crate::srcinfo::{PackageMetadata, Srcinfo};
use crate::version::Dependency;
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const SRCINFO_FILE: &str = ".SRCINFO";

/// Verified package metadata keyed by package name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataRecords {
    by_name: BTreeMap<String, PackageMetadata>,
}

impl MetadataRecords {
    pub fn get(&self, name: &str) -> Option<&PackageMetadata> {
        self.by_name.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PackageMetadata> {
        self.by_name.values()
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// Dependencies a recipe declares that the graph never resolved
    ///
    /// Only graph nodes are checked. A mismatch usually means the archive
    /// metadata used for resolution is older than the fetched recipe.
    pub fn dependency_mismatches(&self, layers: &LayerSequence) -> Vec<String> {
        let mut mismatches = Vec::new();
        for node in layers.nodes().filter(|n| n.is_source()) {
            let Some(meta) = self.get(node.name()) else {
                continue;
            };
            for raw in meta.all_dependencies() {
                let dep = Dependency::parse(raw);
                if !layers.resolves(&dep.name) {
                    mismatches.push(format!(
                        "{} declares '{}', which is not part of the install",
                        node.name(),
                        raw
                    ));
                }
            }
        }
        mismatches
    }
}

pub struct MetadataExtractor {
    build_tool: Arc<dyn BuildTool>,
    arch: String,
}

impl MetadataExtractor {
    pub fn new(build_tool: Arc<dyn BuildTool>) -> Self {
        Self {
            build_tool,
            arch: std::env::consts::ARCH.to_string(),
        }
    }

    /// Resolve architecture-specific keys for `arch` instead of the host's
    pub fn with_arch(mut self, arch: impl Into<String>) -> Self {
        self.arch = arch.into();
        self
    }

    pub fn run(&self, records: &BuildDirRecords) -> Result<MetadataRecords> {
        let records: Vec<&BuildDirRecord> = records.iter().collect();

        let results: Vec<std::result::Result<Vec<PackageMetadata>, Vec<MetadataFailure>>> =
            records.par_iter().map(|r| self.extract(r)).collect();

        let mut extracted = MetadataRecords::default();
        let mut failures = Vec::new();
        for result in results {
            match result {
                Ok(packages) => {
                    for meta in packages {
                        extracted.by_name.insert(meta.name.clone(), meta);
                    }
                }
                Err(mut failed) => failures.append(&mut failed),
            }
        }

        if !failures.is_empty() {
            return Err(Error::MetadataExtraction(failures));
        }

        info!("Extracted metadata for {} package(s)", extracted.len());
        Ok(extracted)
    }

    fn extract(
        &self,
        record: &BuildDirRecord,
    ) -> std::result::Result<Vec<PackageMetadata>, Vec<MetadataFailure>> {
        let path = record.dir.join(SRCINFO_FILE);
        let fail_all = |message: String| -> Vec<MetadataFailure> {
            record
                .packages
                .iter()
                .map(|package| MetadataFailure {
                    package: package.clone(),
                    path: path.clone(),
                    message: message.clone(),
                })
                .collect()
        };

        let content = self.read_srcinfo(record, &path).map_err(|e| fail_all(e.to_string()))?;
        let srcinfo = parse_srcinfo(&path, &content).map_err(|e| fail_all(e.to_string()))?;

        if srcinfo.package_base != record.package_base {
            warn!(
                "{} declares pkgbase {}, expected {}",
                path.display(),
                srcinfo.package_base,
                record.package_base
            );
        }

        let packages = srcinfo.split_packages(&self.arch);
        let failures: Vec<MetadataFailure> = record
            .packages
            .iter()
            .filter(|name| !packages.iter().any(|p| &p.name == *name))
            .map(|name| MetadataFailure {
                package: name.clone(),
                path: path.clone(),
                message: format!(
                    "package is not declared by pkgbase {}",
                    srcinfo.package_base
                ),
            })
            .collect();
        if !failures.is_empty() {
            return Err(failures);
        }

        for meta in &packages {
            if record.packages.contains(&meta.name) && !meta.supports_arch(&self.arch) {
                warn!(
                    "{} does not list {} in its architectures ({})",
                    meta.name,
                    self.arch,
                    meta.arch.join(", ")
                );
            }
        }

        debug!(
            "{}: {} package(s) at {}",
            record.package_base,
            packages.len(),
            srcinfo.version()
        );
        Ok(packages)
    }

    fn read_srcinfo(&self, record: &BuildDirRecord, path: &Path) -> Result<String> {
        if path.exists() {
            return Ok(fs::read_to_string(path)?);
        }
        debug!("No {} in {}, generating one", SRCINFO_FILE, record.dir.display());
        self.build_tool.print_srcinfo(&record.dir)
    }
}

/// Parse `.SRCINFO` content read from `path`
pub fn parse_srcinfo(path: &Path, content: &str) -> Result<Srcinfo> {
    Srcinfo::parse(content).map_err(|e| Error::MetadataParse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}
