// src/collaborators/mod.rs

//! Narrow interfaces to the systems the orchestration core drives
//!
//! The core never talks to pacman, the AUR or makepkg directly; it goes
//! through these traits so every stage can be exercised against in-memory
//! fakes. Concrete implementations live in the submodules:
//!
//! - [`pacman::PacmanDb`]: binary repositories and installed state
//! - [`pacman::Pacman`]: host package database mutations
//! - [`aur::AurArchive`]: source recipes (RPC metadata + git)
//! - [`makepkg::Makepkg`]: recipe builds

pub mod aur;
mod command;
pub mod makepkg;
pub mod pacman;

use crate::error::Result;
use std::path::{Path, PathBuf};

/// A package available from one of the binary repositories
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoPackage {
    pub name: String,
    pub version: String,
    pub repo: String,
}

/// A package currently installed on the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledPackage {
    pub name: String,
    pub version: String,
}

/// Archive-side description of a buildable package
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SourcePackage {
    pub name: String,
    /// Recipe the package is built from; split packages share one base
    pub package_base: String,
    /// Full version including pkgrel
    pub version: String,
    pub depends: Vec<String>,
    pub make_depends: Vec<String>,
    pub check_depends: Vec<String>,
    pub provides: Vec<String>,
}

/// Whether a recipe directory was created or refreshed in place
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    Cloned,
    Updated,
}

/// Binary repositories plus installed-package state
pub trait LocalDb: Send + Sync {
    /// Find the repository package satisfying a dependency string
    fn resolve(&self, dependency: &str) -> Result<Option<RepoPackage>>;

    /// Installed package by exact name
    fn installed(&self, name: &str) -> Result<Option<InstalledPackage>>;

    /// Whether some installed package (by name or provides) satisfies `dependency`
    fn is_satisfied(&self, dependency: &str) -> Result<bool>;

    /// Installed packages that no sync repository provides
    fn foreign_packages(&self) -> Result<Vec<InstalledPackage>>;

    /// Every `(repo, name)` pair in the sync databases
    fn sync_packages(&self) -> Result<Vec<(String, String)>>;

    /// Invalidate cached state after an external database sync
    fn refresh_handle(&self) -> Result<()>;
}

/// Source-based package archive
pub trait SourceArchive: Send + Sync {
    fn resolve(&self, name: &str) -> Result<Option<SourcePackage>>;

    /// Batched lookup; packages that do not exist are simply absent from the result
    fn resolve_many(&self, names: &[String]) -> Result<Vec<SourcePackage>> {
        let mut found = Vec::new();
        for name in names {
            if let Some(pkg) = self.resolve(name)? {
                found.push(pkg);
            }
        }
        Ok(found)
    }

    /// Clone the recipe for `package_base` into `dest`, or update it there
    fn fetch_or_update(&self, package_base: &str, dest: &Path) -> Result<FetchOutcome>;

    /// Names of every package the archive knows about
    fn package_names(&self) -> Result<Vec<String>>;
}

/// Builds a fetched recipe into installable artifacts
pub trait BuildTool: Send + Sync {
    /// Build the recipe in `dir`, returning the produced package files
    fn build(&self, dir: &Path) -> Result<Vec<PathBuf>>;

    /// Package files a build of `dir` would produce (they may not exist yet)
    fn package_list(&self, dir: &Path) -> Result<Vec<PathBuf>>;

    /// Render the recipe's metadata in .SRCINFO form
    fn print_srcinfo(&self, dir: &Path) -> Result<String>;
}

/// One package-manager invocation worth of work
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallBatch {
    /// Repository package names
    pub repo: Vec<String>,
    /// Locally built package files
    pub artifacts: Vec<PathBuf>,
    /// Packages to record as installed-as-dependency
    pub as_deps: Vec<String>,
    /// Packages to record as explicitly installed
    pub as_explicit: Vec<String>,
}

impl InstallBatch {
    pub fn is_empty(&self) -> bool {
        self.repo.is_empty() && self.artifacts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.repo.len() + self.artifacts.len()
    }
}

/// Mutates the host package database
pub trait PackageManager: Send + Sync {
    /// Synchronize the repository databases
    fn refresh_databases(&self) -> Result<()>;

    fn install_batch(&self, batch: &InstallBatch) -> Result<()>;

    fn remove(&self, names: &[String]) -> Result<()>;
}
