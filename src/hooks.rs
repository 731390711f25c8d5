// src/hooks.rs

//! Post-install hook actions
//!
//! Cleanup work scheduled during preparation is described as data
//! ([`HookAction`]) rather than closures, so it can be inspected, logged
//! and tested on its own. [`HookRunner`] is the single interpreter.

use crate::collaborators::{LocalDb, PackageManager};
use crate::error::{Error, Result};
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One deferred cleanup action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookAction {
    /// Delete build directories
    RemoveDirs { paths: Vec<PathBuf> },
    /// Uninstall packages that were only needed to build
    UninstallPackages { names: Vec<String> },
}

impl HookAction {
    pub fn kind(&self) -> &'static str {
        match self {
            HookAction::RemoveDirs { .. } => "remove-dirs",
            HookAction::UninstallPackages { .. } => "uninstall-packages",
        }
    }
}

impl fmt::Display for HookAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookAction::RemoveDirs { paths } => {
                write!(f, "remove {} build director(ies)", paths.len())
            }
            HookAction::UninstallPackages { names } => {
                write!(f, "uninstall {}", names.join(", "))
            }
        }
    }
}

/// A hook that failed; reported on the side, never as the install result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookFailure {
    pub action: HookAction,
    pub message: String,
}

impl fmt::Display for HookFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "hook '{}' failed: {}", self.action, self.message)
    }
}

/// Executes [`HookAction`]s
pub struct HookRunner {
    local_db: Arc<dyn LocalDb>,
    package_manager: Arc<dyn PackageManager>,
}

impl HookRunner {
    pub fn new(local_db: Arc<dyn LocalDb>, package_manager: Arc<dyn PackageManager>) -> Self {
        Self {
            local_db,
            package_manager,
        }
    }

    pub fn run(&self, action: &HookAction) -> Result<()> {
        debug!("Running hook: {}", action);
        match action {
            HookAction::RemoveDirs { paths } => remove_dirs(paths),
            HookAction::UninstallPackages { names } => self.uninstall(names),
        }
    }

    /// Remove only what is still installed; an install that failed part
    /// way may never have put some of them on the system
    fn uninstall(&self, names: &[String]) -> Result<()> {
        let mut present = Vec::new();
        for name in names {
            if self.local_db.installed(name)?.is_some() {
                present.push(name.clone());
            }
        }

        if present.is_empty() {
            debug!("No build-only dependencies left to remove");
            return Ok(());
        }

        info!("Removing build-only dependencies: {}", present.join(", "));
        self.package_manager.remove(&present)
    }
}

/// Try every directory; the first error is reported after the rest were attempted
fn remove_dirs(paths: &[PathBuf]) -> Result<()> {
    let mut first_error: Option<Error> = None;

    for path in paths {
        if !path.exists() {
            continue;
        }
        match fs::remove_dir_all(path) {
            Ok(()) => debug!("Removed {}", path.display()),
            Err(e) => {
                warn!("Failed to remove {}: {}", path.display(), e);
                if first_error.is_none() {
                    first_error = Some(Error::Io(e));
                }
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
