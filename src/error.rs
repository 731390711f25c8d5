// src/error.rs

//! Error types for the install orchestration core
//!
//! Every stage of the pipeline reports through [`Error`]. Construction-time
//! errors (`TargetNotFound`, `CycleDetected`, `UnresolvedDependency`,
//! `ResolutionFailed`) are raised before anything touches the host.
//! Preparation errors never reach the package database. `InstallFailed`
//! records how many layers were already committed so the caller can resume.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("target not found: {}", .0.join(", "))]
    TargetNotFound(Vec<String>),

    #[error("dependency cycle detected: {}", .0.join(" -> "))]
    CycleDetected(Vec<String>),

    #[error("unable to satisfy dependency '{dependency}' required by {required_by}")]
    UnresolvedDependency {
        dependency: String,
        required_by: String,
    },

    #[error("failed to query {collaborator} for '{name}': {message}")]
    ResolutionFailed {
        collaborator: &'static str,
        name: String,
        message: String,
    },

    #[error("failed to fetch recipe for {package}: {message}")]
    FetchFailed { package: String, message: String },

    #[error("failed to build {package}: {message}")]
    BuildFailed { package: String, message: String },

    #[error("failed to parse metadata at {}: {message}", path.display())]
    MetadataParse { path: PathBuf, message: String },

    #[error("metadata extraction failed for {} package(s): {}", .0.len(), MetadataFailures(.0))]
    MetadataExtraction(Vec<MetadataFailure>),

    #[error("{0}")]
    PrepareFailed(Box<PartialFailure>),

    #[error(
        "install failed at layer {layer} ({completed_layers} layer(s) already installed, \
         re-run to resume): {message}"
    )]
    InstallFailed {
        layer: usize,
        completed_layers: usize,
        packages: Vec<String>,
        message: String,
    },

    #[error("operation cancelled")]
    Cancelled,

    #[error("error refreshing databases: {0}")]
    DatabaseRefresh(String),

    #[error("install lock {} is held by another process", .0.display())]
    LockHeld(PathBuf),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("command `{command}` failed: {message}")]
    CommandFailed { command: String, message: String },

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal invariant violated: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this error was raised before any host mutation could occur
    pub fn is_construction_error(&self) -> bool {
        matches!(
            self,
            Error::TargetNotFound(_)
                | Error::CycleDetected(_)
                | Error::UnresolvedDependency { .. }
                | Error::ResolutionFailed { .. }
        )
    }

    /// Short label of the pipeline stage this error belongs to
    pub fn stage(&self) -> &'static str {
        match self {
            Error::TargetNotFound(_)
            | Error::CycleDetected(_)
            | Error::UnresolvedDependency { .. }
            | Error::ResolutionFailed { .. } => "graph",
            Error::FetchFailed { .. } | Error::BuildFailed { .. } | Error::PrepareFailed(_) => {
                "prepare"
            }
            Error::MetadataParse { .. } | Error::MetadataExtraction(_) => "metadata",
            Error::InstallFailed { .. } => "install",
            Error::Cancelled => "cancelled",
            _ => "runtime",
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Http(err.to_string())
    }
}

/// One package whose metadata could not be extracted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataFailure {
    pub package: String,
    pub path: PathBuf,
    pub message: String,
}

struct MetadataFailures<'a>(&'a [MetadataFailure]);

impl fmt::Display for MetadataFailures<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, failure) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(
                f,
                "{} ({}): {}",
                failure.package,
                failure.path.display(),
                failure.message
            )?;
        }
        Ok(())
    }
}

/// A recipe that could not be prepared, and why
///
/// Split packages share a recipe, so one failure covers every package
/// built from `package_base`.
#[derive(Debug)]
pub struct NodeFailure {
    pub package_base: String,
    pub packages: Vec<String>,
    pub cause: Error,
}

/// Partial-failure report from the Preparer
///
/// Carries what did succeed so the caller can continue with a reduced
/// graph when its policy allows.
#[derive(Debug)]
pub struct PartialFailure {
    /// Nodes whose own fetch or build failed
    pub failed: Vec<NodeFailure>,
    /// Dependents of failed nodes that were never attempted
    pub skipped: Vec<String>,
    /// Records for everything that was prepared successfully
    pub prepared: crate::preparer::BuildDirRecords,
}

impl PartialFailure {
    /// Names of the nodes that failed themselves
    pub fn failed_names(&self) -> Vec<&str> {
        self.failed
            .iter()
            .flat_map(|f| f.packages.iter().map(String::as_str))
            .collect()
    }

    /// Failed and skipped names together
    pub fn excluded_names(&self) -> Vec<String> {
        self.failed
            .iter()
            .flat_map(|f| f.packages.iter().cloned())
            .chain(self.skipped.iter().cloned())
            .collect()
    }
}

impl fmt::Display for PartialFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "preparation failed for {}", self.failed_names().join(", "))?;
        for failure in &self.failed {
            write!(f, "\n  {}: {}", failure.package_base, failure.cause)?;
        }
        if !self.skipped.is_empty() {
            write!(f, "\n  skipped dependents: {}", self.skipped.join(", "))?;
        }
        Ok(())
    }
}
