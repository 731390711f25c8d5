// src/lib.rs

//! Aurum AUR Helper
//!
//! Install orchestration for source-built packages on pacman-based
//! systems: dependency resolution across binary repositories and the AUR,
//! layered install ordering, recipe preparation and builds, and a layered
//! install with unconditional cleanup hooks.
//!
//! # Architecture
//!
//! - Graph first: targets and their dependency closure become a DAG
//! - Layers: mutually independent packages install in one transaction
//! - Collaborators: pacman, the AUR and makepkg sit behind narrow traits
//! - Hooks: cleanup is data, run by one interpreter after install
//! - One lock: a single exclusive install lock serializes whole runs

pub mod cancel;
pub mod collaborators;
pub mod completion;
pub mod config;
mod error;
pub mod graph;
pub mod hooks;
pub mod installer;
pub mod lock;
pub mod metadata;
pub mod preparer;
pub mod srcinfo;
pub mod state;
pub mod sync;
pub mod version;

pub use cancel::CancelToken;
pub use config::{Config, PartialFailurePolicy};
pub use error::{Error, MetadataFailure, NodeFailure, PartialFailure, Result};
pub use graph::{DependencyGraph, GraphBuilder, LayerSequence, Origin, PackageNode};
pub use hooks::{HookAction, HookFailure};
pub use installer::{InstallState, Installer};
pub use lock::InstallLock;
pub use metadata::{MetadataExtractor, MetadataRecords};
pub use preparer::{BuildDirRecord, BuildDirRecords, Preparer};
pub use state::{BuildState, StateLedger};
pub use sync::{sync_install, SyncContext, SyncRequest};
