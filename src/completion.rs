// src/completion.rs

//! Background completion-cache refresher
//!
//! The shell-completion cache lists every installable package name with
//! its origin, one `name origin` pair per line (`AUR` for archive
//! packages, the repository name otherwise). It is regenerated at most
//! once per `completion_interval_days`.
//!
//! The refresh runs on a detached [`BackgroundTask`]. The install pipeline
//! never depends on its outcome: errors are logged at debug level and
//! dropped, and the driver waits only briefly before abandoning it.

use crate::collaborators::{LocalDb, SourceArchive};
use crate::config::Config;
use crate::error::{Error, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tempfile::NamedTempFile;
use tracing::debug;

/// Origin label for archive packages in the completion cache
pub const ARCHIVE_ORIGIN: &str = "AUR";

/// Poll interval while waiting on a background task
const WAIT_POLL: Duration = Duration::from_millis(10);

/// Handle to a detached background thread whose result is discarded
///
/// Dropping the handle, or calling [`abandon`](Self::abandon), detaches the
/// thread; it never blocks process exit.
#[derive(Debug)]
pub struct BackgroundTask {
    name: String,
    handle: Option<JoinHandle<()>>,
    finished: Arc<AtomicBool>,
}

/// Sets the finished flag even if the task panics
struct FinishGuard(Arc<AtomicBool>);

impl Drop for FinishGuard {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

impl BackgroundTask {
    pub fn spawn<F>(name: &str, task: F) -> Result<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let finished = Arc::new(AtomicBool::new(false));
        let guard = FinishGuard(finished.clone());

        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let _guard = guard;
                task();
            })
            .map_err(|e| Error::Internal(format!("failed to spawn {}: {}", name, e)))?;

        Ok(Self {
            name: name.to_string(),
            handle: Some(handle),
            finished,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    /// Wait up to `timeout` for the task; true if it finished in time
    pub fn wait_for(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while !self.is_finished() {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(WAIT_POLL);
        }

        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        true
    }

    /// Stop tracking the task and let it run to completion on its own
    pub fn abandon(mut self) {
        if self.handle.take().is_some() && !self.is_finished() {
            debug!("Abandoning background task {}", self.name);
        }
    }
}

/// Whether the cache at `path` is missing or older than `interval_days`
pub fn needs_refresh(path: &Path, interval_days: u32, now: DateTime<Utc>) -> bool {
    let modified = match fs::metadata(path).and_then(|m| m.modified()) {
        Ok(t) => DateTime::<Utc>::from(t),
        Err(_) => return true,
    };
    now.signed_duration_since(modified) >= ChronoDuration::days(i64::from(interval_days))
}

/// Regenerate the completion cache if it is stale
///
/// Returns whether the file was rewritten.
pub fn update(
    local_db: &dyn LocalDb,
    archive: &dyn SourceArchive,
    path: &Path,
    interval_days: u32,
) -> Result<bool> {
    if !needs_refresh(path, interval_days, Utc::now()) {
        return Ok(false);
    }

    let archive_names = archive.package_names()?;
    let sync_packages = local_db.sync_packages()?;

    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir)?;

    // Write beside the target and rename so readers never see a partial file
    let mut file = NamedTempFile::new_in(&dir)?;
    for name in &archive_names {
        writeln!(file, "{} {}", name, ARCHIVE_ORIGIN)?;
    }
    for (repo, name) in &sync_packages {
        writeln!(file, "{} {}", name, repo)?;
    }
    file.flush()?;
    file.persist(path).map_err(|e| Error::Io(e.error))?;

    debug!(
        "Completion cache written: {} archive and {} repository entries",
        archive_names.len(),
        sync_packages.len()
    );
    Ok(true)
}

/// Launch the refresher on a detached task
pub fn spawn_refresh(
    local_db: Arc<dyn LocalDb>,
    archive: Arc<dyn SourceArchive>,
    config: &Config,
) -> Result<BackgroundTask> {
    let path = config.completion_path.clone();
    let interval_days = config.completion_interval_days;

    BackgroundTask::spawn("completion-refresh", move || {
        match update(local_db.as_ref(), archive.as_ref(), &path, interval_days) {
            Ok(true) => debug!("Refreshed completion cache at {}", path.display()),
            Ok(false) => debug!("Completion cache is fresh"),
            Err(e) => debug!("Completion cache refresh failed: {}", e),
        }
    })
}
