// src/lock.rs

//! Exclusive install lock
//!
//! One install run at a time may mutate the package database. The driver
//! takes this lock before resolving anything and holds it until the
//! Installer and its hooks are done. Contention is reported immediately as
//! [`Error::LockHeld`] and never retried.
//!
//! # Example
//!
//! ```ignore
//! use aurum::lock::InstallLock;
//!
//! let lock = InstallLock::acquire(&config.lock_path)?;
//! installer.install(&cancel, &lock, &layers, &records, &metadata, &ledger)?;
//! // Lock released on drop
//! ```

use crate::error::{Error, Result};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Held install lock; the Installer borrows it as proof of ownership
#[derive(Debug)]
pub struct InstallLock {
    /// Kept open to hold the flock
    #[allow(dead_code)]
    file: File,
    path: PathBuf,
}

impl InstallLock {
    /// Take the lock without blocking
    pub fn acquire<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = Self::open(&path)?;

        match file.try_lock_exclusive() {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                debug!("Install lock already held at {:?}", path);
                return Err(Error::LockHeld(path));
            }
            Err(e) => {
                // Some platforms report contention as a plain OS error
                if Self::holder_pid(&path).is_some() {
                    return Err(Error::LockHeld(path));
                }
                return Err(Error::Io(e));
            }
        }

        let lock = Self { file, path };
        if let Err(e) = lock.write_pid() {
            debug!("Could not record pid next to {:?}: {}", lock.path, e);
        }
        info!("Acquired install lock at {:?}", lock.path);
        Ok(lock)
    }

    /// Open the lock file, creating it shareable by every user
    ///
    /// A file created by another user is opened read-only; flock does not
    /// need write access.
    fn open(path: &Path) -> Result<File> {
        // Do not truncate: the lock file must not be clobbered before we own it
        let opened = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .mode(0o666)
            .open(path);

        match opened {
            Ok(file) => Ok(file),
            Err(e) if e.kind() == ErrorKind::PermissionDenied && path.exists() => {
                debug!("{:?} is not writable, locking it read-only", path);
                Ok(File::open(path)?)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Whether some process currently holds the lock at `path`
    pub fn is_held<P: AsRef<Path>>(path: P) -> bool {
        let path = path.as_ref();
        if !path.exists() {
            return false;
        }

        let file = match File::open(path) {
            Ok(f) => f,
            Err(_) => return false,
        };

        match file.try_lock_exclusive() {
            Ok(()) => {
                let _ = file.unlock();
                false
            }
            Err(_) => true,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// PID recorded by the current holder, if any
    pub fn holder_pid<P: AsRef<Path>>(lock_path: P) -> Option<u32> {
        fs::read_to_string(lock_path.as_ref().with_extension("pid"))
            .ok()
            .and_then(|s| s.trim().parse().ok())
    }

    fn write_pid(&self) -> Result<()> {
        fs::write(self.path.with_extension("pid"), std::process::id().to_string())?;
        Ok(())
    }
}

impl Drop for InstallLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(self.path.with_extension("pid"));
        // flock is released when the file closes
        info!("Released install lock at {:?}", self.path);
    }
}
