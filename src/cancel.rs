// src/cancel.rs

//! Ambient cancellation signal
//!
//! A single [`CancelToken`] is threaded through every stage. Stages poll it
//! before launching new work; the Installer only honors it at layer
//! boundaries so a package-manager transaction is never interrupted.

use crate::error::{Error, Result};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use tracing::{debug, warn};

/// Shared cancellation flag, cheap to clone
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Return `Err(Error::Cancelled)` if cancellation was requested
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Cancel this token once `signal` resolves
    ///
    /// The future runs on its own thread inside a current-thread tokio
    /// runtime, so callers stay synchronous. The binary passes
    /// `tokio::signal::ctrl_c()` here.
    pub fn cancel_when<F, T>(&self, signal: F) -> Result<thread::JoinHandle<()>>
    where
        F: Future<Output = T> + Send + 'static,
    {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let token = self.clone();

        let handle = thread::Builder::new()
            .name("cancel-watch".to_string())
            .spawn(move || {
                runtime.block_on(signal);
                if !token.is_cancelled() {
                    warn!("Interrupted, stopping at the next safe point");
                }
                token.cancel();
                debug!("Cancellation requested");
            })?;
        Ok(handle)
    }
}
