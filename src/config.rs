// src/config.rs

//! Runtime configuration
//!
//! Loaded once from TOML and passed by value (or `Arc`) into every
//! component constructor. Nothing reads configuration from global state.
//!
//! # Example config.toml
//!
//! ```toml
//! aur_url = "https://aur.archlinux.org"
//! build_dir = "/home/me/.cache/aurum"
//! max_concurrent_preparations = 4
//! clean_build_dirs = true
//! remove_make_deps = true
//! partial_failure_policy = "continue-independent"
//! no_confirm = false
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// What the driver does when preparation fails for part of the graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PartialFailurePolicy {
    /// Abort before installing anything
    #[default]
    Abort,
    /// Drop the failed subtrees, install the rest, then report the failure
    ContinueIndependent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the source archive (RPC, git and package list)
    pub aur_url: String,
    /// Parent directory of per-package build directories
    pub build_dir: PathBuf,
    /// Completion cache file written by the background refresher
    pub completion_path: PathBuf,
    /// Refresh the completion cache when older than this many days
    pub completion_interval_days: u32,
    /// How long the driver waits for the refresher before abandoning it
    pub completion_wait_ms: u64,
    /// Exclusive install lock
    pub lock_path: PathBuf,
    /// Upper bound on concurrent fetch/build jobs within one layer
    pub max_concurrent_preparations: usize,
    /// Remove freshly cloned build directories after install
    pub clean_build_dirs: bool,
    /// Uninstall build-only dependencies after install
    pub remove_make_deps: bool,
    pub partial_failure_policy: PartialFailurePolicy,
    /// Pass --noconfirm to the package manager and build tool
    pub no_confirm: bool,
    pub pacman_bin: String,
    pub makepkg_bin: String,
    pub git_bin: String,
    /// Privilege escalation prefix for package database mutations; empty disables it
    pub sudo_bin: String,
    /// Extra flags appended to every build invocation
    pub makepkg_flags: Vec<String>,
}

/// Shared by every user so runs under sudo and plain users serialize
pub const DEFAULT_LOCK_PATH: &str = "/run/lock/aurum.lock";

impl Default for Config {
    fn default() -> Self {
        let cache = dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("aurum");
        let jobs = std::thread::available_parallelism()
            .map(|p| p.get())
            .unwrap_or(4);

        Self {
            aur_url: "https://aur.archlinux.org".to_string(),
            build_dir: cache.clone(),
            completion_path: cache.join("completion.cache"),
            completion_interval_days: 7,
            completion_wait_ms: 250,
            lock_path: PathBuf::from(DEFAULT_LOCK_PATH),
            max_concurrent_preparations: jobs,
            clean_build_dirs: false,
            remove_make_deps: false,
            partial_failure_policy: PartialFailurePolicy::Abort,
            no_confirm: false,
            pacman_bin: "pacman".to_string(),
            makepkg_bin: "makepkg".to_string(),
            git_bin: "git".to_string(),
            sudo_bin: "sudo".to_string(),
            makepkg_flags: Vec::new(),
        }
    }
}

impl Config {
    /// Default location of the configuration file
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("aurum").join("config.toml"))
    }

    /// Load configuration from `path`, or from the default location
    ///
    /// A missing file yields the defaults; an unreadable or malformed one is
    /// an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => match Self::default_path() {
                Some(p) => p,
                None => return Ok(Self::default()),
            },
        };

        if !path.exists() {
            debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path)?;
        let config = Self::parse(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Parse a configuration document
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(e.to_string()))
    }

    /// Check the values for internal consistency
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_preparations == 0 {
            return Err(Error::Config(
                "max_concurrent_preparations must be at least 1".to_string(),
            ));
        }

        for (key, value) in [
            ("pacman_bin", &self.pacman_bin),
            ("makepkg_bin", &self.makepkg_bin),
            ("git_bin", &self.git_bin),
        ] {
            if value.trim().is_empty() {
                return Err(Error::Config(format!("{} must not be empty", key)));
            }
        }

        if self.aur_url.trim_end_matches('/').is_empty() {
            return Err(Error::Config("aur_url must not be empty".to_string()));
        }

        Ok(())
    }

    /// Verify that every external tool can be found on PATH
    pub fn check_tools(&self) -> Result<()> {
        let mut tools = vec![&self.pacman_bin, &self.makepkg_bin, &self.git_bin];
        if !self.sudo_bin.is_empty() {
            tools.push(&self.sudo_bin);
        }

        for tool in tools {
            which::which(tool)
                .map_err(|_| Error::Config(format!("required tool '{}' not found in PATH", tool)))?;
        }
        Ok(())
    }

    /// Archive base URL without a trailing slash
    pub fn aur_base(&self) -> &str {
        self.aur_url.trim_end_matches('/')
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.partial_failure_policy, PartialFailurePolicy::Abort);
        assert!(!config.clean_build_dirs);
        assert!(!config.remove_make_deps);
    }

    #[test]
    fn test_default_lock_is_shared_between_users() {
        let config = Config::default();
        assert_eq!(config.lock_path, PathBuf::from(DEFAULT_LOCK_PATH));
        if let Some(cache) = dirs::cache_dir() {
            assert!(!config.lock_path.starts_with(cache));
        }
    }

    #[test]
    fn test_parse_partial_document() {
        let config = Config::parse(
            r#"
aur_url = "https://example.org/"
max_concurrent_preparations = 2
partial_failure_policy = "continue-independent"
remove_make_deps = true
"#,
        )
        .unwrap();

        assert_eq!(config.aur_base(), "https://example.org");
        assert_eq!(config.max_concurrent_preparations, 2);
        assert_eq!(
            config.partial_failure_policy,
            PartialFailurePolicy::ContinueIndependent
        );
        assert!(config.remove_make_deps);
        assert_eq!(config.pacman_bin, "pacman");
    }

    #[test]
    fn test_parse_rejects_unknown_policy() {
        let result = Config::parse(r#"partial_failure_policy = "maybe""#);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_zero_concurrency() {
        let config = Config {
            max_concurrent_preparations: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::load(Some(&temp_dir.path().join("absent.toml"))).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        fs::write(&path, "no_confirm = true\nsudo_bin = \"\"\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert!(config.no_confirm);
        assert!(config.sudo_bin.is_empty());
    }
}
