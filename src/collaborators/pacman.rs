// src/collaborators/pacman.rs

//! pacman-backed local database and package manager
//!
//! Queries use the read-only pacman operations (`-Q`, `-T`, `-Sl`, `-Sddp`)
//! and never need privileges. Mutations go through [`Pacman`], which prefixes
//! the configured privilege-escalation tool.

use super::command::{capture, describe, run_inherited, stdout_of};
use super::{InstallBatch, InstalledPackage, LocalDb, PackageManager, RepoPackage};
use crate::config::Config;
use crate::error::{Error, Result};
use std::collections::HashMap;
use std::process::Command;
use std::sync::Mutex;
use tracing::{debug, info};

/// Exit code pacman -T uses for unsatisfied dependencies
const PACMAN_T_UNSATISFIED: i32 = 127;

/// Read-only view of the pacman databases
pub struct PacmanDb {
    pacman_bin: String,
    resolved: Mutex<HashMap<String, Option<RepoPackage>>>,
}

impl PacmanDb {
    pub fn new(config: &Config) -> Self {
        Self {
            pacman_bin: config.pacman_bin.clone(),
            resolved: Mutex::new(HashMap::new()),
        }
    }

    fn pacman(&self) -> Command {
        let mut cmd = Command::new(&self.pacman_bin);
        cmd.env("LC_ALL", "C");
        cmd
    }
}

impl LocalDb for PacmanDb {
    fn resolve(&self, dependency: &str) -> Result<Option<RepoPackage>> {
        if let Ok(cache) = self.resolved.lock()
            && let Some(hit) = cache.get(dependency)
        {
            return Ok(hit.clone());
        }

        // -dd skips dependency checks so only the target itself is printed
        let mut cmd = self.pacman();
        cmd.args(["-Sddp", "--print-format", "%r %n %v", "--", dependency]);
        let output = capture(&mut cmd)?;

        let resolved = if output.status.success() {
            parse_print_format(&String::from_utf8_lossy(&output.stdout))
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("target not found") {
                None
            } else {
                return Err(Error::CommandFailed {
                    command: describe(&cmd),
                    message: stderr.trim().to_string(),
                });
            }
        };

        debug!("Resolved {} in sync databases: {:?}", dependency, resolved);
        if let Ok(mut cache) = self.resolved.lock() {
            cache.insert(dependency.to_string(), resolved.clone());
        }
        Ok(resolved)
    }

    fn installed(&self, name: &str) -> Result<Option<InstalledPackage>> {
        let mut cmd = self.pacman();
        cmd.args(["-Q", "--", name]);
        let output = capture(&mut cmd)?;
        if !output.status.success() {
            return Ok(None);
        }
        Ok(parse_name_version_lines(&String::from_utf8_lossy(&output.stdout))
            .into_iter()
            .find(|p| p.name == name))
    }

    fn is_satisfied(&self, dependency: &str) -> Result<bool> {
        let mut cmd = self.pacman();
        cmd.args(["-T", "--", dependency]);
        let output = capture(&mut cmd)?;
        match output.status.code() {
            Some(0) => Ok(true),
            Some(PACMAN_T_UNSATISFIED) => Ok(false),
            _ => Err(Error::CommandFailed {
                command: describe(&cmd),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }),
        }
    }

    fn foreign_packages(&self) -> Result<Vec<InstalledPackage>> {
        let mut cmd = self.pacman();
        cmd.arg("-Qm");
        let output = capture(&mut cmd)?;
        // pacman -Qm exits 1 when there are no foreign packages
        if !output.status.success() && !output.stderr.is_empty() {
            return Err(Error::CommandFailed {
                command: describe(&cmd),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(parse_name_version_lines(&String::from_utf8_lossy(
            &output.stdout,
        )))
    }

    fn sync_packages(&self) -> Result<Vec<(String, String)>> {
        let stdout = stdout_of(self.pacman().arg("-Sl"))?;
        Ok(stdout
            .lines()
            .filter_map(|line| {
                let mut parts = line.split_whitespace();
                Some((parts.next()?.to_string(), parts.next()?.to_string()))
            })
            .collect())
    }

    fn refresh_handle(&self) -> Result<()> {
        if let Ok(mut cache) = self.resolved.lock() {
            cache.clear();
        }
        debug!("Local database handle refreshed");
        Ok(())
    }
}

/// Parse one line of `--print-format "%r %n %v"` output
fn parse_print_format(stdout: &str) -> Option<RepoPackage> {
    let line = stdout.lines().map(str::trim).find(|l| !l.is_empty())?;
    let mut parts = line.split_whitespace();
    Some(RepoPackage {
        repo: parts.next()?.to_string(),
        name: parts.next()?.to_string(),
        version: parts.next()?.to_string(),
    })
}

/// Parse `name version` lines as printed by `pacman -Q`
fn parse_name_version_lines(stdout: &str) -> Vec<InstalledPackage> {
    stdout
        .lines()
        .filter_map(|line| {
            let (name, version) = line.trim().split_once(' ')?;
            Some(InstalledPackage {
                name: name.to_string(),
                version: version.trim().to_string(),
            })
        })
        .collect()
}

/// Package database mutations through pacman
pub struct Pacman {
    pacman_bin: String,
    sudo_bin: String,
    no_confirm: bool,
}

impl Pacman {
    pub fn new(config: &Config) -> Self {
        Self {
            pacman_bin: config.pacman_bin.clone(),
            sudo_bin: config.sudo_bin.clone(),
            no_confirm: config.no_confirm,
        }
    }

    fn privileged(&self) -> Command {
        if self.sudo_bin.is_empty() {
            Command::new(&self.pacman_bin)
        } else {
            let mut cmd = Command::new(&self.sudo_bin);
            cmd.arg(&self.pacman_bin);
            cmd
        }
    }

    fn with_confirm(&self, cmd: &mut Command) {
        if self.no_confirm {
            cmd.arg("--noconfirm");
        }
    }
}

impl PackageManager for Pacman {
    fn refresh_databases(&self) -> Result<()> {
        let mut cmd = self.privileged();
        cmd.arg("-Sy");
        run_inherited(&mut cmd)
    }

    fn install_batch(&self, batch: &InstallBatch) -> Result<()> {
        // pacman cannot mix sync targets and files in one transaction, so this
        // is at most two transactions plus the reason bookkeeping
        if !batch.repo.is_empty() {
            info!("Installing {} repository package(s)", batch.repo.len());
            let mut cmd = self.privileged();
            cmd.args(["-S", "--needed"]);
            self.with_confirm(&mut cmd);
            cmd.arg("--").args(&batch.repo);
            run_inherited(&mut cmd)?;
        }

        if !batch.artifacts.is_empty() {
            info!("Installing {} built package(s)", batch.artifacts.len());
            let mut cmd = self.privileged();
            cmd.arg("-U");
            self.with_confirm(&mut cmd);
            cmd.arg("--").args(&batch.artifacts);
            run_inherited(&mut cmd)?;
        }

        if !batch.as_deps.is_empty() {
            let mut cmd = self.privileged();
            cmd.args(["-D", "--asdeps", "--"]).args(&batch.as_deps);
            run_inherited(&mut cmd)?;
        }

        if !batch.as_explicit.is_empty() {
            let mut cmd = self.privileged();
            cmd.args(["-D", "--asexplicit", "--"]).args(&batch.as_explicit);
            run_inherited(&mut cmd)?;
        }

        Ok(())
    }

    fn remove(&self, names: &[String]) -> Result<()> {
        if names.is_empty() {
            return Ok(());
        }
        let mut cmd = self.privileged();
        cmd.arg("-Rns");
        self.with_confirm(&mut cmd);
        cmd.arg("--").args(names);
        run_inherited(&mut cmd)
    }
}
