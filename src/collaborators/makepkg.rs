// src/collaborators/makepkg.rs

//! makepkg-backed build tool

use super::command::{run_inherited, stdout_of};
use super::BuildTool;
use crate::config::Config;
use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::info;

pub struct Makepkg {
    makepkg_bin: String,
    flags: Vec<String>,
    no_confirm: bool,
}

impl Makepkg {
    pub fn new(config: &Config) -> Self {
        Self {
            makepkg_bin: config.makepkg_bin.clone(),
            flags: config.makepkg_flags.clone(),
            no_confirm: config.no_confirm,
        }
    }

    fn makepkg(&self, dir: &Path) -> Command {
        let mut cmd = Command::new(&self.makepkg_bin);
        cmd.current_dir(dir);
        // Keep artifacts next to the recipe so package_list paths line up
        cmd.env("PKGDEST", dir);
        cmd
    }
}

impl BuildTool for Makepkg {
    fn build(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        info!("Building in {}", dir.display());
        let mut cmd = self.makepkg(dir);
        cmd.arg("-f");
        if self.no_confirm {
            cmd.arg("--noconfirm");
        }
        cmd.args(&self.flags);
        run_inherited(&mut cmd)?;

        let artifacts: Vec<PathBuf> = self
            .package_list(dir)?
            .into_iter()
            .filter(|p| p.exists())
            .collect();
        if artifacts.is_empty() {
            return Err(Error::BuildFailed {
                package: dir.display().to_string(),
                message: "build produced no package files".to_string(),
            });
        }
        Ok(artifacts)
    }

    fn package_list(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let stdout = stdout_of(self.makepkg(dir).arg("--packagelist"))?;
        Ok(parse_package_list(&stdout))
    }

    fn print_srcinfo(&self, dir: &Path) -> Result<String> {
        stdout_of(self.makepkg(dir).arg("--printsrcinfo"))
    }
}

fn parse_package_list(stdout: &str) -> Vec<PathBuf> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(PathBuf::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_package_list() {
        let list = parse_package_list(
            "/build/yay/yay-12.3.5-1-x86_64.pkg.tar.zst\n/build/yay/yay-debug-12.3.5-1-x86_64.pkg.tar.zst\n",
        );
        assert_eq!(list.len(), 2);
        assert_eq!(
            list[0],
            PathBuf::from("/build/yay/yay-12.3.5-1-x86_64.pkg.tar.zst")
        );
    }
}
