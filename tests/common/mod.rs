// tests/common/mod.rs

//! Shared in-memory collaborators for integration tests.
//!
//! The fakes share state the way the real tools do: the package manager
//! records what it installs in the fake local database, the archive writes
//! a `.SRCINFO` into every directory it fetches, and the build tool turns
//! that `.SRCINFO` into package files.

#![allow(dead_code)]

use aurum::collaborators::{
    BuildTool, FetchOutcome, InstallBatch, InstalledPackage, LocalDb, PackageManager, RepoPackage,
    SourceArchive, SourcePackage,
};
use aurum::metadata::parse_srcinfo;
use aurum::version::Dependency;
use aurum::{CancelToken, Config, Error, GraphBuilder, Result, SyncContext};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

pub const TEST_ARCH: &str = "x86_64";

/// Archive package built from a recipe of the same name
pub fn source(name: &str, version: &str, depends: &[&str], make_depends: &[&str]) -> SourcePackage {
    split(name, name, version, depends, make_depends)
}

/// Archive package built from the recipe `base`
pub fn split(
    name: &str,
    base: &str,
    version: &str,
    depends: &[&str],
    make_depends: &[&str],
) -> SourcePackage {
    SourcePackage {
        name: name.to_string(),
        package_base: base.to_string(),
        version: version.to_string(),
        depends: depends.iter().map(|d| d.to_string()).collect(),
        make_depends: make_depends.iter().map(|d| d.to_string()).collect(),
        check_depends: Vec::new(),
        provides: Vec::new(),
    }
}

pub fn targets(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| n.to_string()).collect()
}

/// Binary repositories and installed state
#[derive(Default)]
pub struct FakeLocalDb {
    repo: BTreeMap<String, RepoPackage>,
    /// Provided name -> repository package name
    provides: BTreeMap<String, String>,
    installed: Mutex<BTreeMap<String, String>>,
    pub refreshes: Mutex<usize>,
}

impl FakeLocalDb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_repo(mut self, repo: &str, name: &str, version: &str) -> Self {
        self.repo.insert(
            name.to_string(),
            RepoPackage {
                name: name.to_string(),
                version: version.to_string(),
                repo: repo.to_string(),
            },
        );
        self
    }

    pub fn with_provides(mut self, provided: &str, name: &str) -> Self {
        self.provides.insert(provided.to_string(), name.to_string());
        self
    }

    pub fn with_installed(self, name: &str, version: &str) -> Self {
        self.mark_installed(name, version);
        self
    }

    pub fn mark_installed(&self, name: &str, version: &str) {
        self.installed
            .lock()
            .unwrap()
            .insert(name.to_string(), version.to_string());
    }

    pub fn unmark_installed(&self, name: &str) {
        self.installed.lock().unwrap().remove(name);
    }

    pub fn installed_version(&self, name: &str) -> Option<String> {
        self.installed.lock().unwrap().get(name).cloned()
    }

    pub fn repo_version(&self, name: &str) -> Option<String> {
        self.repo.get(name).map(|p| p.version.clone())
    }
}

impl LocalDb for FakeLocalDb {
    fn resolve(&self, dependency: &str) -> Result<Option<RepoPackage>> {
        let dep = Dependency::parse(dependency);
        let name = self.provides.get(&dep.name).unwrap_or(&dep.name);
        Ok(self.repo.get(name).cloned())
    }

    fn installed(&self, name: &str) -> Result<Option<InstalledPackage>> {
        Ok(self.installed_version(name).map(|version| InstalledPackage {
            name: name.to_string(),
            version,
        }))
    }

    fn is_satisfied(&self, dependency: &str) -> Result<bool> {
        let dep = Dependency::parse(dependency);
        Ok(self
            .installed_version(&dep.name)
            .is_some_and(|v| dep.satisfied_by(&v)))
    }

    fn foreign_packages(&self) -> Result<Vec<InstalledPackage>> {
        Ok(self
            .installed
            .lock()
            .unwrap()
            .iter()
            .filter(|(name, _)| !self.repo.contains_key(*name))
            .map(|(name, version)| InstalledPackage {
                name: name.clone(),
                version: version.clone(),
            })
            .collect())
    }

    fn sync_packages(&self) -> Result<Vec<(String, String)>> {
        Ok(self
            .repo
            .values()
            .map(|p| (p.repo.clone(), p.name.clone()))
            .collect())
    }

    fn refresh_handle(&self) -> Result<()> {
        *self.refreshes.lock().unwrap() += 1;
        Ok(())
    }
}

/// Source archive that writes recipes straight into the destination directory
#[derive(Default)]
pub struct FakeArchive {
    packages: BTreeMap<String, SourcePackage>,
    fail_fetch: BTreeSet<String>,
    pub fetches: Mutex<Vec<String>>,
}

impl FakeArchive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_package(mut self, pkg: SourcePackage) -> Self {
        self.packages.insert(pkg.name.clone(), pkg);
        self
    }

    pub fn failing_fetch(mut self, package_base: &str) -> Self {
        self.fail_fetch.insert(package_base.to_string());
        self
    }

    pub fn fetch_count(&self, package_base: &str) -> usize {
        self.fetches
            .lock()
            .unwrap()
            .iter()
            .filter(|b| *b == package_base)
            .count()
    }

    /// .SRCINFO for every package sharing `package_base`
    pub fn srcinfo_for(&self, package_base: &str) -> String {
        let members: Vec<&SourcePackage> = self
            .packages
            .values()
            .filter(|p| p.package_base == package_base)
            .collect();
        let version = members.first().map(|p| p.version.as_str()).unwrap_or("1-1");
        let (pkgver, pkgrel) = version.rsplit_once('-').unwrap_or((version, "1"));

        let mut out = format!(
            "pkgbase = {}\n\tpkgver = {}\n\tpkgrel = {}\n\tarch = any\n",
            package_base, pkgver, pkgrel
        );
        for pkg in members {
            out.push_str(&format!("\npkgname = {}\n", pkg.name));
            for dep in &pkg.depends {
                out.push_str(&format!("\tdepends = {}\n", dep));
            }
            for dep in &pkg.make_depends {
                out.push_str(&format!("\tmakedepends = {}\n", dep));
            }
            for dep in &pkg.check_depends {
                out.push_str(&format!("\tcheckdepends = {}\n", dep));
            }
        }
        out
    }
}

impl SourceArchive for FakeArchive {
    fn resolve(&self, name: &str) -> Result<Option<SourcePackage>> {
        Ok(self.packages.get(name).cloned())
    }

    fn fetch_or_update(&self, package_base: &str, dest: &Path) -> Result<FetchOutcome> {
        self.fetches.lock().unwrap().push(package_base.to_string());
        if self.fail_fetch.contains(package_base) {
            return Err(Error::CommandFailed {
                command: format!("git clone {}", package_base),
                message: "exit status: 128".to_string(),
            });
        }

        let outcome = if dest.exists() {
            FetchOutcome::Updated
        } else {
            fs::create_dir_all(dest)?;
            FetchOutcome::Cloned
        };
        fs::write(dest.join(".SRCINFO"), self.srcinfo_for(package_base))?;
        Ok(outcome)
    }

    fn package_names(&self) -> Result<Vec<String>> {
        Ok(self.packages.keys().cloned().collect())
    }
}

/// Build tool that writes one package file per declared package
#[derive(Default)]
pub struct FakeBuildTool {
    fail: BTreeSet<String>,
    pub builds: Mutex<Vec<String>>,
}

impl FakeBuildTool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(mut self, package_base: &str) -> Self {
        self.fail.insert(package_base.to_string());
        self
    }

    pub fn build_count(&self, package_base: &str) -> usize {
        self.builds
            .lock()
            .unwrap()
            .iter()
            .filter(|b| *b == package_base)
            .count()
    }

    fn planned(&self, dir: &Path) -> Result<Vec<(String, String, PathBuf)>> {
        let path = dir.join(".SRCINFO");
        let content = fs::read_to_string(&path)?;
        let srcinfo = parse_srcinfo(&path, &content)?;
        Ok(srcinfo
            .split_packages(TEST_ARCH)
            .into_iter()
            .map(|p| {
                let file = dir.join(format!("{}-{}-{}.pkg.tar.zst", p.name, p.version, TEST_ARCH));
                (p.name, p.version, file)
            })
            .collect())
    }
}

fn base_of(dir: &Path) -> String {
    dir.file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_default()
}

impl BuildTool for FakeBuildTool {
    fn build(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let base = base_of(dir);
        self.builds.lock().unwrap().push(base.clone());
        if self.fail.contains(&base) {
            return Err(Error::CommandFailed {
                command: "makepkg".to_string(),
                message: "A failure occurred in build()".to_string(),
            });
        }

        let mut files = Vec::new();
        for (name, version, file) in self.planned(dir)? {
            fs::write(&file, format!("{}\n{}\n", name, version))?;
            files.push(file);
        }
        Ok(files)
    }

    fn package_list(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        Ok(self.planned(dir)?.into_iter().map(|(_, _, f)| f).collect())
    }

    fn print_srcinfo(&self, dir: &Path) -> Result<String> {
        Ok(fs::read_to_string(dir.join(".SRCINFO"))?)
    }
}

/// Package manager that records batches and installs into [`FakeLocalDb`]
pub struct FakePackageManager {
    db: Arc<FakeLocalDb>,
    /// Index of the `install_batch` call that fails
    fail_on_call: Option<usize>,
    fail_remove: bool,
    pub batches: Mutex<Vec<InstallBatch>>,
    pub removals: Mutex<Vec<Vec<String>>>,
    pub refreshes: Mutex<usize>,
}

impl FakePackageManager {
    pub fn new(db: Arc<FakeLocalDb>) -> Self {
        Self {
            db,
            fail_on_call: None,
            fail_remove: false,
            batches: Mutex::new(Vec::new()),
            removals: Mutex::new(Vec::new()),
            refreshes: Mutex::new(0),
        }
    }

    pub fn failing_on_call(mut self, index: usize) -> Self {
        self.fail_on_call = Some(index);
        self
    }

    pub fn failing_remove(mut self) -> Self {
        self.fail_remove = true;
        self
    }

    pub fn batches(&self) -> Vec<InstallBatch> {
        self.batches.lock().unwrap().clone()
    }

    pub fn removals(&self) -> Vec<Vec<String>> {
        self.removals.lock().unwrap().clone()
    }
}

impl PackageManager for FakePackageManager {
    fn refresh_databases(&self) -> Result<()> {
        *self.refreshes.lock().unwrap() += 1;
        Ok(())
    }

    fn install_batch(&self, batch: &InstallBatch) -> Result<()> {
        let index = {
            let mut batches = self.batches.lock().unwrap();
            batches.push(batch.clone());
            batches.len() - 1
        };
        if self.fail_on_call == Some(index) {
            return Err(Error::CommandFailed {
                command: "pacman -U".to_string(),
                message: "failed to commit transaction (conflicting files)".to_string(),
            });
        }

        for name in &batch.repo {
            let version = self.db.repo_version(name).unwrap_or_else(|| "1-1".to_string());
            self.db.mark_installed(name, &version);
        }
        for file in &batch.artifacts {
            let content = fs::read_to_string(file)?;
            let mut lines = content.lines();
            if let (Some(name), Some(version)) = (lines.next(), lines.next()) {
                self.db.mark_installed(name, version);
            }
        }
        Ok(())
    }

    fn remove(&self, names: &[String]) -> Result<()> {
        self.removals.lock().unwrap().push(names.to_vec());
        if self.fail_remove {
            return Err(Error::CommandFailed {
                command: "pacman -Rns".to_string(),
                message: "target not found".to_string(),
            });
        }
        for name in names {
            self.db.unmark_installed(name);
        }
        Ok(())
    }
}

/// Configuration rooted in a temporary directory
pub fn test_config(root: &Path) -> Config {
    Config {
        build_dir: root.join("build"),
        completion_path: root.join("completion.cache"),
        lock_path: root.join("install.lock"),
        completion_wait_ms: 5000,
        max_concurrent_preparations: 2,
        sudo_bin: String::new(),
        ..Config::default()
    }
}

/// A full set of fakes plus a scratch directory
pub struct Harness {
    pub dir: TempDir,
    pub config: Config,
    pub local_db: Arc<FakeLocalDb>,
    pub archive: Arc<FakeArchive>,
    pub build_tool: Arc<FakeBuildTool>,
    pub package_manager: Arc<FakePackageManager>,
}

impl Harness {
    pub fn new(local_db: FakeLocalDb, archive: FakeArchive, build_tool: FakeBuildTool) -> Self {
        Self::with_package_manager(local_db, archive, build_tool, FakePackageManager::new)
    }

    pub fn with_package_manager<F>(
        local_db: FakeLocalDb,
        archive: FakeArchive,
        build_tool: FakeBuildTool,
        package_manager: F,
    ) -> Self
    where
        F: FnOnce(Arc<FakeLocalDb>) -> FakePackageManager,
    {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let local_db = Arc::new(local_db);
        let package_manager = Arc::new(package_manager(local_db.clone()));

        Self {
            dir,
            config,
            local_db,
            archive: Arc::new(archive),
            build_tool: Arc::new(build_tool),
            package_manager,
        }
    }

    pub fn builder(&self) -> GraphBuilder {
        GraphBuilder::new(self.local_db.clone(), self.archive.clone())
    }

    pub fn context(&self) -> SyncContext {
        SyncContext {
            config: Arc::new(self.config.clone()),
            local_db: self.local_db.clone(),
            archive: self.archive.clone(),
            build_tool: self.build_tool.clone(),
            package_manager: self.package_manager.clone(),
            cancel: CancelToken::new(),
        }
    }
}

/// The foo/bar/baz fixture: foo (archive) needs bar (repo) and baz (archive)
pub fn foo_bar_baz() -> (FakeLocalDb, FakeArchive) {
    let local_db = FakeLocalDb::new().with_repo("extra", "bar", "2.0-1");
    let archive = FakeArchive::new()
        .with_package(source("foo", "1.0-1", &["bar", "baz"], &[]))
        .with_package(source("baz", "0.3-1", &[], &[]));
    (local_db, archive)
}
