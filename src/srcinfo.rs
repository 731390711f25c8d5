// src/srcinfo.rs

//! .SRCINFO parser
//!
//! A .SRCINFO has one `pkgbase` section followed by one `pkgname` section
//! per package the recipe produces:
//!
//! ```text
//! pkgbase = python-foo
//! 	pkgver = 1.2
//! 	pkgrel = 1
//! 	arch = x86_64
//! 	depends = python
//! 	makedepends = python-build
//! 	depends_x86_64 = glibc
//!
//! pkgname = python-foo
//!
//! pkgname = python-foo-docs
//! 	arch = any
//! 	depends =
//! ```
//!
//! A package inherits every key from the base section unless it sets the
//! key itself, in which case its values replace the base values entirely
//! (an empty value clears the list). Architecture-specific keys such as
//! `depends_x86_64` follow the same rule and are appended for matching
//! architectures.

use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SrcinfoError {
    #[error("line {line}: expected 'key = value', found '{content}'")]
    Malformed { line: usize, content: String },

    #[error("line {line}: '{key}' appears before pkgbase")]
    MissingPkgbase { line: usize, key: String },

    #[error("missing required field '{0}'")]
    MissingField(String),

    #[error("recipe declares no packages")]
    NoPackages,

    #[error("package '{0}' is declared more than once")]
    DuplicatePackage(String),
}

/// Raw key/value lists of one section
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Section {
    fields: BTreeMap<String, Vec<String>>,
}

impl Section {
    fn push(&mut self, key: &str, value: &str) {
        let values = self.fields.entry(key.to_string()).or_default();
        if !value.is_empty() {
            values.push(value.to_string());
        }
    }

    fn first(&self, key: &str) -> Option<&str> {
        self.fields
            .get(key)
            .and_then(|v| v.first())
            .map(String::as_str)
    }
}

/// A parsed .SRCINFO document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Srcinfo {
    pub package_base: String,
    base: Section,
    packages: Vec<(String, Section)>,
}

/// Effective metadata of one package produced by a recipe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageMetadata {
    pub name: String,
    pub package_base: String,
    /// `[epoch:]pkgver-pkgrel`
    pub version: String,
    pub arch: Vec<String>,
    pub depends: Vec<String>,
    pub make_depends: Vec<String>,
    pub check_depends: Vec<String>,
    pub provides: Vec<String>,
    pub conflicts: Vec<String>,
}

impl PackageMetadata {
    /// Whether the package can be built for `arch`
    pub fn supports_arch(&self, arch: &str) -> bool {
        self.arch.iter().any(|a| a == "any" || a == arch)
    }

    /// Every dependency string needed to build and run the package
    pub fn all_dependencies(&self) -> impl Iterator<Item = &str> {
        self.depends
            .iter()
            .chain(&self.make_depends)
            .chain(&self.check_depends)
            .map(String::as_str)
    }
}

impl Srcinfo {
    pub fn parse(content: &str) -> Result<Self, SrcinfoError> {
        let mut package_base: Option<String> = None;
        let mut base = Section::default();
        let mut packages: Vec<(String, Section)> = Vec::new();

        for (idx, raw) in content.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let (key, value) = line.split_once('=').ok_or_else(|| SrcinfoError::Malformed {
                line: idx + 1,
                content: line.to_string(),
            })?;
            let key = key.trim();
            let value = value.trim();
            if key.is_empty() {
                return Err(SrcinfoError::Malformed {
                    line: idx + 1,
                    content: line.to_string(),
                });
            }

            match key {
                "pkgbase" => package_base = Some(value.to_string()),
                "pkgname" => {
                    if package_base.is_none() {
                        return Err(SrcinfoError::MissingPkgbase {
                            line: idx + 1,
                            key: key.to_string(),
                        });
                    }
                    if packages.iter().any(|(n, _)| n == value) {
                        return Err(SrcinfoError::DuplicatePackage(value.to_string()));
                    }
                    packages.push((value.to_string(), Section::default()));
                }
                _ => {
                    if package_base.is_none() {
                        return Err(SrcinfoError::MissingPkgbase {
                            line: idx + 1,
                            key: key.to_string(),
                        });
                    }
                    match packages.last_mut() {
                        Some((_, section)) => section.push(key, value),
                        None => base.push(key, value),
                    }
                }
            }
        }

        let package_base = package_base
            .filter(|b| !b.is_empty())
            .ok_or_else(|| SrcinfoError::MissingField("pkgbase".to_string()))?;
        for field in ["pkgver", "pkgrel"] {
            if base.first(field).is_none() {
                return Err(SrcinfoError::MissingField(field.to_string()));
            }
        }
        if packages.is_empty() {
            return Err(SrcinfoError::NoPackages);
        }

        Ok(Self {
            package_base,
            base,
            packages,
        })
    }

    /// Declared package names in order
    pub fn package_names(&self) -> impl Iterator<Item = &str> {
        self.packages.iter().map(|(n, _)| n.as_str())
    }

    /// `[epoch:]pkgver-pkgrel` of every package in the recipe
    pub fn version(&self) -> String {
        let pkgver = self.base.first("pkgver").unwrap_or_default();
        let pkgrel = self.base.first("pkgrel").unwrap_or_default();
        match self.base.first("epoch") {
            Some(epoch) if epoch != "0" => format!("{}:{}-{}", epoch, pkgver, pkgrel),
            _ => format!("{}-{}", pkgver, pkgrel),
        }
    }

    /// One metadata record per declared package, resolved for `arch`
    pub fn split_packages(&self, arch: &str) -> Vec<PackageMetadata> {
        let version = self.version();
        self.packages
            .iter()
            .map(|(name, section)| {
                let list = |key: &str| self.resolve_list(section, key, arch);
                PackageMetadata {
                    name: name.clone(),
                    package_base: self.package_base.clone(),
                    version: version.clone(),
                    arch: self.resolve(section, "arch").to_vec(),
                    depends: list("depends"),
                    make_depends: list("makedepends"),
                    check_depends: list("checkdepends"),
                    provides: list("provides"),
                    conflicts: list("conflicts"),
                }
            })
            .collect()
    }

    /// Package value when the package sets the key, base value otherwise
    fn resolve<'a>(&'a self, section: &'a Section, key: &str) -> &'a [String] {
        section
            .fields
            .get(key)
            .or_else(|| self.base.fields.get(key))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    fn resolve_list(&self, section: &Section, key: &str, arch: &str) -> Vec<String> {
        let mut values = self.resolve(section, key).to_vec();
        values.extend_from_slice(self.resolve(section, &format!("{}_{}", key, arch)));
        values
    }
}
