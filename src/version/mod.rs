// src/version/mod.rs

//! Version handling and dependency constraints
//!
//! Versions follow the alpm `[epoch:]pkgver[-pkgrel]` layout and are compared
//! segment by segment the way `vercmp` does: runs of digits compare
//! numerically, runs of letters lexically, and a numeric segment is always
//! newer than an alphabetic one.

use crate::error::{Error, Result};
use std::cmp::Ordering;
use std::fmt;

/// A parsed package version with epoch, pkgver and pkgrel components
#[derive(Debug, Clone, Eq)]
pub struct PkgVersion {
    pub epoch: u64,
    pub pkgver: String,
    pub pkgrel: Option<String>,
}

impl PkgVersion {
    /// Parse a version string
    ///
    /// Format: [epoch:]pkgver[-pkgrel]
    /// - "1.2.3" → epoch=0, pkgver="1.2.3", pkgrel=None
    /// - "2:1.2.3-4" → epoch=2, pkgver="1.2.3", pkgrel=Some("4")
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        let (epoch_str, rest) = match s.split_once(':') {
            Some((e, r)) => (e, r),
            None => ("0", s),
        };

        let epoch = if epoch_str.is_empty() {
            0
        } else {
            epoch_str.parse::<u64>().map_err(|e| {
                Error::Config(format!("Invalid epoch in version '{}': {}", s, e))
            })?
        };

        // pkgver may itself not contain '-', so the last dash splits off pkgrel
        let (pkgver, pkgrel) = match rest.rsplit_once('-') {
            Some((v, r)) => (v.to_string(), Some(r.to_string())),
            None => (rest.to_string(), None),
        };

        if pkgver.is_empty() {
            return Err(Error::Config(format!("Empty version component in '{}'", s)));
        }

        Ok(Self {
            epoch,
            pkgver,
            pkgrel,
        })
    }

    /// Compare two versions
    ///
    /// A missing pkgrel on either side is treated as a wildcard, so
    /// `1.0` equals `1.0-3` (this is how dependency constraints match).
    pub fn compare(&self, other: &PkgVersion) -> Ordering {
        match self.epoch.cmp(&other.epoch) {
            Ordering::Equal => {}
            ord => return ord,
        }

        match segment_cmp(&self.pkgver, &other.pkgver) {
            Ordering::Equal => {}
            ord => return ord,
        }

        match (&self.pkgrel, &other.pkgrel) {
            (Some(a), Some(b)) => segment_cmp(a, b),
            _ => Ordering::Equal,
        }
    }
}

impl PartialEq for PkgVersion {
    fn eq(&self, other: &Self) -> bool {
        self.compare(other) == Ordering::Equal
    }
}

impl fmt::Display for PkgVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.epoch > 0 {
            write!(f, "{}:", self.epoch)?;
        }
        write!(f, "{}", self.pkgver)?;
        if let Some(ref pkgrel) = self.pkgrel {
            write!(f, "-{}", pkgrel)?;
        }
        Ok(())
    }
}

impl Ord for PkgVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare(other)
    }
}

impl PartialOrd for PkgVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Compare two full version strings, falling back to string order when
/// either side fails to parse
pub fn vercmp(a: &str, b: &str) -> Ordering {
    match (PkgVersion::parse(a), PkgVersion::parse(b)) {
        (Ok(va), Ok(vb)) => va.compare(&vb),
        _ => a.cmp(b),
    }
}

/// Segment-wise comparison of a single version component
fn segment_cmp(a: &str, b: &str) -> Ordering {
    if a == b {
        return Ordering::Equal;
    }

    let mut one = a.as_bytes();
    let mut two = b.as_bytes();

    loop {
        // Skip separators
        let skip_one = one.iter().take_while(|c| !c.is_ascii_alphanumeric()).count();
        let skip_two = two.iter().take_while(|c| !c.is_ascii_alphanumeric()).count();
        one = &one[skip_one..];
        two = &two[skip_two..];

        if one.is_empty() || two.is_empty() {
            break;
        }

        // Differing separator lengths: the longer one is newer
        if skip_one != skip_two {
            return skip_one.cmp(&skip_two);
        }

        let numeric = one[0].is_ascii_digit();
        let take = |s: &[u8]| {
            s.iter()
                .take_while(|c| {
                    if numeric {
                        c.is_ascii_digit()
                    } else {
                        c.is_ascii_alphabetic()
                    }
                })
                .count()
        };
        let len_one = take(one);
        let len_two = take(two);

        // Numeric segment against alpha segment: numeric is newer
        if len_two == 0 {
            return if numeric {
                Ordering::Greater
            } else {
                Ordering::Less
            };
        }

        let seg_one = &one[..len_one];
        let seg_two = &two[..len_two];

        let ord = if numeric {
            let trim = |s: &[u8]| -> usize { s.iter().take_while(|c| **c == b'0').count() };
            let seg_one = &seg_one[trim(seg_one)..];
            let seg_two = &seg_two[trim(seg_two)..];
            seg_one.len().cmp(&seg_two.len()).then(seg_one.cmp(seg_two))
        } else {
            seg_one.cmp(seg_two)
        };

        if ord != Ordering::Equal {
            return ord;
        }

        one = &one[len_one..];
        two = &two[len_two..];
    }

    match (one.is_empty(), two.is_empty()) {
        (true, true) => Ordering::Equal,
        // "1.0" vs "1.0a": an alpha suffix is older, anything else is newer
        (true, false) => {
            if two[0].is_ascii_alphabetic() {
                Ordering::Greater
            } else {
                Ordering::Less
            }
        }
        (false, true) => {
            if one[0].is_ascii_alphabetic() {
                Ordering::Less
            } else {
                Ordering::Greater
            }
        }
        (false, false) => Ordering::Equal,
    }
}

/// Version constraint operators
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionConstraint {
    /// Any version is acceptable
    Any,
    Exact(PkgVersion),
    GreaterThan(PkgVersion),
    GreaterOrEqual(PkgVersion),
    LessThan(PkgVersion),
    LessOrEqual(PkgVersion),
}

impl VersionConstraint {
    /// Parse a constraint such as ">=1.2", "<2.0" or "=1.5-1"
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();

        if s.is_empty() {
            return Ok(VersionConstraint::Any);
        }

        if let Some(rest) = s.strip_prefix(">=") {
            Ok(VersionConstraint::GreaterOrEqual(PkgVersion::parse(rest)?))
        } else if let Some(rest) = s.strip_prefix("<=") {
            Ok(VersionConstraint::LessOrEqual(PkgVersion::parse(rest)?))
        } else if let Some(rest) = s.strip_prefix('>') {
            Ok(VersionConstraint::GreaterThan(PkgVersion::parse(rest)?))
        } else if let Some(rest) = s.strip_prefix('<') {
            Ok(VersionConstraint::LessThan(PkgVersion::parse(rest)?))
        } else if let Some(rest) = s.strip_prefix('=') {
            Ok(VersionConstraint::Exact(PkgVersion::parse(rest)?))
        } else {
            Ok(VersionConstraint::Exact(PkgVersion::parse(s)?))
        }
    }

    /// Check if a version satisfies this constraint
    pub fn satisfies(&self, version: &PkgVersion) -> bool {
        match self {
            VersionConstraint::Any => true,
            VersionConstraint::Exact(v) => version == v,
            VersionConstraint::GreaterThan(v) => version > v,
            VersionConstraint::GreaterOrEqual(v) => version >= v,
            VersionConstraint::LessThan(v) => version < v,
            VersionConstraint::LessOrEqual(v) => version <= v,
        }
    }
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionConstraint::Any => Ok(()),
            VersionConstraint::Exact(v) => write!(f, "={}", v),
            VersionConstraint::GreaterThan(v) => write!(f, ">{}", v),
            VersionConstraint::GreaterOrEqual(v) => write!(f, ">={}", v),
            VersionConstraint::LessThan(v) => write!(f, "<{}", v),
            VersionConstraint::LessOrEqual(v) => write!(f, "<={}", v),
        }
    }
}

/// A dependency string such as `glibc>=2.34` split into name and constraint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    pub name: String,
    pub constraint: VersionConstraint,
}

impl Dependency {
    /// Parse a dependency string; a malformed version part is treated as
    /// unconstrained rather than rejected
    pub fn parse(dep: &str) -> Self {
        let dep = dep.trim();
        // Optional-dependency descriptions ("pkg: why") never reach here, but
        // tolerate them anyway
        let dep = dep.split_once(": ").map_or(dep, |(name, _)| name);

        match dep.find(['>', '<', '=']) {
            Some(pos) => {
                let (name, version) = dep.split_at(pos);
                Self {
                    name: name.trim().to_string(),
                    constraint: VersionConstraint::parse(version)
                        .unwrap_or(VersionConstraint::Any),
                }
            }
            None => Self {
                name: dep.to_string(),
                constraint: VersionConstraint::Any,
            },
        }
    }

    /// Whether the given version string satisfies this dependency
    pub fn satisfied_by(&self, version: &str) -> bool {
        match PkgVersion::parse(version) {
            Ok(v) => self.constraint.satisfies(&v),
            Err(_) => self.constraint == VersionConstraint::Any,
        }
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.name, self.constraint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple() {
        let v = PkgVersion::parse("1.2.3").unwrap();
        assert_eq!(v.epoch, 0);
        assert_eq!(v.pkgver, "1.2.3");
        assert_eq!(v.pkgrel, None);
    }

    #[test]
    fn test_parse_full() {
        let v = PkgVersion::parse("1:2.3.4-5").unwrap();
        assert_eq!(v.epoch, 1);
        assert_eq!(v.pkgver, "2.3.4");
        assert_eq!(v.pkgrel, Some("5".to_string()));
        assert_eq!(v.to_string(), "1:2.3.4-5");
    }

    #[test]
    fn test_parse_rejects_bad_epoch() {
        assert!(PkgVersion::parse("x:1.0").is_err());
        assert!(PkgVersion::parse("1:").is_err());
    }

    #[test]
    fn test_epoch_wins() {
        assert_eq!(vercmp("1:1.0", "2.0"), Ordering::Greater);
    }

    #[test]
    fn test_vercmp_ordering() {
        assert_eq!(vercmp("1.0", "1.0"), Ordering::Equal);
        assert_eq!(vercmp("1.0", "1.1"), Ordering::Less);
        assert_eq!(vercmp("1.10", "1.9"), Ordering::Greater);
        assert_eq!(vercmp("1.0-1", "1.0-2"), Ordering::Less);
        assert_eq!(vercmp("1.0a", "1.0"), Ordering::Less);
        assert_eq!(vercmp("1.0.1", "1.0"), Ordering::Greater);
        assert_eq!(vercmp("1.0", "1.0b"), Ordering::Greater);
        assert_eq!(vercmp("1.001", "1.1"), Ordering::Equal);
        assert_eq!(vercmp("r120.abc", "r99.def"), Ordering::Greater);
    }

    #[test]
    fn test_missing_pkgrel_matches_any() {
        let a = PkgVersion::parse("1.0").unwrap();
        let b = PkgVersion::parse("1.0-3").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_constraint_parse_and_satisfy() {
        let c = VersionConstraint::parse(">=1.2").unwrap();
        assert!(c.satisfies(&PkgVersion::parse("1.2-1").unwrap()));
        assert!(c.satisfies(&PkgVersion::parse("1.3").unwrap()));
        assert!(!c.satisfies(&PkgVersion::parse("1.1").unwrap()));

        let c = VersionConstraint::parse("<2").unwrap();
        assert!(c.satisfies(&PkgVersion::parse("1.9").unwrap()));
        assert!(!c.satisfies(&PkgVersion::parse("2.0").unwrap()));
    }

    #[test]
    fn test_dependency_parse() {
        let dep = Dependency::parse("glibc>=2.34");
        assert_eq!(dep.name, "glibc");
        assert!(dep.satisfied_by("2.35-1"));
        assert!(!dep.satisfied_by("2.33-1"));
        assert_eq!(dep.to_string(), "glibc>=2.34");

        let dep = Dependency::parse("bash");
        assert_eq!(dep.name, "bash");
        assert_eq!(dep.constraint, VersionConstraint::Any);
        assert!(dep.satisfied_by("anything"));
    }
}
