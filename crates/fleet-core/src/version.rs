//! Semantic versions and the minor-granularity range syntax used by the
//! compatibility matrix.
//!
//! Three range forms are supported:
//!
//! ```text
//! 1.0.x            fixed major.minor, any patch
//! 1.0.x - 1.2.x    closed range over major.minor, inclusive on both ends
//! 1.3.x+           open lower bound, 1.3 and everything after it
//! ```

use std::fmt;
use std::str::FromStr;

use semver::Version;

use crate::error::CoreError;

/// Parse a version string, tolerating a leading `v`.
pub fn parse_version(s: &str) -> Result<Version, CoreError> {
    let trimmed = s.trim();
    let raw = trimmed.strip_prefix('v').unwrap_or(trimmed);
    Version::parse(raw).map_err(|e| CoreError::InvalidVersion(format!("{s}: {e}")))
}

/// Whether a string is a valid semantic version.
pub fn is_semver(s: &str) -> bool {
    parse_version(s).is_ok()
}

/// Compare two version strings by semver precedence. Unparseable strings
/// sort before every valid version and compare lexically among themselves.
pub fn compare_versions(a: &str, b: &str) -> std::cmp::Ordering {
    match (parse_version(a), parse_version(b)) {
        (Ok(va), Ok(vb)) => va.cmp(&vb),
        (Ok(_), Err(_)) => std::cmp::Ordering::Greater,
        (Err(_), Ok(_)) => std::cmp::Ordering::Less,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

/// A `major.minor` pair, the granularity ranges operate on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct MinorVersion {
    pub major: u64,
    pub minor: u64,
}

impl MinorVersion {
    fn of(v: &Version) -> Self {
        Self {
            major: v.major,
            minor: v.minor,
        }
    }
}

impl FromStr for MinorVersion {
    type Err = CoreError;

    /// Parses `1.0.x`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CoreError::InvalidRange(s.to_string());
        let mut parts = s.trim().split('.');
        let major = parts.next().ok_or_else(invalid)?.parse().map_err(|_| invalid())?;
        let minor = parts.next().ok_or_else(invalid)?.parse().map_err(|_| invalid())?;
        match (parts.next(), parts.next()) {
            (Some("x"), None) => Ok(Self { major, minor }),
            _ => Err(invalid()),
        }
    }
}

impl fmt::Display for MinorVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.x", self.major, self.minor)
    }
}

/// A range of versions at minor granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionRange {
    /// `1.0.x`
    Minor(MinorVersion),
    /// `1.0.x - 1.2.x`
    Between(MinorVersion, MinorVersion),
    /// `1.3.x+`
    AtLeast(MinorVersion),
}

impl VersionRange {
    pub fn matches(&self, version: &Version) -> bool {
        let v = MinorVersion::of(version);
        match self {
            VersionRange::Minor(m) => v == *m,
            VersionRange::Between(lo, hi) => *lo <= v && v <= *hi,
            VersionRange::AtLeast(lo) => v >= *lo,
        }
    }

    /// Convenience for callers holding an unparsed version string.
    pub fn matches_str(&self, version: &str) -> bool {
        parse_version(version).is_ok_and(|v| self.matches(&v))
    }
}

impl FromStr for VersionRange {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some((lo, hi)) = s.split_once(" - ") {
            let lo: MinorVersion = lo.parse()?;
            let hi: MinorVersion = hi.parse()?;
            if lo > hi {
                return Err(CoreError::InvalidRange(s.to_string()));
            }
            return Ok(VersionRange::Between(lo, hi));
        }
        if let Some(lo) = s.strip_suffix('+') {
            return Ok(VersionRange::AtLeast(lo.parse()?));
        }
        Ok(VersionRange::Minor(s.parse()?))
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionRange::Minor(m) => write!(f, "{m}"),
            VersionRange::Between(lo, hi) => write!(f, "{lo} - {hi}"),
            VersionRange::AtLeast(lo) => write!(f, "{lo}+"),
        }
    }
}
