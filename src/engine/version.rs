//! Semantic version stamps carried by panel documents.
//!
//! Only `MAJOR.MINOR.PATCH` takes part in ordering; pre-release and build
//! suffixes (`4.0.0-beta.1`, `3.1.0+abc`) are ignored.

use std::cmp::Ordering;
use std::fmt;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

/// Schema version written by the next save of a migrated document.
pub const CURRENT: Version = Version::new(4, 4, 0);

impl Version {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Version {
            major,
            minor,
            patch,
        }
    }

    /// Parse `"1.2.3"`, `"1.2"` or `"1"`, with an optional leading `v`.
    pub fn parse(s: &str) -> Option<Version> {
        let s = s.trim();
        let s = s.strip_prefix('v').unwrap_or(s);
        let core = s.split(['-', '+']).next().unwrap_or("");
        let mut parts = core.split('.');
        let major = parts.next()?.parse().ok()?;
        let minor = match parts.next() {
            Some(p) => p.parse().ok()?,
            None => 0,
        };
        let patch = match parts.next() {
            Some(p) => p.parse().ok()?,
            None => 0,
        };
        if parts.next().is_some() {
            return None;
        }
        Some(Version::new(major, minor, patch))
    }

    /// Absent or unparseable stamps count as the oldest version.
    pub fn from_stamp(stamp: Option<&str>) -> Version {
        stamp.and_then(Version::parse).unwrap_or(Version::new(0, 0, 0))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.major
            .cmp(&other.major)
            .then(self.minor.cmp(&other.minor))
            .then(self.patch.cmp(&other.patch))
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_partial_and_suffixed_versions() {
        assert_eq!(Version::parse("3.8.0"), Some(Version::new(3, 8, 0)));
        assert_eq!(Version::parse("4"), Some(Version::new(4, 0, 0)));
        assert_eq!(Version::parse("v4.2"), Some(Version::new(4, 2, 0)));
        assert_eq!(Version::parse("4.0.0-beta.2"), Some(Version::new(4, 0, 0)));
        assert_eq!(Version::parse("4.x"), None);
        assert_eq!(Version::parse("1.2.3.4"), None);
    }

    #[test]
    fn missing_stamp_is_oldest() {
        assert!(Version::from_stamp(None) < Version::new(0, 0, 1));
        assert!(Version::from_stamp(Some("garbage")) < Version::new(1, 0, 0));
        assert!(Version::from_stamp(Some("3.9.0")) < Version::new(4, 0, 0));
        assert!(Version::from_stamp(Some("4.3.0")) >= Version::new(4, 3, 0));
    }
}
