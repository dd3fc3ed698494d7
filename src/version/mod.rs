// src/version/mod.rs

//! Ordered version comparison for recipes and installed packages
//!
//! Versions follow `[epoch:]version[-release]`. Comparison is ordered, not
//! lexical: `1.10` is newer than `1.9`, and `2:0.1` is newer than `1:9.9`.

use crate::error::{Error, Result};
use semver::Version;
use std::cmp::Ordering;
use std::fmt;

/// A parsed package version with epoch, version, and release components
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PkgVersion {
    pub epoch: u64,
    pub version: String,
    pub release: Option<String>,
}

impl PkgVersion {
    /// Parse a version string
    ///
    /// Format: [epoch:]version[-release]
    /// Examples:
    /// - "1.2.3" → epoch=0, version="1.2.3", release=None
    /// - "2:1.2.3" → epoch=2, version="1.2.3", release=None
    /// - "1.2.3-4" → epoch=0, version="1.2.3", release=Some("4")
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
                Error::ParseError(format!("Invalid epoch in version '{}': {}", s, e))
            })?
        };

        let (version, release) = match rest.split_once('-') {
            Some((v, r)) => (v.to_string(), Some(r.to_string())),
            None => (rest.to_string(), None),
        };

        if version.is_empty() {
            return Err(Error::ParseError(format!(
                "Empty version component in '{}'",
                s
            )));
        }

        Ok(Self {
            epoch,
            version,
            release,
        })
    }

    /// Compare two versions
    pub fn compare(&self, other: &PkgVersion) -> Ordering {
        match self.epoch.cmp(&other.epoch) {
            Ordering::Equal => {}
            ord => return ord,
        }

        // Strict semver when both sides are semver, segment-wise otherwise
        let ord = match (Version::parse(&self.version), Version::parse(&other.version)) {
            (Ok(v1), Ok(v2)) => v1.cmp(&v2),
            _ => compare_segments(&self.version, &other.version),
        };
        if ord != Ordering::Equal {
            return ord;
        }

        match (&self.release, &other.release) {
            (Some(a), Some(b)) => compare_segments(a, b),
            (Some(_), None) => Ordering::Greater,
            (None, Some(_)) => Ordering::Less,
            (None, None) => Ordering::Equal,
        }
    }
}

/// Compare dotted version strings segment by segment
///
/// Digit runs compare numerically, letter runs lexically, and a digit run
/// sorts after a letter run (`1.0` > `1.a`). When one side runs out of
/// segments the longer one is newer.
fn compare_segments(a: &str, b: &str) -> Ordering {
    let sa = segments(a);
    let sb = segments(b);

    for (x, y) in sa.iter().zip(sb.iter()) {
        let ord = match (x, y) {
            (Segment::Num(x), Segment::Num(y)) => x.cmp(y),
            (Segment::Alpha(x), Segment::Alpha(y)) => x.cmp(y),
            (Segment::Num(_), Segment::Alpha(_)) => Ordering::Greater,
            (Segment::Alpha(_), Segment::Num(_)) => Ordering::Less,
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }

    sa.len().cmp(&sb.len())
}

#[derive(Debug, PartialEq, Eq)]
enum Segment<'a> {
    Num(u64),
    Alpha(&'a str),
}

fn segments(s: &str) -> Vec<Segment<'_>> {
    let mut out = Vec::new();
    let bytes = s.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];
        if c.is_ascii_digit() {
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            let digits = s[start..i].trim_start_matches('0');
            out.push(Segment::Num(digits.parse().unwrap_or(0)));
        } else if c.is_ascii_alphabetic() {
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_alphabetic() {
                i += 1;
            }
            out.push(Segment::Alpha(&s[start..i]));
        } else {
            // separators
            i += 1;
        }
    }

    out
}

impl fmt::Display for PkgVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.epoch > 0 {
            write!(f, "{}:", self.epoch)?;
        }
        write!(f, "{}", self.version)?;
        if let Some(ref release) = self.release {
            write!(f, "-{}", release)?;
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

/// Compare two raw version strings, treating unparsable input as a plain segment compare
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    match (PkgVersion::parse(a), PkgVersion::parse(b)) {
        (Ok(va), Ok(vb)) => va.cmp(&vb),
        _ => compare_segments(a, b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_version() {
        let v = PkgVersion::parse("1.2.3").unwrap();
        assert_eq!(v.epoch, 0);
        assert_eq!(v.version, "1.2.3");
        assert_eq!(v.release, None);
    }

    #[test]
    fn test_parse_with_epoch_and_release() {
        let v = PkgVersion::parse("2:1.2.3-4").unwrap();
        assert_eq!(v.epoch, 2);
        assert_eq!(v.version, "1.2.3");
        assert_eq!(v.release, Some("4".to_string()));
        assert_eq!(v.to_string(), "2:1.2.3-4");
    }

    #[test]
    fn test_parse_rejects_empty_version() {
        assert!(PkgVersion::parse("1:").is_err());
        assert!(PkgVersion::parse("x:1.0").is_err());
    }

    #[test]
    fn test_numeric_not_lexical() {
        assert_eq!(compare_versions("1.10", "1.9"), Ordering::Greater);
        assert_eq!(compare_versions("0.1", "1.2"), Ordering::Less);
        assert_eq!(compare_versions("2.0.0", "2.0.0"), Ordering::Equal);
    }

    #[test]
    fn test_epoch_wins() {
        assert_eq!(compare_versions("2:0.1", "1:9.9"), Ordering::Greater);
    }

    #[test]
    fn test_release_ordering() {
        assert_eq!(compare_versions("1.0-2", "1.0-10"), Ordering::Less);
        assert_eq!(compare_versions("1.0-1", "1.0"), Ordering::Greater);
    }

    #[test]
    fn test_non_semver_versions() {
        assert_eq!(compare_versions("1.2a", "1.2b"), Ordering::Less);
        assert_eq!(compare_versions("1.2.10", "1.2.9"), Ordering::Greater);
        assert_eq!(compare_versions("1.0", "1.0.1"), Ordering::Less);
        assert_eq!(compare_versions("20240101", "20231231"), Ordering::Greater);
    }
}
