//! Semantic Versions
//!
//! Three-component versions compared component-wise as integers.

use super::error::UpdateError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// A `major.minor.patch` version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl Version {
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self { major, minor, patch }
    }

    /// Parse "1.2.3" (a leading `v` is tolerated)
    pub fn parse(s: &str) -> Result<Self, UpdateError> {
        let trimmed = s.trim();
        let body = trimmed.strip_prefix('v').unwrap_or(trimmed);
        let parts: Vec<&str> = body.split('.').collect();
        if parts.len() != 3 {
            return Err(UpdateError::InvalidVersion(s.to_string()));
        }

        let mut numbers = [0u64; 3];
        for (slot, part) in numbers.iter_mut().zip(&parts) {
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(UpdateError::InvalidVersion(s.to_string()));
            }
            *slot = part
                .parse()
                .map_err(|_| UpdateError::InvalidVersion(s.to_string()))?;
        }

        Ok(Self::new(numbers[0], numbers[1], numbers[2]))
    }

    /// Check if `self` is strictly newer than `other`
    pub fn is_newer_than(&self, other: &Version) -> bool {
        self > other
    }
}

impl FromStr for Version {
    type Err = UpdateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Version::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cmp::Ordering;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    #[test]
    fn test_parse() {
        assert_eq!(v("3.5.1"), Version::new(3, 5, 1));
        assert_eq!(v("v0.2.0"), Version::new(0, 2, 0));
        assert!(Version::parse("1.2").is_err());
        assert!(Version::parse("1.2.3.4").is_err());
        assert!(Version::parse("1.-2.3").is_err());
        assert!(Version::parse("1..3").is_err());
        assert!(Version::parse("a.b.c").is_err());
    }

    #[test]
    fn test_version_comparison() {
        assert!(v("0.2.0").is_newer_than(&v("0.1.0")));
        assert!(v("1.0.0").is_newer_than(&v("0.9.9")));
        assert!(v("0.1.1").is_newer_than(&v("0.1.0")));
        assert!(v("3.10.0").is_newer_than(&v("3.9.12")));
        assert!(!v("0.1.0").is_newer_than(&v("0.1.0")));
        assert!(!v("0.1.0").is_newer_than(&v("0.2.0")));
    }

    #[test]
    fn test_total_order() {
        let versions = ["0.0.0", "0.0.1", "0.1.0", "1.0.0", "1.2.3", "3.5.0", "3.5.1", "10.0.0"];
        for a in versions {
            assert_eq!(v(a).cmp(&v(a)), Ordering::Equal);
            for b in versions {
                // antisymmetric
                assert_eq!(v(a).cmp(&v(b)), v(b).cmp(&v(a)).reverse());
                for c in versions {
                    if v(a) < v(b) && v(b) < v(c) {
                        assert!(v(a) < v(c));
                    }
                }
            }
        }
    }

    #[test]
    fn test_serde_as_string() {
        let json = serde_json::to_string(&v("3.5.1")).unwrap();
        assert_eq!(json, "\"3.5.1\"");
        let back: Version = serde_json::from_str(&json).unwrap();
        assert_eq!(back, v("3.5.1"));
        assert!(serde_json::from_str::<Version>("\"3.5\"").is_err());
    }
}
