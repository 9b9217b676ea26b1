//! Numeric dot-separated version handling.
//!
//! Registry versions are plain `MAJOR.MINOR.PATCH` strings. Missing trailing
//! components default to zero, so `"2"` and `"2.0.0"` denote the same version.

use std::cmp::Ordering;
use std::fmt;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SemverError {
    #[error("empty version string")]
    Empty,
    #[error("invalid version component '{component}' in '{version}'")]
    InvalidComponent { version: String, component: String },
    #[error("too many components in version '{0}'")]
    TooManyComponents(String),
}

/// A parsed `MAJOR.MINOR.PATCH` triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Semver {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl Semver {
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl fmt::Display for Semver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl std::str::FromStr for Semver {
    type Err = SemverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_semver(s)
    }
}

/// Parse a version string with at most three numeric components.
pub fn parse_semver(raw: &str) -> Result<Semver, SemverError> {
    let components = parse_components(raw)?;
    if components.len() > 3 {
        return Err(SemverError::TooManyComponents(raw.to_string()));
    }
    let at = |idx: usize| components.get(idx).copied().unwrap_or(0);
    Ok(Semver::new(at(0), at(1), at(2)))
}

/// Compare two version strings, latest-first.
///
/// Returns `1` when `a` is older than `b`, `-1` when `a` is newer and `0`
/// when they are equal. Any number of components is accepted; the shorter
/// side is padded with zeros.
pub fn compare_versions(a: &str, b: &str) -> Result<i32, SemverError> {
    Ok(match cmp_latest_first(a, b)? {
        Ordering::Less => -1,
        Ordering::Equal => 0,
        Ordering::Greater => 1,
    })
}

/// Ordering suitable for `sort_by` that puts the newest version first.
pub fn cmp_latest_first(a: &str, b: &str) -> Result<Ordering, SemverError> {
    let left = parse_components(a)?;
    let right = parse_components(b)?;
    let len = left.len().max(right.len());
    for idx in 0..len {
        let l = left.get(idx).copied().unwrap_or(0);
        let r = right.get(idx).copied().unwrap_or(0);
        match l.cmp(&r) {
            Ordering::Equal => {}
            other => return Ok(other.reverse()),
        }
    }
    Ok(Ordering::Equal)
}

/// True if `version` is the same as or newer than `minimum`.
pub fn is_version_greater_or_equal(version: &str, minimum: &str) -> Result<bool, SemverError> {
    Ok(compare_versions(version, minimum)? <= 0)
}

/// Sort versions newest first, skipping entries that do not parse.
pub fn sort_latest_first(versions: &mut Vec<String>) {
    versions.retain(|v| parse_components(v).is_ok());
    versions.sort_by(|a, b| cmp_latest_first(a, b).unwrap_or(Ordering::Equal));
}

fn parse_components(raw: &str) -> Result<Vec<u64>, SemverError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(SemverError::Empty);
    }
    trimmed
        .split('.')
        .map(|component| {
            component
                .parse::<u64>()
                .map_err(|_| SemverError::InvalidComponent {
                    version: raw.to_string(),
                    component: component.to_string(),
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compare_follows_latest_first_convention() {
        assert_eq!(compare_versions("1.0.0", "1.0.1").expect("cmp"), 1);
        assert_eq!(compare_versions("1.10.0", "1.9.3").expect("cmp"), -1);
        assert_eq!(compare_versions("2.0", "2.0.0").expect("cmp"), 0);
        assert_eq!(compare_versions("1", "1.0.0.1").expect("cmp"), 1);
    }

    #[test]
    fn compare_rejects_non_numeric_component() {
        assert!(compare_versions("1.x.0", "1.0.0").is_err());
        assert!(compare_versions("", "1.0.0").is_err());
        assert!(compare_versions("7.x.1.2.3", "7.0.1.x").is_err());
    }

    #[test]
    fn compare_is_antisymmetric() {
        let pairs = [("1.2.3", "1.3.0"), ("0.9.9", "10.0"), ("4.0.0", "4")];
        for (a, b) in pairs {
            let ab = compare_versions(a, b).expect("cmp");
            let ba = compare_versions(b, a).expect("cmp");
            assert_eq!(ab, -ba, "{a} vs {b}");
        }
    }

    #[test]
    fn parse_pads_missing_components() {
        assert_eq!(parse_semver("7").expect("parse"), Semver::new(7, 0, 0));
        assert_eq!(parse_semver("7.1").expect("parse"), Semver::new(7, 1, 0));
        assert_eq!(parse_semver("7.1.4").expect("parse"), Semver::new(7, 1, 4));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert_eq!(parse_semver(""), Err(SemverError::Empty));
        assert!(matches!(
            parse_semver("v1.0"),
            Err(SemverError::InvalidComponent { .. })
        ));
        assert!(matches!(
            parse_semver("1.2.3.4"),
            Err(SemverError::TooManyComponents(_))
        ));
    }

    #[test]
    fn greater_or_equal_uses_numeric_order() {
        assert!(is_version_greater_or_equal("1.21.0", "1.21.0").expect("cmp"));
        assert!(is_version_greater_or_equal("1.22.1", "1.21.0").expect("cmp"));
        assert!(!is_version_greater_or_equal("1.9.7", "1.21.0").expect("cmp"));
    }

    #[test]
    fn sort_puts_newest_first_and_drops_invalid() {
        let mut versions = vec![
            "1.0.0".to_string(),
            "1.10.0".to_string(),
            "bogus".to_string(),
            "1.2.0".to_string(),
        ];
        sort_latest_first(&mut versions);
        assert_eq!(versions, vec!["1.10.0", "1.2.0", "1.0.0"]);
    }
}
