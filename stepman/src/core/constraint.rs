//! Version constraints used when referencing registry steps.
//!
//! Grammar: empty (latest), `N` (major locked), `N.N` (minor locked) and
//! `N.N.N` (pinned). Anything else classifies as [`ConstraintKind::Invalid`].

use std::fmt;

use tracing::warn;

use crate::core::models::StepGroup;
use crate::core::semver::{Semver, parse_semver};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintKind {
    Latest,
    MajorLocked,
    MinorLocked,
    Fixed,
    Invalid,
}

impl ConstraintKind {
    /// Constraints whose resolution can change when the registry is refreshed.
    pub fn is_floating(self) -> bool {
        matches!(
            self,
            ConstraintKind::Latest | ConstraintKind::MajorLocked | ConstraintKind::MinorLocked
        )
    }
}

impl fmt::Display for ConstraintKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConstraintKind::Latest => "latest",
            ConstraintKind::MajorLocked => "major-locked",
            ConstraintKind::MinorLocked => "minor-locked",
            ConstraintKind::Fixed => "fixed",
            ConstraintKind::Invalid => "invalid",
        };
        f.write_str(name)
    }
}

/// A classified version requirement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionConstraint {
    pub raw: String,
    pub kind: ConstraintKind,
    /// Zero-padded numeric form; `None` for latest and invalid.
    pub version: Option<Semver>,
}

impl VersionConstraint {
    pub fn classify(raw: &str) -> Self {
        let trimmed = raw.trim();
        let invalid = || Self {
            raw: raw.to_string(),
            kind: ConstraintKind::Invalid,
            version: None,
        };
        if trimmed.is_empty() {
            return Self {
                raw: raw.to_string(),
                kind: ConstraintKind::Latest,
                version: None,
            };
        }
        let parts: Vec<&str> = trimmed.split('.').collect();
        let all_numeric = parts
            .iter()
            .all(|part| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit()));
        if !all_numeric {
            return invalid();
        }
        let kind = match parts.len() {
            1 => ConstraintKind::MajorLocked,
            2 => ConstraintKind::MinorLocked,
            3 => ConstraintKind::Fixed,
            _ => return invalid(),
        };
        match parse_semver(trimmed) {
            Ok(version) => Self {
                raw: raw.to_string(),
                kind,
                version: Some(version),
            },
            Err(_) => invalid(),
        }
    }

    /// Pick the concrete version this constraint selects within `group`.
    ///
    /// Returns `None` when nothing matches. Latest returns the
    /// registry-declared latest version without recomputing it.
    pub fn resolve(&self, group: &StepGroup) -> Option<String> {
        match (self.kind, self.version) {
            (ConstraintKind::Latest, _) => {
                let latest = &group.latest_version_number;
                (!latest.is_empty() && group.versions.contains_key(latest))
                    .then(|| latest.clone())
            }
            (ConstraintKind::Fixed, Some(_)) => {
                let exact = self.raw.trim();
                group
                    .versions
                    .contains_key(exact)
                    .then(|| exact.to_string())
            }
            (ConstraintKind::MinorLocked, Some(wanted)) => best_match(group, |v| {
                v.major == wanted.major && v.minor == wanted.minor
            }),
            (ConstraintKind::MajorLocked, Some(wanted)) => {
                best_match(group, |v| v.major == wanted.major)
            }
            _ => None,
        }
    }
}

fn best_match(group: &StepGroup, matches: impl Fn(&Semver) -> bool) -> Option<String> {
    let mut best: Option<(Semver, &String)> = None;
    for key in group.versions.keys() {
        let parsed = match parse_semver(key) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!(version = %key, err = %err, "skipping unparseable step version");
                continue;
            }
        };
        if !matches(&parsed) {
            continue;
        }
        if best.as_ref().is_none_or(|(current, _)| parsed > *current) {
            best = Some((parsed, key));
        }
    }
    best.map(|(_, key)| key.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::StepDefinition;

    fn group(latest: &str, versions: &[&str]) -> StepGroup {
        StepGroup {
            latest_version_number: latest.to_string(),
            versions: versions
                .iter()
                .map(|v| (v.to_string(), StepDefinition::default()))
                .collect(),
            ..StepGroup::default()
        }
    }

    #[test]
    fn classifies_grammar() {
        assert_eq!(VersionConstraint::classify("").kind, ConstraintKind::Latest);
        assert_eq!(
            VersionConstraint::classify("2").kind,
            ConstraintKind::MajorLocked
        );
        assert_eq!(
            VersionConstraint::classify("2.1").kind,
            ConstraintKind::MinorLocked
        );
        assert_eq!(
            VersionConstraint::classify("2.1.3").kind,
            ConstraintKind::Fixed
        );
        for bad in ["v2", "1.x.x", "1.2.x", "1.2.3.4", "1..2", "abc", "-1"] {
            assert_eq!(
                VersionConstraint::classify(bad).kind,
                ConstraintKind::Invalid,
                "{bad}"
            );
        }
    }

    #[test]
    fn major_lock_picks_numerically_greatest() {
        let g = group("2.0.0", &["1.2.0", "1.10.1", "1.9.9", "2.0.0"]);
        let resolved = VersionConstraint::classify("1").resolve(&g);
        assert_eq!(resolved.as_deref(), Some("1.10.1"));
    }

    #[test]
    fn minor_lock_stays_within_minor() {
        let g = group("1.3.0", &["1.2.0", "1.2.11", "1.2.3", "1.3.0"]);
        let resolved = VersionConstraint::classify("1.2").resolve(&g);
        assert_eq!(resolved.as_deref(), Some("1.2.11"));
    }

    #[test]
    fn locks_without_match_resolve_to_none() {
        let g = group("1.3.0", &["1.2.0", "1.3.0"]);
        assert_eq!(VersionConstraint::classify("3").resolve(&g), None);
        assert_eq!(VersionConstraint::classify("1.4").resolve(&g), None);
        assert_eq!(VersionConstraint::classify("1.2.1").resolve(&g), None);
    }

    #[test]
    fn latest_uses_declared_latest() {
        let g = group("1.2.0", &["1.2.0", "1.3.0"]);
        let resolved = VersionConstraint::classify("").resolve(&g);
        assert_eq!(resolved.as_deref(), Some("1.2.0"));
    }

    #[test]
    fn unparseable_versions_are_skipped() {
        let g = group("1.0.0", &["1.0.0", "1.beta"]);
        let resolved = VersionConstraint::classify("1").resolve(&g);
        assert_eq!(resolved.as_deref(), Some("1.0.0"));
    }

    #[test]
    fn floating_kinds() {
        assert!(ConstraintKind::Latest.is_floating());
        assert!(ConstraintKind::MinorLocked.is_floating());
        assert!(!ConstraintKind::Fixed.is_floating());
        assert!(!ConstraintKind::Invalid.is_floating());
    }
}
