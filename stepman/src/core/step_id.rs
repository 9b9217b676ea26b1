//! Canonical step references: `source::id@version`.
//!
//! Examples of accepted composite strings:
//!
//! - `path::./steps/my-step`
//! - `git::https://github.com/example/steps-timestamp.git@main`
//! - `git::git@github.com:example/steps-script.git@1.2.0`
//! - `https://github.com/example/steplib.git::script@2.0.0`
//! - `script@2.0.0` or `script` (needs a default library)

use std::fmt;

use anyhow::{Result, bail};
use serde::Serialize;

use crate::core::constraint::{ConstraintKind, VersionConstraint};

/// How a step reference must be activated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Path,
    Git,
    /// Steps referencing `_` bypass every library; not supported here.
    Independent,
    Library,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CanonicalStepId {
    /// Library URI, or `path` / `git` for direct references.
    pub source: String,
    /// Step id within a library, otherwise the path or repository URL.
    pub id_or_uri: String,
    /// Version constraint, or the tag/branch for git references.
    pub version: String,
}

impl CanonicalStepId {
    pub fn new(
        source: impl Into<String>,
        id_or_uri: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            id_or_uri: id_or_uri.into(),
            version: version.into(),
        }
    }

    /// Parse a composite reference, falling back to `default_library` when it
    /// carries no `source::` prefix.
    pub fn parse(composite: &str, default_library: Option<&str>) -> Result<Self> {
        let (source, rest) = match composite.split_once("::") {
            Some((src, rest)) if !src.is_empty() => (src.to_string(), rest),
            Some((_, rest)) => (String::new(), rest),
            None => (String::new(), composite),
        };
        let source = if source.is_empty() {
            match default_library.filter(|lib| !lib.is_empty()) {
                Some(lib) => lib.to_string(),
                None => bail!(
                    "no default step library, the reference must name its source with a '::' separator ({composite})"
                ),
            }
        } else {
            source
        };

        let parts = split_components(rest);
        let id = parts.first().cloned().unwrap_or_default();
        if id.is_empty() {
            bail!("no step id found in reference ({composite})");
        }
        let version = if parts.len() > 1 {
            parts.last().cloned().unwrap_or_default()
        } else {
            String::new()
        };

        Ok(Self {
            source,
            id_or_uri: id,
            version,
        })
    }

    pub fn source_kind(&self) -> SourceKind {
        match self.source.as_str() {
            "path" => SourceKind::Path,
            "git" => SourceKind::Git,
            "_" => SourceKind::Independent,
            _ => SourceKind::Library,
        }
    }

    /// True when the reference always denotes the same step content, which
    /// makes derived artifacts (compiled binaries) safe to reuse. Only a
    /// library reference pinned to an exact `N.N.N` version qualifies.
    pub fn is_unique_resource_id(&self) -> bool {
        self.source_kind() == SourceKind::Library
            && !self.source.is_empty()
            && !self.id_or_uri.is_empty()
            && VersionConstraint::classify(&self.version).kind == ConstraintKind::Fixed
    }
}

impl fmt::Display for CanonicalStepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.source, self.id_or_uri)?;
        if !self.version.is_empty() {
            write!(f, "@{}", self.version)?;
        }
        Ok(())
    }
}

/// Split on `@`, keeping a leading SSH `git@host` user intact.
fn split_components(composite: &str) -> Vec<String> {
    let mut parts: Vec<String> = composite.split('@').map(str::to_string).collect();
    if parts.len() > 1 && parts[0] == "git" {
        let host = parts.remove(1);
        parts[0] = format!("git@{host}");
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIB: &str = "https://github.com/example/steplib.git";

    #[test]
    fn parses_full_library_reference() {
        let id = CanonicalStepId::parse(&format!("{LIB}::script@2.0.0"), None).expect("parse");
        assert_eq!(id, CanonicalStepId::new(LIB, "script", "2.0.0"));
        assert_eq!(id.source_kind(), SourceKind::Library);
        assert!(id.is_unique_resource_id());
    }

    #[test]
    fn uses_default_library_when_source_missing() {
        let id = CanonicalStepId::parse("script@2", Some(LIB)).expect("parse");
        assert_eq!(id, CanonicalStepId::new(LIB, "script", "2"));

        let latest = CanonicalStepId::parse("script", Some(LIB)).expect("parse");
        assert_eq!(latest.version, "");
        assert!(!latest.is_unique_resource_id());
    }

    #[test]
    fn floating_versions_are_not_unique() {
        for version in ["1", "1.2", "", "1.x.x"] {
            let id = CanonicalStepId::new(LIB, "script", version);
            assert!(!id.is_unique_resource_id(), "{version:?} counted as unique");
        }
        assert!(CanonicalStepId::new(LIB, "script", "1.2.3").is_unique_resource_id());
    }

    #[test]
    fn missing_source_without_default_fails() {
        assert!(CanonicalStepId::parse("script@1.0.0", None).is_err());
        assert!(CanonicalStepId::parse("script", Some("")).is_err());
    }

    #[test]
    fn empty_id_fails() {
        assert!(CanonicalStepId::parse("git::@main", None).is_err());
    }

    #[test]
    fn ssh_git_url_keeps_user() {
        let id = CanonicalStepId::parse("git::git@github.com:example/steps-script.git@main", None)
            .expect("parse");
        assert_eq!(id.source_kind(), SourceKind::Git);
        assert_eq!(id.id_or_uri, "git@github.com:example/steps-script.git");
        assert_eq!(id.version, "main");
        assert!(!id.is_unique_resource_id());
    }

    #[test]
    fn https_git_url_without_version() {
        let id = CanonicalStepId::parse("git::https://github.com/example/steps-script.git", None)
            .expect("parse");
        assert_eq!(id.id_or_uri, "https://github.com/example/steps-script.git");
        assert_eq!(id.version, "");
    }

    #[test]
    fn path_reference() {
        let id = CanonicalStepId::parse("path::./steps/local", None).expect("parse");
        assert_eq!(id.source_kind(), SourceKind::Path);
        assert_eq!(id.id_or_uri, "./steps/local");
        assert!(!id.is_unique_resource_id());
    }

    #[test]
    fn display_round_trips_composite() {
        let id = CanonicalStepId::new(LIB, "script", "1.0.0");
        assert_eq!(id.to_string(), format!("{LIB}::script@1.0.0"));
    }
}
