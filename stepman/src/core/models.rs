//! Registry data model: step definitions, version groups and the library index.
//!
//! `StepDefinition` mirrors a `step.yml` document; `StepCollection` is the
//! generated index (`spec.json`) of one step library.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::semver::cmp_latest_first;
use crate::error::StepError;

/// Where the source of a step version lives.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StepSourceInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BashToolkitDecl {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry_file: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GoToolkitDecl {
    pub package_name: String,
}

/// Prebuilt binary declaration (Swift steps ship one per release).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwiftToolkitDecl {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub binary_location: Option<String>,
    pub executable_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

/// At most one member is expected to be set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolkitDecl {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bash: Option<BashToolkitDecl>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub go: Option<GoToolkitDecl>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub swift: Option<SwiftToolkitDecl>,
}

/// Precompiled executable for one platform.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Executable {
    pub url: String,
    pub hash: String,
}

/// Parsed `step.yml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StepDefinition {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_code_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub support_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<StepSourceInfo>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub asset_urls: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub host_os_tags: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub project_type_tags: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub type_tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub toolkit: Option<ToolkitDecl>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deps: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_always_run: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_skippable: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_if: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<Value>,
    /// Keyed by platform, e.g. `linux-amd64`.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub executables: BTreeMap<String, Executable>,
}

impl StepDefinition {
    pub fn go_toolkit(&self) -> Option<&GoToolkitDecl> {
        self.toolkit.as_ref().and_then(|t| t.go.as_ref())
    }

    pub fn swift_toolkit(&self) -> Option<&SwiftToolkitDecl> {
        self.toolkit.as_ref().and_then(|t| t.swift.as_ref())
    }

    pub fn bash_toolkit(&self) -> Option<&BashToolkitDecl> {
        self.toolkit.as_ref().and_then(|t| t.bash.as_ref())
    }
}

/// Per-step metadata kept next to the versions (`step-info.yml`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StepGroupInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub removal_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deprecate_notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maintainer: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub asset_urls: BTreeMap<String, String>,
}

/// All published versions of one step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StepGroup {
    pub info: StepGroupInfo,
    pub latest_version_number: String,
    pub versions: BTreeMap<String, StepDefinition>,
}

impl StepGroup {
    pub fn is_deprecated(&self) -> bool {
        self.info
            .deprecate_notes
            .as_deref()
            .is_some_and(|notes| !notes.trim().is_empty())
    }

    pub fn latest(&self) -> Option<&StepDefinition> {
        self.versions.get(&self.latest_version_number)
    }
}

/// Raw entry of `download_locations` in `steplib.yml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadLocation {
    #[serde(rename = "type")]
    pub kind: String,
    pub src: String,
}

/// A concrete place to fetch one step version from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedLocation {
    Zip { url: String },
    Git { url: String, commit: Option<String> },
}

/// Generated index of a whole step library.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StepCollection {
    pub format_version: String,
    pub generated_at_timestamp: i64,
    pub steplib_source: String,
    pub download_locations: Vec<DownloadLocation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assets_download_base_uri: Option<String>,
    pub steps: BTreeMap<String, StepGroup>,
}

impl StepCollection {
    pub fn step_group(&self, id: &str) -> Option<&StepGroup> {
        self.steps.get(id)
    }

    pub fn get_step(&self, id: &str, version: &str) -> Option<&StepDefinition> {
        self.steps.get(id)?.versions.get(version)
    }

    pub fn is_step_exist(&self, id: &str) -> bool {
        self.steps.contains_key(id)
    }

    /// Declared latest version; fails for unknown steps and groups without one.
    pub fn latest_version(&self, id: &str) -> Result<&str, StepError> {
        let group = self.steps.get(id).ok_or_else(|| StepError::StepNotFound {
            library: self.steplib_source.clone(),
            id: id.to_string(),
        })?;
        if group.latest_version_number.is_empty() {
            return Err(StepError::VersionNotFound {
                library: self.steplib_source.clone(),
                id: id.to_string(),
                constraint: String::new(),
            });
        }
        Ok(&group.latest_version_number)
    }

    /// Expand the library-wide download locations for one step version.
    pub fn download_locations(
        &self,
        id: &str,
        version: &str,
    ) -> Result<Vec<ResolvedLocation>, StepError> {
        let step = self.get_step(id, version);
        let mut locations = Vec::new();
        for location in &self.download_locations {
            match location.kind.as_str() {
                "zip" => locations.push(ResolvedLocation::Zip {
                    url: format!("{}{id}/{version}/step.zip", location.src),
                }),
                "git" => {
                    let Some(source) = step.and_then(|s| s.source.as_ref()) else {
                        continue;
                    };
                    let Some(url) = source.git.clone().filter(|u| !u.is_empty()) else {
                        continue;
                    };
                    locations.push(ResolvedLocation::Git {
                        url,
                        commit: source.commit.clone().filter(|c| !c.is_empty()),
                    });
                }
                other => {
                    return Err(StepError::InvalidDownloadLocation {
                        id: id.to_string(),
                        kind: other.to_string(),
                    });
                }
            }
        }
        if locations.is_empty() {
            return Err(StepError::NoDownloadLocation(id.to_string()));
        }
        Ok(locations)
    }

    /// Copy of the index keeping only the latest version of each step.
    pub fn slim(&self) -> StepCollection {
        let steps = self
            .steps
            .iter()
            .map(|(id, group)| {
                let versions = group
                    .latest()
                    .map(|def| (group.latest_version_number.clone(), def.clone()))
                    .into_iter()
                    .collect();
                (
                    id.clone(),
                    StepGroup {
                        info: group.info.clone(),
                        latest_version_number: group.latest_version_number.clone(),
                        versions,
                    },
                )
            })
            .collect();
        StepCollection {
            steps,
            ..self.clone()
        }
    }
}

/// Newest version among `versions`; unparseable entries are ignored.
pub fn latest_version_of<'a>(versions: impl IntoIterator<Item = &'a str>) -> Option<String> {
    let mut best: Option<&str> = None;
    for candidate in versions {
        match best {
            None => {
                if cmp_latest_first(candidate, candidate).is_ok() {
                    best = Some(candidate);
                }
            }
            Some(current) => {
                if let Ok(std::cmp::Ordering::Less) = cmp_latest_first(candidate, current) {
                    best = Some(candidate);
                }
            }
        }
    }
    best.map(str::to_string)
}
