//! Activation of steps resolved through a step library.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use super::{ActivatedStep, ActivationRequest, ActivationStrategy, ExecutablePolicy, StepInfo};
use crate::core::constraint::{ConstraintKind, VersionConstraint};
use crate::core::models::{StepCollection, StepDefinition};
use crate::core::semver::cmp_latest_first;
use crate::error::StepError;
use crate::io::download::download_executable;
use crate::io::fs_util::{clear_dir, copy_file};
use crate::io::library::StepLibStore;
use crate::io::paths::RoutePaths;

/// Activates a step resolved through a step library.
#[derive(Debug, Clone, Copy)]
pub struct LibraryRefActivator<'a> {
    store: &'a StepLibStore,
    executables: &'a ExecutablePolicy,
}

impl<'a> LibraryRefActivator<'a> {
    pub fn new(store: &'a StepLibStore, executables: &'a ExecutablePolicy) -> Self {
        Self { store, executables }
    }
}

/// Resolve a constraint to an exact version present in the index.
pub fn resolve_version(
    collection: &StepCollection,
    library: &str,
    id: &str,
    constraint: &VersionConstraint,
) -> Result<String, StepError> {
    let group = collection
        .step_group(id)
        .ok_or_else(|| StepError::StepNotFound {
            library: library.to_string(),
            id: id.to_string(),
        })?;
    constraint
        .resolve(group)
        .ok_or_else(|| StepError::VersionNotFound {
            library: library.to_string(),
            id: id.to_string(),
            constraint: constraint.raw.clone(),
        })
}

impl ActivationStrategy for LibraryRefActivator<'_> {
    #[instrument(skip_all, fields(library = %request.step_id.source, id = %request.step_id.id_or_uri, constraint = %request.step_id.version))]
    fn activate(&self, request: &ActivationRequest<'_>) -> Result<ActivatedStep> {
        let step_id = request.step_id;
        let library = step_id.source.as_str();
        let id = step_id.id_or_uri.as_str();

        let constraint = VersionConstraint::classify(&step_id.version);
        if constraint.kind == ConstraintKind::Invalid {
            return Err(StepError::InvalidConstraint {
                id: id.to_string(),
                version: step_id.version.clone(),
            }
            .into());
        }

        let route = self.store.setup(library)?;
        let mut collection = self.store.read_spec(library)?;

        let can_update = !request.offline && !request.did_steplib_update;
        let mut did_update = false;
        if can_update && constraint.kind.is_floating() {
            match self.store.update(library) {
                Ok(updated) => {
                    collection = updated;
                    did_update = true;
                }
                Err(err) => warn!(err = %format!("{err:#}"), "library refresh failed, using local index"),
            }
        }

        let version = match resolve_version(&collection, library, id, &constraint) {
            Ok(version) => version,
            Err(miss) if can_update && !did_update => {
                info!(reason = %miss, "step not in local index, refreshing library");
                collection = self
                    .store
                    .update(library)
                    .with_context(|| format!("refresh library {library}"))?;
                did_update = true;
                resolve_version(&collection, library, id, &constraint)?
            }
            Err(miss) => return Err(miss.into()),
        };
        debug!(version = %version, kind = %constraint.kind, "constraint resolved");

        let group = collection
            .step_group(id)
            .ok_or_else(|| StepError::StepNotFound {
                library: library.to_string(),
                id: id.to_string(),
            })?;
        let definition_path = route.step_definition_path(id, &version);
        let step_info = StepInfo {
            library: library.to_string(),
            id: id.to_string(),
            version: version.clone(),
            latest_version: group.latest_version_number.clone(),
            original_version: step_id.version.clone(),
            group_info: group.info.clone(),
            definition_path,
        };
        let mut executable_path = None;
        if let Some(definition) = group.versions.get(&version)
            && !request.offline
        {
            executable_path = self.try_executable(definition, id, request.step_dir)?;
        }
        if executable_path.is_none() {
            self.activate_source(&route, &collection, id, &version, request)?;
        }

        let step_yml_path = request.step_yml_destination();
        copy_file(&step_info.definition_path, &step_yml_path)?;

        Ok(ActivatedStep {
            step_yml_path,
            step_dir: request.step_dir.to_path_buf(),
            executable_path,
            did_steplib_update: did_update,
            step_info: Some(step_info),
        })
    }
}

impl LibraryRefActivator<'_> {
    /// Fetch the precompiled executable when allowed and declared for this host.
    ///
    /// Network failures fall back to source activation; integrity failures do not.
    fn try_executable(
        &self,
        definition: &StepDefinition,
        id: &str,
        step_dir: &Path,
    ) -> Result<Option<PathBuf>> {
        if !self.executables.enabled {
            return Ok(None);
        }
        let Some(executable) = definition.executables.get(&self.executables.platform) else {
            debug!(platform = %self.executables.platform, "no precompiled executable for platform");
            return Ok(None);
        };
        let dest = step_dir.join(id);
        match download_executable(
            self.store.fetcher(),
            &executable.url,
            &executable.hash,
            &dest,
            self.store.retry_policy(),
        ) {
            Ok(path) => {
                clear_dir(step_dir, &[OsStr::new(id)])?;
                Ok(Some(path))
            }
            Err(err) if is_integrity_failure(&err) => Err(err),
            Err(err) => {
                warn!(err = %format!("{err:#}"), "precompiled executable unavailable, falling back to source");
                Ok(None)
            }
        }
    }

    fn activate_source(
        &self,
        route: &RoutePaths,
        collection: &StepCollection,
        id: &str,
        version: &str,
        request: &ActivationRequest<'_>,
    ) -> Result<()> {
        let cache = self.store.cache(route);
        if !cache.has(id, version) {
            if request.offline {
                let mut cached: Vec<String> = collection
                    .step_group(id)
                    .map(|group| {
                        group
                            .versions
                            .keys()
                            .filter(|v| cache.has(id, v))
                            .cloned()
                            .collect()
                    })
                    .unwrap_or_default();
                cached.sort_by(|a, b| cmp_latest_first(a, b).unwrap_or(std::cmp::Ordering::Equal));
                return Err(StepError::OfflineUnavailable {
                    id: id.to_string(),
                    version: version.to_string(),
                    cached,
                }
                .into());
            }
            self.store.download_step(route, collection, id, version)?;
        }
        clear_dir(request.step_dir, &[])?;
        if !cache.get(id, version, request.step_dir)? {
            return Err(anyhow::anyhow!(
                "cache entry for {id}@{version} vanished before it could be copied"
            ));
        }
        debug!(dir = %request.step_dir.display(), "step source activated from cache");
        Ok(())
    }
}

fn is_integrity_failure(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<StepError>(),
        Some(
            StepError::HashMismatch { .. }
                | StepError::UnsupportedHashAlgorithm(_)
                | StepError::InsecureUrl(_)
        )
    )
}
