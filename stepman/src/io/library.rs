//! Step library lifecycle: setup, refresh, index generation and source downloads.
//!
//! A library is a repository (or, for `file://` URIs, a local directory) with
//! this layout:
//!
//! ```text
//! steplib.yml
//! steps/<id>/step-info.yml          optional group metadata
//! steps/<id>/<version>/step.yml
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};
use walkdir::WalkDir;

use crate::core::models::{
    DownloadLocation, ResolvedLocation, StepCollection, StepDefinition, StepGroup, StepGroupInfo,
    latest_version_of,
};
use crate::error::StepError;
use crate::io::cache::StepCache;
use crate::io::download::download_and_unzip;
use crate::io::fetch::Fetcher;
use crate::io::fs_util::{copy_dir, remove_path, write_atomic};
use crate::io::git::CloneOptions;
use crate::io::paths::{RoutePaths, StepmanPaths};
use crate::io::retry::{RetryPolicy, retry};
use crate::io::routes::RouteTable;

const LOCAL_LIBRARY_PREFIX: &str = "file://";

/// `steplib.yml` at the root of a library.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct LibraryManifest {
    format_version: String,
    steplib_source: String,
    download_locations: Vec<DownloadLocation>,
    assets_download_base_uri: Option<String>,
}

/// Local registry of step libraries under the stepman home.
#[derive(Debug, Clone)]
pub struct StepLibStore {
    paths: StepmanPaths,
    fetcher: Arc<dyn Fetcher>,
    retry: RetryPolicy,
}

impl StepLibStore {
    pub fn new(paths: StepmanPaths, fetcher: Arc<dyn Fetcher>, retry: RetryPolicy) -> Self {
        Self {
            paths,
            fetcher,
            retry,
        }
    }

    pub fn paths(&self) -> &StepmanPaths {
        &self.paths
    }

    pub fn fetcher(&self) -> &dyn Fetcher {
        self.fetcher.as_ref()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Route of a library; only reported when its folder exists.
    pub fn route(&self, library_uri: &str) -> Result<Option<RoutePaths>> {
        let routes = RouteTable::load(&self.paths.routing_path)?;
        Ok(routes
            .alias(library_uri)
            .map(|alias| self.paths.route(alias))
            .filter(|route| route.root.is_dir()))
    }

    pub fn require_route(&self, library_uri: &str) -> Result<RoutePaths> {
        self.route(library_uri)?
            .ok_or_else(|| StepError::NoRoute(library_uri.to_string()).into())
    }

    pub fn cache(&self, route: &RoutePaths) -> StepCache {
        StepCache::new(&route.cache_dir)
    }

    /// Make a library available locally; a no-op if it already is.
    #[instrument(skip_all, fields(library = library_uri))]
    pub fn setup(&self, library_uri: &str) -> Result<RoutePaths> {
        if let Some(route) = self.route(library_uri)? {
            debug!("library already set up");
            return Ok(route);
        }

        let mut routes = RouteTable::load(&self.paths.routing_path)?;
        let alias = routes.ensure(library_uri);
        let route = self.paths.route(&alias);
        remove_path(&route.root)?;

        info!(alias = %alias, "setting up library");
        let outcome = self
            .fetch_library(library_uri, &route)
            .and_then(|()| self.regenerate_spec(library_uri, &route).map(|_| ()));
        if let Err(err) = outcome {
            if let Err(cleanup) = remove_path(&route.root) {
                warn!(err = %cleanup, "failed to clean up after setup failure");
            }
            return Err(err).with_context(|| format!("set up library {library_uri}"));
        }

        routes.save(&self.paths.routing_path)?;
        Ok(route)
    }

    /// Pull the latest library content and regenerate its index.
    #[instrument(skip_all, fields(library = library_uri))]
    pub fn update(&self, library_uri: &str) -> Result<StepCollection> {
        let route = self.require_route(library_uri)?;
        if let Some(local) = library_uri.strip_prefix(LOCAL_LIBRARY_PREFIX) {
            remove_path(&route.library_dir)?;
            copy_dir(Path::new(local), &route.library_dir)
                .with_context(|| format!("copy local library {local}"))?;
        } else {
            let dir = route.library_dir.clone();
            retry(self.retry, "pull library", || self.fetcher.pull(&dir))
                .with_context(|| format!("update library {library_uri}"))?;
        }
        let collection = self.regenerate_spec(library_uri, &route)?;
        info!(steps = collection.steps.len(), "library updated");
        Ok(collection)
    }

    /// Read the generated index of a set-up library.
    pub fn read_spec(&self, library_uri: &str) -> Result<StepCollection> {
        let route = self.require_route(library_uri)?;
        read_spec_file(&route.spec_path)
    }

    fn fetch_library(&self, library_uri: &str, route: &RoutePaths) -> Result<()> {
        if let Some(local) = library_uri.strip_prefix(LOCAL_LIBRARY_PREFIX) {
            let local = Path::new(local);
            if !local.is_dir() {
                bail!("local library {} does not exist", local.display());
            }
            return copy_dir(local, &route.library_dir);
        }
        let dest = route.library_dir.clone();
        retry(self.retry, "clone library", || {
            remove_path(&dest)?;
            self.fetcher
                .clone_repo(library_uri, &dest, &CloneOptions::default())
        })
    }

    fn regenerate_spec(&self, library_uri: &str, route: &RoutePaths) -> Result<StepCollection> {
        let collection = generate_collection(&route.library_dir, library_uri)?;
        write_spec_file(&route.spec_path, &collection)?;
        write_spec_file(&route.slim_spec_path, &collection.slim())?;
        Ok(collection)
    }

    /// Ensure the cache holds the source of `id@version`, downloading it if needed.
    ///
    /// Download locations are tried in order and the first success wins.
    #[instrument(skip_all, fields(id, version))]
    pub fn download_step(
        &self,
        route: &RoutePaths,
        collection: &StepCollection,
        id: &str,
        version: &str,
    ) -> Result<PathBuf> {
        let cache = self.cache(route);
        if cache.has(id, version) {
            return Ok(cache.entry_dir(id, version));
        }
        let locations = collection.download_locations(id, version)?;

        cache.put_with(id, version, |staging| {
            let mut reasons = Vec::new();
            for location in &locations {
                match self.fetch_location(location, version, staging) {
                    Ok(()) => return Ok(()),
                    Err(err) => {
                        warn!(?location, err = %format!("{err:#}"), "download location failed");
                        reasons.push(format!("{err:#}"));
                        remove_path(staging)?;
                    }
                }
            }
            Err(StepError::DownloadFailed {
                what: format!("step {id}@{version}"),
                reason: reasons.join("; "),
            }
            .into())
        })
    }

    fn fetch_location(
        &self,
        location: &ResolvedLocation,
        version: &str,
        staging: &Path,
    ) -> Result<()> {
        match location {
            ResolvedLocation::Zip { url } => {
                download_and_unzip(self.fetcher.as_ref(), url, staging, self.retry)
            }
            ResolvedLocation::Git { url, commit } => retry(self.retry, "clone step", || {
                remove_path(staging)?;
                self.fetcher.clone_repo(
                    url,
                    staging,
                    &CloneOptions {
                        reference: Some(version),
                        depth: Some(1),
                    },
                )?;
                if let Some(expected) = commit {
                    let actual = self.fetcher.head_commit(staging)?;
                    if &actual != expected {
                        return Err(anyhow!(
                            "commit mismatch for {url}@{version}: expected {expected}, got {actual}"
                        ));
                    }
                }
                Ok(())
            }),
        }
    }
}

pub fn read_spec_file(path: &Path) -> Result<StepCollection> {
    let raw = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parse {}", path.display()))
}

fn write_spec_file(path: &Path, collection: &StepCollection) -> Result<()> {
    let payload = serde_json::to_vec(collection).context("serialize library index")?;
    write_atomic(path, &payload)
}

pub fn read_step_definition(path: &Path) -> Result<StepDefinition> {
    let raw = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_yaml::from_str(&raw).with_context(|| format!("parse {}", path.display()))
}

/// Build the library index from a checkout.
pub fn generate_collection(library_dir: &Path, library_uri: &str) -> Result<StepCollection> {
    let manifest_path = library_dir.join("steplib.yml");
    let raw = fs::read_to_string(&manifest_path)
        .with_context(|| format!("read {}", manifest_path.display()))?;
    let manifest: LibraryManifest = serde_yaml::from_str(&raw)
        .with_context(|| format!("parse {}", manifest_path.display()))?;

    let steps_dir = library_dir.join("steps");
    let mut steps: BTreeMap<String, StepGroup> = BTreeMap::new();
    if steps_dir.is_dir() {
        let walker = WalkDir::new(&steps_dir)
            .min_depth(3)
            .max_depth(3)
            .sort_by_file_name();
        for entry in walker {
            let entry = entry.with_context(|| format!("walk {}", steps_dir.display()))?;
            if entry.file_name() != "step.yml" || !entry.file_type().is_file() {
                continue;
            }
            let Some((id, version)) = id_and_version(&steps_dir, entry.path()) else {
                continue;
            };
            let definition = read_step_definition(entry.path())?;
            steps
                .entry(id)
                .or_default()
                .versions
                .insert(version, definition);
        }
    }

    for (id, group) in &mut steps {
        let info_path = steps_dir.join(id).join("step-info.yml");
        if info_path.is_file() {
            let raw = fs::read_to_string(&info_path)
                .with_context(|| format!("read {}", info_path.display()))?;
            group.info = serde_yaml::from_str::<StepGroupInfo>(&raw)
                .with_context(|| format!("parse {}", info_path.display()))?;
        }
        group.latest_version_number =
            latest_version_of(group.versions.keys().map(String::as_str)).unwrap_or_default();
    }

    let steplib_source = if manifest.steplib_source.is_empty() {
        library_uri.to_string()
    } else {
        manifest.steplib_source
    };
    debug!(steps = steps.len(), "library index generated");
    Ok(StepCollection {
        format_version: manifest.format_version,
        generated_at_timestamp: Utc::now().timestamp(),
        steplib_source,
        download_locations: manifest.download_locations,
        assets_download_base_uri: manifest.assets_download_base_uri,
        steps,
    })
}

fn id_and_version(steps_dir: &Path, step_yml: &Path) -> Option<(String, String)> {
    let relative = step_yml.strip_prefix(steps_dir).ok()?;
    let mut components = relative.components();
    let id = components.next()?.as_os_str().to_str()?.to_string();
    let version = components.next()?.as_os_str().to_str()?.to_string();
    Some((id, version))
}
