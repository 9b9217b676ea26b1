//! Bulk cache warming for offline use.
//!
//! Every retained version of every step in a library is downloaded into the
//! content cache by a fixed pool of worker threads. Jobs flow through a bounded
//! queue; outcomes flow back to a single collector. A failing version never
//! stops its siblings: the pool drains completely and only then is the first
//! failure returned.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Mutex, mpsc};
use std::thread;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, instrument};

use crate::core::models::StepCollection;
use crate::core::retention::{RetentionPolicy, retained_versions};
use crate::io::cache::StepCache;
use crate::io::library::StepLibStore;
use crate::io::paths::RoutePaths;

#[derive(Debug, Clone)]
pub struct PreloadOptions {
    pub retention: RetentionPolicy,
    /// Only steps whose `step-info.yml` names this maintainer.
    pub maintainer: Option<String>,
    pub workers: usize,
    pub now: DateTime<Utc>,
}

impl PreloadOptions {
    pub fn new(workers: usize) -> Self {
        Self {
            retention: RetentionPolicy::default(),
            maintainer: None,
            workers,
            now: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PreloadStatus {
    Ok,
    OkCached,
    Failed,
}

impl fmt::Display for PreloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PreloadStatus::Ok => "OK",
            PreloadStatus::OkCached => "OK (cached)",
            PreloadStatus::Failed => "FAILED",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PreloadResult {
    pub id: String,
    pub version: String,
    pub status: PreloadStatus,
    pub error: Option<String>,
}

/// Outcomes keyed by step id; order within a step follows completion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PreloadReport {
    pub results: BTreeMap<String, Vec<PreloadResult>>,
}

impl PreloadReport {
    pub fn count(&self, status: PreloadStatus) -> usize {
        self.results
            .values()
            .flatten()
            .filter(|result| result.status == status)
            .count()
    }

    pub fn result(&self, id: &str, version: &str) -> Option<&PreloadResult> {
        self.results
            .get(id)?
            .iter()
            .find(|result| result.version == version)
    }

    fn log(&self) {
        info!("Results:");
        for (id, results) in &self.results {
            for result in results {
                match &result.error {
                    Some(err) => {
                        error!(step = %id, version = %result.version, status = %result.status, err = %err);
                    }
                    None => info!(step = %id, version = %result.version, status = %result.status),
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
struct Job {
    id: String,
    version: String,
}

/// Preload one library; `Err` carries the first failure once all workers finish.
///
/// The report is logged either way; callers that need the per-version outcome of
/// a failed run can use [`preload_steps_report`].
pub fn preload_steps(
    store: &StepLibStore,
    library_uri: &str,
    opts: &PreloadOptions,
) -> Result<PreloadReport> {
    let (report, first_failure) = preload_steps_report(store, library_uri, opts)?;
    match first_failure {
        Some(err) => Err(err),
        None => Ok(report),
    }
}

/// Like [`preload_steps`] but always returns the report along with the first failure.
#[instrument(skip_all, fields(library = library_uri, workers = opts.workers))]
pub fn preload_steps_report(
    store: &StepLibStore,
    library_uri: &str,
    opts: &PreloadOptions,
) -> Result<(PreloadReport, Option<anyhow::Error>)> {
    let route = store.setup(library_uri)?;
    let collection = store.read_spec(library_uri)?;
    let jobs = plan_jobs(&collection, opts);
    info!(versions = jobs.len(), "preloading steps");

    let cache = store.cache(&route);
    let workers = opts.workers.max(1);
    let (job_tx, job_rx) = mpsc::sync_channel::<Job>(workers);
    let job_rx = Mutex::new(job_rx);
    let (result_tx, result_rx) = mpsc::sync_channel::<(Job, Result<PreloadStatus>)>(workers);

    let (report, first_failure) = thread::scope(|scope| {
        let collector = scope.spawn(move || {
            let mut report = PreloadReport::default();
            let mut first_failure: Option<anyhow::Error> = None;
            for (job, outcome) in result_rx {
                let (status, error) = match outcome {
                    Ok(status) => (status, None),
                    Err(err) => {
                        let message = format!("{err:#}");
                        if first_failure.is_none() {
                            first_failure = Some(
                                err.context(format!("preload {}@{}", job.id, job.version)),
                            );
                        }
                        (PreloadStatus::Failed, Some(message))
                    }
                };
                report.results.entry(job.id.clone()).or_default().push(PreloadResult {
                    id: job.id,
                    version: job.version,
                    status,
                    error,
                });
            }
            (report, first_failure)
        });

        for _ in 0..workers {
            let result_tx = result_tx.clone();
            let job_rx = &job_rx;
            let (route, collection, cache) = (&route, &collection, &cache);
            scope.spawn(move || {
                loop {
                    let next = match job_rx.lock() {
                        Ok(rx) => rx.recv(),
                        Err(_) => break,
                    };
                    let Ok(job) = next else { break };
                    let outcome = preload_version(store, route, collection, cache, &job);
                    if result_tx.send((job, outcome)).is_err() {
                        break;
                    }
                }
            });
        }
        drop(result_tx);

        for job in jobs {
            if job_tx.send(job).is_err() {
                break;
            }
        }
        drop(job_tx);

        collector
            .join()
            .map_err(|_| anyhow!("preload result collector panicked"))
    })?;

    report.log();
    Ok((report, first_failure))
}

/// Every (id, version) worth caching, in registry order.
fn plan_jobs(collection: &StepCollection, opts: &PreloadOptions) -> Vec<Job> {
    let mut jobs = Vec::new();
    for (id, group) in &collection.steps {
        if let Some(maintainer) = &opts.maintainer
            && group.info.maintainer.as_deref() != Some(maintainer.as_str())
        {
            debug!(step = %id, "skipping step of another maintainer");
            continue;
        }
        if group.is_deprecated() {
            debug!(step = %id, "skipping deprecated step");
            continue;
        }
        for version in retained_versions(id, group, &opts.retention, opts.now) {
            jobs.push(Job {
                id: id.clone(),
                version,
            });
        }
    }
    jobs
}

fn preload_version(
    store: &StepLibStore,
    route: &RoutePaths,
    collection: &StepCollection,
    cache: &StepCache,
    job: &Job,
) -> Result<PreloadStatus> {
    if cache.has(&job.id, &job.version) {
        return Ok(PreloadStatus::OkCached);
    }
    store
        .download_step(route, collection, &job.id, &job.version)
        .with_context(|| format!("download {}@{}", job.id, job.version))?;
    Ok(PreloadStatus::Ok)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::{StepDefinition, StepGroup, StepGroupInfo};

    fn group(versions: &[&str], info: StepGroupInfo) -> StepGroup {
        StepGroup {
            info,
            latest_version_number: versions.first().map(|v| v.to_string()).unwrap_or_default(),
            versions: versions
                .iter()
                .map(|v| (v.to_string(), StepDefinition::default()))
                .collect(),
        }
    }

    #[test]
    fn status_labels_match_report_format() {
        assert_eq!(PreloadStatus::Ok.to_string(), "OK");
        assert_eq!(PreloadStatus::OkCached.to_string(), "OK (cached)");
        assert_eq!(PreloadStatus::Failed.to_string(), "FAILED");
    }

    #[test]
    fn plan_skips_deprecated_and_foreign_steps() {
        let mut collection = StepCollection::default();
        collection.steps.insert(
            "ours".to_string(),
            group(
                &["1.0.0"],
                StepGroupInfo {
                    maintainer: Some("bitrise".to_string()),
                    ..StepGroupInfo::default()
                },
            ),
        );
        collection.steps.insert(
            "theirs".to_string(),
            group(
                &["1.0.0"],
                StepGroupInfo {
                    maintainer: Some("community".to_string()),
                    ..StepGroupInfo::default()
                },
            ),
        );
        collection.steps.insert(
            "old".to_string(),
            group(
                &["1.0.0"],
                StepGroupInfo {
                    maintainer: Some("bitrise".to_string()),
                    deprecate_notes: Some("use ours".to_string()),
                    ..StepGroupInfo::default()
                },
            ),
        );

        let mut opts = PreloadOptions::new(2);
        opts.maintainer = Some("bitrise".to_string());
        let ids: Vec<String> = plan_jobs(&collection, &opts)
            .into_iter()
            .map(|job| job.id)
            .collect();
        assert_eq!(ids, vec!["ours"]);
    }

    #[test]
    fn report_counts_by_status() {
        let mut report = PreloadReport::default();
        report.results.insert(
            "a".to_string(),
            vec![
                PreloadResult {
                    id: "a".to_string(),
                    version: "1.0.0".to_string(),
                    status: PreloadStatus::Ok,
                    error: None,
                },
                PreloadResult {
                    id: "a".to_string(),
                    version: "0.9.0".to_string(),
                    status: PreloadStatus::Failed,
                    error: Some("boom".to_string()),
                },
            ],
        );
        assert_eq!(report.count(PreloadStatus::Ok), 1);
        assert_eq!(report.count(PreloadStatus::Failed), 1);
        assert_eq!(
            report.result("a", "0.9.0").map(|r| r.status),
            Some(PreloadStatus::Failed)
        );
    }
}
