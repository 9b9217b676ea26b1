//! Activation of library steps against an on-disk fixture library.
//!
//! Sources are served by `FakeFetcher`, so every test runs without network and
//! can count how often the engine reached out.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use stepman::activator::{
    ActivatedStep, ActivationContext, ActivationRequest, ExecutablePolicy, activate_step,
};
use stepman::core::step_id::CanonicalStepId;
use stepman::error::StepError;
use stepman::io::fetch::Fetcher;
use stepman::io::library::StepLibStore;
use stepman::io::paths::StepmanPaths;
use stepman::io::retry::RetryPolicy;
use stepman::test_support::{FakeFetcher, FixtureLibrary};
use tempfile::TempDir;

struct Harness {
    temp: TempDir,
    fetcher: Arc<FakeFetcher>,
    library: FixtureLibrary,
    store: StepLibStore,
}

impl Harness {
    fn new() -> Self {
        let temp = tempfile::tempdir().expect("tempdir");
        let fetcher = Arc::new(FakeFetcher::new());
        let library = FixtureLibrary::new(&temp.path().join("fixture")).expect("fixture");
        let shared: Arc<dyn Fetcher> = fetcher.clone();
        let store = StepLibStore::new(
            StepmanPaths::new(temp.path().join("home")),
            shared,
            RetryPolicy::once(),
        );
        Self {
            temp,
            fetcher,
            library,
            store,
        }
    }

    fn publish(&self, id: &str, version: &str) {
        self.library
            .publish(&self.fetcher, id, version, "")
            .expect("publish");
    }

    fn dir(&self, name: &str) -> PathBuf {
        self.temp.path().join(name)
    }

    fn activate(
        &self,
        version: &str,
        run: &str,
        did_steplib_update: bool,
        offline: bool,
    ) -> anyhow::Result<ActivatedStep> {
        let step_id = CanonicalStepId::new(self.library.uri(), "script", version);
        let ctx = ActivationContext {
            store: &self.store,
            base_dir: self.temp.path().to_path_buf(),
            executables: ExecutablePolicy::disabled(),
        };
        let step_dir = self.dir(&format!("{run}/step"));
        let work_dir = self.dir(&format!("{run}/work"));
        let request = ActivationRequest {
            step_id: &step_id,
            step_dir: &step_dir,
            work_dir: &work_dir,
            did_steplib_update,
            offline,
        };
        activate_step(&ctx, &request)
    }
}

fn step_error(err: &anyhow::Error) -> &StepError {
    err.downcast_ref::<StepError>()
        .unwrap_or_else(|| panic!("expected StepError, got {err:#}"))
}

fn read(path: &Path) -> String {
    fs::read_to_string(path).unwrap_or_else(|err| panic!("read {}: {err}", path.display()))
}

#[test]
fn pinned_version_is_fetched_once_then_served_from_cache() {
    let h = Harness::new();
    h.publish("script", "1.0.0");
    h.publish("script", "1.1.0");

    let first = h.activate("1.0.0", "run1", false, false).expect("first");
    let second = h.activate("1.0.0", "run2", false, false).expect("second");

    assert_eq!(h.fetcher.clone_calls(), 1);
    assert!(!first.did_steplib_update);
    assert_eq!(
        read(&first.step_dir.join("step.sh")),
        read(&second.step_dir.join("step.sh"))
    );
    assert!(read(&second.step_dir.join("step.sh")).contains("script 1.0.0"));
    assert_eq!(
        read(&second.step_yml_path),
        read(&h.library.library_dir().join("steps/script/1.0.0/step.yml"))
    );
    assert_eq!(second.step_yml_path, h.dir("run2/work/current_step.yml"));

    let info = second.step_info.expect("step info");
    assert_eq!(info.version, "1.0.0");
    assert_eq!(info.latest_version, "1.1.0");
    assert_eq!(info.original_version, "1.0.0");
}

#[test]
fn major_lock_resolves_to_newest_matching_release() {
    let h = Harness::new();
    for version in ["1.0.0", "1.2.0", "1.10.1", "2.0.0"] {
        h.publish("script", version);
    }

    let activated = h.activate("1", "run", false, false).expect("activate");
    let info = activated.step_info.expect("step info");
    assert_eq!(info.version, "1.10.1");
    assert_eq!(info.latest_version, "2.0.0");
    assert_eq!(info.original_version, "1");
    assert!(activated.did_steplib_update);
}

#[test]
fn minor_lock_without_match_is_version_not_found() {
    let h = Harness::new();
    h.publish("script", "1.0.0");

    let err = h.activate("1.3", "run", true, false).expect_err("no 1.3.x");
    assert!(matches!(
        step_error(&err),
        StepError::VersionNotFound { constraint, .. } if constraint == "1.3"
    ));
}

#[test]
fn malformed_constraint_fails_before_library_setup() {
    let h = Harness::new();
    h.publish("script", "1.0.0");

    let err = h.activate("1.x.x", "run", false, false).expect_err("invalid");
    assert!(matches!(
        step_error(&err),
        StepError::InvalidConstraint { version, .. } if version == "1.x.x"
    ));
    assert!(h.store.route(&h.library.uri()).expect("route").is_none());
    assert_eq!(h.fetcher.network_calls(), 0);
}

#[test]
fn floating_constraint_refreshes_once_per_workflow() {
    let h = Harness::new();
    h.publish("script", "1.0.0");

    let refreshed = h.activate("", "run1", false, false).expect("latest");
    assert!(refreshed.did_steplib_update);

    h.publish("script", "1.1.0");
    let stale = h.activate("", "run2", true, false).expect("latest again");
    assert!(!stale.did_steplib_update);
    assert_eq!(stale.step_info.expect("info").version, "1.0.0");
}

#[test]
fn unknown_version_triggers_a_single_refresh() {
    let h = Harness::new();
    h.publish("script", "1.0.0");
    h.activate("1.0.0", "run1", false, false).expect("setup");

    h.publish("script", "2.0.0");
    let err = h
        .activate("2.0.0", "run2", true, false)
        .expect_err("index already refreshed this workflow");
    assert!(matches!(
        step_error(&err),
        StepError::VersionNotFound { .. }
    ));

    let activated = h.activate("2.0.0", "run3", false, false).expect("refresh");
    assert!(activated.did_steplib_update);
    assert!(read(&activated.step_dir.join("step.sh")).contains("script 2.0.0"));
}

#[test]
fn activating_into_a_reused_dir_replaces_the_previous_version() {
    let h = Harness::new();
    h.publish("script", "1.0.0");
    h.publish("script", "1.1.0");

    let first = h.activate("1.0.0", "run", false, false).expect("first");
    fs::write(first.step_dir.join("leftover.txt"), "stale").expect("write");

    let second = h.activate("1.1.0", "run", false, false).expect("second");
    assert_eq!(second.step_dir, first.step_dir);
    assert!(!second.step_dir.join("leftover.txt").exists());
    assert!(read(&second.step_dir.join("step.sh")).contains("script 1.1.0"));
}

#[test]
fn unknown_step_is_not_found() {
    let h = Harness::new();
    h.publish("script", "1.0.0");

    let step_id = CanonicalStepId::new(h.library.uri(), "missing", "1.0.0");
    let ctx = ActivationContext {
        store: &h.store,
        base_dir: h.temp.path().to_path_buf(),
        executables: ExecutablePolicy::disabled(),
    };
    let (step_dir, work_dir) = (h.dir("step"), h.dir("work"));
    let err = activate_step(
        &ctx,
        &ActivationRequest {
            step_id: &step_id,
            step_dir: &step_dir,
            work_dir: &work_dir,
            did_steplib_update: false,
            offline: false,
        },
    )
    .expect_err("missing step");
    assert!(matches!(
        step_error(&err),
        StepError::StepNotFound { id, .. } if id == "missing"
    ));
}

#[test]
fn offline_miss_lists_cached_versions_without_network() {
    let h = Harness::new();
    for version in ["1.0.0", "1.1.0", "2.0.0"] {
        h.publish("script", version);
    }
    h.activate("1.0.0", "run1", false, false).expect("cache 1.0.0");
    h.activate("1.1.0", "run2", false, false).expect("cache 1.1.0");
    let calls = h.fetcher.network_calls();

    let err = h.activate("2.0.0", "run3", false, true).expect_err("offline");
    match step_error(&err) {
        StepError::OfflineUnavailable {
            id,
            version,
            cached,
        } => {
            assert_eq!(id, "script");
            assert_eq!(version, "2.0.0");
            assert_eq!(cached, &vec!["1.1.0".to_string(), "1.0.0".to_string()]);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.to_string().contains("- 1.1.0"));
    assert_eq!(h.fetcher.network_calls(), calls);
    assert!(!h.dir("run3/work/current_step.yml").exists());

    let cached = h.activate("1.0.0", "run4", false, true).expect("offline hit");
    assert!(cached.step_dir.join("step.sh").is_file());
    assert_eq!(h.fetcher.network_calls(), calls);
}

#[test]
fn commit_mismatch_fails_the_download() {
    let h = Harness::new();
    h.publish("script", "1.0.0");
    h.fetcher.set_head_commit(
        &stepman::test_support::step_repo_url("script"),
        Some("1.0.0"),
        "tampered",
    );

    let err = h.activate("1.0.0", "run", false, false).expect_err("mismatch");
    assert!(matches!(
        step_error(&err),
        StepError::DownloadFailed { reason, .. } if reason.contains("commit mismatch")
    ));
    let route = h
        .store
        .route(&h.library.uri())
        .expect("route")
        .expect("set up");
    assert!(!h.store.cache(&route).has("script", "1.0.0"));
}
