//! Swift toolkit: prebuilt step binaries with a `swift run` fallback.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use tracing::debug;

use super::{PrepareOutcome, ToolInfo, Toolkit, ToolkitCheck};
use crate::core::models::StepDefinition;
use crate::core::step_id::CanonicalStepId;
use crate::error::StepError;
use crate::io::download::download_executable;
use crate::io::env::ProcessEnv;
use crate::io::fetch::Fetcher;
use crate::io::retry::RetryPolicy;

/// Steps shipping a prebuilt binary, or run from source with `swift run`.
#[derive(Debug, Clone)]
pub struct SwiftToolkit {
    fetcher: Arc<dyn Fetcher>,
    retry: RetryPolicy,
}

impl SwiftToolkit {
    pub fn new(fetcher: Arc<dyn Fetcher>, retry: RetryPolicy) -> Self {
        Self { fetcher, retry }
    }
}

impl Toolkit for SwiftToolkit {
    fn name(&self) -> &'static str {
        "swift"
    }

    /// Prebuilt binaries need no toolchain, so nothing ever has to be installed.
    fn check(&self, env: &ProcessEnv) -> Result<ToolkitCheck> {
        Ok(ToolkitCheck {
            install_required: false,
            found: env.lookup_program("swift").map(|path| ToolInfo {
                path,
                version: None,
            }),
        })
    }

    fn install(&self) -> Result<()> {
        Ok(())
    }

    fn bootstrap(&self, env: &mut ProcessEnv) -> Result<()> {
        env.mark_bootstrapped(self.name());
        Ok(())
    }

    fn is_tool_available(&self, env: &ProcessEnv) -> bool {
        env.lookup_program("swift").is_some()
    }

    fn prepare_for_step_run(
        &self,
        step: &StepDefinition,
        step_id: &CanonicalStepId,
        step_dir: &Path,
        _env: &ProcessEnv,
    ) -> Result<PrepareOutcome> {
        let decl = step
            .swift_toolkit()
            .ok_or_else(|| StepError::MissingToolkit {
                id: step_id.id_or_uri.clone(),
                toolkit: self.name().to_string(),
            })?;
        let Some(location) = decl.binary_location.as_deref().filter(|l| !l.is_empty()) else {
            debug!("no prebuilt binary declared");
            return Ok(PrepareOutcome::Ready);
        };
        let dest = step_dir.join(&decl.executable_name);
        let hash = decl.hash.as_deref().unwrap_or_default();
        let path = download_executable(self.fetcher.as_ref(), location, hash, &dest, self.retry)?;
        Ok(PrepareOutcome::Downloaded(path))
    }

    fn step_run_command_arguments(
        &self,
        step: &StepDefinition,
        _step_id: &CanonicalStepId,
        step_dir: &Path,
    ) -> Result<Vec<String>> {
        let decl = step.swift_toolkit();
        if let Some(decl) = decl
            && decl.binary_location.as_deref().is_some_and(|l| !l.is_empty())
        {
            let exe = step_dir.join(&decl.executable_name);
            return Ok(vec![exe.to_string_lossy().into_owned()]);
        }
        Ok(vec![
            "swift".to_string(),
            "run".to_string(),
            "--package-path".to_string(),
            step_dir.to_string_lossy().into_owned(),
            "-c".to_string(),
            "release".to_string(),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::{SwiftToolkitDecl, ToolkitDecl};
    use crate::io::integrity::sha256_bytes;
    use crate::test_support::FakeFetcher;

    const URL: &str = "https://dl.example.com/hello-swift";
    const BINARY: &[u8] = b"\x7fELF swift step";

    fn swift_step(binary_location: Option<&str>, hash: &str) -> StepDefinition {
        StepDefinition {
            toolkit: Some(ToolkitDecl {
                swift: Some(SwiftToolkitDecl {
                    binary_location: binary_location.map(str::to_string),
                    executable_name: "hello".to_string(),
                    hash: Some(hash.to_string()),
                }),
                ..ToolkitDecl::default()
            }),
            ..StepDefinition::default()
        }
    }

    fn toolkit(fetcher: &Arc<FakeFetcher>) -> SwiftToolkit {
        let shared: Arc<dyn Fetcher> = fetcher.clone();
        SwiftToolkit::new(shared, RetryPolicy::once())
    }

    fn step_id() -> CanonicalStepId {
        CanonicalStepId::new("https://lib.example.com/steplib.git", "hello", "1.0.0")
    }

    #[test]
    fn without_binary_location_runs_from_source() {
        let temp = tempfile::tempdir().expect("tempdir");
        let fetcher = Arc::new(FakeFetcher::new());
        let swift = toolkit(&fetcher);
        let step = swift_step(None, "");

        let outcome = swift
            .prepare_for_step_run(&step, &step_id(), temp.path(), &ProcessEnv::default())
            .expect("prepare");
        assert_eq!(outcome, PrepareOutcome::Ready);
        assert_eq!(fetcher.network_calls(), 0);

        let args = swift
            .step_run_command_arguments(&step, &step_id(), temp.path())
            .expect("args");
        let dir = temp.path().to_string_lossy().into_owned();
        assert_eq!(
            args,
            vec!["swift", "run", "--package-path", dir.as_str(), "-c", "release"]
        );
    }

    #[test]
    fn declared_binary_is_downloaded_and_run_directly() {
        let temp = tempfile::tempdir().expect("tempdir");
        let fetcher = Arc::new(FakeFetcher::new());
        fetcher.serve_download(URL, BINARY);
        let swift = toolkit(&fetcher);
        let step = swift_step(Some(URL), &format!("sha256-{}", sha256_bytes(BINARY)));

        let outcome = swift
            .prepare_for_step_run(&step, &step_id(), temp.path(), &ProcessEnv::default())
            .expect("prepare");
        let exe = temp.path().join("hello");
        assert_eq!(outcome, PrepareOutcome::Downloaded(exe.clone()));
        assert_eq!(std::fs::read(&exe).expect("read"), BINARY);
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&exe).expect("stat").permissions().mode();
            assert_eq!(mode & 0o777, 0o755);
        }

        let args = swift
            .step_run_command_arguments(&step, &step_id(), temp.path())
            .expect("args");
        assert_eq!(args, vec![exe.to_string_lossy().into_owned()]);
    }

    #[test]
    fn mismatching_binary_is_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let fetcher = Arc::new(FakeFetcher::new());
        fetcher.serve_download(URL, BINARY);
        let swift = toolkit(&fetcher);
        let step = swift_step(Some(URL), &format!("sha256-{}", sha256_bytes(b"other")));

        let err = swift
            .prepare_for_step_run(&step, &step_id(), temp.path(), &ProcessEnv::default())
            .expect_err("mismatch");
        assert!(matches!(
            err.downcast_ref::<StepError>(),
            Some(StepError::HashMismatch { .. })
        ));
        assert!(!temp.path().join("hello").exists());
    }

    #[test]
    fn step_without_swift_declaration_is_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let fetcher = Arc::new(FakeFetcher::new());
        let err = toolkit(&fetcher)
            .prepare_for_step_run(
                &StepDefinition::default(),
                &step_id(),
                temp.path(),
                &ProcessEnv::default(),
            )
            .expect_err("no declaration");
        assert!(matches!(
            err.downcast_ref::<StepError>(),
            Some(StepError::MissingToolkit { .. })
        ));
    }
}
