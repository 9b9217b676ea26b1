//! Migration of GOPATH-era steps to Go modules.

use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use tracing::debug;

use super::golang::GoConfiguration;
use crate::error::StepError;
use crate::io::env::ProcessEnv;
use crate::io::fs_util::remove_path;
use crate::io::process::run_command_with_timeout;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleLayout {
    /// `go.mod` present; built as-is.
    Modules,
    /// No `go.mod`; needs migration before building.
    Legacy,
}

pub fn detect_layout(step_dir: &Path) -> ModuleLayout {
    if step_dir.join("go.mod").is_file() {
        ModuleLayout::Modules
    } else {
        ModuleLayout::Legacy
    }
}

/// Turn a legacy step checkout into a vendored module named `package_name`.
///
/// Any existing `vendor/` directory is dropped first; it predates modules and
/// `go mod vendor` rebuilds it from the resolved requirements.
pub fn migrate_to_modules(
    go: &GoConfiguration,
    env: &ProcessEnv,
    package_name: &str,
    step_dir: &Path,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<()> {
    remove_path(&step_dir.join("vendor"))?;

    let steps: [&[&str]; 3] = [
        &["mod", "init", package_name],
        &["mod", "tidy"],
        &["mod", "vendor"],
    ];
    for args in steps {
        debug!(args = ?args, "go module migration");
        let mut cmd = go.command(env);
        cmd.current_dir(step_dir).args(args);
        let out = run_command_with_timeout(cmd, timeout, output_limit_bytes)?;
        if !out.success() {
            return Err(StepError::BuildFailed {
                dir: step_dir.to_path_buf(),
                output: format!("go {}: {}", args.join(" "), out.combined()),
            }
            .into());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_follows_go_mod_presence() {
        let temp = tempfile::tempdir().expect("tempdir");
        assert_eq!(detect_layout(temp.path()), ModuleLayout::Legacy);
        std::fs::write(temp.path().join("go.mod"), "module example.com/s\n").expect("write");
        assert_eq!(detect_layout(temp.path()), ModuleLayout::Modules);
    }

    #[cfg(unix)]
    #[test]
    fn failing_migration_reports_build_failure() {
        use std::os::unix::fs::PermissionsExt;

        let temp = tempfile::tempdir().expect("tempdir");
        let fake_go = temp.path().join("go");
        std::fs::write(&fake_go, "#!/bin/sh\necho \"no network\" >&2\nexit 1\n").expect("write");
        std::fs::set_permissions(&fake_go, std::fs::Permissions::from_mode(0o755)).expect("chmod");
        let step_dir = temp.path().join("step");
        std::fs::create_dir_all(step_dir.join("vendor")).expect("mkdir");

        let go = GoConfiguration {
            go_binary: fake_go,
            goroot: None,
            version: "1.22.0".to_string(),
        };
        let env = ProcessEnv::from_vars([("PATH", "/usr/bin:/bin")]);
        let err = migrate_to_modules(
            &go,
            &env,
            "example.com/s",
            &step_dir,
            Duration::from_secs(10),
            4096,
        )
        .expect_err("fails");
        assert!(!step_dir.join("vendor").exists());
        match err.downcast_ref::<StepError>() {
            Some(StepError::BuildFailed { output, .. }) => {
                assert!(output.contains("go mod init"));
                assert!(output.contains("no network"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
