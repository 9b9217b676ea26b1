//! Go toolkit: toolchain selection, install, bootstrap and step compilation.
//!
//! Compiled step binaries live in `<toolkits>/go/cache/` and are reused only
//! for references that always denote the same content.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use regex::Regex;
use tracing::{debug, info, instrument, warn};

use super::gomod::{ModuleLayout, detect_layout, migrate_to_modules};
use super::{PrepareOutcome, ToolInfo, Toolkit, ToolkitCheck};
use crate::core::models::StepDefinition;
use crate::core::semver::is_version_greater_or_equal;
use crate::core::step_id::CanonicalStepId;
use crate::error::StepError;
use crate::io::config::GoConfig;
use crate::io::env::ProcessEnv;
use crate::io::fetch::Fetcher;
use crate::io::fs_util::remove_path;
use crate::io::paths::GoToolkitPaths;
use crate::io::platform::{go_arch, go_os};
use crate::io::process::run_command_with_timeout;
use crate::io::retry::{RetryPolicy, retry};

const TOOLKIT_NAME: &str = "go";

/// One candidate Go toolchain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoConfiguration {
    pub go_binary: PathBuf,
    /// Set for toolkit-managed installs; system installs know their own root.
    pub goroot: Option<PathBuf>,
    pub version: String,
}

impl GoConfiguration {
    /// `go` with the step environment applied.
    pub fn command(&self, env: &ProcessEnv) -> Command {
        let mut cmd = Command::new(&self.go_binary);
        env.apply(&mut cmd);
        if let Some(goroot) = &self.goroot {
            cmd.env("GOROOT", goroot);
        }
        cmd
    }
}

/// Outcome of looking for a usable toolchain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GoSelection {
    Usable(GoConfiguration),
    /// Only toolchains older than the minimum exist; the newest one is reported.
    TooOld(GoConfiguration),
    Missing,
}

#[derive(Debug, Clone)]
pub struct GoToolkit {
    paths: GoToolkitPaths,
    config: GoConfig,
    fetcher: Arc<dyn Fetcher>,
    retry: RetryPolicy,
}

impl GoToolkit {
    pub fn new(
        paths: GoToolkitPaths,
        config: GoConfig,
        fetcher: Arc<dyn Fetcher>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            paths,
            config,
            fetcher,
            retry,
        }
    }

    pub fn paths(&self) -> &GoToolkitPaths {
        &self.paths
    }

    /// Pick the first candidate (`go` on PATH, then the toolkit install) that
    /// satisfies the minimum version.
    pub fn select_configuration(&self, env: &ProcessEnv) -> Result<GoSelection> {
        let mut candidates: Vec<(PathBuf, Option<PathBuf>)> = Vec::new();
        if let Some(system) = env.lookup_program("go") {
            candidates.push((system, None));
        }
        let managed = self.paths.go_binary();
        if managed.is_file() {
            candidates.push((managed, Some(self.paths.goroot())));
        }

        let mut too_old: Option<GoConfiguration> = None;
        for (go_binary, goroot) in candidates {
            let version = match self.query_version(&go_binary, goroot.as_deref(), env) {
                Ok(version) => version,
                Err(err) => {
                    warn!(binary = %go_binary.display(), err = %format!("{err:#}"), "skipping go candidate");
                    continue;
                }
            };
            let candidate = GoConfiguration {
                go_binary,
                goroot,
                version,
            };
            if is_version_greater_or_equal(&candidate.version, &self.config.min_version)? {
                debug!(binary = %candidate.go_binary.display(), version = %candidate.version, "go toolchain selected");
                return Ok(GoSelection::Usable(candidate));
            }
            let newer = too_old.as_ref().is_none_or(|current| {
                is_version_greater_or_equal(&candidate.version, &current.version).unwrap_or(false)
            });
            if newer {
                too_old = Some(candidate);
            }
        }
        Ok(too_old.map_or(GoSelection::Missing, GoSelection::TooOld))
    }

    fn query_version(
        &self,
        go_binary: &Path,
        goroot: Option<&Path>,
        env: &ProcessEnv,
    ) -> Result<String> {
        let config = GoConfiguration {
            go_binary: go_binary.to_path_buf(),
            goroot: goroot.map(Path::to_path_buf),
            version: String::new(),
        };
        let mut cmd = config.command(env);
        cmd.arg("version");
        let out = run_command_with_timeout(cmd, Duration::from_secs(30), 64 * 1024)?;
        if !out.success() {
            bail!("go version failed: {}", out.combined().trim());
        }
        parse_go_version(&String::from_utf8_lossy(&out.stdout))
    }

    fn archive_name(&self) -> String {
        let ext = if go_os() == "windows" { "zip" } else { "tar.gz" };
        format!(
            "go{}.{}-{}.{ext}",
            self.config.min_version,
            go_os(),
            go_arch()
        )
    }

    fn build_timeout(&self) -> Duration {
        Duration::from_secs(self.config.build_timeout_secs)
    }

    #[instrument(skip_all, fields(dir = %step_dir.display(), output = %output.display()))]
    fn build(
        &self,
        go: &GoConfiguration,
        package_name: &str,
        step_dir: &Path,
        output: &Path,
        env: &ProcessEnv,
    ) -> Result<()> {
        let layout = detect_layout(step_dir);
        if layout == ModuleLayout::Legacy {
            info!(package = package_name, "migrating legacy step to go modules");
            migrate_to_modules(
                go,
                env,
                package_name,
                step_dir,
                self.build_timeout(),
                self.config.output_limit_bytes,
            )?;
        }

        let parent = output
            .parent()
            .with_context(|| format!("binary path missing parent {}", output.display()))?;
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
        let staged = parent.join(format!(
            ".{}.build.{}",
            output
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            std::process::id()
        ));

        let mut cmd = go.command(env);
        cmd.current_dir(step_dir).arg("build");
        if layout == ModuleLayout::Legacy {
            cmd.arg("-mod=vendor");
        }
        cmd.arg("-o").arg(&staged);
        let out = run_command_with_timeout(cmd, self.build_timeout(), self.config.output_limit_bytes)?;
        if !out.success() {
            remove_path(&staged)?;
            return Err(StepError::BuildFailed {
                dir: step_dir.to_path_buf(),
                output: out.combined(),
            }
            .into());
        }
        fs::rename(&staged, output)
            .with_context(|| format!("move binary into {}", output.display()))?;
        Ok(())
    }
}

impl Toolkit for GoToolkit {
    fn name(&self) -> &'static str {
        TOOLKIT_NAME
    }

    fn check(&self, env: &ProcessEnv) -> Result<ToolkitCheck> {
        Ok(match self.select_configuration(env)? {
            GoSelection::Usable(config) => ToolkitCheck {
                install_required: false,
                found: Some(ToolInfo {
                    path: config.go_binary,
                    version: Some(config.version),
                }),
            },
            GoSelection::TooOld(config) => ToolkitCheck {
                install_required: true,
                found: Some(ToolInfo {
                    path: config.go_binary,
                    version: Some(config.version),
                }),
            },
            GoSelection::Missing => ToolkitCheck {
                install_required: true,
                found: None,
            },
        })
    }

    #[instrument(skip_all, fields(version = %self.config.min_version))]
    fn install(&self) -> Result<()> {
        let name = self.archive_name();
        let url = format!(
            "{}/{name}",
            self.config.download_base_url.trim_end_matches('/')
        );
        let archive = self.paths.tmp_dir.join(&name);
        fs::create_dir_all(&self.paths.tmp_dir)
            .with_context(|| format!("create directory {}", self.paths.tmp_dir.display()))?;

        info!(url = %url, "downloading go toolchain");
        retry(self.retry, "download go toolchain", || {
            self.fetcher.download(&url, &archive)
        })?;

        remove_path(&self.paths.install_dir)?;
        fs::create_dir_all(&self.paths.install_dir)
            .with_context(|| format!("create directory {}", self.paths.install_dir.display()))?;

        let extracted = if name.ends_with(".zip") {
            crate::io::download::extract_zip(&archive, &self.paths.install_dir)
        } else {
            let mut cmd = Command::new("tar");
            cmd.arg("-C")
                .arg(&self.paths.install_dir)
                .arg("-xzf")
                .arg(&archive);
            run_command_with_timeout(cmd, Duration::from_secs(600), 64 * 1024).and_then(|out| {
                if out.success() {
                    Ok(())
                } else {
                    Err(anyhow!("extract go toolchain: {}", out.combined().trim()))
                }
            })
        };
        remove_path(&archive)?;
        extracted?;

        if !self.paths.go_binary().is_file() {
            bail!(
                "go toolchain archive did not contain {}",
                self.paths.go_binary().display()
            );
        }
        info!("go toolchain installed");
        Ok(())
    }

    fn bootstrap(&self, env: &mut ProcessEnv) -> Result<()> {
        if env.is_bootstrapped(TOOLKIT_NAME) {
            return Ok(());
        }
        let system_usable = matches!(
            self.select_configuration(env)?,
            GoSelection::Usable(GoConfiguration { goroot: None, .. })
        );
        if !system_usable {
            env.prepend_path(&self.paths.bin_dir());
            env.set("GOROOT", self.paths.goroot().to_string_lossy().into_owned());
            debug!(goroot = %self.paths.goroot().display(), "go toolkit bootstrapped");
        }
        env.mark_bootstrapped(TOOLKIT_NAME);
        Ok(())
    }

    fn is_tool_available(&self, env: &ProcessEnv) -> bool {
        env.lookup_program("go").is_some()
    }

    #[instrument(skip_all, fields(step = %step_id))]
    fn prepare_for_step_run(
        &self,
        step: &StepDefinition,
        step_id: &CanonicalStepId,
        step_dir: &Path,
        env: &ProcessEnv,
    ) -> Result<PrepareOutcome> {
        let binary = self.paths.cache_dir.join(binary_file_name(step_id));
        if step_id.is_unique_resource_id() && binary.is_file() {
            debug!(binary = %binary.display(), "reusing compiled step binary");
            return Ok(PrepareOutcome::CacheHit(binary));
        }

        let package_name = step
            .go_toolkit()
            .map(|go| go.package_name.trim())
            .filter(|name| !name.is_empty())
            .ok_or_else(|| StepError::MissingToolkit {
                id: step_id.id_or_uri.clone(),
                toolkit: TOOLKIT_NAME.to_string(),
            })?;

        let go = match self.select_configuration(env)? {
            GoSelection::Usable(go) => go,
            GoSelection::TooOld(found) => {
                return Err(StepError::ToolchainTooOld {
                    tool: TOOLKIT_NAME.to_string(),
                    found: found.version,
                    required: self.config.min_version.clone(),
                }
                .into());
            }
            GoSelection::Missing => {
                return Err(StepError::ToolchainTooOld {
                    tool: TOOLKIT_NAME.to_string(),
                    found: "none".to_string(),
                    required: self.config.min_version.clone(),
                }
                .into());
            }
        };

        self.build(&go, package_name, step_dir, &binary, env)?;
        Ok(PrepareOutcome::Compiled(binary))
    }

    fn step_run_command_arguments(
        &self,
        _step: &StepDefinition,
        step_id: &CanonicalStepId,
        _step_dir: &Path,
    ) -> Result<Vec<String>> {
        let binary = self.paths.cache_dir.join(binary_file_name(step_id));
        Ok(vec![binary.to_string_lossy().into_owned()])
    }
}

/// Filesystem-safe cache name for a step's compiled binary.
pub fn binary_file_name(step_id: &CanonicalStepId) -> String {
    static UNSAFE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"[^A-Za-z0-9.-]").expect("valid regex"));
    let composite = format!(
        "{}-{}-{}",
        step_id.source, step_id.id_or_uri, step_id.version
    );
    UNSAFE.replace_all(&composite, "_").into_owned()
}

/// Extract the version from `go version` output.
pub fn parse_go_version(output: &str) -> Result<String> {
    static VERSION: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"go version go(?P<version>[0-9.]+)[a-zA-Z0-9]* (?P<platform>[a-zA-Z0-9]+/[a-zA-Z0-9]+)")
            .expect("valid regex")
    });
    let trimmed = output.trim();
    if trimmed.is_empty() {
        bail!("Failed to parse Go version, error: version call output was empty");
    }
    let captures = VERSION.captures(trimmed).ok_or_else(|| {
        anyhow!("Failed to parse Go version, error: failed to find version in input: {trimmed}")
    })?;
    Ok(captures["version"].trim_end_matches('.').to_string())
}
