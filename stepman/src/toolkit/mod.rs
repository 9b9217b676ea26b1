//! Toolkits prepare an activated step for execution.
//!
//! Every step runs through exactly one toolkit, chosen from its `toolkit`
//! declaration: `go` selects [`GoToolkit`], `swift` selects [`SwiftToolkit`]
//! and anything else falls back to [`BashToolkit`].

mod bash;
mod golang;
mod gomod;
mod swift;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;

use crate::core::models::StepDefinition;
use crate::core::step_id::CanonicalStepId;
use crate::io::config::GoConfig;
use crate::io::env::ProcessEnv;
use crate::io::fetch::Fetcher;
use crate::io::paths::GoToolkitPaths;
use crate::io::retry::RetryPolicy;

pub use bash::BashToolkit;
pub use golang::{GoConfiguration, GoSelection, GoToolkit, binary_file_name, parse_go_version};
pub use swift::SwiftToolkit;

/// A tool found on the machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInfo {
    pub path: PathBuf,
    pub version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolkitCheck {
    pub install_required: bool,
    pub found: Option<ToolInfo>,
}

/// What `prepare_for_step_run` did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrepareOutcome {
    /// The step runs from its sources as-is.
    Ready,
    /// A previously built binary was reused.
    CacheHit(PathBuf),
    /// The step was compiled into the given binary.
    Compiled(PathBuf),
    /// A prebuilt binary was downloaded into the step directory.
    Downloaded(PathBuf),
}

pub trait Toolkit {
    fn name(&self) -> &'static str;

    /// Report whether a usable toolchain exists or must be installed.
    fn check(&self, env: &ProcessEnv) -> Result<ToolkitCheck>;

    fn install(&self) -> Result<()>;

    /// Make the toolchain visible to step processes; runs at most once per `env`.
    fn bootstrap(&self, env: &mut ProcessEnv) -> Result<()>;

    fn is_tool_available(&self, env: &ProcessEnv) -> bool;

    fn prepare_for_step_run(
        &self,
        step: &StepDefinition,
        step_id: &CanonicalStepId,
        step_dir: &Path,
        env: &ProcessEnv,
    ) -> Result<PrepareOutcome>;

    fn step_run_command_arguments(
        &self,
        step: &StepDefinition,
        step_id: &CanonicalStepId,
        step_dir: &Path,
    ) -> Result<Vec<String>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolkitKind {
    Bash,
    Go,
    Swift,
}

impl ToolkitKind {
    pub fn for_step(step: &StepDefinition) -> Self {
        if step.go_toolkit().is_some() {
            ToolkitKind::Go
        } else if step.swift_toolkit().is_some() {
            ToolkitKind::Swift
        } else {
            ToolkitKind::Bash
        }
    }
}

impl fmt::Display for ToolkitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ToolkitKind::Bash => "bash",
            ToolkitKind::Go => "go",
            ToolkitKind::Swift => "swift",
        })
    }
}

/// The full set of toolkits, sharing one configuration.
#[derive(Debug)]
pub struct Toolkits {
    bash: BashToolkit,
    go: GoToolkit,
    swift: SwiftToolkit,
}

impl Toolkits {
    pub fn new(
        toolkits_dir: &Path,
        go: GoConfig,
        fetcher: Arc<dyn Fetcher>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            bash: BashToolkit,
            go: GoToolkit::new(
                GoToolkitPaths::new(toolkits_dir),
                go,
                Arc::clone(&fetcher),
                retry,
            ),
            swift: SwiftToolkit::new(fetcher, retry),
        }
    }

    pub fn get(&self, kind: ToolkitKind) -> &dyn Toolkit {
        match kind {
            ToolkitKind::Bash => &self.bash,
            ToolkitKind::Go => &self.go,
            ToolkitKind::Swift => &self.swift,
        }
    }

    pub fn for_step(&self, step: &StepDefinition) -> &dyn Toolkit {
        self.get(ToolkitKind::for_step(step))
    }

    pub fn all(&self) -> [&dyn Toolkit; 3] {
        [&self.bash, &self.go, &self.swift]
    }
}
