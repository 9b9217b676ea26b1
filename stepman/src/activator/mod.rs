//! Step activation: materialise a referenced step on disk.
//!
//! The reference shape picks one of three strategies:
//!
//! - [`PathRefActivator`] for `path::` references,
//! - [`GitRefActivator`] for `git::` references,
//! - [`LibraryRefActivator`] for everything resolved through a step library.
//!
//! Every strategy leaves the step's `step.yml` at
//! `<work_dir>/current_step.yml` and reports where the step lives.

mod git_ref;
mod library_ref;
mod path_ref;

use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::Serialize;

use crate::core::models::StepGroupInfo;
use crate::core::step_id::{CanonicalStepId, SourceKind};
use crate::error::StepError;
use crate::io::library::StepLibStore;
use crate::io::platform::current_platform;

pub use git_ref::GitRefActivator;
pub use library_ref::{LibraryRefActivator, resolve_version};
pub use path_ref::PathRefActivator;

/// File name of the activated step definition inside the work dir.
pub const CURRENT_STEP_YML: &str = "current_step.yml";

/// Input of one activation.
#[derive(Debug, Clone, Copy)]
pub struct ActivationRequest<'a> {
    pub step_id: &'a CanonicalStepId,
    /// Directory the step's files are materialised into.
    pub step_dir: &'a Path,
    /// Receives `current_step.yml`.
    pub work_dir: &'a Path,
    /// The library was already refreshed earlier in this workflow run.
    pub did_steplib_update: bool,
    pub offline: bool,
}

impl ActivationRequest<'_> {
    pub fn step_yml_destination(&self) -> PathBuf {
        self.work_dir.join(CURRENT_STEP_YML)
    }
}

/// Registry details of a library-resolved step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepInfo {
    pub library: String,
    pub id: String,
    pub version: String,
    pub latest_version: String,
    /// Constraint as written in the reference.
    pub original_version: String,
    pub group_info: StepGroupInfo,
    /// `step.yml` of the resolved version inside the library checkout.
    pub definition_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivatedStep {
    pub step_yml_path: PathBuf,
    pub step_dir: PathBuf,
    /// Set when a precompiled executable replaced the step sources.
    pub executable_path: Option<PathBuf>,
    /// The library was refreshed during this activation.
    pub did_steplib_update: bool,
    pub step_info: Option<StepInfo>,
}

/// Whether per-platform precompiled executables may be used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutablePolicy {
    pub enabled: bool,
    pub platform: String,
}

impl ExecutablePolicy {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            platform: current_platform(),
        }
    }

    pub fn for_host(enabled: bool) -> Self {
        Self {
            enabled,
            platform: current_platform(),
        }
    }
}

pub trait ActivationStrategy {
    fn activate(&self, request: &ActivationRequest<'_>) -> Result<ActivatedStep>;
}

/// Shared dependencies of all strategies.
#[derive(Debug, Clone)]
pub struct ActivationContext<'a> {
    pub store: &'a StepLibStore,
    /// Relative `path::` references resolve against this directory.
    pub base_dir: PathBuf,
    pub executables: ExecutablePolicy,
}

/// Strategy chosen for one reference.
#[derive(Debug)]
pub enum StepActivator<'a> {
    Path(PathRefActivator),
    Git(GitRefActivator<'a>),
    Library(LibraryRefActivator<'a>),
}

impl<'a> StepActivator<'a> {
    pub fn for_step(step_id: &CanonicalStepId, ctx: &'a ActivationContext<'a>) -> Result<Self> {
        Ok(match step_id.source_kind() {
            SourceKind::Path => StepActivator::Path(PathRefActivator::new(&ctx.base_dir)),
            SourceKind::Git => StepActivator::Git(GitRefActivator::new(ctx.store.fetcher())),
            SourceKind::Library => {
                StepActivator::Library(LibraryRefActivator::new(ctx.store, &ctx.executables))
            }
            SourceKind::Independent => {
                return Err(StepError::UnsupportedSource(step_id.source.clone()).into());
            }
        })
    }
}

impl ActivationStrategy for StepActivator<'_> {
    fn activate(&self, request: &ActivationRequest<'_>) -> Result<ActivatedStep> {
        match self {
            StepActivator::Path(activator) => activator.activate(request),
            StepActivator::Git(activator) => activator.activate(request),
            StepActivator::Library(activator) => activator.activate(request),
        }
    }
}

/// Pick the strategy for `request.step_id` and run it.
pub fn activate_step(
    ctx: &ActivationContext<'_>,
    request: &ActivationRequest<'_>,
) -> Result<ActivatedStep> {
    StepActivator::for_step(request.step_id, ctx)?.activate(request)
}
