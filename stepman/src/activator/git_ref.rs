//! Activation of steps cloned from a git repository (`git::`).

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use tracing::{instrument, warn};

use super::{ActivatedStep, ActivationRequest, ActivationStrategy};
use crate::io::fetch::Fetcher;
use crate::io::fs_util::{clear_dir, copy_dir, copy_file, remove_path};
use crate::io::git::CloneOptions;

/// Activates a step straight from a git repository (tag or branch).
#[derive(Debug, Clone, Copy)]
pub struct GitRefActivator<'a> {
    fetcher: &'a dyn Fetcher,
}

impl<'a> GitRefActivator<'a> {
    pub fn new(fetcher: &'a dyn Fetcher) -> Self {
        Self { fetcher }
    }
}

impl ActivationStrategy for GitRefActivator<'_> {
    #[instrument(skip_all, fields(url = %request.step_id.id_or_uri, reference = %request.step_id.version))]
    fn activate(&self, request: &ActivationRequest<'_>) -> Result<ActivatedStep> {
        let url = request.step_id.id_or_uri.as_str();
        let reference = Some(request.step_id.version.as_str()).filter(|v| !v.is_empty());

        let checkout = request
            .work_dir
            .join(format!(".git-step.{}", std::process::id()));
        remove_path(&checkout)?;
        let cloned = self.fetcher.clone_repo(
            url,
            &checkout,
            &CloneOptions {
                reference,
                depth: Some(1),
            },
        );
        if let Err(err) = cloned {
            if let Err(cleanup) = remove_path(&checkout) {
                warn!(err = %cleanup, "failed to remove partial checkout");
            }
            if url.starts_with("git@") {
                warn!(
                    "cloning over SSH failed; if the repository is public, reference it with an https:// URL"
                );
            }
            return Err(err).with_context(|| format!("clone step repository {url}"));
        }

        let result = materialize(&checkout, url, request);
        remove_path(&checkout)?;
        let step_yml_path = result?;

        Ok(ActivatedStep {
            step_yml_path,
            step_dir: request.step_dir.to_path_buf(),
            executable_path: None,
            did_steplib_update: false,
            step_info: None,
        })
    }
}

fn materialize(checkout: &Path, url: &str, request: &ActivationRequest<'_>) -> Result<PathBuf> {
    let step_yml = checkout.join("step.yml");
    if !step_yml.is_file() {
        bail!("step.yml doesn't exist in {url}");
    }
    // The checkout sits in the work dir, which may be the step dir itself.
    let keep: Vec<&OsStr> = checkout
        .file_name()
        .filter(|_| checkout.parent() == Some(request.step_dir))
        .into_iter()
        .collect();
    clear_dir(request.step_dir, &keep)?;
    copy_dir(checkout, request.step_dir)?;
    let step_yml_path = request.step_yml_destination();
    copy_file(&step_yml, &step_yml_path)?;
    Ok(step_yml_path)
}
