//! Activation of steps referenced by a local directory (`path::`).

use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use tracing::{debug, instrument};

use super::{ActivatedStep, ActivationRequest, ActivationStrategy};
use crate::io::fs_util::{clear_dir, copy_dir, copy_file, is_same_dir};

/// Activates a step from a local directory.
#[derive(Debug, Clone)]
pub struct PathRefActivator {
    base_dir: PathBuf,
}

impl PathRefActivator {
    pub fn new(base_dir: &Path) -> Self {
        Self {
            base_dir: base_dir.to_path_buf(),
        }
    }

    fn resolve(&self, raw: &str) -> PathBuf {
        let path = Path::new(raw);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }
}

impl ActivationStrategy for PathRefActivator {
    #[instrument(skip_all, fields(path = %request.step_id.id_or_uri))]
    fn activate(&self, request: &ActivationRequest<'_>) -> Result<ActivatedStep> {
        let source_dir = self.resolve(&request.step_id.id_or_uri);
        if !source_dir.is_dir() {
            bail!(
                "the provided directory doesn't exist: {}",
                source_dir.display()
            );
        }
        let step_yml = source_dir.join("step.yml");
        if !step_yml.is_file() {
            bail!("step.yml doesn't exist at {}", step_yml.display());
        }

        if is_same_dir(&source_dir, request.step_dir) {
            debug!(dir = %source_dir.display(), "step already in place");
        } else {
            clear_dir(request.step_dir, &[])?;
            copy_dir(&source_dir, request.step_dir)?;
            debug!(dir = %source_dir.display(), "local step activated");
        }
        let step_yml_path = request.step_yml_destination();
        copy_file(&step_yml, &step_yml_path)?;

        Ok(ActivatedStep {
            step_yml_path,
            step_dir: request.step_dir.to_path_buf(),
            executable_path: None,
            did_steplib_update: false,
            step_info: None,
        })
    }
}
