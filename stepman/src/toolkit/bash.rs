//! Bash toolkit: runs a step's entry script with `bash`.

use std::path::Path;

use anyhow::{Result, bail};

use super::{PrepareOutcome, ToolInfo, Toolkit, ToolkitCheck};
use crate::core::models::StepDefinition;
use crate::core::step_id::CanonicalStepId;
use crate::io::env::ProcessEnv;

const DEFAULT_ENTRY_FILE: &str = "step.sh";

/// Script steps executed by the system `bash`.
#[derive(Debug, Clone, Copy, Default)]
pub struct BashToolkit;

impl Toolkit for BashToolkit {
    fn name(&self) -> &'static str {
        "bash"
    }

    fn check(&self, env: &ProcessEnv) -> Result<ToolkitCheck> {
        let found = env.lookup_program("bash").map(|path| ToolInfo {
            path,
            version: None,
        });
        Ok(ToolkitCheck {
            install_required: found.is_none(),
            found,
        })
    }

    fn install(&self) -> Result<()> {
        bail!("bash is provided by the system and cannot be installed by stepman")
    }

    fn bootstrap(&self, env: &mut ProcessEnv) -> Result<()> {
        env.mark_bootstrapped(self.name());
        Ok(())
    }

    fn is_tool_available(&self, env: &ProcessEnv) -> bool {
        env.lookup_program("bash").is_some()
    }

    fn prepare_for_step_run(
        &self,
        _step: &StepDefinition,
        _step_id: &CanonicalStepId,
        _step_dir: &Path,
        _env: &ProcessEnv,
    ) -> Result<PrepareOutcome> {
        Ok(PrepareOutcome::Ready)
    }

    fn step_run_command_arguments(
        &self,
        step: &StepDefinition,
        _step_id: &CanonicalStepId,
        step_dir: &Path,
    ) -> Result<Vec<String>> {
        let entry = step
            .bash_toolkit()
            .and_then(|bash| bash.entry_file.as_deref())
            .filter(|entry| !entry.is_empty())
            .unwrap_or(DEFAULT_ENTRY_FILE);
        Ok(vec![
            "bash".to_string(),
            step_dir.join(entry).to_string_lossy().into_owned(),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::{BashToolkitDecl, ToolkitDecl};

    #[test]
    fn runs_default_entry_file() {
        let args = BashToolkit
            .step_run_command_arguments(
                &StepDefinition::default(),
                &CanonicalStepId::new("path", "./s", ""),
                Path::new("/steps/s"),
            )
            .expect("args");
        assert_eq!(args, vec!["bash", "/steps/s/step.sh"]);
    }

    #[test]
    fn honours_declared_entry_file() {
        let step = StepDefinition {
            toolkit: Some(ToolkitDecl {
                bash: Some(BashToolkitDecl {
                    entry_file: Some("main.sh".to_string()),
                }),
                ..ToolkitDecl::default()
            }),
            ..StepDefinition::default()
        };
        let args = BashToolkit
            .step_run_command_arguments(
                &step,
                &CanonicalStepId::new("path", "./s", ""),
                Path::new("/steps/s"),
            )
            .expect("args");
        assert_eq!(args[1], "/steps/s/main.sh");
    }
}
