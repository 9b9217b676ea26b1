//! Turn an activated step into the command line that runs it.

use std::path::PathBuf;

use anyhow::Result;
use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::activator::ActivatedStep;
use crate::core::step_id::CanonicalStepId;
use crate::io::env::ProcessEnv;
use crate::io::library::read_step_definition;
use crate::toolkit::{PrepareOutcome, Toolkits};

/// Ready-to-spawn step process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepCommand {
    pub argv: Vec<String>,
    pub toolkit: &'static str,
    /// Binary produced or reused by the toolkit, if any.
    pub binary: Option<PathBuf>,
}

/// Bootstrap the step's toolkit into `env` and compute its run arguments.
///
/// Library steps are prepared under their resolved version so compiled
/// binaries are cached per exact release.
#[instrument(skip_all, fields(step = %step_id))]
pub fn prepare_step(
    toolkits: &Toolkits,
    env: &mut ProcessEnv,
    activated: &ActivatedStep,
    step_id: &CanonicalStepId,
) -> Result<StepCommand> {
    if let Some(executable) = &activated.executable_path {
        debug!(path = %executable.display(), "running precompiled executable");
        return Ok(StepCommand {
            argv: vec![executable.to_string_lossy().into_owned()],
            toolkit: "executable",
            binary: Some(executable.clone()),
        });
    }

    let resolved_id = match &activated.step_info {
        Some(info) => CanonicalStepId::new(&step_id.source, &step_id.id_or_uri, &info.version),
        None => step_id.clone(),
    };

    let definition = read_step_definition(&activated.step_yml_path)?;
    let toolkit = toolkits.for_step(&definition);
    toolkit.bootstrap(env)?;
    let outcome =
        toolkit.prepare_for_step_run(&definition, &resolved_id, &activated.step_dir, env)?;
    let binary = match outcome {
        PrepareOutcome::Ready => None,
        PrepareOutcome::CacheHit(path)
        | PrepareOutcome::Compiled(path)
        | PrepareOutcome::Downloaded(path) => Some(path),
    };
    let argv =
        toolkit.step_run_command_arguments(&definition, &resolved_id, &activated.step_dir)?;
    info!(toolkit = toolkit.name(), "step prepared");
    Ok(StepCommand {
        argv,
        toolkit: toolkit.name(),
        binary,
    })
}
