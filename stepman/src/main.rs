//! `stepman`: resolve, activate and preload CI steps.
//!
//! Engine state lives under `$STEPMAN_HOME` (default `~/.stepman`):
//! `routing.json`, `config.toml`, one folder per library and the toolkits.

use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use stepman::activator::{
    ActivatedStep, ActivationContext, ActivationRequest, ExecutablePolicy, activate_step,
};
use stepman::core::retention::RetentionPolicy;
use stepman::core::step_id::CanonicalStepId;
use stepman::exit_codes;
use stepman::io::config::{EngineConfig, load_config, write_config};
use stepman::io::env::ProcessEnv;
use stepman::io::fetch::SystemFetcher;
use stepman::io::library::StepLibStore;
use stepman::io::paths::StepmanPaths;
use stepman::io::retry::RetryPolicy;
use stepman::preload::{PreloadOptions, preload_steps};
use stepman::prepare::{StepCommand, prepare_step};
use stepman::toolkit::Toolkits;
use tracing::info;

#[derive(Parser)]
#[command(
    name = "stepman",
    version,
    about = "Resolve, activate and cache CI steps"
)]
struct Cli {
    /// Never touch the network; only cached steps can be activated.
    #[arg(long, global = true)]
    offline: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Make a step library available locally.
    Setup {
        #[arg(long)]
        library: String,
    },
    /// Refresh a set-up step library.
    Update {
        #[arg(long)]
        library: String,
    },
    /// Materialise a step and print where it lives as JSON.
    Activate(ActivateArgs),
    /// Download retained versions of every step of a library into the cache.
    Preload(PreloadArgs),
    /// Check toolkits and install missing toolchains.
    Toolkits {
        /// Only report; do not install.
        #[arg(long)]
        check_only: bool,
    },
    /// Print the effective configuration.
    Config {
        /// Write the defaults to `config.toml` when it does not exist yet.
        #[arg(long)]
        init: bool,
    },
}

#[derive(Args)]
struct ActivateArgs {
    /// Step reference, e.g. `script@1`, `path::./my-step`, `git::https://host/step.git@1.0.0`.
    reference: String,
    /// Library used for references without a source.
    #[arg(long)]
    default_library: Option<String>,
    /// Directory the step is copied into.
    #[arg(long)]
    step_dir: PathBuf,
    /// Directory receiving `current_step.yml`.
    #[arg(long)]
    work_dir: PathBuf,
    /// The library was already refreshed during this workflow run.
    #[arg(long)]
    did_steplib_update: bool,
    /// Also prepare the step's toolkit and print the run command.
    #[arg(long)]
    prepare: bool,
}

#[derive(Args)]
struct PreloadArgs {
    #[arg(long)]
    library: String,
    /// Only preload steps of this maintainer.
    #[arg(long)]
    maintainer: Option<String>,
    #[arg(long, default_value_t = 2)]
    num_major: usize,
    #[arg(long, default_value_t = 3)]
    num_minor: usize,
    #[arg(long, default_value_t = 12)]
    latest_minors_since_months: u32,
    #[arg(long, default_value_t = 2)]
    patches_since_months: u32,
    /// Worker threads; defaults to the configured `workers`.
    #[arg(long)]
    workers: Option<usize>,
}

#[derive(Serialize)]
struct ActivateOutput {
    activated: ActivatedStep,
    #[serde(skip_serializing_if = "Option::is_none")]
    command: Option<StepCommand>,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("{:#}", err);
        std::process::exit(exit_codes::for_error(&err));
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    stepman::logging::init();

    let home = stepman_home()?;
    let paths = StepmanPaths::new(home);
    let config = load_config(&paths.config_path)?;
    let offline = cli.offline || offline_from_env();

    match cli.command {
        Command::Setup { library } => {
            let store = build_store(&paths, &config)?;
            let route = store.setup(&library)?;
            println!("{}", route.root.display());
            Ok(())
        }
        Command::Update { library } => {
            let store = build_store(&paths, &config)?;
            let collection = store.update(&library)?;
            info!(steps = collection.steps.len(), "library updated");
            Ok(())
        }
        Command::Activate(args) => cmd_activate(&paths, &config, offline, args),
        Command::Preload(args) => cmd_preload(&paths, &config, args),
        Command::Toolkits { check_only } => cmd_toolkits(&paths, &config, check_only),
        Command::Config { init } => {
            if init && !paths.config_path.exists() {
                write_config(&paths.config_path, &config)?;
            }
            print!(
                "{}",
                toml::to_string_pretty(&config).context("serialize config toml")?
            );
            Ok(())
        }
    }
}

fn cmd_activate(
    paths: &StepmanPaths,
    config: &EngineConfig,
    offline: bool,
    args: ActivateArgs,
) -> Result<()> {
    let store = build_store(paths, config)?;
    let step_id = CanonicalStepId::parse(&args.reference, args.default_library.as_deref())?;
    let ctx = ActivationContext {
        store: &store,
        base_dir: env::current_dir().context("read current directory")?,
        executables: ExecutablePolicy::for_host(config.precompiled_steps),
    };
    let request = ActivationRequest {
        step_id: &step_id,
        step_dir: &args.step_dir,
        work_dir: &args.work_dir,
        did_steplib_update: args.did_steplib_update,
        offline,
    };
    let activated = activate_step(&ctx, &request)?;

    let command = if args.prepare {
        let toolkits = build_toolkits(paths, config)?;
        let mut env = ProcessEnv::from_current();
        Some(prepare_step(&toolkits, &mut env, &activated, &step_id)?)
    } else {
        None
    };

    let output = ActivateOutput { activated, command };
    println!(
        "{}",
        serde_json::to_string_pretty(&output).context("serialize activation")?
    );
    Ok(())
}

fn cmd_preload(paths: &StepmanPaths, config: &EngineConfig, args: PreloadArgs) -> Result<()> {
    let store = build_store(paths, config)?;
    let opts = PreloadOptions {
        retention: RetentionPolicy {
            num_major: args.num_major,
            num_minor: args.num_minor,
            latest_minors_since_months: args.latest_minors_since_months,
            patches_since_months: args.patches_since_months,
        },
        maintainer: args.maintainer,
        workers: args.workers.unwrap_or(config.workers),
        now: Utc::now(),
    };
    preload_steps(&store, &args.library, &opts)?;
    Ok(())
}

fn cmd_toolkits(paths: &StepmanPaths, config: &EngineConfig, check_only: bool) -> Result<()> {
    let toolkits = build_toolkits(paths, config)?;
    let env = ProcessEnv::from_current();
    for toolkit in toolkits.all() {
        let check = toolkit.check(&env)?;
        let found = check
            .found
            .as_ref()
            .map(|tool| match &tool.version {
                Some(version) => format!("{} ({version})", tool.path.display()),
                None => tool.path.display().to_string(),
            })
            .unwrap_or_else(|| "not found".to_string());
        println!("{}: {found}", toolkit.name());
        if check.install_required && !check_only {
            toolkit
                .install()
                .with_context(|| format!("install {} toolkit", toolkit.name()))?;
            println!("{}: installed", toolkit.name());
        }
    }
    Ok(())
}

fn build_store(paths: &StepmanPaths, config: &EngineConfig) -> Result<StepLibStore> {
    let fetcher = SystemFetcher::new(config.download.timeout())?;
    Ok(StepLibStore::new(
        paths.clone(),
        Arc::new(fetcher),
        RetryPolicy::from_config(&config.download),
    ))
}

fn build_toolkits(paths: &StepmanPaths, config: &EngineConfig) -> Result<Toolkits> {
    let fetcher = SystemFetcher::new(config.download.timeout())?;
    Ok(Toolkits::new(
        &paths.toolkits_dir,
        config.go.clone(),
        Arc::new(fetcher),
        RetryPolicy::from_config(&config.download),
    ))
}

fn stepman_home() -> Result<PathBuf> {
    if let Some(home) = env::var_os("STEPMAN_HOME").filter(|h| !h.is_empty()) {
        return Ok(PathBuf::from(home));
    }
    let home = env::var_os("HOME")
        .filter(|h| !h.is_empty())
        .ok_or_else(|| anyhow!("neither STEPMAN_HOME nor HOME is set"))?;
    Ok(PathBuf::from(home).join(".stepman"))
}

fn offline_from_env() -> bool {
    ["STEPMAN_OFFLINE_MODE", "BITRISE_OFFLINE_MODE"]
        .iter()
        .filter_map(|key| env::var(key).ok())
        .any(|value| matches!(value.trim().to_ascii_lowercase().as_str(), "true" | "1"))
}
