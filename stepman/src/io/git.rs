//! Git adapter for library checkouts and step sources.
//!
//! A small, explicit wrapper around `git` subprocess calls.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument};

/// Options for `git clone`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CloneOptions<'a> {
    /// Tag or branch to check out (`--branch`).
    pub reference: Option<&'a str>,
    /// Shallow clone depth (`--depth`).
    pub depth: Option<u32>,
}

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Clone `url` into `dest` (which must not exist or be empty).
    #[instrument(skip_all, fields(url, dest = %dest.display()))]
    pub fn clone_into(url: &str, dest: &Path, opts: &CloneOptions<'_>) -> Result<Git> {
        let parent = dest
            .parent()
            .with_context(|| format!("clone destination missing parent {}", dest.display()))?;
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;

        let mut args: Vec<String> = vec!["clone".to_string(), "--recursive".to_string()];
        if let Some(depth) = opts.depth {
            args.push(format!("--depth={depth}"));
        }
        if let Some(reference) = opts.reference.filter(|r| !r.is_empty()) {
            args.push("--branch".to_string());
            args.push(reference.to_string());
        }
        args.push(url.to_string());
        args.push(dest.to_string_lossy().into_owned());

        debug!(?opts, "cloning repository");
        let refs: Vec<&str> = args.iter().map(String::as_str).collect();
        Git::new(parent).run_checked(&refs)?;
        Ok(Git::new(dest))
    }

    /// Fast-forward the checkout from its upstream.
    #[instrument(skip_all, fields(workdir = %self.workdir.display()))]
    pub fn pull(&self) -> Result<()> {
        self.run_checked(&["pull"])?;
        Ok(())
    }

    /// Full SHA of `HEAD`.
    pub fn head_sha(&self) -> Result<String> {
        let out = self.run_capture(&["rev-parse", "HEAD"])?;
        Ok(out.trim().to_string())
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run_checked(args)?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("git {} failed: {}", args.join(" "), stderr.trim()));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .env("GIT_TERMINAL_PROMPT", "0")
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))
    }
}
