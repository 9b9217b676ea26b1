//! Network boundary: repository clones and HTTP downloads.
//!
//! Everything that leaves the machine goes through [`Fetcher`], so activation
//! and preload can be exercised against local fixtures.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument};

use crate::io::git::{CloneOptions, Git};

pub trait Fetcher: Send + Sync + std::fmt::Debug {
    /// Clone `url` into `dest`.
    fn clone_repo(&self, url: &str, dest: &Path, opts: &CloneOptions<'_>) -> Result<()>;

    /// Update an existing checkout from its upstream.
    fn pull(&self, repo: &Path) -> Result<()>;

    /// Commit currently checked out in `repo`.
    fn head_commit(&self, repo: &Path) -> Result<String>;

    /// Download `url` into the file `dest`.
    fn download(&self, url: &str, dest: &Path) -> Result<()>;
}

/// `git` subprocesses plus a blocking `reqwest` client.
#[derive(Debug, Clone)]
pub struct SystemFetcher {
    client: reqwest::blocking::Client,
}

impl SystemFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("stepman/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("build http client")?;
        Ok(Self { client })
    }
}

impl Fetcher for SystemFetcher {
    fn clone_repo(&self, url: &str, dest: &Path, opts: &CloneOptions<'_>) -> Result<()> {
        Git::clone_into(url, dest, opts).map(|_| ())
    }

    fn pull(&self, repo: &Path) -> Result<()> {
        Git::new(repo).pull()
    }

    fn head_commit(&self, repo: &Path) -> Result<String> {
        Git::new(repo).head_sha()
    }

    #[instrument(skip_all, fields(url, dest = %dest.display()))]
    fn download(&self, url: &str, dest: &Path) -> Result<()> {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        let mut response = self
            .client
            .get(url)
            .send()
            .with_context(|| format!("request {url}"))?;
        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("GET {url} returned {status}"));
        }
        let file = File::create(dest).with_context(|| format!("create {}", dest.display()))?;
        let mut writer = BufWriter::new(file);
        let bytes = response
            .copy_to(&mut writer)
            .with_context(|| format!("read body of {url}"))?;
        writer
            .flush()
            .with_context(|| format!("flush {}", dest.display()))?;
        debug!(bytes, "download finished");
        Ok(())
    }
}
