//! Test-only fixtures: an on-disk step library and an offline [`Fetcher`].

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use anyhow::{Context, Result, anyhow};

use crate::io::fetch::Fetcher;
use crate::io::fs_util::copy_dir;
use crate::io::git::CloneOptions;

/// Repository URL the fixture library records as a step's source.
pub fn step_repo_url(id: &str) -> String {
    format!("https://git.example.com/steps/{id}.git")
}

/// Commit the fixture library pins for `id@version`.
pub fn step_commit(id: &str, version: &str) -> String {
    format!("{id}-{version}-commit")
}

/// A local step library addressed through a `file://` URI.
///
/// Step sources are served by a [`FakeFetcher`] through `git` download
/// locations, the way a real library points at per-step repositories.
#[derive(Debug, Clone)]
pub struct FixtureLibrary {
    library_dir: PathBuf,
    sources_dir: PathBuf,
}

impl FixtureLibrary {
    /// Create an empty library under `root`.
    pub fn new(root: &Path) -> Result<Self> {
        let library_dir = root.join("library");
        let sources_dir = root.join("sources");
        fs::create_dir_all(library_dir.join("steps"))
            .with_context(|| format!("create directory {}", library_dir.display()))?;
        fs::create_dir_all(&sources_dir)
            .with_context(|| format!("create directory {}", sources_dir.display()))?;
        write_file(
            &library_dir.join("steplib.yml"),
            "format_version: 1.0.0\ndownload_locations:\n  - type: git\n    src: source/git\n",
        )?;
        Ok(Self {
            library_dir,
            sources_dir,
        })
    }

    pub fn uri(&self) -> String {
        format!("file://{}", self.library_dir.display())
    }

    pub fn library_dir(&self) -> &Path {
        &self.library_dir
    }

    /// Index `id@version` without serving its source.
    ///
    /// `extra_yaml` is appended to the generated `step.yml`.
    pub fn add_step(&self, id: &str, version: &str, extra_yaml: &str) -> Result<PathBuf> {
        let path = self
            .library_dir
            .join("steps")
            .join(id)
            .join(version)
            .join("step.yml");
        write_file(&path, &step_yml(id, version, extra_yaml))?;
        Ok(path)
    }

    /// Index `id@version` and serve its source repository through `fetcher`.
    pub fn publish(
        &self,
        fetcher: &FakeFetcher,
        id: &str,
        version: &str,
        extra_yaml: &str,
    ) -> Result<PathBuf> {
        self.add_step(id, version, extra_yaml)?;
        let source = self.sources_dir.join(id).join(version);
        write_file(&source.join("step.yml"), &step_yml(id, version, extra_yaml))?;
        write_file(
            &source.join("step.sh"),
            &format!("#!/bin/bash\necho \"{id} {version}\"\n"),
        )?;
        fetcher.serve_repo(&step_repo_url(id), Some(version), &source);
        fetcher.set_head_commit(&step_repo_url(id), Some(version), &step_commit(id, version));
        Ok(source)
    }

    /// Write `steps/<id>/step-info.yml`.
    pub fn set_step_info(&self, id: &str, yaml: &str) -> Result<()> {
        write_file(
            &self.library_dir.join("steps").join(id).join("step-info.yml"),
            yaml,
        )
    }
}

fn step_yml(id: &str, version: &str, extra_yaml: &str) -> String {
    format!(
        "title: {id}\nsource:\n  git: {}\n  commit: {}\n{extra_yaml}",
        step_repo_url(id),
        step_commit(id, version)
    )
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))
}

/// Serves clones and downloads from local fixtures and counts every call.
#[derive(Debug, Default)]
pub struct FakeFetcher {
    repos: Mutex<BTreeMap<String, PathBuf>>,
    commits: Mutex<BTreeMap<String, String>>,
    downloads: Mutex<BTreeMap<String, Vec<u8>>>,
    checkouts: Mutex<BTreeMap<PathBuf, String>>,
    clone_calls: AtomicUsize,
    pull_calls: AtomicUsize,
    download_calls: AtomicUsize,
}

fn repo_key(url: &str, reference: Option<&str>) -> String {
    match reference {
        Some(reference) if !reference.is_empty() => format!("{url}@{reference}"),
        _ => url.to_string(),
    }
}

impl FakeFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clones of `url` (at `reference`, if given) copy `dir`.
    pub fn serve_repo(&self, url: &str, reference: Option<&str>, dir: &Path) {
        self.repos
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(repo_key(url, reference), dir.to_path_buf());
    }

    pub fn set_head_commit(&self, url: &str, reference: Option<&str>, commit: &str) {
        self.commits
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(repo_key(url, reference), commit.to_string());
    }

    pub fn serve_download(&self, url: &str, body: impl Into<Vec<u8>>) {
        self.downloads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(url.to_string(), body.into());
    }

    pub fn clone_calls(&self) -> usize {
        self.clone_calls.load(Ordering::SeqCst)
    }

    pub fn pull_calls(&self) -> usize {
        self.pull_calls.load(Ordering::SeqCst)
    }

    pub fn download_calls(&self) -> usize {
        self.download_calls.load(Ordering::SeqCst)
    }

    /// Clone, pull and download calls combined.
    pub fn network_calls(&self) -> usize {
        self.clone_calls() + self.pull_calls() + self.download_calls()
    }
}

impl Fetcher for FakeFetcher {
    fn clone_repo(&self, url: &str, dest: &Path, opts: &CloneOptions<'_>) -> Result<()> {
        self.clone_calls.fetch_add(1, Ordering::SeqCst);
        let key = repo_key(url, opts.reference);
        let source = {
            let repos = self.repos.lock().unwrap_or_else(PoisonError::into_inner);
            repos.get(&key).or_else(|| repos.get(url)).cloned()
        }
        .ok_or_else(|| anyhow!("fatal: repository '{key}' not found"))?;
        copy_dir(&source, dest)?;
        self.checkouts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(dest.to_path_buf(), key);
        Ok(())
    }

    fn pull(&self, _repo: &Path) -> Result<()> {
        self.pull_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn head_commit(&self, repo: &Path) -> Result<String> {
        let key = self
            .checkouts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(repo)
            .cloned()
            .ok_or_else(|| anyhow!("not a fixture checkout: {}", repo.display()))?;
        Ok(self
            .commits
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .cloned()
            .unwrap_or_else(|| "0000000".to_string()))
    }

    fn download(&self, url: &str, dest: &Path) -> Result<()> {
        self.download_calls.fetch_add(1, Ordering::SeqCst);
        let body = self
            .downloads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(url)
            .cloned()
            .ok_or_else(|| anyhow!("GET {url} returned 404 Not Found"))?;
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        fs::write(dest, body).with_context(|| format!("write {}", dest.display()))
    }
}
