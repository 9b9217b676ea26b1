//! Content cache of step sources, keyed by `(step id, exact version)`.
//!
//! Entries are immutable once written. A put stages into a private directory
//! and renames it into place, so a visible entry is always complete and
//! concurrent writers of different keys never touch the same paths.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::io::fs_util::{copy_dir, remove_path};

static STAGING_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone)]
pub struct StepCache {
    root: PathBuf,
}

impl StepCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn entry_dir(&self, id: &str, version: &str) -> PathBuf {
        self.root.join(id).join(version)
    }

    pub fn has(&self, id: &str, version: &str) -> bool {
        self.entry_dir(id, version).is_dir()
    }

    /// Populate the entry through `fill` unless it already exists.
    ///
    /// Returns the entry directory. `fill` receives an empty staging directory
    /// path that does not exist yet.
    pub fn put_with<F>(&self, id: &str, version: &str, fill: F) -> Result<PathBuf>
    where
        F: FnOnce(&Path) -> Result<()>,
    {
        let entry = self.entry_dir(id, version);
        if entry.is_dir() {
            debug!(id, version, "cache entry already present");
            return Ok(entry);
        }
        let parent = self.root.join(id);
        fs::create_dir_all(&parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
        let staging = parent.join(format!(
            ".{version}.partial.{}.{}",
            std::process::id(),
            STAGING_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        remove_path(&staging)?;

        if let Err(err) = fill(&staging) {
            if let Err(cleanup) = remove_path(&staging) {
                warn!(err = %cleanup, "failed to remove staging directory");
            }
            return Err(err);
        }
        if !staging.is_dir() {
            return Err(anyhow::anyhow!(
                "cache fill for {id}@{version} produced no directory"
            ));
        }

        match fs::rename(&staging, &entry) {
            Ok(()) => {
                debug!(id, version, "cache entry stored");
                Ok(entry)
            }
            Err(_) if entry.is_dir() => {
                // Another writer completed the same key first.
                remove_path(&staging)?;
                Ok(entry)
            }
            Err(err) => {
                if let Err(cleanup) = remove_path(&staging) {
                    warn!(err = %cleanup, "failed to remove staging directory");
                }
                Err(err).with_context(|| format!("store cache entry {}", entry.display()))
            }
        }
    }

    /// Copy an entry into `dest`; returns false on a miss.
    pub fn get(&self, id: &str, version: &str, dest: &Path) -> Result<bool> {
        let entry = self.entry_dir(id, version);
        if !entry.is_dir() {
            return Ok(false);
        }
        copy_dir(&entry, dest)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use anyhow::anyhow;

    use super::*;

    #[test]
    fn put_then_get_copies_contents() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cache = StepCache::new(temp.path().join("cache"));
        assert!(!cache.has("script", "1.0.0"));

        cache
            .put_with("script", "1.0.0", |dir| {
                fs::create_dir_all(dir)?;
                fs::write(dir.join("step.sh"), "echo hi\n")?;
                Ok(())
            })
            .expect("put");
        assert!(cache.has("script", "1.0.0"));

        let dest = temp.path().join("dest");
        assert!(cache.get("script", "1.0.0", &dest).expect("get"));
        assert_eq!(
            fs::read_to_string(dest.join("step.sh")).expect("read"),
            "echo hi\n"
        );
    }

    #[test]
    fn existing_entry_is_never_refilled() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cache = StepCache::new(temp.path());
        let fill = |dir: &Path| -> Result<()> {
            fs::create_dir_all(dir)?;
            fs::write(dir.join("v"), "first")?;
            Ok(())
        };
        cache.put_with("s", "1.0.0", fill).expect("put");

        let mut called = false;
        cache
            .put_with("s", "1.0.0", |_| {
                called = true;
                Ok(())
            })
            .expect("put");
        assert!(!called);
    }

    #[test]
    fn failed_fill_leaves_no_entry() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cache = StepCache::new(temp.path());
        let err = cache
            .put_with("s", "1.0.0", |dir| {
                fs::create_dir_all(dir)?;
                fs::write(dir.join("half"), "x")?;
                Err(anyhow!("network down"))
            })
            .expect_err("fails");
        assert_eq!(err.to_string(), "network down");
        assert!(!cache.has("s", "1.0.0"));
        let leftovers = fs::read_dir(temp.path().join("s")).expect("dir").count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn miss_returns_false() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cache = StepCache::new(temp.path());
        assert!(!cache.get("s", "2.0.0", &temp.path().join("d")).expect("get"));
    }
}
