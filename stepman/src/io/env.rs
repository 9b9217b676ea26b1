//! Injectable process environment.
//!
//! Toolkit bootstrap needs to extend `PATH` and set toolchain variables for
//! the step processes it later spawns. The engine never mutates the global
//! environment; it edits a `ProcessEnv` snapshot and applies it to each
//! `Command` it builds. Callers hand the same snapshot to the step runner.

use std::collections::{BTreeMap, BTreeSet};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessEnv {
    vars: BTreeMap<String, String>,
    bootstrapped: BTreeSet<String>,
}

impl ProcessEnv {
    /// Snapshot of the current process environment.
    pub fn from_current() -> Self {
        Self {
            vars: std::env::vars().collect(),
            bootstrapped: BTreeSet::new(),
        }
    }

    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: vars
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            bootstrapped: BTreeSet::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(key.into(), value.into());
    }

    pub fn vars(&self) -> &BTreeMap<String, String> {
        &self.vars
    }

    /// Put `dir` in front of the existing `PATH` entries.
    pub fn prepend_path(&mut self, dir: &Path) {
        let mut entries = vec![dir.to_path_buf()];
        if let Some(current) = self.get("PATH") {
            entries.extend(std::env::split_paths(current).filter(|p| p != dir));
        }
        let joined = std::env::join_paths(entries)
            .map(|p: OsString| p.to_string_lossy().into_owned())
            .unwrap_or_else(|_| dir.to_string_lossy().into_owned());
        self.set("PATH", joined);
    }

    /// Locate an executable on this environment's `PATH`.
    pub fn lookup_program(&self, name: &str) -> Option<PathBuf> {
        let path = self.get("PATH")?;
        std::env::split_paths(path)
            .map(|dir| dir.join(name))
            .find(|candidate| is_executable_file(candidate))
    }

    /// Replace the child's environment with this snapshot.
    pub fn apply(&self, cmd: &mut Command) {
        cmd.env_clear().envs(&self.vars);
    }

    pub fn is_bootstrapped(&self, toolkit: &str) -> bool {
        self.bootstrapped.contains(toolkit)
    }

    /// Record that `toolkit` finished bootstrapping; returns false if it already had.
    pub fn mark_bootstrapped(&mut self, toolkit: &str) -> bool {
        self.bootstrapped.insert(toolkit.to_string())
    }
}

#[cfg(unix)]
fn is_executable_file(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    path.metadata()
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable_file(path: &Path) -> bool {
    path.is_file()
}
