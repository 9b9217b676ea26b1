//! Library URI → on-disk folder alias mapping (`routing.json`).

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::io::fs_util::write_atomic;
use crate::io::integrity::sha256_bytes;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteTable {
    #[serde(default)]
    routes: BTreeMap<String, String>,
}

impl RouteTable {
    /// Load the table; a missing file is an empty table.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parse {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let mut payload = serde_json::to_string_pretty(self).context("serialize routes")?;
        payload.push('\n');
        write_atomic(path, payload.as_bytes())
    }

    pub fn alias(&self, library_uri: &str) -> Option<&str> {
        self.routes.get(library_uri).map(String::as_str)
    }

    /// Insert a route if missing and return its alias.
    pub fn ensure(&mut self, library_uri: &str) -> String {
        self.routes
            .entry(library_uri.to_string())
            .or_insert_with(|| alias_for(library_uri))
            .clone()
    }

    pub fn remove(&mut self, library_uri: &str) -> Option<String> {
        self.routes.remove(library_uri)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.routes.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Stable folder name derived from the library URI.
pub fn alias_for(library_uri: &str) -> String {
    let digest = sha256_bytes(library_uri.as_bytes());
    digest[..16].to_string()
}
