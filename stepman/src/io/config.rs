//! Engine configuration stored under `<stepman home>/config.toml`.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::constraint::{ConstraintKind, VersionConstraint};

/// Engine configuration (TOML).
///
/// Missing fields default to the values below so an absent file is valid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    /// Number of preload workers.
    pub workers: usize,

    /// Prefer per-platform precompiled executables over step sources.
    pub precompiled_steps: bool,

    pub download: DownloadConfig,

    pub go: GoConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DownloadConfig {
    /// Total attempts per network operation (first try included).
    pub attempts: u32,
    /// Fixed wait between attempts.
    pub wait_secs: u64,
    /// HTTP request timeout.
    pub timeout_secs: u64,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            wait_secs: 3,
            timeout_secs: 300,
        }
    }
}

impl DownloadConfig {
    pub fn wait(&self) -> Duration {
        Duration::from_secs(self.wait_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GoConfig {
    /// Oldest acceptable Go toolchain.
    pub min_version: String,
    /// Base URL for toolchain archives (`go<ver>.<os>-<arch>.tar.gz`).
    pub download_base_url: String,
    pub build_timeout_secs: u64,
    /// Truncate captured build output beyond this many bytes.
    pub output_limit_bytes: usize,
}

impl Default for GoConfig {
    fn default() -> Self {
        Self {
            min_version: "1.21.0".to_string(),
            download_base_url: "https://storage.googleapis.com/golang".to_string(),
            build_timeout_secs: 30 * 60,
            output_limit_bytes: 1024 * 1024,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: 10,
            precompiled_steps: false,
            download: DownloadConfig::default(),
            go: GoConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(anyhow!("workers must be > 0"));
        }
        if self.download.attempts == 0 {
            return Err(anyhow!("download.attempts must be > 0"));
        }
        if self.download.timeout_secs == 0 {
            return Err(anyhow!("download.timeout_secs must be > 0"));
        }
        // Toolchain archives are published under full `major.minor.patch` names.
        if VersionConstraint::classify(&self.go.min_version).kind != ConstraintKind::Fixed {
            return Err(anyhow!(
                "go.min_version must be a full major.minor.patch version, got '{}'",
                self.go.min_version
            ));
        }
        if !self.go.download_base_url.starts_with("https://") {
            return Err(anyhow!("go.download_base_url must be an https URL"));
        }
        if self.go.build_timeout_secs == 0 {
            return Err(anyhow!("go.build_timeout_secs must be > 0"));
        }
        if self.go.output_limit_bytes == 0 {
            return Err(anyhow!("go.output_limit_bytes must be > 0"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `EngineConfig::default()`.
pub fn load_config(path: &Path) -> Result<EngineConfig> {
    if !path.exists() {
        let cfg = EngineConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: EngineConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &EngineConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    crate::io::fs_util::write_atomic(path, buf.as_bytes())
}
