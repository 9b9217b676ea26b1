//! Typed failures surfaced by step activation, preload and toolkit preparation.
//!
//! Orchestration code returns `anyhow::Result`; these variants travel inside
//! the `anyhow::Error` and can be recovered with `downcast_ref::<StepError>()`.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StepError {
    #[error("invalid version constraint '{version}' for step '{id}'")]
    InvalidConstraint { id: String, version: String },

    #[error("step '{id}' not found in library '{library}'")]
    StepNotFound { library: String, id: String },

    #[error("no version of step '{id}' matches '{constraint}' in library '{library}'")]
    VersionNotFound {
        library: String,
        id: String,
        constraint: String,
    },

    #[error("no route found for library '{0}'")]
    NoRoute(String),

    #[error(
        "{id}@{version}: version is not available in the local cache and offline mode is set. Other versions available in the local cache:{}",
        format_cached(.cached)
    )]
    OfflineUnavailable {
        id: String,
        version: String,
        cached: Vec<String>,
    },

    #[error("no download location defined for step '{0}'")]
    NoDownloadLocation(String),

    #[error("invalid download location type '{kind}' for step '{id}'")]
    InvalidDownloadLocation { id: String, kind: String },

    #[error("failed to download {what}: {reason}")]
    DownloadFailed { what: String, reason: String },

    #[error(
        "only SHA256 hashes supported at this time, make sure to prefix the hash with `sha256-`. Found hash value: {0}"
    )]
    UnsupportedHashAlgorithm(String),

    #[error("hash mismatch: expected sha256-{expected}, got sha256-{actual}")]
    HashMismatch { expected: String, actual: String },

    #[error("http URLs are not supported, use https: {0}")]
    InsecureUrl(String),

    #[error("{tool} toolchain {found} is older than the required {required}")]
    ToolchainTooOld {
        tool: String,
        found: String,
        required: String,
    },

    #[error("step '{id}' does not declare the {toolkit} toolkit configuration")]
    MissingToolkit { id: String, toolkit: String },

    #[error("build failed in {}:\n{output}", .dir.display())]
    BuildFailed { dir: PathBuf, output: String },

    #[error("unsupported step source '{0}'")]
    UnsupportedSource(String),
}

fn format_cached(cached: &[String]) -> String {
    if cached.is_empty() {
        return " (none)".to_string();
    }
    cached.iter().map(|v| format!("\n- {v}")).collect()
}
