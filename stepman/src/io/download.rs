//! Artifact downloads: zipped step sources and verified executables.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::error::StepError;
use crate::io::fetch::Fetcher;
use crate::io::fs_util::{remove_path, set_executable};
use crate::io::integrity::{ensure_https, parse_declared_hash, sha256_file};
use crate::io::retry::{RetryPolicy, retry};

/// Download a zip archive and extract it into `dest_dir`.
#[instrument(skip_all, fields(url, dest = %dest_dir.display()))]
pub fn download_and_unzip(
    fetcher: &dyn Fetcher,
    url: &str,
    dest_dir: &Path,
    policy: RetryPolicy,
) -> Result<()> {
    let archive_path = sibling_temp_path(dest_dir, "zip")?;
    let result = retry(policy, "download zip", || fetcher.download(url, &archive_path))
        .and_then(|()| extract_zip(&archive_path, dest_dir));
    if let Err(err) = remove_path(&archive_path) {
        warn!(err = %err, "failed to remove downloaded archive");
    }
    result
}

pub fn extract_zip(archive_path: &Path, dest_dir: &Path) -> Result<()> {
    let file =
        File::open(archive_path).with_context(|| format!("open {}", archive_path.display()))?;
    let mut archive = zip::ZipArchive::new(file)
        .with_context(|| format!("read zip archive {}", archive_path.display()))?;
    fs::create_dir_all(dest_dir)
        .with_context(|| format!("create directory {}", dest_dir.display()))?;
    archive
        .extract(dest_dir)
        .with_context(|| format!("extract into {}", dest_dir.display()))?;
    debug!(entries = archive.len(), "archive extracted");
    Ok(())
}

/// Download a precompiled executable to `dest`, verifying its declared hash.
///
/// The body lands in a temporary file next to `dest` and is only renamed into
/// place after the digest matches. An existing `dest` with a matching digest
/// is reused without touching the network.
#[instrument(skip_all, fields(url, dest = %dest.display()))]
pub fn download_executable(
    fetcher: &dyn Fetcher,
    url: &str,
    declared_hash: &str,
    dest: &Path,
    policy: RetryPolicy,
) -> Result<PathBuf> {
    ensure_https(url)?;
    let expected = parse_declared_hash(declared_hash)?;

    if dest.is_file() {
        match sha256_file(dest) {
            Ok(actual) if actual == expected => {
                debug!("executable already present with matching hash");
                set_executable(dest)?;
                return Ok(dest.to_path_buf());
            }
            Ok(_) => warn!("existing executable hash differs, downloading again"),
            Err(err) => warn!(err = %err, "failed to hash existing executable"),
        }
    }

    let tmp = sibling_temp_path(dest, "download")?;
    let outcome = retry(policy, "download executable", || fetcher.download(url, &tmp))
        .and_then(|()| {
            let actual = sha256_file(&tmp)?;
            if actual != expected {
                return Err(StepError::HashMismatch {
                    expected: expected.clone(),
                    actual,
                }
                .into());
            }
            set_executable(&tmp)?;
            fs::rename(&tmp, dest)
                .with_context(|| format!("move executable into {}", dest.display()))
        });
    if outcome.is_err() {
        if let Err(err) = remove_path(&tmp) {
            warn!(err = %err, "failed to remove partial download");
        }
    }
    outcome?;
    info!("executable downloaded and verified");
    Ok(dest.to_path_buf())
}

/// `<parent>/.<name>.<suffix>.<pid>`: unique per process, same filesystem as `path`.
fn sibling_temp_path(path: &Path, suffix: &str) -> Result<PathBuf> {
    let parent = path
        .parent()
        .with_context(|| format!("path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let name = path
        .file_name()
        .with_context(|| format!("path missing file name {}", path.display()))?
        .to_string_lossy();
    Ok(parent.join(format!(".{name}.{suffix}.{}", std::process::id())))
}
