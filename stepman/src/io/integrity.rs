//! SHA-256 verification of downloaded artifacts.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};

use crate::error::StepError;

const SHA256_PREFIX: &str = "sha256-";

/// Extract the hex digest from a declared `sha256-<hex>` hash.
///
/// Any other algorithm prefix, and an empty value, is rejected before a
/// single byte is compared.
pub fn parse_declared_hash(declared: &str) -> Result<String, StepError> {
    let trimmed = declared.trim();
    match trimmed.strip_prefix(SHA256_PREFIX) {
        Some(hex_digest) if !hex_digest.is_empty() => Ok(hex_digest.to_ascii_lowercase()),
        _ => Err(StepError::UnsupportedHashAlgorithm(declared.to_string())),
    }
}

/// Only `https://` URLs may serve executables.
pub fn ensure_https(url: &str) -> Result<(), StepError> {
    if url.starts_with("https://") {
        Ok(())
    } else {
        Err(StepError::InsecureUrl(url.to_string()))
    }
}

/// Hex-encoded SHA-256 of a file's contents.
pub fn sha256_file(path: &Path) -> Result<String> {
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut chunk = [0u8; 64 * 1024];
    loop {
        let n = reader
            .read(&mut chunk)
            .with_context(|| format!("read {}", path.display()))?;
        if n == 0 {
            break;
        }
        hasher.update(&chunk[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

pub fn sha256_bytes(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Compare a file against an expected hex digest.
pub fn verify_file(path: &Path, expected_hex: &str) -> Result<()> {
    let actual = sha256_file(path)?;
    if actual != expected_hex {
        return Err(StepError::HashMismatch {
            expected: expected_hex.to_string(),
            actual,
        }
        .into());
    }
    Ok(())
}
