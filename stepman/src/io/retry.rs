//! Bounded retry with a fixed wait, built on the `backoff` crate.

use std::time::Duration;

use anyhow::Result;
use backoff::backoff::Backoff;
use tracing::warn;

use crate::io::config::DownloadConfig;

/// Fixed delay between attempts, giving up after `attempts` tries in total.
#[derive(Debug, Clone)]
pub struct FixedBackoff {
    delay: Duration,
    retries_left: u32,
}

impl FixedBackoff {
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self {
            delay,
            retries_left: attempts.saturating_sub(1),
        }
    }
}

impl Backoff for FixedBackoff {
    fn next_backoff(&mut self) -> Option<Duration> {
        if self.retries_left == 0 {
            return None;
        }
        self.retries_left -= 1;
        Some(self.delay)
    }
}

/// Retry policy shared by network-touching operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub wait: Duration,
}

impl RetryPolicy {
    pub const fn new(attempts: u32, wait: Duration) -> Self {
        Self { attempts, wait }
    }

    pub fn from_config(cfg: &DownloadConfig) -> Self {
        Self::new(cfg.attempts, cfg.wait())
    }

    /// Single attempt, no waiting.
    pub const fn once() -> Self {
        Self::new(1, Duration::ZERO)
    }
}

/// Run `op` until it succeeds or the policy is exhausted; returns the last error.
pub fn retry<T>(policy: RetryPolicy, label: &str, mut op: impl FnMut() -> Result<T>) -> Result<T> {
    let result = backoff::retry_notify(
        FixedBackoff::new(policy.attempts, policy.wait),
        || op().map_err(backoff::Error::transient),
        |err: anyhow::Error, wait: Duration| {
            warn!(
                operation = label,
                err = %format!("{err:#}"),
                wait_secs = wait.as_secs(),
                "attempt failed, retrying"
            );
        },
    );
    result.map_err(|err| match err {
        backoff::Error::Permanent(err) | backoff::Error::Transient { err, .. } => err,
    })
}
